// Control channel: typed command datagrams to the current device address
//
// Fire-and-forget. Delivery is not guaranteed, nothing retries here, and
// a missing ack is not an error; supervision happens against telemetry.
// Only one issuer may hold the channel at a time (the motion controller
// while it runs, or teleop), which serializes command traffic.

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::messages::{ControlCommand, DeviceReply};
use crate::telemetry::TelemetryState;

pub struct ControlChannel {
    socket: UdpSocket,
    state: TelemetryState,
    /// Configured device address, used until a heartbeat teaches a better one.
    fallback: SocketAddr,
    seq: u64,
}

impl ControlChannel {
    pub async fn bind(state: TelemetryState, fallback: SocketAddr) -> Result<Self, RuntimeError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|source| RuntimeError::Bind {
                role: "control",
                port: 0,
                source,
            })?;
        Ok(Self {
            socket,
            state,
            fallback,
            seq: 0,
        })
    }

    /// Address the next send will target: the latest heartbeat-learned
    /// peer, or the configured fallback before any heartbeat arrives.
    pub fn target(&self) -> SocketAddr {
        self.state.peer().unwrap_or(self.fallback)
    }

    /// Serialize and transmit one command, tagged with the next sequence
    /// number. Send failures are logged and swallowed; the caller keeps
    /// supervising via telemetry and times out if the device went away.
    pub async fn send(&mut self, command: ControlCommand) -> u64 {
        self.seq += 1;
        let msg = command.into_wire(self.seq);
        let target = self.target();
        match serde_json::to_vec(&msg) {
            Ok(bytes) => match self.socket.send_to(&bytes, target).await {
                Ok(_) => debug!("sent {:?} to {}", msg, target),
                Err(e) => warn!("control send to {} failed: {}", target, e),
            },
            Err(e) => warn!("could not encode control message: {}", e),
        }
        self.seq
    }

    pub async fn stop(&mut self) -> u64 {
        self.send(ControlCommand::STOP).await
    }

    /// Drain any queued device replies without blocking. Acks are
    /// advisory; this exists for logging and tests.
    pub fn try_recv_ack(&self) -> Option<DeviceReply> {
        let mut buf = [0u8; 512];
        while let Ok((len, from)) = self.socket.try_recv_from(&mut buf) {
            match serde_json::from_slice::<DeviceReply>(&buf[..len]) {
                Ok(reply) => return Some(reply),
                Err(e) => debug!("ignoring non-ack reply from {}: {}", from, e),
            }
        }
        None
    }

    pub fn last_seq(&self) -> u64 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::ControlMessage;
    use std::time::Duration;

    async fn recv_msg(socket: &UdpSocket) -> ControlMessage {
        let mut buf = [0u8; 1024];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .expect("timed out waiting for command")
            .unwrap();
        serde_json::from_slice(&buf[..len]).unwrap()
    }

    #[tokio::test]
    async fn sends_to_fallback_with_monotonic_seq() {
        let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let state = TelemetryState::new();
        let mut channel = ControlChannel::bind(state, device.local_addr().unwrap())
            .await
            .unwrap();

        let s1 = channel.send(ControlCommand::Motor { left: 10, right: 10 }).await;
        let s2 = channel.stop().await;
        assert_eq!((s1, s2), (1, 2));

        let first = recv_msg(&device).await;
        assert_eq!(first.seq(), 1);
        let second = recv_msg(&device).await;
        assert!(matches!(
            second,
            ControlMessage::Motor { left: 0, right: 0, seq: 2, .. }
        ));
    }

    #[tokio::test]
    async fn heartbeat_learned_peer_overrides_fallback() {
        let configured = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let learned = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let state = TelemetryState::new();
        let mut channel = ControlChannel::bind(state.clone(), configured.local_addr().unwrap())
            .await
            .unwrap();

        channel.send(ControlCommand::STOP).await;
        recv_msg(&configured).await;

        state.learn_peer(learned.local_addr().unwrap());
        channel.send(ControlCommand::STOP).await;
        let msg = recv_msg(&learned).await;
        assert_eq!(msg.seq(), 2);
    }
}
