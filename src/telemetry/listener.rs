// Telemetry listener: receives device datagrams and feeds the state store
//
// Sole writer of TelemetryState and the peer register. Malformed datagrams
// are counted and dropped; they must never take the listener down.

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use super::state::TelemetryState;
use crate::error::RuntimeError;
use crate::messages::TelemetryMessage;

pub struct TelemetryListener {
    socket: UdpSocket,
    state: TelemetryState,
    /// Control port to pair with a heartbeat's source IP.
    ctrl_port: u16,
}

impl TelemetryListener {
    pub async fn bind(
        port: u16,
        ctrl_port: u16,
        state: TelemetryState,
    ) -> Result<Self, RuntimeError> {
        let socket = UdpSocket::bind(("0.0.0.0", port))
            .await
            .map_err(|source| RuntimeError::Bind {
                role: "telemetry",
                port,
                source,
            })?;
        Ok(Self {
            socket,
            state,
            ctrl_port,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RuntimeError> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive loop; runs until the task is dropped at shutdown.
    pub async fn run(self) {
        info!(
            "telemetry listener on {}",
            self.socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".into())
        );
        let mut buf = [0u8; 2048];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => self.ingest(&buf[..len], from),
                Err(e) => {
                    // Transient receive errors (e.g. ICMP-induced) are not fatal.
                    warn!("telemetry recv error: {}", e);
                }
            }
        }
    }

    /// Parse one datagram and update the store. Split out from the socket
    /// loop so the parse/dispatch path is testable without a network.
    pub fn ingest(&self, data: &[u8], from: SocketAddr) {
        match serde_json::from_slice::<TelemetryMessage>(data) {
            Ok(TelemetryMessage::Alive(alive)) => {
                let peer = SocketAddr::new(from.ip(), self.ctrl_port);
                if self.state.learn_peer(peer) {
                    info!("device {} ({}) now at {}", alive.device, alive.mode, peer);
                }
                self.state.record(TelemetryMessage::Alive(alive));
            }
            Ok(msg) => self.state.record(msg),
            Err(e) => {
                self.state.note_dropped();
                debug!("dropping malformed telemetry from {}: {}", from, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{AliveSample, EncoderCounts, EncoderSample};

    async fn listener_for_test(state: TelemetryState) -> TelemetryListener {
        TelemetryListener::bind(0, 9000, state).await.unwrap()
    }

    #[tokio::test]
    async fn ingest_updates_the_matching_slot() {
        let state = TelemetryState::new();
        let listener = listener_for_test(state.clone()).await;
        let from: SocketAddr = "192.168.4.1:5555".parse().unwrap();

        let msg = TelemetryMessage::Encoders(EncoderSample {
            counts: EncoderCounts { m1: 10, m2: 20, m3: 10, m4: 20 },
            ts: 1,
        });
        listener.ingest(serde_json::to_vec(&msg).unwrap().as_slice(), from);
        assert_eq!(state.encoders().unwrap().sample.counts.left(), 10);
    }

    #[tokio::test]
    async fn malformed_datagram_is_counted_not_fatal() {
        let state = TelemetryState::new();
        let listener = listener_for_test(state.clone()).await;
        let from: SocketAddr = "192.168.4.1:5555".parse().unwrap();

        listener.ingest(b"{{{garbage", from);
        listener.ingest(b"", from);
        assert_eq!(state.dropped_packets(), 2);
        assert!(state.encoders().is_none());
    }

    #[tokio::test]
    async fn alive_learns_peer_from_source_ip() {
        let state = TelemetryState::new();
        let listener = listener_for_test(state.clone()).await;
        let from: SocketAddr = "192.168.4.1:40123".parse().unwrap();

        let msg = TelemetryMessage::Alive(AliveSample {
            device: "ESP32_Robot".into(),
            ip: "192.168.4.1".into(),
            mode: "AP".into(),
            ts: 5,
        });
        listener.ingest(serde_json::to_vec(&msg).unwrap().as_slice(), from);

        // Peer is the heartbeat's source IP paired with the control port,
        // not the heartbeat's ephemeral source port.
        assert_eq!(state.peer(), Some("192.168.4.1:9000".parse().unwrap()));
        assert_eq!(state.alive().unwrap().sample.device, "ESP32_Robot");
    }

    #[tokio::test]
    async fn receives_over_loopback() {
        let state = TelemetryState::new();
        let listener = listener_for_test(state.clone()).await;
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(listener.run());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = TelemetryMessage::Encoders(EncoderSample {
            counts: EncoderCounts { m1: 7, m2: 7, m3: 7, m4: 7 },
            ts: 9,
        });
        let target = SocketAddr::new("127.0.0.1".parse().unwrap(), addr.port());
        sender
            .send_to(&serde_json::to_vec(&msg).unwrap(), target)
            .await
            .unwrap();

        for _ in 0..100 {
            if state.encoders().is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(state.encoders().unwrap().sample.counts.left(), 7);
        task.abort();
    }
}
