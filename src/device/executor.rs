// Device executor: Receive -> Run -> Stop -> Ack
//
// Interprets control datagrams against the drive hardware and publishes
// encoder telemetry plus a periodic alive heartbeat. While one move_ticks
// command runs, no new command is processed (coordinator timeouts are
// sized above the hard ceiling to absorb that), but the encoder stream
// keeps flowing from inside the move loop so supervision never goes blind.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::{interval, interval_at};
use tracing::{debug, info, warn};

use super::DriveHardware;
use crate::config::{
    ALIVE_INTERVAL, DEVICE_TICK, ENCODER_TELEM_INTERVAL, HARD_CEILING, clamp_speed,
};
use crate::error::RuntimeError;
use crate::messages::{
    AliveSample, ControlMessage, DeviceReply, EncoderCounts, EncoderSample, TelemetryMessage,
    now_ms,
};

/// Outbound encoder stream published while a move runs, so the
/// coordinator sees live counts instead of a gap for the whole move.
pub struct EncoderFeed<'a> {
    socket: &'a UdpSocket,
    target: SocketAddr,
}

impl<'a> EncoderFeed<'a> {
    pub fn new(socket: &'a UdpSocket, target: SocketAddr) -> Self {
        Self { socket, target }
    }

    async fn publish(&self, left: i64, right: i64) {
        send_telemetry(self.socket, &encoder_message(left, right), self.target).await;
    }
}

/// Run the bounded move_ticks loop against the hardware. Applies the
/// requested signed speeds, samples encoders at the control tick, and
/// stops both sides once both |delta| targets are met or the ceiling
/// elapses. The stop is unconditional: motors are never left running past
/// the ceiling, no matter how the loop exits. A feed, when given, carries
/// the sampled counts out at the telemetry cadence for the duration of
/// the move. Returns the achieved deltas.
pub async fn drive_to_ticks<H: DriveHardware>(
    hardware: &mut H,
    left_ticks: i64,
    right_ticks: i64,
    left_speed: i32,
    right_speed: i32,
    tick: Duration,
    ceiling: Duration,
    feed: Option<EncoderFeed<'_>>,
) -> (i64, i64) {
    let (base_left, base_right) = hardware.counts();
    let done = |d_left: i64, d_right: i64| {
        d_left.abs() >= left_ticks.abs() && d_right.abs() >= right_ticks.abs()
    };

    // Already-satisfied targets: re-sending such a command moves nothing.
    if done(0, 0) {
        hardware.set_speeds(0, 0);
        return (0, 0);
    }

    hardware.set_speeds(clamp_speed(left_speed), clamp_speed(right_speed));
    let started = Instant::now();
    let mut last_publish = Instant::now();
    loop {
        tokio::time::sleep(tick).await;
        let (left, right) = hardware.counts();
        if let Some(feed) = &feed {
            if last_publish.elapsed() >= ENCODER_TELEM_INTERVAL {
                feed.publish(left, right).await;
                last_publish = Instant::now();
            }
        }
        if done(left - base_left, right - base_right) {
            break;
        }
        if started.elapsed() >= ceiling {
            warn!("move_ticks hit hard ceiling after {:?}", started.elapsed());
            break;
        }
    }
    hardware.set_speeds(0, 0);

    let (left, right) = hardware.counts();
    (left - base_left, right - base_right)
}

pub struct DeviceExecutor<H: DriveHardware> {
    ctrl: UdpSocket,
    telem: UdpSocket,
    hardware: H,
    device_id: String,
    /// Telemetry port on the coordinator side.
    telem_port: u16,
    /// Telemetry destination: configured initially, then the source IP of
    /// the most recent control packet.
    controller: Option<SocketAddr>,
}

impl<H: DriveHardware> DeviceExecutor<H> {
    pub async fn bind(
        ctrl_port: u16,
        telem_port: u16,
        controller: Option<SocketAddr>,
        hardware: H,
        device_id: impl Into<String>,
    ) -> Result<Self, RuntimeError> {
        let ctrl = UdpSocket::bind(("0.0.0.0", ctrl_port))
            .await
            .map_err(|source| RuntimeError::Bind {
                role: "device control",
                port: ctrl_port,
                source,
            })?;
        let telem = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|source| RuntimeError::Bind {
                role: "device telemetry",
                port: 0,
                source,
            })?;
        Ok(Self {
            ctrl,
            telem,
            hardware,
            device_id: device_id.into(),
            telem_port,
            controller,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RuntimeError> {
        Ok(self.ctrl.local_addr()?)
    }

    /// Serve commands and publish telemetry until shutdown.
    pub async fn run(self) -> Result<(), RuntimeError> {
        let DeviceExecutor {
            ctrl,
            telem,
            mut hardware,
            device_id,
            telem_port,
            mut controller,
        } = self;

        info!(
            "device executor '{}' on {} (telemetry -> {:?})",
            device_id,
            ctrl.local_addr()?,
            controller
        );

        let mut enc_tick = interval(ENCODER_TELEM_INTERVAL);
        // First heartbeat goes out after one full interval, like the
        // firmware's millis()-based schedule.
        let mut alive_tick = interval_at(tokio::time::Instant::now() + ALIVE_INTERVAL, ALIVE_INTERVAL);
        let mut buf = [0u8; 2048];

        loop {
            tokio::select! {
                received = ctrl.recv_from(&mut buf) => match received {
                    Ok((len, from)) => {
                        // Any control packet teaches us where the coordinator lives.
                        controller = Some(SocketAddr::new(from.ip(), telem_port));
                        handle_command(&ctrl, &telem, controller, &mut hardware, &buf[..len], from)
                            .await;
                    }
                    Err(e) => warn!("control recv error: {}", e),
                },
                _ = enc_tick.tick() => {
                    publish_encoders(&telem, &mut hardware, controller).await;
                }
                _ = alive_tick.tick() => {
                    publish_alive(&telem, &device_id, controller).await;
                }
            }
        }
    }
}

async fn handle_command<H: DriveHardware>(
    ctrl: &UdpSocket,
    telem: &UdpSocket,
    controller: Option<SocketAddr>,
    hardware: &mut H,
    data: &[u8],
    from: SocketAddr,
) {
    let msg = match serde_json::from_slice::<ControlMessage>(data) {
        Ok(msg) => msg,
        Err(e) => {
            debug!("ignoring malformed command from {}: {}", from, e);
            return;
        }
    };

    let seq = msg.seq();
    match msg {
        ControlMessage::Motor { left, right, .. } => {
            hardware.set_speeds(clamp_speed(left), clamp_speed(right));
        }
        ControlMessage::Motor4 { m1, m2, m3, m4, .. } => {
            // Legacy 4-motor command on a 2-motor chassis: pair averages.
            hardware.set_speeds(clamp_speed((m1 + m3) / 2), clamp_speed((m2 + m4) / 2));
        }
        ControlMessage::MoveTicks {
            left_ticks,
            right_ticks,
            left_speed,
            right_speed,
            ..
        } => {
            let feed = controller.map(|target| EncoderFeed::new(telem, target));
            let (d_left, d_right) = drive_to_ticks(
                hardware,
                left_ticks,
                right_ticks,
                left_speed,
                right_speed,
                DEVICE_TICK,
                HARD_CEILING,
                feed,
            )
            .await;
            debug!(
                "move_ticks seq {} done: {}/{} of {}/{}",
                seq, d_left, d_right, left_ticks, right_ticks
            );
        }
    }

    let ack = DeviceReply::Ack { seq, ts: now_ms() };
    match serde_json::to_vec(&ack) {
        Ok(bytes) => {
            if let Err(e) = ctrl.send_to(&bytes, from).await {
                debug!("ack send to {} failed: {}", from, e);
            }
        }
        Err(e) => warn!("could not encode ack: {}", e),
    }
}

fn encoder_message(left: i64, right: i64) -> TelemetryMessage {
    TelemetryMessage::Encoders(EncoderSample {
        counts: EncoderCounts { m1: left, m2: right, m3: left, m4: right },
        ts: now_ms(),
    })
}

async fn publish_encoders<H: DriveHardware>(
    telem: &UdpSocket,
    hardware: &mut H,
    controller: Option<SocketAddr>,
) {
    let Some(target) = controller else { return };
    let (left, right) = hardware.counts();
    send_telemetry(telem, &encoder_message(left, right), target).await;
}

async fn publish_alive(telem: &UdpSocket, device_id: &str, controller: Option<SocketAddr>) {
    let Some(target) = controller else { return };
    let ip = telem
        .local_addr()
        .map(|a| a.ip().to_string())
        .unwrap_or_default();
    let msg = TelemetryMessage::Alive(AliveSample {
        device: device_id.to_string(),
        ip,
        mode: "STA".into(),
        ts: now_ms(),
    });
    send_telemetry(telem, &msg, target).await;
}

async fn send_telemetry(telem: &UdpSocket, msg: &TelemetryMessage, target: SocketAddr) {
    match serde_json::to_vec(msg) {
        Ok(bytes) => {
            if let Err(e) = telem.send_to(&bytes, target).await {
                debug!("telemetry send to {} failed: {}", target, e);
            }
        }
        Err(e) => warn!("could not encode telemetry: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SimDrive;
    use crate::messages::ControlCommand;

    #[tokio::test]
    async fn reaches_both_targets_then_stops() {
        let mut drive = SimDrive::with_tick_rate(2000.0);
        let started = Instant::now();
        let (d_left, d_right) = drive_to_ticks(
            &mut drive,
            100,
            100,
            50,
            50,
            Duration::from_millis(5),
            Duration::from_secs(10),
            None,
        )
        .await;
        assert!(d_left >= 100, "left delta {}", d_left);
        assert!(d_right >= 100, "right delta {}", d_right);
        // One control tick of overshoot at most, far under the ceiling.
        assert!(d_left < 2000, "left overshoot {}", d_left);
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(drive.speeds(), (0, 0));
    }

    #[tokio::test]
    async fn satisfied_targets_cause_no_motion() {
        let mut drive = SimDrive::with_tick_rate(2000.0);
        let (d_left, d_right) = drive_to_ticks(
            &mut drive,
            0,
            0,
            50,
            50,
            Duration::from_millis(5),
            Duration::from_secs(10),
            None,
        )
        .await;
        assert_eq!((d_left, d_right), (0, 0));
        assert_eq!(drive.speeds(), (0, 0));
        assert_eq!(drive.counts(), (0, 0));
    }

    #[tokio::test]
    async fn stalled_drive_stops_at_the_ceiling() {
        // Rate zero: encoders never move, loop must exit via the ceiling.
        let mut drive = SimDrive::with_tick_rate(0.0);
        let started = Instant::now();
        let ceiling = Duration::from_millis(100);
        drive_to_ticks(&mut drive, 1000, 1000, 50, 50, Duration::from_millis(5), ceiling, None)
            .await;
        let elapsed = started.elapsed();
        assert!(elapsed >= ceiling, "exited early: {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "ran too long: {:?}", elapsed);
        assert_eq!(drive.speeds(), (0, 0));
    }

    #[tokio::test]
    async fn acks_each_command_with_its_seq() {
        let executor = DeviceExecutor::bind(0, 0, None, SimDrive::with_tick_rate(2000.0), "sim")
            .await
            .unwrap();
        let device_addr = executor.local_addr().unwrap();
        let task = tokio::spawn(executor.run());

        let coordinator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::new("127.0.0.1".parse().unwrap(), device_addr.port());

        let msg = ControlCommand::MoveTicks {
            left_ticks: 50,
            right_ticks: 50,
            left_speed: 50,
            right_speed: 50,
        }
        .into_wire(9);
        coordinator
            .send_to(&serde_json::to_vec(&msg).unwrap(), target)
            .await
            .unwrap();

        let mut buf = [0u8; 512];
        let (len, _) = tokio::time::timeout(Duration::from_secs(5), coordinator.recv_from(&mut buf))
            .await
            .expect("no ack")
            .unwrap();
        let reply: DeviceReply = serde_json::from_slice(&buf[..len]).unwrap();
        let DeviceReply::Ack { seq, .. } = reply;
        assert_eq!(seq, 9);
        task.abort();
    }

    #[tokio::test]
    async fn encoders_keep_flowing_during_a_move() {
        let coordinator = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let telem_addr = coordinator.local_addr().unwrap();

        // 1000 ticks at 20 ticks/s per speed unit and speed 50: the move
        // runs for about a second.
        let executor = DeviceExecutor::bind(
            0,
            telem_addr.port(),
            Some(telem_addr),
            SimDrive::with_tick_rate(20.0),
            "sim",
        )
        .await
        .unwrap();
        let device_addr = executor.local_addr().unwrap();
        let task = tokio::spawn(executor.run());

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let msg = ControlCommand::MoveTicks {
            left_ticks: 1000,
            right_ticks: 1000,
            left_speed: 50,
            right_speed: 50,
        }
        .into_wire(1);
        let target = SocketAddr::new("127.0.0.1".parse().unwrap(), device_addr.port());
        sender
            .send_to(&serde_json::to_vec(&msg).unwrap(), target)
            .await
            .unwrap();

        // Mid-move encoder samples must arrive while the command is still
        // executing, not only once it finishes.
        let mut buf = [0u8; 2048];
        let mut mid_move_samples = 0;
        let deadline = Instant::now() + Duration::from_millis(800);
        while Instant::now() < deadline {
            let received =
                tokio::time::timeout(Duration::from_millis(200), coordinator.recv_from(&mut buf))
                    .await;
            let Ok(Ok((len, _))) = received else { break };
            if let Ok(TelemetryMessage::Encoders(s)) = serde_json::from_slice(&buf[..len]) {
                if s.counts.left() > 0 && s.counts.left() < 1000 {
                    mid_move_samples += 1;
                }
            }
        }
        assert!(
            mid_move_samples >= 3,
            "only {} encoder samples arrived mid-move",
            mid_move_samples
        );
        task.abort();
    }
}
