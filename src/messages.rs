// Wire message types for the control and telemetry channels
//
// Every datagram is a UTF-8 JSON object tagged with a `type` field. The
// tags and field names match what the device firmware emits and accepts:
// control messages are `motor`, `move_ticks`, `motor4`; telemetry is
// `encoders`, `imu`, `tfluna` (range sensor), `alive`; the device replies
// to each command with an `ack`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch, used as the `ts` field on outbound
/// messages.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A command as callers build it. The control channel attaches the
/// sequence number and send timestamp when it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Direct differential drive speeds.
    Motor { left: i32, right: i32 },
    /// Run until each side's encoder delta reaches its target tick count.
    MoveTicks {
        left_ticks: i64,
        right_ticks: i64,
        left_speed: i32,
        right_speed: i32,
    },
    /// Four independent motor speeds (legacy chassis).
    Motor4 { m1: i32, m2: i32, m3: i32, m4: i32 },
}

impl ControlCommand {
    pub const STOP: ControlCommand = ControlCommand::Motor { left: 0, right: 0 };

    /// Wrap into a wire message with sequence number and timestamp.
    pub fn into_wire(self, seq: u64) -> ControlMessage {
        let ts = now_ms();
        match self {
            ControlCommand::Motor { left, right } => ControlMessage::Motor { left, right, seq, ts },
            ControlCommand::MoveTicks {
                left_ticks,
                right_ticks,
                left_speed,
                right_speed,
            } => ControlMessage::MoveTicks {
                left_ticks,
                right_ticks,
                left_speed,
                right_speed,
                seq,
                ts,
            },
            ControlCommand::Motor4 { m1, m2, m3, m4 } => {
                ControlMessage::Motor4 { m1, m2, m3, m4, seq, ts }
            }
        }
    }
}

/// Control message as it appears on the wire. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Motor {
        left: i32,
        right: i32,
        seq: u64,
        ts: u64,
    },
    MoveTicks {
        left_ticks: i64,
        right_ticks: i64,
        left_speed: i32,
        right_speed: i32,
        seq: u64,
        ts: u64,
    },
    Motor4 {
        m1: i32,
        m2: i32,
        m3: i32,
        m4: i32,
        seq: u64,
        ts: u64,
    },
}

impl ControlMessage {
    pub fn seq(&self) -> u64 {
        match *self {
            ControlMessage::Motor { seq, .. }
            | ControlMessage::MoveTicks { seq, .. }
            | ControlMessage::Motor4 { seq, .. } => seq,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Per-motor encoder counts. On the two-motor chassis m3/m4 mirror m1/m2.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncoderCounts {
    pub m1: i64,
    pub m2: i64,
    #[serde(default)]
    pub m3: i64,
    #[serde(default)]
    pub m4: i64,
}

impl EncoderCounts {
    pub fn left(&self) -> i64 {
        self.m1
    }

    pub fn right(&self) -> i64 {
        self.m2
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EncoderSample {
    pub counts: EncoderCounts,
    pub ts: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImuSample {
    pub accel: Vec3,
    pub gyro: Vec3,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub mag: Vec3,
    #[serde(default)]
    pub temp_c: f64,
    pub ts: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RangeSample {
    pub dist_mm: i64,
    #[serde(default)]
    pub strength: i64,
    #[serde(default)]
    pub temp_c: f64,
    pub ts: u64,
}

/// Heartbeat announcing a device's address and operating mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AliveSample {
    pub device: String,
    pub ip: String,
    pub mode: String,
    pub ts: u64,
}

/// Telemetry message as it appears on the wire. The `tfluna` tag is the
/// range sensor fitted to the original chassis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    Encoders(EncoderSample),
    Imu(ImuSample),
    Tfluna(RangeSample),
    Alive(AliveSample),
}

/// Device -> coordinator reply on the control channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceReply {
    Ack { seq: u64, ts: u64 },
}
