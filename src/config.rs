// Ports, cadences, staleness windows, motion defaults
use std::time::Duration;

/// UDP port the device listens on for control commands.
pub const CTRL_PORT: u16 = 9000;

/// UDP port the coordinator listens on for telemetry.
pub const TELEM_PORT: u16 = 9001;

/// Coordinator-side supervision cadence (20 Hz).
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Device-side control tick while executing a move_ticks command.
pub const DEVICE_TICK: Duration = Duration::from_millis(5);

/// Hard ceiling on one device-side move_ticks execution. The device stops
/// its motors unconditionally when this elapses, however the loop exits.
pub const HARD_CEILING: Duration = Duration::from_secs(10);

/// Device-side encoder telemetry cadence (20 Hz).
pub const ENCODER_TELEM_INTERVAL: Duration = Duration::from_millis(50);

/// Device-side alive heartbeat cadence.
pub const ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Maximum age at which an encoder sample still counts as fresh when a
/// segment starts. Older (or absent) telemetry fails the segment with
/// NotReady before any command is sent.
pub const ENCODER_STALENESS: Duration = Duration::from_millis(1000);

/// Bounded wait on the telemetry feed while a command is in flight. If no
/// sample younger than this shows up mid-phase, the phase times out.
pub const FEED_STALL_BOUND: Duration = Duration::from_millis(1500);

/// Encoder deltas unchanged for this long count as "motion settled", which
/// is when the residual-error check runs.
pub const SETTLE_WINDOW: Duration = Duration::from_millis(600);

/// Motor speed limit, matching the device's accepted range.
pub const MOTOR_MAX: i32 = 120;

/// Default motion speed for planned segments.
pub const DEFAULT_SPEED: i32 = 30;

pub const DEFAULT_ANGULAR_TOLERANCE_DEG: f64 = 2.0;
pub const DEFAULT_LINEAR_TOLERANCE_CM: f64 = 1.0;

/// Default per-segment time budget. Must exceed HARD_CEILING so a device
/// still grinding through a command cannot cause a spurious timeout.
pub const DEFAULT_SEGMENT_BUDGET_MS: u64 = 30_000;

/// Correction passes per phase, sharing the segment's time budget.
pub const MAX_CORRECTIONS: u32 = 2;

/// Turns larger than this are split into two half turns.
pub const TURN_BREAKDOWN_DEG: f64 = 135.0;

/// Default calibration file, resolved against the working directory.
pub const CALIBRATION_FILE: &str = "robot_calibration.json";

/// Clamp a requested speed into the device's accepted range.
pub fn clamp_speed(speed: i32) -> i32 {
    speed.clamp(-MOTOR_MAX, MOTOR_MAX)
}
