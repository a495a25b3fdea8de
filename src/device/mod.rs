// Device-side runtime: command executor over abstract drive hardware
//
// The executor owns the control socket and a DriveHardware implementation.
// Real chassis plug in behind the trait; SimDrive stands in for bench work
// and tests.

mod executor;
mod sim;

pub use executor::{DeviceExecutor, EncoderFeed, drive_to_ticks};
pub use sim::SimDrive;

/// Two-sided drive with quadrature encoders. Implementations own the
/// actual actuator/sensor access; the executor only reasons in signed
/// speed percentages and encoder counts.
pub trait DriveHardware: Send {
    /// Apply signed duty to both sides. Zero stops a side.
    fn set_speeds(&mut self, left: i32, right: i32);

    /// Current cumulative encoder counts (left, right).
    fn counts(&mut self) -> (i64, i64);
}
