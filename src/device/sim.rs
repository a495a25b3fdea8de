// Simulated drive hardware
//
// Integrates encoder counts from the applied speeds over wall-clock time.
// Rate is linear in speed: at the default, speed 100 moves the wheel at
// 50 cm/s on the default pulses-per-cm calibration.

use std::time::Instant;

use super::DriveHardware;

/// Encoder ticks per second per unit of speed (0.5 cm/s * 407.4 ticks/cm).
pub const DEFAULT_TICK_RATE: f64 = 203.7;

pub struct SimDrive {
    left_speed: i32,
    right_speed: i32,
    left_ticks: f64,
    right_ticks: f64,
    tick_rate: f64,
    last_update: Instant,
}

impl SimDrive {
    pub fn new() -> Self {
        Self::with_tick_rate(DEFAULT_TICK_RATE)
    }

    /// Custom ticks-per-second-per-speed-unit rate. A rate of zero models
    /// a stalled drivetrain.
    pub fn with_tick_rate(tick_rate: f64) -> Self {
        Self {
            left_speed: 0,
            right_speed: 0,
            left_ticks: 0.0,
            right_ticks: 0.0,
            tick_rate,
            last_update: Instant::now(),
        }
    }

    pub fn speeds(&self) -> (i32, i32) {
        (self.left_speed, self.right_speed)
    }

    /// Accumulate ticks for the time the current speeds were applied.
    fn integrate(&mut self) {
        let dt = self.last_update.elapsed().as_secs_f64();
        self.last_update = Instant::now();
        self.left_ticks += self.left_speed as f64 * self.tick_rate * dt;
        self.right_ticks += self.right_speed as f64 * self.tick_rate * dt;
    }
}

impl Default for SimDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl DriveHardware for SimDrive {
    fn set_speeds(&mut self, left: i32, right: i32) {
        self.integrate();
        self.left_speed = left;
        self.right_speed = right;
    }

    fn counts(&mut self) -> (i64, i64) {
        self.integrate();
        (self.left_ticks as i64, self.right_ticks as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn stationary_until_driven() {
        let mut drive = SimDrive::new();
        sleep(Duration::from_millis(20));
        assert_eq!(drive.counts(), (0, 0));
    }

    #[test]
    fn counts_follow_applied_speeds() {
        let mut drive = SimDrive::with_tick_rate(1000.0);
        drive.set_speeds(50, -50);
        sleep(Duration::from_millis(100));
        let (left, right) = drive.counts();
        // 50 * 1000 ticks/s for ~0.1s
        assert!(left > 3000 && left < 9000, "left = {}", left);
        assert!((left + right).abs() < left / 4, "asymmetric: {} {}", left, right);
    }

    #[test]
    fn repeated_stop_is_idempotent() {
        let mut drive = SimDrive::with_tick_rate(1000.0);
        drive.set_speeds(50, 50);
        sleep(Duration::from_millis(50));
        drive.set_speeds(0, 0);
        let after_stop = drive.counts();
        sleep(Duration::from_millis(50));
        drive.set_speeds(0, 0);
        sleep(Duration::from_millis(50));
        assert_eq!(drive.counts(), after_stop);
    }
}
