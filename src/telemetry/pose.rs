// Dead-reckoned pose from encoder counts
//
// Differential-drive odometry for external visualizers. The motion
// controller does not use this; it works on raw tick deltas.

use crate::calibration::CalibrationProfile;
use crate::messages::EncoderCounts;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub x_cm: f64,
    pub y_cm: f64,
    /// Heading in degrees, normalized to (-180, 180]. Positive is a left
    /// (counter-clockwise) turn, matching the command sign convention.
    pub heading_deg: f64,
}

#[derive(Clone)]
pub struct PoseTracker {
    calibration: CalibrationProfile,
    last_counts: Option<(i64, i64)>,
    pose: Pose,
}

impl PoseTracker {
    pub fn new(calibration: CalibrationProfile) -> Self {
        Self {
            calibration,
            last_counts: None,
            pose: Pose::default(),
        }
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Fold the latest encoder counts into the pose estimate. The first
    /// sample establishes the baseline and produces no motion.
    pub fn update(&mut self, counts: &EncoderCounts) -> Pose {
        let (left, right) = (counts.left(), counts.right());
        if let Some((prev_left, prev_right)) = self.last_counts {
            let d_left = (left - prev_left) as f64;
            let d_right = (right - prev_right) as f64;

            let distance_cm = self.calibration.ticks_to_cm((d_left + d_right) / 2.0);
            let turn_deg = self.calibration.ticks_to_degrees((d_right - d_left) / 2.0);

            // Advance along the midpoint heading of the step.
            let mid_heading = (self.pose.heading_deg + turn_deg / 2.0).to_radians();
            self.pose.x_cm += distance_cm * mid_heading.cos();
            self.pose.y_cm += distance_cm * mid_heading.sin();
            self.pose.heading_deg = normalize_deg(self.pose.heading_deg + turn_deg);
        }
        self.last_counts = Some((left, right));
        self.pose
    }

    pub fn reset(&mut self) {
        self.last_counts = None;
        self.pose = Pose::default();
    }
}

fn normalize_deg(deg: f64) -> f64 {
    let mut d = deg % 360.0;
    if d > 180.0 {
        d -= 360.0;
    } else if d <= -180.0 {
        d += 360.0;
    }
    d
}
