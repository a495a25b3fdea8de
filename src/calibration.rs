// Calibration profile: encoder-to-physical conversion ratios
//
// Stored as a small JSON file so calibration tooling and the runtime stay
// in sync. Loaded once at startup; savable on demand after re-calibration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::RuntimeError;
use crate::messages::now_ms;

/// Encoder ticks per degree of chassis rotation, measured on the bench.
pub const DEFAULT_PULSES_PER_DEGREE: f64 = 45.0;

/// Encoder ticks per cm of wheel travel (1500 PPR, 4.4 cm wheel, geared).
pub const DEFAULT_PULSES_PER_CM: f64 = 407.4;

/// Motor factors outside this range indicate a measurement error.
const FACTOR_MIN: f64 = 0.2;
const FACTOR_MAX: f64 = 3.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationProfile {
    pub pulses_per_cm: f64,
    pub pulses_per_degree: f64,
    /// Per-side speed scaling to compensate motor asymmetry, near 1.0.
    pub motor_factor_left: f64,
    pub motor_factor_right: f64,
    /// Unix ms of the last save, stamped by `save`.
    #[serde(default)]
    pub updated_at: Option<u64>,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            pulses_per_cm: DEFAULT_PULSES_PER_CM,
            pulses_per_degree: DEFAULT_PULSES_PER_DEGREE,
            motor_factor_left: 1.0,
            motor_factor_right: 1.0,
            updated_at: None,
        }
    }
}

impl CalibrationProfile {
    /// Load from a JSON file. A missing file yields the defaults; an
    /// unreadable or corrupt file is logged and also yields the defaults,
    /// so a bad calibration record never blocks startup.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<CalibrationProfile>(&raw) {
                Ok(profile) => profile.sanitized(),
                Err(e) => {
                    warn!("calibration file {} is invalid ({}); using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!("could not read calibration file {} ({}); using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    /// Persist to a JSON file, stamping `updated_at`.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), RuntimeError> {
        let path = path.as_ref();
        self.updated_at = Some(now_ms());
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| RuntimeError::Calibration {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Clamp fields into their valid ranges. Both pulse ratios must stay
    /// strictly positive: every tick conversion divides by them.
    pub fn sanitized(mut self) -> Self {
        if !(self.pulses_per_cm > 0.0) {
            warn!("pulses_per_cm {} out of range, using default", self.pulses_per_cm);
            self.pulses_per_cm = DEFAULT_PULSES_PER_CM;
        }
        if !(self.pulses_per_degree > 0.0) {
            warn!("pulses_per_degree {} out of range, using default", self.pulses_per_degree);
            self.pulses_per_degree = DEFAULT_PULSES_PER_DEGREE;
        }
        self.motor_factor_left = self.motor_factor_left.clamp(FACTOR_MIN, FACTOR_MAX);
        self.motor_factor_right = self.motor_factor_right.clamp(FACTOR_MIN, FACTOR_MAX);
        self
    }

    pub fn cm_to_ticks(&self, cm: f64) -> f64 {
        cm * self.pulses_per_cm
    }

    pub fn ticks_to_cm(&self, ticks: f64) -> f64 {
        ticks / self.pulses_per_cm
    }

    pub fn degrees_to_ticks(&self, degrees: f64) -> f64 {
        degrees * self.pulses_per_degree
    }

    pub fn ticks_to_degrees(&self, ticks: f64) -> f64 {
        ticks / self.pulses_per_degree
    }

    /// Split a speed magnitude into per-side speeds scaled by the motor
    /// factors, preserving sign.
    pub fn side_speeds(&self, speed: i32) -> (i32, i32) {
        let left = (speed as f64 * self.motor_factor_left).round() as i32;
        let right = (speed as f64 * self.motor_factor_right).round() as i32;
        (crate::config::clamp_speed(left), crate::config::clamp_speed(right))
    }
}
