// Telemetry path: UDP listener -> state store -> supervisors/visualizers
//
// The listener is the sole writer; everything else reads snapshots.

mod listener;
mod pose;
mod state;

pub use listener::TelemetryListener;
pub use pose::{Pose, PoseTracker};
pub use state::{Stamped, TelemetrySnapshot, TelemetryState};

use crate::calibration::CalibrationProfile;

/// Read-only accessor for external visualizers: latest snapshot plus a
/// dead-reckoned pose estimate. Clones track pose independently from
/// their own baseline.
#[derive(Clone)]
pub struct TelemetryReader {
    state: TelemetryState,
    tracker: PoseTracker,
}

impl TelemetryReader {
    pub fn new(state: TelemetryState, calibration: CalibrationProfile) -> Self {
        Self {
            state,
            tracker: PoseTracker::new(calibration),
        }
    }

    /// Current snapshot and pose. Folds any new encoder sample into the
    /// pose estimate first.
    pub fn latest(&mut self) -> (TelemetrySnapshot, Pose) {
        let snapshot = self.state.snapshot();
        if let Some(encoders) = &snapshot.encoders {
            self.tracker.update(&encoders.counts);
        }
        (snapshot, self.tracker.pose())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{EncoderCounts, EncoderSample, TelemetryMessage};

    #[test]
    fn reader_tracks_pose_across_snapshots() {
        let state = TelemetryState::new();
        let cal = CalibrationProfile::default();
        let ticks_5cm = cal.cm_to_ticks(5.0) as i64;
        let mut reader = TelemetryReader::new(state.clone(), cal);

        state.record(TelemetryMessage::Encoders(EncoderSample {
            counts: EncoderCounts { m1: 0, m2: 0, m3: 0, m4: 0 },
            ts: 1,
        }));
        reader.latest();

        state.record(TelemetryMessage::Encoders(EncoderSample {
            counts: EncoderCounts { m1: ticks_5cm, m2: ticks_5cm, m3: ticks_5cm, m4: ticks_5cm },
            ts: 2,
        }));
        let (snapshot, pose) = reader.latest();
        assert!(snapshot.encoders.is_some());
        assert!((pose.x_cm - 5.0).abs() < 0.01);
    }
}
