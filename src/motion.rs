// Motion controller: turns planned segments into supervised device commands
//
// One segment runs as a rotate phase then an advance phase. Each phase
// issues a move_ticks command and supervises convergence against the
// telemetry store, with bounded correction passes for residual error.
// The device executes commands open-loop against its own encoders; all
// error correction lives here.

use serde::{Deserialize, Serialize};
use std::path::Path as FsPath;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::calibration::CalibrationProfile;
use crate::config::{
    self, DEFAULT_ANGULAR_TOLERANCE_DEG, DEFAULT_LINEAR_TOLERANCE_CM, DEFAULT_SEGMENT_BUDGET_MS,
    DEFAULT_SPEED, MAX_CORRECTIONS, TURN_BREAKDOWN_DEG,
};
use crate::control::ControlChannel;
use crate::error::RuntimeError;
use crate::messages::{ControlCommand, EncoderCounts};
use crate::telemetry::TelemetryState;

/// One planned rotate-then-advance step. Positive turn is left
/// (counter-clockwise); negative distance reverses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub turn_degrees: f64,
    pub distance_cm: f64,
}

pub type Path = Vec<Segment>;

/// Load an ordered path from a JSON file: `[{"turn_degrees":90,"distance_cm":100}, ...]`.
pub fn load_path(path: impl AsRef<FsPath>) -> Result<Path, RuntimeError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| RuntimeError::PathFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&raw).map_err(|e| RuntimeError::PathFile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Split turns close to a half rotation into two passes; encoder-only
/// rotation drifts too much over a single long arc.
pub fn expand_segment(segment: Segment) -> Vec<Segment> {
    if segment.turn_degrees.abs() > TURN_BREAKDOWN_DEG {
        let first = if segment.turn_degrees > 0.0 { 90.0 } else { -90.0 };
        vec![
            Segment { turn_degrees: first, distance_cm: 0.0 },
            Segment {
                turn_degrees: segment.turn_degrees - first,
                distance_cm: segment.distance_cm,
            },
        ]
    } else {
        vec![segment]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// No fresh encoder telemetry when the segment started.
    NotReady,
    /// No convergence within the segment's time budget, or the telemetry
    /// feed stalled mid-phase.
    Timeout,
    /// External abort request.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOutcome {
    Completed,
    /// Residual error remained after exhausting corrections. Reported,
    /// not fatal.
    PartialSuccess,
    Failed(FailureKind),
}

#[derive(Debug, Clone, Copy)]
pub struct MotionRequest {
    pub segment: Segment,
    pub angular_tolerance_deg: f64,
    pub linear_tolerance_cm: f64,
    pub speed: i32,
    pub max_duration_ms: u64,
    pub max_corrections: u32,
}

impl MotionRequest {
    pub fn for_segment(segment: Segment) -> Self {
        Self {
            segment,
            angular_tolerance_deg: DEFAULT_ANGULAR_TOLERANCE_DEG,
            linear_tolerance_cm: DEFAULT_LINEAR_TOLERANCE_CM,
            speed: DEFAULT_SPEED,
            max_duration_ms: DEFAULT_SEGMENT_BUDGET_MS,
            max_corrections: MAX_CORRECTIONS,
        }
    }

    pub fn with_speed(mut self, speed: i32) -> Self {
        self.speed = config::clamp_speed(speed);
        self
    }
}

/// Measured result of one segment, reported whatever the outcome.
#[derive(Debug, Clone, Copy)]
pub struct MotionResult {
    pub outcome: MotionOutcome,
    pub achieved_turn_deg: f64,
    pub achieved_distance_cm: f64,
    pub elapsed_ms: u64,
    /// Correction passes spent across both phases.
    pub corrections: u32,
}

impl MotionResult {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, MotionOutcome::Completed)
    }

    fn failed(kind: FailureKind, turn: f64, distance: f64, started: Instant, corrections: u32) -> Self {
        Self {
            outcome: MotionOutcome::Failed(kind),
            achieved_turn_deg: turn,
            achieved_distance_cm: distance,
            elapsed_ms: started.elapsed().as_millis() as u64,
            corrections,
        }
    }
}

/// Cloneable abort flag, checked at every poll iteration.
#[derive(Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Rotating,
    Advancing,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Rotating => "rotate",
            Phase::Advancing => "advance",
        }
    }
}

enum PhaseStatus {
    InTolerance,
    OutOfTolerance,
    Failed(FailureKind),
}

struct PhaseReport {
    achieved: f64,
    corrections: u32,
    status: PhaseStatus,
}

pub struct MotionController {
    channel: ControlChannel,
    telemetry: TelemetryState,
    calibration: CalibrationProfile,
    abort: AbortHandle,
}

impl MotionController {
    pub fn new(
        channel: ControlChannel,
        telemetry: TelemetryState,
        calibration: CalibrationProfile,
    ) -> Self {
        Self {
            channel,
            telemetry,
            calibration,
            abort: AbortHandle::new(),
        }
    }

    /// Handle that aborts the currently running segment from another task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Execute one segment: rotate, then advance, each with bounded
    /// corrections, all within the request's single time budget.
    pub async fn execute(&mut self, request: &MotionRequest) -> MotionResult {
        let started = Instant::now();
        let deadline = started + Duration::from_millis(request.max_duration_ms);

        // Fresh encoder telemetry is required up front; failing here is
        // immediate, never after the full timeout.
        match self.telemetry.encoder_age() {
            Some(age) if age <= config::ENCODER_STALENESS => {}
            age => {
                warn!("segment not started: encoder telemetry {:?}", age);
                return MotionResult::failed(FailureKind::NotReady, 0.0, 0.0, started, 0);
            }
        }

        info!(
            "segment: turn {:+.1} deg, advance {:+.1} cm",
            request.segment.turn_degrees, request.segment.distance_cm
        );

        let mut achieved_turn = 0.0;
        let mut achieved_distance = 0.0;
        let mut corrections = 0;
        let mut in_tolerance = true;

        if request.segment.turn_degrees != 0.0 {
            let report = self
                .run_phase(
                    Phase::Rotating,
                    request.segment.turn_degrees,
                    request.angular_tolerance_deg,
                    request,
                    deadline,
                )
                .await;
            achieved_turn = report.achieved;
            corrections += report.corrections;
            match report.status {
                PhaseStatus::InTolerance => {}
                PhaseStatus::OutOfTolerance => in_tolerance = false,
                PhaseStatus::Failed(kind) => {
                    return MotionResult::failed(kind, achieved_turn, 0.0, started, corrections);
                }
            }
        }

        if request.segment.distance_cm != 0.0 {
            let report = self
                .run_phase(
                    Phase::Advancing,
                    request.segment.distance_cm,
                    request.linear_tolerance_cm,
                    request,
                    deadline,
                )
                .await;
            achieved_distance = report.achieved;
            corrections += report.corrections;
            match report.status {
                PhaseStatus::InTolerance => {}
                PhaseStatus::OutOfTolerance => in_tolerance = false,
                PhaseStatus::Failed(kind) => {
                    return MotionResult::failed(
                        kind,
                        achieved_turn,
                        achieved_distance,
                        started,
                        corrections,
                    );
                }
            }
        }

        // Idempotent safety stop at the end of every segment.
        self.channel.stop().await;

        let outcome = if in_tolerance {
            MotionOutcome::Completed
        } else {
            MotionOutcome::PartialSuccess
        };
        MotionResult {
            outcome,
            achieved_turn_deg: achieved_turn,
            achieved_distance_cm: achieved_distance,
            elapsed_ms: started.elapsed().as_millis() as u64,
            corrections,
        }
    }

    /// Execute a whole path, stopping at the first hard failure. Partial
    /// successes carry on: the residual error is already bounded.
    pub async fn run_path(&mut self, path: &[Segment], speed: i32) -> Vec<MotionResult> {
        let mut results = Vec::new();
        for (index, segment) in path.iter().enumerate() {
            for step in expand_segment(*segment) {
                let request = MotionRequest::for_segment(step).with_speed(speed);
                let result = self.execute(&request).await;
                let failed = matches!(result.outcome, MotionOutcome::Failed(_));
                info!(
                    "segment {}/{}: {:?} (turn {:+.1} deg, advance {:+.1} cm, {} ms)",
                    index + 1,
                    path.len(),
                    result.outcome,
                    result.achieved_turn_deg,
                    result.achieved_distance_cm,
                    result.elapsed_ms
                );
                results.push(result);
                if failed {
                    return results;
                }
            }
        }
        results
    }

    /// One phase: nominal pass plus up to `max_corrections` correction
    /// passes sized to the residual, all against the shared deadline.
    async fn run_phase(
        &mut self,
        phase: Phase,
        target: f64,
        tolerance: f64,
        request: &MotionRequest,
        deadline: Instant,
    ) -> PhaseReport {
        let mut achieved = 0.0;
        let mut corrections = 0;

        for pass in 0..=request.max_corrections {
            let residual = target - achieved;
            if residual.abs() <= tolerance {
                break;
            }
            if pass > 0 {
                corrections += 1;
                info!(
                    "{} correction {}: residual {:+.2}",
                    phase.label(),
                    pass,
                    residual
                );
            }
            match self
                .drive_pass(phase, residual, tolerance, request.speed, deadline)
                .await
            {
                Ok(delta) => achieved += delta,
                Err(kind) => {
                    return PhaseReport {
                        achieved,
                        corrections,
                        status: PhaseStatus::Failed(kind),
                    };
                }
            }
        }

        let status = if (target - achieved).abs() <= tolerance {
            PhaseStatus::InTolerance
        } else {
            PhaseStatus::OutOfTolerance
        };
        PhaseReport { achieved, corrections, status }
    }

    /// Issue one move_ticks command sized to `amount` and poll telemetry
    /// until it converges, the motion settles short, the feed stalls, the
    /// deadline passes, or an abort lands. Every early exit sends a stop
    /// before returning.
    async fn drive_pass(
        &mut self,
        phase: Phase,
        amount: f64,
        tolerance: f64,
        speed: i32,
        deadline: Instant,
    ) -> Result<f64, FailureKind> {
        let baseline = match self.telemetry.encoders() {
            Some(stamped) => stamped,
            None => return Err(FailureKind::NotReady),
        };
        let baseline_counts = baseline.sample.counts;

        let command = self.pass_command(phase, amount, speed);
        self.channel.send(command).await;

        let mut seen_sample_at = baseline.received;
        let mut last_deltas = (0i64, 0i64);
        let mut last_change = Instant::now();

        loop {
            if self.abort.is_aborted() {
                self.channel.stop().await;
                return Err(FailureKind::Aborted);
            }
            if Instant::now() >= deadline {
                warn!("{} pass exceeded the segment budget", phase.label());
                self.channel.stop().await;
                return Err(FailureKind::Timeout);
            }

            let stamped = match self.telemetry.encoders() {
                Some(s) => s,
                None => {
                    self.channel.stop().await;
                    return Err(FailureKind::Timeout);
                }
            };
            if stamped.age() > config::FEED_STALL_BOUND {
                warn!("{} pass: telemetry feed stalled", phase.label());
                self.channel.stop().await;
                return Err(FailureKind::Timeout);
            }

            let deltas = deltas_from(&stamped.sample.counts, &baseline_counts);
            let moved = self.deltas_to_units(phase, deltas);
            if (amount - moved).abs() <= tolerance {
                debug!("{} pass converged at {:+.2}", phase.label(), moved);
                return Ok(moved);
            }

            // A settle verdict needs evidence: only newly arrived samples
            // advance the settle clock, so a packet gap reads as silence
            // (handled by the stall bound), never as settled-short.
            if stamped.received > seen_sample_at {
                seen_sample_at = stamped.received;
                if deltas != last_deltas {
                    last_deltas = deltas;
                    last_change = Instant::now();
                } else if last_change.elapsed() >= config::SETTLE_WINDOW {
                    // Device stopped short of (or past) the request; hand
                    // the residual back for a possible correction pass.
                    debug!("{} pass settled at {:+.2}", phase.label(), moved);
                    return Ok(moved);
                }
            }

            if let Some(reply) = self.channel.try_recv_ack() {
                debug!("device ack: {:?}", reply);
            }
            tokio::time::sleep(config::POLL_INTERVAL).await;
        }
    }

    /// Build the move_ticks command for one pass. Positive turn spins the
    /// sides in opposition (left back, right forward); straight motion
    /// drives both sides with the distance's sign. Per-side speeds carry
    /// the motor factors.
    fn pass_command(&self, phase: Phase, amount: f64, speed: i32) -> ControlCommand {
        let (left_speed_mag, right_speed_mag) = self.calibration.side_speeds(speed.abs());
        let (left_ticks, right_ticks) = match phase {
            Phase::Rotating => {
                let ticks = self.calibration.degrees_to_ticks(amount);
                (-ticks, ticks)
            }
            Phase::Advancing => {
                let ticks = self.calibration.cm_to_ticks(amount);
                (ticks, ticks)
            }
        };
        ControlCommand::MoveTicks {
            left_ticks: left_ticks.round() as i64,
            right_ticks: right_ticks.round() as i64,
            left_speed: left_speed_mag * sign_of(left_ticks),
            right_speed: right_speed_mag * sign_of(right_ticks),
        }
    }

    fn deltas_to_units(&self, phase: Phase, (d_left, d_right): (i64, i64)) -> f64 {
        match phase {
            Phase::Rotating => self
                .calibration
                .ticks_to_degrees((d_right - d_left) as f64 / 2.0),
            Phase::Advancing => self.calibration.ticks_to_cm((d_left + d_right) as f64 / 2.0),
        }
    }
}

fn deltas_from(current: &EncoderCounts, baseline: &EncoderCounts) -> (i64, i64) {
    (
        current.left() - baseline.left(),
        current.right() - baseline.right(),
    )
}

fn sign_of(value: f64) -> i32 {
    if value < 0.0 { -1 } else { 1 }
}
