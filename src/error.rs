// Error types for the rover runtime

use std::io;

/// Errors surfaced by the coordinator and device runtimes.
///
/// Socket setup failures are fatal at startup; everything that happens
/// mid-flight (lost datagrams, missing acks, malformed telemetry) is
/// handled locally and never reaches this type.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to bind {role} socket on port {port}: {source}")]
    Bind {
        role: &'static str,
        port: u16,
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("calibration file {path}: {reason}")]
    Calibration { path: String, reason: String },

    #[error("path file {path}: {reason}")]
    PathFile { path: String, reason: String },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
