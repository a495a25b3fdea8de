pub mod calibration;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod messages;
pub mod motion;
pub mod telemetry;
pub mod teleop;
