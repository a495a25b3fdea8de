use clap::{Parser, Subcommand};
use std::net::{IpAddr, SocketAddr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rover_runtime::calibration::CalibrationProfile;
use rover_runtime::config::{self, CTRL_PORT, TELEM_PORT};
use rover_runtime::control::ControlChannel;
use rover_runtime::device::{DeviceExecutor, SimDrive};
use rover_runtime::error::RuntimeError;
use rover_runtime::motion::{self, MotionController, MotionOutcome};
use rover_runtime::telemetry::{TelemetryListener, TelemetryState};
use rover_runtime::teleop;

#[derive(Parser)]
#[command(name = "rover-runtime", about = "Coordinator and device runtime for a two-wheeled rover")]
struct Cli {
    /// Device control port.
    #[arg(long, default_value_t = CTRL_PORT)]
    ctrl_port: u16,

    /// Coordinator telemetry port.
    #[arg(long, default_value_t = TELEM_PORT)]
    telem_port: u16,

    /// Calibration file.
    #[arg(long, default_value = config::CALIBRATION_FILE)]
    calibration: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a planned path from a JSON file.
    Run {
        /// Path file: `[{"turn_degrees":90,"distance_cm":100}, ...]`.
        path: String,

        /// Motion speed (clamped to the device's range).
        #[arg(long, default_value_t = config::DEFAULT_SPEED)]
        speed: i32,

        /// Device address to use until a heartbeat announces one.
        #[arg(long, default_value = "192.168.4.1")]
        device: IpAddr,
    },
    /// Drive manually from the keyboard.
    Teleop {
        #[arg(long, default_value = "192.168.4.1")]
        device: IpAddr,
    },
    /// Run the device-side executor with simulated drive hardware.
    Device {
        #[arg(long, default_value = "sim-rover")]
        device_id: String,

        /// Coordinator address to send telemetry to before the first
        /// control packet arrives.
        #[arg(long)]
        controller: Option<SocketAddr>,
    },
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RuntimeError> {
    let Cli { ctrl_port, telem_port, calibration, command } = cli;
    match command {
        Command::Run { path, speed, device } => {
            let segments = motion::load_path(&path)?;
            info!("loaded {} segment(s) from {}", segments.len(), path);

            let profile = CalibrationProfile::load(&calibration);
            let (channel, state) =
                coordinator_setup(ctrl_port, telem_port, SocketAddr::new(device, ctrl_port))
                    .await?;
            let mut controller = MotionController::new(channel, state, profile);

            let abort = controller.abort_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt: aborting motion");
                    abort.abort();
                }
            });

            let results = controller.run_path(&segments, speed).await;
            let failed = results
                .iter()
                .any(|r| matches!(r.outcome, MotionOutcome::Failed(_)));
            let partial = results
                .iter()
                .filter(|r| r.outcome == MotionOutcome::PartialSuccess)
                .count();
            info!(
                "path finished: {} step(s), {} partial, failed: {}",
                results.len(),
                partial,
                failed
            );
            if failed {
                std::process::exit(2);
            }
            Ok(())
        }
        Command::Teleop { device } => {
            let (channel, _state) =
                coordinator_setup(ctrl_port, telem_port, SocketAddr::new(device, ctrl_port))
                    .await?;
            teleop::run(channel).await
        }
        Command::Device { device_id, controller } => {
            let executor = DeviceExecutor::bind(
                ctrl_port,
                telem_port,
                controller,
                SimDrive::new(),
                device_id,
            )
            .await?;
            executor.run().await
        }
    }
}

/// Bind the telemetry listener and control channel shared by the
/// coordinator-side commands. The listener task runs for the process
/// lifetime.
async fn coordinator_setup(
    ctrl_port: u16,
    telem_port: u16,
    fallback: SocketAddr,
) -> Result<(ControlChannel, TelemetryState), RuntimeError> {
    let state = TelemetryState::new();
    let listener = TelemetryListener::bind(telem_port, ctrl_port, state.clone()).await?;
    tokio::spawn(listener.run());

    let channel = ControlChannel::bind(state.clone(), fallback).await?;
    Ok((channel, state))
}
