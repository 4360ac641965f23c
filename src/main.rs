use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use swerve_zenoh_runtime::config::{
    DEFAULT_MODULE_NAME, DRIVE_MOTOR_ID, MOTOR_ENABLED, MOTOR_PORT, PREFS_PATH, STEER_MOTOR_ID,
};
use swerve_zenoh_runtime::motor::{FeetechBus, FeetechChannel, MotorChannel, SimChannel};
use swerve_zenoh_runtime::prefs::JsonFilePreferences;
use swerve_zenoh_runtime::runtime::{self, Runtime};
use swerve_zenoh_runtime::swerve::{CalibrationMode, SwerveModule};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Drive one swerve module from Zenoh commands
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Module name, used for topics and calibration keys
    #[arg(long, default_value = DEFAULT_MODULE_NAME)]
    name: String,

    /// Serial port of the Feetech bus
    #[arg(long, default_value = MOTOR_PORT)]
    port: String,

    #[arg(long, default_value_t = STEER_MOTOR_ID)]
    steer_id: u8,

    #[arg(long, default_value_t = DRIVE_MOTOR_ID)]
    drive_id: u8,

    /// Calibration preference file
    #[arg(long, default_value = PREFS_PATH)]
    prefs: PathBuf,

    /// Run against simulated motors
    #[arg(long, default_value_t = !MOTOR_ENABLED)]
    sim: bool,

    /// Derive the steer range from calibrated min/max bounds
    #[arg(long)]
    range_hack: bool,
}

async fn serve<S: MotorChannel, D: MotorChannel>(
    args: &Args,
    steer: S,
    drive: D,
) -> Result<(), BoxError> {
    let prefs = JsonFilePreferences::open(&args.prefs)?;
    let mode = if args.range_hack {
        CalibrationMode::RangeHack
    } else {
        CalibrationMode::Nominal
    };
    let module = SwerveModule::new(args.name.clone(), steer, drive, mode, &prefs)?;
    runtime::run(Runtime::new(module, prefs)).await
}

async fn start(args: Args) -> Result<(), BoxError> {
    if args.sim {
        info!("Motors disabled, running in simulation");
        let steer = SimChannel::echoing(args.steer_id);
        let drive = SimChannel::new(args.drive_id);
        return serve(&args, steer, drive).await;
    }

    info!("Opening motor bus on {}", args.port);
    let bus = Arc::new(Mutex::new(FeetechBus::open(&args.port)?));
    let steer = FeetechChannel::new(bus.clone(), args.steer_id)?;
    let drive = FeetechChannel::velocity(bus, args.drive_id)?;
    serve(&args, steer, drive).await
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init(); // installs the subscriber globally

    if let Err(e) = start(Args::parse()).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
