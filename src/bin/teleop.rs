// Keyboard teleop for one swerve module:
// WASD pick heading, J/L nudge heading, R/F speed, C save calibration,
// Z zero steering offset, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::f64::consts::{FRAC_PI_2, PI};
use std::time::{Duration, Instant};
use tracing::info;

use swerve_zenoh_runtime::config::{DEFAULT_MODULE_NAME, TOPIC_CALIBRATION, TOPIC_CMD, topic};
use swerve_zenoh_runtime::messages::{CalibrationCommand, SwerveCommand};

const SPEEDS: [f64; 3] = [0.1, 0.3, 0.6]; // fraction of max output
const NUDGE_RAD: f64 = PI / 12.0; // 15 degrees
const INPUT_TIMEOUT_MS: u64 = 100; // Stop driving after this much time with no input

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let name = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_MODULE_NAME.to_string());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let pub_cmd = session.declare_publisher(topic(TOPIC_CMD, &name)).await?;
    let pub_cal = session
        .declare_publisher(topic(TOPIC_CALIBRATION, &name))
        .await?;

    info!("Teleop for module {}", name);
    info!("Controls: WASD=heading, J/L=nudge, R/F=speed, C=save, Z=zero, Q=quit");
    info!("Speed: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&pub_cmd, &pub_cal).await;
    disable_raw_mode()?;

    result
}

/// Keep a heading inside [-π, π]
fn wrap(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

async fn run_teleop(
    pub_cmd: &zenoh::pubsub::Publisher<'_>,
    pub_cal: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), BoxError> {
    let mut speed_idx: usize = 0;

    // Heading persists, speed only while keys are held
    let mut heading = 0.0;
    let mut driving = false;
    let mut last_movement_input = Instant::now();

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                let target = match code {
                    KeyCode::Char('w') if pressed => Some(0.0),
                    KeyCode::Char('a') if pressed => Some(FRAC_PI_2),
                    KeyCode::Char('s') if pressed => Some(PI),
                    KeyCode::Char('d') if pressed => Some(-FRAC_PI_2),
                    KeyCode::Char('j') if pressed => Some(wrap(heading + NUDGE_RAD)),
                    KeyCode::Char('l') if pressed => Some(wrap(heading - NUDGE_RAD)),
                    _ => None,
                };
                if let Some(target) = target {
                    heading = target;
                    driving = true;
                    last_movement_input = Instant::now();
                }

                let calibration = match code {
                    KeyCode::Char('c') if pressed => Some(CalibrationCommand::Save),
                    KeyCode::Char('z') if pressed => Some(CalibrationCommand::ZeroOffset),
                    _ => None,
                };
                if let Some(cmd) = calibration {
                    info!("Sending {:?}", cmd);
                    pub_cal.put(serde_json::to_string(&cmd)?).await?;
                }

                match code {
                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_idx = (speed_idx + 1).min(2);
                        print_speed(speed_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        print_speed(speed_idx);
                    }

                    // Quit
                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            driving = false;
        }

        // Always publish at ~50Hz so the runtime watchdog stays fed
        let cmd = SwerveCommand {
            angle_rad: heading,
            percent_speed: if driving { SPEEDS[speed_idx] } else { 0.0 },
        };
        pub_cmd.put(serde_json::to_string(&cmd)?).await?;
    }

    Ok(())
}

fn print_speed(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Speed: {}", label);
}
