// 50 Hz control loop with watchdog for one swerve module
// Note: the watchdog stops the drive if commands stop arriving, e.g. when
// teleop crashes. Steering holds its last target.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, error, info, warn};

// local imports
use crate::config::{
    CMD_TIMEOUT, LOOP_HZ, TELEMETRY_DIVIDER, TOPIC_CALIBRATION, TOPIC_CMD, TOPIC_HEALTH,
    TOPIC_TELEMETRY, topic,
};
use crate::messages::{CalibrationCommand, RuntimeHealth, SwerveCommand};
use crate::motor::MotorChannel;
use crate::prefs::PreferenceStore;
use crate::swerve::SwerveModule;
use crate::telemetry::{BufferedDashboard, TelemetrySample};

/// Outbound side of the telemetry topic
pub trait TelemetrySink {
    type Error: std::fmt::Display;

    fn send(&mut self, sample: &TelemetrySample) -> impl Future<Output = Result<(), Self::Error>>;
}

impl TelemetrySink for zenoh::pubsub::Publisher<'_> {
    type Error = zenoh::Error;

    fn send(&mut self, sample: &TelemetrySample) -> impl Future<Output = Result<(), Self::Error>> {
        let json = serde_json::to_string(sample);
        async move { self.put(json?).await }
    }
}

pub struct Runtime<S, D, P> {
    module: SwerveModule<S, D>,
    prefs: P,
    latest_cmd: Option<SwerveCommand>,
    cmd_received_at: Instant,
    health: RuntimeHealth,
    dashboard: BufferedDashboard,
}

impl<S: MotorChannel, D: MotorChannel, P: PreferenceStore> Runtime<S, D, P> {
    pub fn new(module: SwerveModule<S, D>, prefs: P) -> Self {
        Self {
            module,
            prefs,
            latest_cmd: None,
            cmd_received_at: Instant::now(),
            health: RuntimeHealth::CmdStale, // Start stale until first cmd
            dashboard: BufferedDashboard::new(),
        }
    }

    pub fn module(&self) -> &SwerveModule<S, D> {
        &self.module
    }

    pub fn prefs(&self) -> &P {
        &self.prefs
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    /// Process incoming command
    pub fn on_command(&mut self, cmd: SwerveCommand, now: Instant) {
        debug!("Received command: {:?}", &cmd);
        self.latest_cmd = Some(cmd);
        self.cmd_received_at = now;
    }

    /// Process a calibration request
    pub fn on_calibration(&mut self, cmd: CalibrationCommand) {
        info!("{}: calibration request {:?}", self.module.name(), cmd);
        let result = match cmd {
            CalibrationCommand::Save => {
                self.module.save_configuration(&mut self.prefs);
                Ok(())
            }
            CalibrationCommand::Reload => self.module.load_configuration(&self.prefs),
            CalibrationCommand::ZeroOffset => self.module.zero_steer_offset(),
            CalibrationCommand::SetDriveReversed { reversed } => {
                self.module.set_drive_reversed(reversed);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("{}: calibration request {:?} failed: {}", self.module.name(), cmd, e);
        }
    }

    /// Run one control step: apply the latest command or, if it is stale, stop the drive
    pub fn step(&mut self, now: Instant) {
        let cmd_age = now.saturating_duration_since(self.cmd_received_at);

        let result = match self.latest_cmd {
            Some(cmd) if cmd_age <= CMD_TIMEOUT => self
                .module
                .apply_control_values(cmd.angle_rad, cmd.percent_speed)
                .map(|_| RuntimeHealth::Ok),
            _ => {
                // Watchdog triggered or no command ever received
                if self.health == RuntimeHealth::Ok {
                    warn!("Command stale ({:?} old), stopping drive", cmd_age);
                }
                self.module
                    .set_drive_speed(0.0)
                    .map(|_| RuntimeHealth::CmdStale)
            }
        };

        self.health = match result {
            Ok(health) => health,
            Err(e) => {
                if self.health != RuntimeHealth::Fault {
                    error!("{}: control step failed: {}", self.module.name(), e);
                }
                RuntimeHealth::Fault
            }
        };
    }

    /// Collect dashboard values; never touches the control outputs
    pub fn collect_telemetry(&mut self) -> Vec<TelemetrySample> {
        self.module.publish_telemetry(&mut self.dashboard);
        self.dashboard.drain()
    }

    /// Collect dashboard values and send them, returning how many went out
    ///
    /// A failed send is logged and skipped; the control path is unaffected.
    pub async fn publish_telemetry<T: TelemetrySink>(&mut self, sink: &mut T) -> usize {
        let mut sent = 0;
        for sample in self.collect_telemetry() {
            match sink.send(&sample).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to publish telemetry {}: {}", sample.label, e),
            }
        }
        sent
    }
}

fn parse<T: serde::de::DeserializeOwned>(payload: &[u8], what: &str) -> Option<T> {
    match serde_json::from_slice::<T>(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Failed to parse {}: {}", what, e);
            None
        }
    }
}

pub async fn run<S, D, P>(
    mut runtime: Runtime<S, D, P>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: MotorChannel,
    D: MotorChannel,
    P: PreferenceStore,
{
    let name = runtime.module().name().to_string();
    let topic_cmd = topic(TOPIC_CMD, &name);
    let topic_cal = topic(TOPIC_CALIBRATION, &name);
    let topic_telemetry = topic(TOPIC_TELEMETRY, &name);
    let topic_health = topic(TOPIC_HEALTH, &name);

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_cmd = session.declare_subscriber(topic_cmd.clone()).await?;
    let sub_cal = session.declare_subscriber(topic_cal.clone()).await?;
    let mut pub_telemetry = session.declare_publisher(topic_telemetry.clone()).await?;
    let pub_health = session.declare_publisher(topic_health.clone()).await?;

    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let mut ticks: u64 = 0;

    info!(
        "Runtime started for {}: {}Hz loop, {}ms watchdog timeout",
        name,
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}, {}", topic_cmd, topic_cal);
    info!("Publishing to: {}, {}", topic_telemetry, topic_health);

    loop {
        tick.tick().await;
        ticks += 1;

        // 1. Drain all pending messages (non-blocking), keep latest command
        while let Ok(Some(sample)) = sub_cal.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Some(cmd) = parse::<CalibrationCommand>(&payload, "calibration command") {
                runtime.on_calibration(cmd);
            }
        }
        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            if let Some(cmd) = parse::<SwerveCommand>(&payload, "command") {
                runtime.on_command(cmd, Instant::now());
            }
        }

        // 2. Steer and drive (includes watchdog logic)
        runtime.step(Instant::now());

        // 3. Publish telemetry after the control outputs are written
        if ticks % TELEMETRY_DIVIDER == 0 {
            runtime.publish_telemetry(&mut pub_telemetry).await;
        }

        // 4. Publish health
        let health_json = serde_json::to_string(&runtime.health())?;
        if let Err(e) = pub_health.put(health_json).await {
            warn!("Failed to publish health: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::SimChannel;
    use crate::prefs::MemoryPreferences;
    use crate::swerve::CalibrationMode;
    use std::f64::consts::FRAC_PI_4;

    struct Rig {
        runtime: Runtime<SimChannel, SimChannel, MemoryPreferences>,
        steer: SimChannel,
        drive: SimChannel,
    }

    fn rig() -> Rig {
        let steer = SimChannel::new(1);
        let drive = SimChannel::new(2);
        let prefs = MemoryPreferences::new();
        let module = SwerveModule::new(
            "fl",
            steer.clone(),
            drive.clone(),
            CalibrationMode::Nominal,
            &prefs,
        )
        .unwrap();
        Rig {
            runtime: Runtime::new(module, prefs),
            steer,
            drive,
        }
    }

    #[test]
    fn test_no_command_stops_drive() {
        let mut rig = rig();
        rig.runtime.step(Instant::now());
        assert_eq!(rig.runtime.health(), RuntimeHealth::CmdStale);
        assert_eq!(rig.drive.state().percent_output, Some(0.0));
        assert_eq!(rig.steer.state().position_setpoint, None);
    }

    #[test]
    fn test_fresh_command_is_applied() {
        let mut rig = rig();
        let now = Instant::now();
        rig.runtime.on_command(
            SwerveCommand {
                angle_rad: FRAC_PI_4,
                percent_speed: 0.4,
            },
            now,
        );
        rig.runtime.step(now + Duration::from_millis(20));

        assert_eq!(rig.runtime.health(), RuntimeHealth::Ok);
        assert_eq!(rig.drive.state().percent_output, Some(0.4));
        let setpoint = rig.steer.state().position_setpoint.unwrap();
        assert!((setpoint - 128.0).abs() < 1e-9);
    }

    #[test]
    fn test_stale_command_stops_drive_and_holds_steering() {
        let mut rig = rig();
        let now = Instant::now();
        rig.runtime.on_command(
            SwerveCommand {
                angle_rad: FRAC_PI_4,
                percent_speed: 0.4,
            },
            now,
        );
        rig.runtime.step(now);
        rig.steer.state().position_setpoint = None;

        rig.runtime.step(now + CMD_TIMEOUT + Duration::from_millis(1));
        assert_eq!(rig.runtime.health(), RuntimeHealth::CmdStale);
        assert_eq!(rig.drive.state().percent_output, Some(0.0));
        assert_eq!(rig.steer.state().position_setpoint, None);
    }

    #[test]
    fn test_channel_fault_sets_fault_health() {
        let mut rig = rig();
        let now = Instant::now();
        rig.runtime.on_command(
            SwerveCommand {
                angle_rad: 0.0,
                percent_speed: 0.1,
            },
            now,
        );
        rig.steer.state().faulted = true;
        rig.runtime.step(now);
        assert_eq!(rig.runtime.health(), RuntimeHealth::Fault);

        rig.steer.state().faulted = false;
        rig.runtime.step(now);
        assert_eq!(rig.runtime.health(), RuntimeHealth::Ok);
    }

    #[test]
    fn test_calibration_requests() {
        let mut rig = rig();
        rig.steer.set_position(412);
        rig.runtime.on_calibration(CalibrationCommand::ZeroOffset);
        rig.runtime
            .on_calibration(CalibrationCommand::SetDriveReversed { reversed: true });
        rig.runtime.on_calibration(CalibrationCommand::Save);

        assert_eq!(rig.runtime.prefs().get_float("fl-offset", 0.0), 412.0);
        assert!(rig.runtime.prefs().get_boolean("fl-reversed", false));

        rig.runtime
            .on_calibration(CalibrationCommand::SetDriveReversed { reversed: false });
        rig.runtime.on_calibration(CalibrationCommand::Reload);
        assert!(rig.runtime.module().calibration().drive_reversed);
    }

    #[test]
    fn test_collect_telemetry_labels() {
        let mut rig = rig();
        let labels: Vec<String> = rig
            .runtime
            .collect_telemetry()
            .into_iter()
            .map(|s| s.label)
            .collect();
        assert_eq!(labels, ["fl Position", "fl ADC", "fl Target", "fl Steer Error"]);
    }

    #[derive(Default)]
    struct FailingSink {
        attempts: usize,
    }

    impl TelemetrySink for FailingSink {
        type Error = String;

        fn send(&mut self, _sample: &TelemetrySample) -> impl Future<Output = Result<(), String>> {
            self.attempts += 1;
            std::future::ready(Err("link down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_telemetry_leaves_control_running() {
        let mut rig = rig();
        let now = Instant::now();
        rig.runtime.on_command(
            SwerveCommand {
                angle_rad: FRAC_PI_4,
                percent_speed: 0.4,
            },
            now,
        );
        rig.runtime.step(now);

        let mut sink = FailingSink::default();
        assert_eq!(rig.runtime.publish_telemetry(&mut sink).await, 0);
        assert_eq!(sink.attempts, 4);

        rig.runtime.on_command(
            SwerveCommand {
                angle_rad: 0.0,
                percent_speed: -0.3,
            },
            now,
        );
        rig.runtime.step(now + Duration::from_millis(20));
        assert_eq!(rig.runtime.health(), RuntimeHealth::Ok);
        assert_eq!(rig.drive.state().percent_output, Some(-0.3));
        let setpoint = rig.steer.state().position_setpoint.unwrap();
        assert!(setpoint.abs() < 1e-9);
    }
}
