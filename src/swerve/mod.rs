// Control and bookkeeping for one swerve module
//
// A swerve module is a wheel that steers about a vertical axis and drives
// about its axle. Given a heading and a speed, the module steers along the
// shortest path, reversing the drive instead of turning more than a quarter
// turn, and keeps its calibration in a preference store.

pub mod angle;
pub mod calibration;

use std::f64::consts::PI;

use tracing::{debug, info, warn};

pub use angle::{DriveOrientation, ResolvedTarget};
pub use calibration::{Calibration, CalibrationMode};

use crate::motor::{ChannelError, FeedbackSource, MotorChannel};
use crate::prefs::PreferenceStore;
use crate::telemetry::Dashboard;

/// Profile slot holding the steering position gains
const STEER_PROFILE_SLOT: u8 = 0;

/// Error types for a swerve module
#[derive(Debug, thiserror::Error)]
pub enum SwerveError {
    #[error("Motor channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Module {name} has invalid steer range {range}")]
    InvalidCalibration { name: String, range: f64 },
}

pub type Result<T> = std::result::Result<T, SwerveError>;

/// One steerable, driven wheel
pub struct SwerveModule<S, D> {
    name: String,
    steer: S,
    drive: D,
    mode: CalibrationMode,
    calibration: Calibration,
    /// Last commanded continuous angle (radians), after unwrap and flip
    steer_target: f64,
    orientation: DriveOrientation,
}

impl<S: MotorChannel, D: MotorChannel> SwerveModule<S, D> {
    /// Bind the steering and drive channels and load calibration
    ///
    /// Fails if the steering channel cannot be configured or the stored
    /// calibration is unusable.
    pub fn new(
        name: impl Into<String>,
        mut steer: S,
        drive: D,
        mode: CalibrationMode,
        prefs: &dyn PreferenceStore,
    ) -> Result<Self> {
        let name = name.into();
        info!("Creating swerve module {} ({:?} calibration)", name, mode);

        steer.configure_feedback_source(FeedbackSource::AbsoluteAnalog)?;
        steer.select_profile_slot(STEER_PROFILE_SLOT)?;

        let calibration = Calibration::load(&name, mode, prefs)?;
        Ok(Self {
            name,
            steer,
            drive,
            mode,
            calibration,
            steer_target: 0.0,
            orientation: DriveOrientation::Normal,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn calibration_mode(&self) -> CalibrationMode {
        self.mode
    }

    /// Last commanded continuous steering angle in radians
    pub fn steer_target(&self) -> f64 {
        self.steer_target
    }

    /// Drive orientation chosen by the most recent steering command
    pub fn drive_orientation(&self) -> DriveOrientation {
        self.orientation
    }

    /// Reload calibration from the store
    ///
    /// On failure the previous calibration stays in effect.
    pub fn load_configuration(&mut self, prefs: &dyn PreferenceStore) -> Result<()> {
        self.steer.select_profile_slot(STEER_PROFILE_SLOT)?;
        self.calibration = Calibration::load(&self.name, self.mode, prefs)?;
        Ok(())
    }

    pub fn save_configuration(&self, prefs: &mut dyn PreferenceStore) {
        self.calibration.save(&self.name, self.mode, prefs);
    }

    /// Store the current steering position as the steer offset
    ///
    /// Under `CalibrationMode::Nominal` the module then reads zero radians.
    /// Under `CalibrationMode::RangeHack` the offset is kept relative to the
    /// trimmed `steer_min`, so right after zeroing `steer_angle` reads
    /// `steer_min / steer_range` of a turn, not zero.
    ///
    /// Only changes the in-memory calibration; call `save_configuration`
    /// to keep it.
    pub fn zero_steer_offset(&mut self) -> Result<()> {
        let raw = self.steer.read_position()?;
        self.calibration.steer_offset = f64::from(raw) - self.calibration.steer_min;
        info!("{}: steer offset zeroed at raw {}", self.name, raw);
        Ok(())
    }

    pub fn set_drive_reversed(&mut self, reversed: bool) {
        self.calibration.drive_reversed = reversed;
    }

    /// Current module angle in radians, continuous across turns
    pub fn steer_angle(&mut self) -> Result<f64> {
        let raw = self.steer.read_position()?;
        Ok(angle::native_to_angle(
            raw,
            self.calibration.steer_offset,
            self.calibration.steer_range,
        ))
    }

    /// Steer toward `angle_radians` (0 = chassis forward) along the shortest path
    ///
    /// `angle_radians` should be within [-2π, 2π]. The module may instead
    /// face the opposite heading, in which case the next drive command is
    /// reversed.
    pub fn set_steer_angle(&mut self, angle_radians: f64) -> Result<()> {
        let Calibration {
            steer_offset,
            steer_range,
            ..
        } = self.calibration;

        // Turn count and current angle come from the same sample
        let raw = self.steer.read_position()?;
        let turns = angle::turn_count(raw, steer_offset, steer_range);
        let current = angle::native_to_angle(raw, steer_offset, steer_range);

        let resolved = angle::resolve_target(angle_radians, current, turns);
        self.steer_target = resolved.angle;
        self.orientation = resolved.orientation;

        let native = angle::angle_to_native(self.steer_target, steer_offset);
        debug!(
            "{}: request {:.4} rad from {:.4} -> target {:.4} ({:?}), setpoint {:.1}",
            self.name, angle_radians, current, self.steer_target, self.orientation, native
        );
        self.steer.set_position_setpoint(native)?;
        Ok(())
    }

    /// Drive at `percent_speed`, a signed fraction of maximum output
    ///
    /// No clamping happens here; keeping the value in [-1, 1] is up to the
    /// caller.
    pub fn set_drive_speed(&mut self, percent_speed: f64) -> Result<()> {
        let mut output = percent_speed;
        if self.calibration.drive_reversed {
            output = -output;
        }
        output = self.orientation.apply(output);
        self.drive.set_percent_output(output)?;
        Ok(())
    }

    /// Steer, then drive; the drive direction depends on this cycle's steering
    pub fn apply_control_values(&mut self, angle_radians: f64, percent_speed: f64) -> Result<()> {
        self.set_steer_angle(angle_radians)?;
        self.set_drive_speed(percent_speed)
    }

    /// Push position, raw sensor, target and error values to the dashboard
    ///
    /// Best effort: values that cannot be read are skipped.
    pub fn publish_telemetry(&mut self, dashboard: &mut dyn Dashboard) {
        let name = &self.name;

        match self.steer.read_position() {
            Ok(raw) => {
                let degrees = (f64::from(raw) - self.calibration.steer_offset) * 180.0 / 512.0;
                dashboard.publish_number(&format!("{} Position", name), degrees);
            }
            Err(e) => warn!("{}: telemetry position read failed: {}", name, e),
        }

        match self.steer.read_analog_raw() {
            Ok(adc) => dashboard.publish_number(&format!("{} ADC", name), f64::from(adc)),
            Err(e) => warn!("{}: telemetry ADC read failed: {}", name, e),
        }

        dashboard.publish_number(
            &format!("{} Target", name),
            self.steer_target * 180.0 / PI,
        );

        match self.steer.read_closed_loop_error() {
            Ok(err) => dashboard.publish_number(&format!("{} Steer Error", name), f64::from(err)),
            Err(e) => warn!("{}: telemetry error read failed: {}", name, e),
        }
    }
}
