// Per-module calibration and its persisted form
//
// Keys are namespaced by module name: "{name}-offset", "{name}-reversed",
// "{name}-steer-reversed" and, with range trimming, "{name}-min"/"{name}-max".

use tracing::{debug, info};

use super::SwerveError;
use crate::prefs::PreferenceStore;

/// Native counts per steering rotation for the absolute sensor
pub const NOMINAL_STEER_RANGE: f64 = 1024.0;

/// Fraction trimmed from each end of the calibrated bounds
const RANGE_MARGIN: f64 = 0.01;

/// How the steering range is derived when calibration is loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CalibrationMode {
    /// Fixed 1024-count range; persisted bounds are ignored
    #[default]
    Nominal,
    /// Range from persisted min/max bounds, shrunk by 1% at each end
    RangeHack,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Calibration {
    /// Native reading when the module faces chassis-forward (relative to `steer_min`)
    pub steer_offset: f64,
    pub steer_min: f64,
    pub steer_max: f64,
    /// Native counts per full rotation, always > 0 once loaded
    pub steer_range: f64,
    pub drive_reversed: bool,
    /// Loaded and kept, nothing reads it yet
    pub steer_reversed: bool,
    /// Bounds as persisted, before trimming
    stored_bounds: (f64, f64),
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            steer_offset: 0.0,
            steer_min: 0.0,
            steer_max: NOMINAL_STEER_RANGE,
            steer_range: NOMINAL_STEER_RANGE,
            drive_reversed: false,
            steer_reversed: false,
            stored_bounds: (0.0, NOMINAL_STEER_RANGE),
        }
    }
}

pub fn offset_key(name: &str) -> String {
    format!("{}-offset", name)
}

pub fn reversed_key(name: &str) -> String {
    format!("{}-reversed", name)
}

pub fn steer_reversed_key(name: &str) -> String {
    format!("{}-steer-reversed", name)
}

pub fn min_key(name: &str) -> String {
    format!("{}-min", name)
}

pub fn max_key(name: &str) -> String {
    format!("{}-max", name)
}

impl Calibration {
    /// Read calibration for module `name` from the store
    pub fn load(
        name: &str,
        mode: CalibrationMode,
        prefs: &dyn PreferenceStore,
    ) -> Result<Self, SwerveError> {
        let mut cal = Self {
            steer_offset: prefs.get_float(&offset_key(name), 0.0),
            drive_reversed: prefs.get_boolean(&reversed_key(name), false),
            steer_reversed: prefs.get_boolean(&steer_reversed_key(name), false),
            ..Self::default()
        };

        if mode == CalibrationMode::RangeHack {
            let min = prefs.get_float(&min_key(name), 0.0);
            let max = prefs.get_float(&max_key(name), NOMINAL_STEER_RANGE);
            cal.stored_bounds = (min, max);

            let actual_range = (max - min).trunc();
            let margin = (actual_range * RANGE_MARGIN).trunc();
            cal.steer_min = min + margin;
            cal.steer_max = max - margin;
            cal.steer_offset -= cal.steer_min;
            cal.steer_range = (cal.steer_max - cal.steer_min).trunc();

            // Also rejects NaN
            if !(cal.steer_range > 0.0) {
                return Err(SwerveError::InvalidCalibration {
                    name: name.to_string(),
                    range: cal.steer_range,
                });
            }
            debug!(
                "{}: trimmed steer bounds to [{}, {}], range {}",
                name, cal.steer_min, cal.steer_max, cal.steer_range
            );
        }

        info!(
            "{}: loaded calibration offset={} drive_reversed={} steer_reversed={}",
            name, cal.steer_offset, cal.drive_reversed, cal.steer_reversed
        );
        Ok(cal)
    }

    /// Write calibration for module `name` back to the store
    ///
    /// Values are written in their persisted form, so a later `load` with
    /// the same mode reproduces this calibration.
    pub fn save(&self, name: &str, mode: CalibrationMode, prefs: &mut dyn PreferenceStore) {
        match mode {
            CalibrationMode::Nominal => {
                prefs.put_float(&offset_key(name), self.steer_offset);
            }
            CalibrationMode::RangeHack => {
                prefs.put_float(&offset_key(name), self.steer_offset + self.steer_min);
                prefs.put_float(&min_key(name), self.stored_bounds.0);
                prefs.put_float(&max_key(name), self.stored_bounds.1);
            }
        }
        prefs.put_boolean(&reversed_key(name), self.drive_reversed);
        info!("{}: saved calibration offset={}", name, self.steer_offset);
    }
}
