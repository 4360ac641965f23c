// Steering geometry: native units <-> radians and shortest-path resolution
//
// Angles here are continuous. A module that has spun three times sits near
// 6π, not 0, and targets are expressed in that same multi-turn frame.

use std::f64::consts::{FRAC_PI_2, PI, TAU};

/// Guard against chattering when the distance sits exactly on π or π/2
pub const ANGLE_TOLERANCE: f64 = 0.0005;

/// Native counts per radian used for setpoints (1024 counts per turn)
pub const NATIVE_PER_RADIAN: f64 = 512.0 / PI;

/// Which way the drive wheel spins relative to the commanded speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveOrientation {
    #[default]
    Normal,
    /// Module faces the opposite way; drive must run backwards
    Flipped,
}

impl DriveOrientation {
    pub fn is_flipped(self) -> bool {
        self == Self::Flipped
    }

    pub fn apply(self, speed: f64) -> f64 {
        match self {
            Self::Normal => speed,
            Self::Flipped => -speed,
        }
    }
}

/// A steering target resolved against the module's current angle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedTarget {
    /// Continuous target angle in radians
    pub angle: f64,
    pub orientation: DriveOrientation,
}

/// Offset-corrected position in rotations
fn rotations(raw: i32, offset: f64, range: f64) -> f64 {
    (f64::from(raw) - offset) / range
}

/// Continuous module angle in radians for a raw sensor reading
pub fn native_to_angle(raw: i32, offset: f64, range: f64) -> f64 {
    rotations(raw, offset, range) * TAU
}

/// Whole turns accumulated on the sensor, truncated toward zero
pub fn turn_count(raw: i32, offset: f64, range: f64) -> i64 {
    rotations(raw, offset, range).trunc() as i64
}

/// Resolve a single-turn `requested` angle against `current`
///
/// The request is moved into the sensor's multi-turn frame, unwrapped so it
/// is at most half a turn from `current`, and then, if it is still more than
/// a quarter turn away, replaced by the opposite heading with the drive
/// flipped. The result is always within π/2 (+ tolerance) of `current`.
pub fn resolve_target(requested: f64, current: f64, turns: i64) -> ResolvedTarget {
    let mut target = requested + turns as f64 * TAU;

    // One turn is enough for in-range requests; a request near ±2π against
    // a module near ∓2π needs two.
    let excess = (target - current).abs() - PI;
    if excess > ANGLE_TOLERANCE {
        let shift = (excess / TAU).ceil() * TAU;
        target += if target > current { -shift } else { shift };
    }

    let orientation = if (target - current).abs() - FRAC_PI_2 > ANGLE_TOLERANCE {
        target += if target > current { -PI } else { PI };
        DriveOrientation::Flipped
    } else {
        DriveOrientation::Normal
    };

    ResolvedTarget {
        angle: target,
        orientation,
    }
}

/// Position setpoint in native units for a continuous target angle
///
/// Uses the fixed 1024-count scale regardless of the calibrated range.
pub fn angle_to_native(target: f64, offset: f64) -> f64 {
    target * NATIVE_PER_RADIAN + offset
}
