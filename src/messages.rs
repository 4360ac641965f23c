// Define message types for the runtime

use serde::{Deserialize, Serialize};

// Command from teleop/scripts/chassis kinematics -> runtime
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwerveCommand {
    /// Heading in radians, 0 = chassis forward, expected within [-2π, 2π]
    pub angle_rad: f64,
    /// Signed fraction of maximum drive output
    pub percent_speed: f64,
}

/// Calibration workflow requests
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CalibrationCommand {
    /// Persist the in-memory calibration
    Save,
    /// Re-read calibration from the preference store
    Reload,
    /// Take the current steering position as chassis-forward
    ZeroOffset,
    SetDriveReversed { reversed: bool },
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    /// A motor channel failed during the last control step
    Fault,
}
