//! Steering and drive control for a single swerve module, with persisted
//! calibration and a Zenoh-facing control loop.

pub mod config;
pub mod messages;
pub mod motor;
pub mod prefs;
pub mod runtime;
pub mod swerve;
pub mod telemetry;
