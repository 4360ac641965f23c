// Motor channels for a swerve module
//
// Provides:
// - The channel contract the swerve core drives (position + percent output)
// - Feetech STS serial protocol implementation and a channel on top of it
// - A simulated channel for running without hardware

mod driver;
pub mod feetech;
mod sim;

pub use driver::{ChannelError, FeedbackSource, FeetechChannel, MotorChannel, SharedBus};
pub use feetech::{FeetechBus, FeetechError};
pub use sim::{SimChannel, SimState};
