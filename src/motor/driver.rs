// Motor channel abstraction for a swerve module
//
// A channel is one motor controller: the steering motor reports an absolute
// position and takes position setpoints, the drive motor takes percent output.
// The swerve core only talks to this trait.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use serialport::SerialPort;
use tracing::{debug, info, warn};

use super::feetech::{FeetechBus, FeetechError, OperatingMode};
use crate::config::{MAX_RAW_VELOCITY, TICKS_PER_NATIVE_COUNT};

/// Feedback sensor used for closed-loop position control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackSource {
    /// Absolute sensor read through the controller's analog input
    AbsoluteAnalog,
    /// Relative encoder on the motor shaft
    Relative,
}

/// Error types for a motor channel
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Motor {id} is not reachable")]
    Unreachable { id: u8 },

    #[error("Motor {id} has no profile slot {slot}")]
    UnsupportedProfileSlot { id: u8, slot: u8 },

    #[error("Motor {id} does not support feedback source {feedback:?}")]
    UnsupportedFeedback { id: u8, feedback: FeedbackSource },

    #[error("Sensor fault on motor {id}: {reason}")]
    SensorFault { id: u8, reason: String },

    #[error("Motor bus error: {0}")]
    Bus(#[from] FeetechError),
}

pub type Result<T> = std::result::Result<T, ChannelError>;

/// One motor controller as seen by the swerve core
///
/// Positions are in native units: a signed count proportional to shaft
/// angle, possibly spanning several turns. No wraparound handling happens
/// at this boundary.
pub trait MotorChannel {
    /// Current sensor position in native units
    fn read_position(&mut self) -> Result<i32>;

    /// Raw sensor reading before any scaling
    fn read_analog_raw(&mut self) -> Result<i32>;

    /// Difference between the active setpoint and the measured position
    fn read_closed_loop_error(&mut self) -> Result<i32>;

    /// Closed-loop position target in native units
    fn set_position_setpoint(&mut self, native_units: f64) -> Result<()>;

    /// Open-loop output as a signed fraction of maximum
    fn set_percent_output(&mut self, fraction: f64) -> Result<()>;

    fn configure_feedback_source(&mut self, source: FeedbackSource) -> Result<()>;

    fn select_profile_slot(&mut self, slot: u8) -> Result<()>;
}

/// A Feetech bus shared by the channels of one module
pub type SharedBus<P = Box<dyn SerialPort>> = Arc<Mutex<FeetechBus<P>>>;

/// One Feetech servo on a shared bus
pub struct FeetechChannel<P: Read + Write = Box<dyn SerialPort>> {
    bus: SharedBus<P>,
    id: u8,
    goal_native: Option<i32>,
    stop_on_drop: bool,
}

impl<P: Read + Write> FeetechChannel<P> {
    /// Bind to servo `id`, failing if it does not answer a ping
    pub fn new(bus: SharedBus<P>, id: u8) -> Result<Self> {
        let channel = Self {
            bus,
            id,
            goal_native: None,
            stop_on_drop: false,
        };
        if !channel.with_bus(|bus, id| bus.ping(id))? {
            warn!("Motor {} not responding to ping", id);
            return Err(ChannelError::Unreachable { id });
        }
        debug!("Motor {} responding", id);
        Ok(channel)
    }

    /// Bind to servo `id` and put it in velocity mode for percent output
    pub fn velocity(bus: SharedBus<P>, id: u8) -> Result<Self> {
        let mut channel = Self::new(bus, id)?;
        info!("Configuring motor {} for velocity control", id);
        channel.with_bus(|bus, id| bus.switch_mode(id, OperatingMode::Velocity))?;
        channel.stop_on_drop = true;
        Ok(channel)
    }

    fn with_bus<T>(
        &self,
        f: impl FnOnce(&mut FeetechBus<P>, u8) -> std::result::Result<T, FeetechError>,
    ) -> Result<T> {
        let mut bus = self.bus.lock().map_err(|_| ChannelError::SensorFault {
            id: self.id,
            reason: "motor bus lock poisoned".to_string(),
        })?;
        Ok(f(&mut *bus, self.id)?)
    }
}

impl<P: Read + Write> MotorChannel for FeetechChannel<P> {
    fn read_position(&mut self) -> Result<i32> {
        let ticks = self.with_bus(|bus, id| bus.get_position(id))?;
        Ok(i32::from(ticks).div_euclid(TICKS_PER_NATIVE_COUNT))
    }

    fn read_analog_raw(&mut self) -> Result<i32> {
        Ok(i32::from(self.with_bus(|bus, id| bus.get_position_raw(id))?))
    }

    fn read_closed_loop_error(&mut self) -> Result<i32> {
        let present = self.read_position()?;
        Ok(self.goal_native.map_or(0, |goal| goal - present))
    }

    fn set_position_setpoint(&mut self, native_units: f64) -> Result<()> {
        let native = native_units.round() as i32;
        let ticks = native.saturating_mul(TICKS_PER_NATIVE_COUNT).clamp(-0x7FFF, 0x7FFF) as i16;
        self.with_bus(|bus, id| bus.set_position(id, ticks))?;
        self.goal_native = Some(native);
        Ok(())
    }

    fn set_percent_output(&mut self, fraction: f64) -> Result<()> {
        let raw = (fraction * f64::from(MAX_RAW_VELOCITY)).round();
        let raw = raw.clamp(-f64::from(0x7FFF), f64::from(0x7FFF)) as i16;
        self.with_bus(|bus, id| bus.set_velocity(id, raw))
    }

    fn configure_feedback_source(&mut self, source: FeedbackSource) -> Result<()> {
        match source {
            // The servo's magnetic encoder is its absolute sensor
            FeedbackSource::AbsoluteAnalog => {
                info!("Configuring motor {} for absolute position control", self.id);
                self.with_bus(|bus, id| bus.enable_multi_turn_position(id))
            }
            FeedbackSource::Relative => Err(ChannelError::UnsupportedFeedback {
                id: self.id,
                feedback: source,
            }),
        }
    }

    fn select_profile_slot(&mut self, slot: u8) -> Result<()> {
        // Gains live in servo EEPROM; there is exactly one profile
        if slot == 0 {
            Ok(())
        } else {
            Err(ChannelError::UnsupportedProfileSlot { id: self.id, slot })
        }
    }
}

impl<P: Read + Write> Drop for FeetechChannel<P> {
    fn drop(&mut self) {
        // Try to stop a driving motor when the channel goes away (safety measure)
        if self.stop_on_drop {
            info!("Stopping motor {}", self.id);
            if let Err(e) = self.with_bus(|bus, id| bus.set_velocity(id, 0)) {
                warn!("Failed to stop motor {} on drop: {}", self.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motor::feetech::tests::ScriptedPort;

    fn shared(port: ScriptedPort) -> SharedBus<ScriptedPort> {
        Arc::new(Mutex::new(FeetechBus::from_port(port)))
    }

    #[test]
    fn test_unreachable_motor_fails_binding() {
        let result = FeetechChannel::new(shared(ScriptedPort::default()), 4);
        assert!(matches!(result, Err(ChannelError::Unreachable { id: 4 })));
    }

    #[test]
    fn test_position_is_scaled_to_native_counts() {
        let mut port = ScriptedPort::default();
        port.reply(1, &[]); // ping
        port.reply(1, &[0x00, 0x08]); // 2048 ticks
        let mut channel = FeetechChannel::new(shared(port), 1).unwrap();

        assert_eq!(channel.read_position().unwrap(), 512);
    }

    #[test]
    fn test_negative_ticks_floor_to_native_counts() {
        let mut port = ScriptedPort::default();
        port.reply(1, &[]);
        port.reply(1, &[0x05, 0x80]); // -5 ticks
        let mut channel = FeetechChannel::new(shared(port), 1).unwrap();

        assert_eq!(channel.read_position().unwrap(), -2);
    }

    #[test]
    fn test_closed_loop_error_tracks_last_goal() {
        let mut port = ScriptedPort::default();
        port.reply(1, &[]); // ping
        port.reply(1, &[]); // goal position write ack
        port.reply(1, &[0x00, 0x01]); // 256 ticks = 64 native
        let mut channel = FeetechChannel::new(shared(port), 1).unwrap();

        channel.set_position_setpoint(128.0).unwrap();
        assert_eq!(channel.read_closed_loop_error().unwrap(), 64);
    }

    #[test]
    fn test_velocity_channel_stops_on_drop() {
        let mut port = ScriptedPort::default();
        for _ in 0..6 {
            port.reply(2, &[]); // ping and five mode-switch writes
        }
        let bus = shared(port);
        let channel = FeetechChannel::velocity(bus.clone(), 2).unwrap();
        // The stop write gets no reply; it is still sent
        drop(channel);

        let bus = bus.lock().unwrap();
        let tx = &bus.port_ref().tx;
        // Last packet: WRITE GoalVelocity = 0
        assert_eq!(&tx[tx.len() - 9..tx.len() - 1], &[0xFF, 0xFF, 2, 5, 0x03, 46, 0, 0]);
    }

    #[test]
    fn test_absolute_feedback_selects_multi_turn_position_mode() {
        let mut port = ScriptedPort::default();
        for _ in 0..8 {
            port.reply(1, &[]); // ping and seven configuration writes
        }
        let bus = shared(port);
        let mut channel = FeetechChannel::new(bus.clone(), 1).unwrap();
        channel
            .configure_feedback_source(FeedbackSource::AbsoluteAnalog)
            .unwrap();

        let bus = bus.lock().unwrap();
        let tx = &bus.port_ref().tx;
        let sent = |packet: &[u8]| tx.windows(packet.len()).any(|w| w == packet);
        assert!(sent(&[0xFF, 0xFF, 1, 5, 0x03, 9, 0, 0])); // min angle limit
        assert!(sent(&[0xFF, 0xFF, 1, 5, 0x03, 11, 0, 0])); // max angle limit
        assert!(sent(&[0xFF, 0xFF, 1, 4, 0x03, 33, 0])); // position mode
    }

    #[test]
    fn test_relative_feedback_is_unsupported() {
        let mut port = ScriptedPort::default();
        port.reply(1, &[]);
        let mut channel = FeetechChannel::new(shared(port), 1).unwrap();

        assert!(matches!(
            channel.configure_feedback_source(FeedbackSource::Relative),
            Err(ChannelError::UnsupportedFeedback { id: 1, .. })
        ));
    }

    #[test]
    fn test_only_profile_slot_zero() {
        let mut port = ScriptedPort::default();
        port.reply(2, &[]);
        let mut channel = FeetechChannel::new(shared(port), 2).unwrap();

        assert!(channel.select_profile_slot(0).is_ok());
        assert!(matches!(
            channel.select_profile_slot(1),
            Err(ChannelError::UnsupportedProfileSlot { id: 2, slot: 1 })
        ));
    }
}
