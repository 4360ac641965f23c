// Simulated motor channel
//
// Used when hardware is disabled and by tests. Clones share one state, so a
// handle kept outside the swerve module can move the sensor and inspect
// what was commanded.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::driver::{ChannelError, FeedbackSource, MotorChannel, Result};

/// Observable state of a simulated channel
#[derive(Debug, Clone, Default)]
pub struct SimState {
    pub position: i32,
    pub analog_raw: i32,
    pub position_setpoint: Option<f64>,
    pub percent_output: Option<f64>,
    pub feedback: Option<FeedbackSource>,
    pub profile_slot: Option<u8>,
    /// Position follows each setpoint immediately (ideal zero-latency servo)
    pub echo: bool,
    /// Every read fails with a sensor fault
    pub faulted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SimChannel {
    id: u8,
    state: Arc<Mutex<SimState>>,
}

impl SimChannel {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            state: Arc::default(),
        }
    }

    /// A channel whose position tracks its setpoint
    pub fn echoing(id: u8) -> Self {
        let channel = Self::new(id);
        channel.state().echo = true;
        channel
    }

    /// Lock and access the shared state
    pub fn state(&self) -> MutexGuard<'_, SimState> {
        // State is plain data, a panic elsewhere cannot leave it inconsistent
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_position(&self, position: i32) {
        let mut state = self.state();
        state.position = position;
        state.analog_raw = position;
    }

    fn check(&self) -> Result<MutexGuard<'_, SimState>> {
        let state = self.state();
        if state.faulted {
            return Err(ChannelError::SensorFault {
                id: self.id,
                reason: "simulated fault".to_string(),
            });
        }
        Ok(state)
    }
}

impl MotorChannel for SimChannel {
    fn read_position(&mut self) -> Result<i32> {
        Ok(self.check()?.position)
    }

    fn read_analog_raw(&mut self) -> Result<i32> {
        Ok(self.check()?.analog_raw)
    }

    fn read_closed_loop_error(&mut self) -> Result<i32> {
        let state = self.check()?;
        Ok(state
            .position_setpoint
            .map_or(0, |goal| goal.round() as i32 - state.position))
    }

    fn set_position_setpoint(&mut self, native_units: f64) -> Result<()> {
        debug!("sim {}: position setpoint {:.2}", self.id, native_units);
        let mut state = self.check()?;
        state.position_setpoint = Some(native_units);
        if state.echo {
            state.position = native_units.round() as i32;
            state.analog_raw = state.position;
        }
        Ok(())
    }

    fn set_percent_output(&mut self, fraction: f64) -> Result<()> {
        debug!("sim {}: percent output {:.3}", self.id, fraction);
        self.check()?.percent_output = Some(fraction);
        Ok(())
    }

    fn configure_feedback_source(&mut self, source: FeedbackSource) -> Result<()> {
        self.check()?.feedback = Some(source);
        Ok(())
    }

    fn select_profile_slot(&mut self, slot: u8) -> Result<()> {
        self.check()?.profile_slot = Some(slot);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let handle = SimChannel::new(1);
        let mut channel = handle.clone();

        handle.set_position(300);
        assert_eq!(channel.read_position().unwrap(), 300);

        channel.set_percent_output(-0.25).unwrap();
        assert_eq!(handle.state().percent_output, Some(-0.25));
    }

    #[test]
    fn test_echo_follows_setpoint() {
        let mut channel = SimChannel::echoing(1);
        channel.set_position_setpoint(127.6).unwrap();
        assert_eq!(channel.read_position().unwrap(), 128);
        assert_eq!(channel.read_closed_loop_error().unwrap(), 0);
    }

    #[test]
    fn test_fault_surfaces_as_sensor_fault() {
        let mut channel = SimChannel::new(5);
        channel.state().faulted = true;
        assert!(matches!(
            channel.read_position(),
            Err(ChannelError::SensorFault { id: 5, .. })
        ));
    }
}
