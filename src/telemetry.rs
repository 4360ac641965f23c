// Dashboard values published for operator display
//
// Publishing never blocks the control path: samples are buffered during the
// control step and shipped out by the runtime afterwards.

use serde::{Deserialize, Serialize};

/// Sink for named numeric values
pub trait Dashboard {
    fn publish_number(&mut self, label: &str, value: f64);
}

/// One named value, as sent on the telemetry topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub label: String,
    pub value: f64,
}

/// Collects samples until drained
#[derive(Debug, Default)]
pub struct BufferedDashboard {
    samples: Vec<TelemetrySample>,
}

impl BufferedDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything published since the last drain
    pub fn drain(&mut self) -> Vec<TelemetrySample> {
        std::mem::take(&mut self.samples)
    }

    /// Latest value published under `label`
    pub fn value(&self, label: &str) -> Option<f64> {
        self.samples
            .iter()
            .rev()
            .find(|s| s.label == label)
            .map(|s| s.value)
    }
}

impl Dashboard for BufferedDashboard {
    fn publish_number(&mut self, label: &str, value: f64) {
        self.samples.push(TelemetrySample {
            label: label.to_string(),
            value,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_empties_buffer() {
        let mut dash = BufferedDashboard::new();
        dash.publish_number("fl ADC", 12.0);
        dash.publish_number("fl ADC", 13.0);
        assert_eq!(dash.value("fl ADC"), Some(13.0));

        let samples = dash.drain();
        assert_eq!(samples.len(), 2);
        assert_eq!(dash.value("fl ADC"), None);
    }
}
