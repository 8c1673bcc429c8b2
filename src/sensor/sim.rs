//! Simulated headset driver for development without hardware.

use std::time::Duration;

use tracing::info;

use super::{SensorDriver, SensorError};
use crate::core::{SampleValue, SensorChannel};

/// Driver that answers on the first candidate port and emits smooth
/// deterministic waveforms, one sample roughly every 10ms.
pub struct SimulatedSensor {
    tick: u64,
    connected: bool,
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self {
            tick: 0,
            connected: false,
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorDriver for SimulatedSensor {
    fn connect(&mut self, port: &str, _baud: u32) -> Result<(), SensorError> {
        info!("Simulated headset on {}", port);
        self.connected = true;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<Option<SampleValue>, SensorError> {
        if !self.connected {
            return Err(SensorError::Protocol("not connected".to_string()));
        }
        std::thread::sleep(Duration::from_millis(10));
        self.tick += 1;
        let t = self.tick as f32;
        let timestamp_us = self.tick * 10_000;

        // Rotate through the channels so each updates ~33 times a second
        let sample = match self.tick % 3 {
            0 => SampleValue::new(
                SensorChannel::Attention,
                (50.0 + 40.0 * (t / 25.0).sin()).clamp(0.0, 100.0),
                timestamp_us,
            ),
            1 => SampleValue::new(
                SensorChannel::Meditation,
                (50.0 + 35.0 * (t / 40.0).cos()).clamp(0.0, 100.0),
                timestamp_us,
            ),
            _ => SampleValue::new(SensorChannel::SignalQuality, 0.0, timestamp_us),
        };
        Ok(Some(sample))
    }

    fn disconnect(&mut self) {
        self.connected = false;
        info!("Simulated headset disconnected after {} samples", self.tick);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_stay_in_band() {
        let mut sim = SimulatedSensor::new();
        sim.connect("COM1", 57600).unwrap();
        for _ in 0..12 {
            let sample = sim.read_sample().unwrap().unwrap();
            assert!((0.0..=100.0).contains(&sample.value), "value {} out of band", sample.value);
        }
        sim.disconnect();
        assert!(sim.read_sample().is_err());
    }
}
