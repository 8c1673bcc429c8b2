use std::fmt;

use anyhow::anyhow;

/// Number of channels the headset reports.
pub const CHANNEL_COUNT: usize = 3;

/// Biometric channels reported by the EEG headset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SensorChannel {
    /// Computed attention level, 0-100
    Attention = 0,
    /// Computed meditation (relaxation) level, 0-100
    Meditation = 1,
    /// Electrode contact quality, 0 = clean signal
    SignalQuality = 2,
}

impl SensorChannel {
    pub const ALL: [SensorChannel; CHANNEL_COUNT] = [
        SensorChannel::Attention,
        SensorChannel::Meditation,
        SensorChannel::SignalQuality,
    ];

    /// Human-readable name, suitable for overlay labels.
    pub fn label(&self) -> &'static str {
        match self {
            SensorChannel::Attention => "Attention",
            SensorChannel::Meditation => "Meditation",
            SensorChannel::SignalQuality => "Signal",
        }
    }
}

impl fmt::Display for SensorChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl TryFrom<u8> for SensorChannel {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SensorChannel::Attention),
            1 => Ok(SensorChannel::Meditation),
            2 => Ok(SensorChannel::SignalQuality),
            other => Err(anyhow!("unknown sensor channel: {other}")),
        }
    }
}

/// A single decoded reading from the headset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleValue {
    pub channel: SensorChannel,
    pub value: f32,
    /// Microseconds since an arbitrary driver epoch
    pub timestamp_us: u64,
}

impl SampleValue {
    pub fn new(channel: SensorChannel, value: f32, timestamp_us: u64) -> Self {
        Self {
            channel,
            value,
            timestamp_us,
        }
    }
}
