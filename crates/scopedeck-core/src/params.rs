use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use scopedeck_backend::{ChannelConfig, ChannelId, StreamRequest};

use crate::ParameterError;

/// Stream length used for live sessions: one day, effectively unbounded
pub const LIVE_STREAM_DURATION_SECS: f64 = 60.0 * 60.0 * 24.0;

/// Capture mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Continuous streaming until stopped
    Live,
    /// One bounded capture that completes on its own
    Single,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "live",
            Mode::Single => "single",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timing parameters of one session, all in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SessionParameters {
    pub mode: Mode,
    /// Length of the visible window, and of the backend ring buffer
    pub buffer_duration: f64,
    pub requested_sample_interval: f64,
    pub stream_duration: f64,
}

impl SessionParameters {
    pub fn live(buffer_duration: f64, sample_interval: f64) -> Result<Self, ParameterError> {
        Self::build(Mode::Live, buffer_duration, sample_interval)
    }

    /// One-shot capture; the stream lasts exactly one buffer
    pub fn single(buffer_duration: f64, sample_interval: f64) -> Result<Self, ParameterError> {
        Self::build(Mode::Single, buffer_duration, sample_interval)
    }

    /// Build from a window length and a sample rate in Hz
    pub fn from_rate(mode: Mode, window_secs: f64, sample_rate: f64) -> Result<Self, ParameterError> {
        positive("sample_rate", sample_rate)?;
        Self::build(mode, window_secs, 1.0 / sample_rate)
    }

    fn build(mode: Mode, buffer_duration: f64, sample_interval: f64) -> Result<Self, ParameterError> {
        positive("buffer_duration", buffer_duration)?;
        positive("sample_interval", sample_interval)?;
        if Duration::try_from_secs_f64(buffer_duration).is_err() {
            return Err(ParameterError::TooLong {
                name: "buffer_duration",
                value: buffer_duration,
            });
        }
        let stream_duration = match mode {
            Mode::Live => LIVE_STREAM_DURATION_SECS,
            Mode::Single => buffer_duration,
        };
        Ok(Self {
            mode,
            buffer_duration,
            requested_sample_interval: sample_interval,
            stream_duration,
        })
    }

    pub fn buffer_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.buffer_duration).unwrap_or(Duration::MAX)
    }

    /// Setup arguments for the given sample interval
    pub fn stream_request(&self, sample_interval: f64) -> StreamRequest {
        StreamRequest {
            stream_duration: self.stream_duration,
            buffer_duration: self.buffer_duration,
            sample_interval,
        }
    }
}

fn positive(name: &'static str, value: f64) -> Result<(), ParameterError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ParameterError::NotPositive { name, value })
    }
}

/// Channel configuration for every input on the instrument
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet {
    channels: BTreeMap<ChannelId, ChannelConfig>,
}

impl Default for ChannelSet {
    fn default() -> Self {
        Self {
            channels: ChannelId::ALL
                .iter()
                .map(|id| (*id, ChannelConfig::default()))
                .collect(),
        }
    }
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: ChannelId, config: ChannelConfig) -> Result<(), ParameterError> {
        if !config.has_valid_range() {
            return Err(ParameterError::InvalidRange(config.range));
        }
        self.channels.insert(id, config);
        Ok(())
    }

    pub fn get(&self, id: ChannelId) -> Option<&ChannelConfig> {
        self.channels.get(&id)
    }

    pub fn any_enabled(&self) -> bool {
        self.channels.values().any(|c| c.enabled)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChannelId, &ChannelConfig)> {
        self.channels.iter().map(|(id, c)| (*id, c))
    }
}
