use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Input ranges accepted by the instrument, in volts
pub const VOLT_RANGES: [f64; 11] = [
    0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0, 10.0, 20.0,
];

/// Physical input channel on the instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChannelId {
    A,
    B,
}

impl ChannelId {
    pub const ALL: [ChannelId; 2] = [ChannelId::A, ChannelId::B];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::A => "A",
            ChannelId::B => "B",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "A" => Ok(ChannelId::A),
            "B" => Ok(ChannelId::B),
            _ => Err(format!("Unknown channel: {}", s)),
        }
    }
}

/// Input coupling
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Coupling {
    #[serde(rename = "AC")]
    Ac,
    #[default]
    #[serde(rename = "DC")]
    Dc,
}

impl std::fmt::Display for Coupling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Coupling::Ac => write!(f, "AC"),
            Coupling::Dc => write!(f, "DC"),
        }
    }
}

/// Configuration for one input channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Full-scale range in volts
    pub range: f64,
    pub coupling: Coupling,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            range: 1.0,
            coupling: Coupling::Dc,
        }
    }
}

impl ChannelConfig {
    pub fn new(enabled: bool, range: f64, coupling: Coupling) -> Self {
        Self {
            enabled,
            range,
            coupling,
        }
    }

    /// Whether `range` is one of [`VOLT_RANGES`]
    pub fn has_valid_range(&self) -> bool {
        VOLT_RANGES.iter().any(|r| (r - self.range).abs() < 1e-9)
    }
}

/// Arguments of the remote stream setup call, all in seconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub stream_duration: f64,
    pub buffer_duration: f64,
    pub sample_interval: f64,
}

/// Arguments of the remote save call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveRequest {
    /// Output directory, relative to the backend's data root
    pub directory: String,
    /// File name pattern (strftime), applied to the stream start time
    pub suffix: String,
    pub bin_size: u32,
}

/// Result of a save: the backend reports failures in-band
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub success: bool,
    pub title: String,
    pub body: String,
}

/// Shared x axes for the time and frequency charts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub time: Vec<f64>,
    pub freq: Vec<f64>,
}

/// Per-channel y values
pub type ChannelTraces = BTreeMap<ChannelId, Vec<f64>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_parse() {
        assert_eq!("a".parse::<ChannelId>().unwrap(), ChannelId::A);
        assert_eq!("B".parse::<ChannelId>().unwrap(), ChannelId::B);
        assert!("C".parse::<ChannelId>().is_err());
    }

    #[test]
    fn test_valid_ranges() {
        assert!(ChannelConfig::new(true, 0.05, Coupling::Ac).has_valid_range());
        assert!(ChannelConfig::new(true, 20.0, Coupling::Dc).has_valid_range());
        assert!(!ChannelConfig::new(true, 3.0, Coupling::Dc).has_valid_range());
    }

    #[test]
    fn test_coupling_wire_names() {
        assert_eq!(serde_json::to_string(&Coupling::Ac).unwrap(), "\"AC\"");
        let parsed: Coupling = serde_json::from_str("\"DC\"").unwrap();
        assert_eq!(parsed, Coupling::Dc);
    }
}
