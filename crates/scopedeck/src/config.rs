//! Console configuration file support.
//!
//! Loads `scopedeck.toml` from the working directory, or from `--config`.
//! Numeric inputs are clamped the same way the console's input fields are.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scopedeck_backend::{ChannelConfig, ChannelId, Coupling};
use scopedeck_core::{ChannelSet, Mode, SessionOptions, SessionParameters};

/// The config file name
pub const CONFIG_FILE_NAME: &str = "scopedeck.toml";

pub const MIN_SAMPLE_RATE: f64 = 1.0;
pub const MAX_SAMPLE_RATE: f64 = 10e6;
/// Used when a single-capture rate is missing or not a number
pub const FALLBACK_SINGLE_RATE: f64 = 1000.0;
pub const MIN_WINDOW_SECS: f64 = 0.1;
pub const MAX_WINDOW_SECS: f64 = 600.0;
pub const FALLBACK_WINDOW_SECS: f64 = 1.0;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    /// Per-channel settings keyed by channel name (`A`, `B`)
    #[serde(default)]
    pub channels: BTreeMap<ChannelId, ChannelEntry>,
    #[serde(default)]
    pub live: CaptureConfig,
    #[serde(default)]
    pub single: SingleConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// How to reach the instrument bridge
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    /// Bridge program; without one the console can only run `--simulate`
    pub command: Option<String>,
    pub args: Vec<String>,
    /// Directory the bridge is started in
    pub working_dir: Option<PathBuf>,
    /// Upper bound on each remote call; `0s` waits forever
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Separator used in the bridge's directory listing
    pub separator: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            working_dir: None,
            call_timeout: Duration::from_secs(10),
            separator: "\\".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelEntry {
    pub enabled: bool,
    /// Full-scale range in volts
    pub range: f64,
    pub coupling: Coupling,
}

impl Default for ChannelEntry {
    fn default() -> Self {
        let config = ChannelConfig::default();
        Self {
            enabled: config.enabled,
            range: config.range,
            coupling: config.coupling,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureConfig {
    pub window_secs: f64,
    /// Requested rate in Hz
    pub sample_rate: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            window_secs: 1.0,
            sample_rate: 1000.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SingleConfig {
    pub window_secs: f64,
    pub sample_rate: f64,
    /// Save the buffer after every capture
    pub autosave: bool,
}

impl Default for SingleConfig {
    fn default() -> Self {
        Self {
            window_secs: 1.0,
            sample_rate: FALLBACK_SINGLE_RATE,
            autosave: false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub directory: Option<String>,
    /// strftime pattern appended to saved file names
    pub suffix: String,
    pub bin_size: i64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: None,
            suffix: "_%Y-%m-%d_%H-%M-%S".to_string(),
            bin_size: 1,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DisplayConfig {
    /// Minimum time between chart fetches
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub progress_tick: Duration,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(500),
            progress_tick: Duration::from_millis(10),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `scopedeck.toml` in
    /// `working_dir` is used when present, and defaults when not. A file
    /// that exists but fails to parse is a hard error.
    pub fn load(explicit: Option<&Path>, working_dir: &Path) -> Result<Self> {
        let path: PathBuf = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file {} does not exist", path.display());
                }
                path.to_path_buf()
            }
            None => {
                let path = working_dir.join(CONFIG_FILE_NAME);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config
            .channel_set()
            .with_context(|| format!("Invalid channel settings in {}", path.display()))?;
        Ok(config)
    }

    pub fn channel_set(&self) -> Result<ChannelSet> {
        let mut set = ChannelSet::new();
        for (id, entry) in &self.channels {
            set.set(*id, ChannelConfig::new(entry.enabled, entry.range, entry.coupling))
                .with_context(|| format!("Channel {id}"))?;
        }
        Ok(set)
    }

    /// Parameters for a session, with optional command-line overrides
    pub fn session_params(
        &self,
        mode: Mode,
        window_secs: Option<f64>,
        sample_rate: Option<f64>,
    ) -> Result<SessionParameters> {
        let (window, rate, fallback_rate) = match mode {
            Mode::Live => (self.live.window_secs, self.live.sample_rate, MIN_SAMPLE_RATE),
            Mode::Single => (
                self.single.window_secs,
                self.single.sample_rate,
                FALLBACK_SINGLE_RATE,
            ),
        };
        let window = clamp_window(window_secs.unwrap_or(window));
        let rate = clamp_rate(sample_rate.unwrap_or(rate), fallback_rate);
        Ok(SessionParameters::from_rate(mode, window, rate)?)
    }

    pub fn session_options(&self, autosave: Option<bool>) -> SessionOptions {
        SessionOptions {
            call_timeout: self.call_timeout(),
            autosave: autosave.unwrap_or(self.single.autosave),
            progress_tick: self.display.progress_tick,
        }
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        Some(self.backend.call_timeout).filter(|t| !t.is_zero())
    }

    pub fn bin_size(&self) -> u32 {
        clamp_bin_size(self.output.bin_size)
    }

    /// Configured output directory, else the user's documents or home
    /// directory
    pub fn output_directory(&self) -> String {
        if let Some(dir) = &self.output.directory {
            return dir.clone();
        }
        dirs::document_dir()
            .or_else(dirs::home_dir)
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ".".to_string())
    }
}

pub fn clamp_bin_size(bin_size: i64) -> u32 {
    bin_size.clamp(1, u32::MAX as i64) as u32
}

/// Cap a rate at the supported maximum; non-numbers and anything below the
/// minimum become `fallback`
pub fn clamp_rate(rate: f64, fallback: f64) -> f64 {
    if !rate.is_finite() || rate < MIN_SAMPLE_RATE {
        return fallback;
    }
    rate.min(MAX_SAMPLE_RATE)
}

pub fn clamp_window(secs: f64) -> f64 {
    if !secs.is_finite() || secs < MIN_WINDOW_SECS {
        return FALLBACK_WINDOW_SECS;
    }
    secs.min(MAX_WINDOW_SECS)
}
