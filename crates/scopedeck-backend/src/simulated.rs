use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::{
    Backend, BackendError, ChannelConfig, ChannelId, ChannelTraces, SaveReceipt,
    SaveRequest, StreamRequest, TimeAxis,
};

/// The instrument truncates sample intervals to this grid
const INTERVAL_GRID_SECS: f64 = 100e-9;

/// Upper bound on points handed to the charts
const MAX_POINTS: usize = 100_000;

/// Knobs for the in-process instrument
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Report an overflow on every Nth pull (None = never)
    pub overflow_every: Option<u64>,
    /// Frequency of the synthetic sine on every enabled channel
    pub signal_hz: f64,
    /// Flat directory listing returned to the picker
    pub directories: Vec<String>,
    /// Time each pull waits for the next block, as the hardware does
    pub pull_period: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            overflow_every: None,
            signal_hz: 50.0,
            directories: vec![
                "data".to_string(),
                "data\\runs".to_string(),
                "data\\runs\\2024".to_string(),
                "data\\calibration".to_string(),
            ],
            pull_period: Duration::from_millis(20),
        }
    }
}

struct Stream {
    request: StreamRequest,
    actual_interval: f64,
    started: Instant,
    started_at: DateTime<Local>,
    stopped: bool,
}

impl Stream {
    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn is_active(&self) -> bool {
        !self.stopped && self.elapsed_secs() < self.request.stream_duration
    }

    /// Samples held in the ring buffer right now
    fn buffered_samples(&self) -> usize {
        let capacity = (self.request.buffer_duration / self.actual_interval + 1e-6) as usize;
        let elapsed = self.elapsed_secs().min(self.request.stream_duration);
        let captured = (elapsed / self.actual_interval + 1e-6) as usize;
        captured.min(capacity)
    }
}

#[derive(Default)]
struct SimState {
    channels: BTreeMap<ChannelId, ChannelConfig>,
    stream: Option<Stream>,
    pulls: u64,
}

/// In-process stand-in for the instrument bridge.
///
/// Streams stay active for `stream_duration` of tokio time, so tests running
/// with a paused clock see sessions complete deterministically.
pub struct SimulatedBackend {
    config: SimulatorConfig,
    state: Mutex<SimState>,
}

impl SimulatedBackend {
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SimState::default()),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SimState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Protocol("simulator state poisoned".to_string()))
    }

    /// Round down to the instrument's interval grid, never below one step
    pub fn quantize_interval(requested: f64) -> f64 {
        let steps = (requested / INTERVAL_GRID_SECS + 1e-9).floor().max(1.0);
        steps * INTERVAL_GRID_SECS
    }

    fn enabled_channels(state: &SimState) -> Vec<(ChannelId, ChannelConfig)> {
        state
            .channels
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(id, c)| (*id, *c))
            .collect()
    }

    fn effective_bin(samples: usize, bin_size: u32) -> usize {
        (bin_size.max(1) as usize).max(samples / MAX_POINTS)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

#[async_trait]
impl Backend for SimulatedBackend {
    fn name(&self) -> &str {
        "Simulated instrument"
    }

    async fn set_channel(
        &self,
        id: ChannelId,
        config: &ChannelConfig,
    ) -> Result<(), BackendError> {
        if !config.has_valid_range() {
            return Err(BackendError::Remote {
                op: "set_channel",
                message: format!("Invalid voltage range {}", config.range),
            });
        }
        self.lock()?.channels.insert(id, *config);
        Ok(())
    }

    async fn stream_setup(&self, request: &StreamRequest) -> Result<f64, BackendError> {
        let mut state = self.lock()?;
        if state.stream.as_ref().is_some_and(Stream::is_active) {
            return Err(BackendError::Remote {
                op: "stream_setup",
                message: "Already streaming!".to_string(),
            });
        }

        let actual_interval = Self::quantize_interval(request.sample_interval);
        debug!(
            requested = request.sample_interval,
            actual = actual_interval,
            "Simulated stream setup"
        );
        state.stream = Some(Stream {
            request: *request,
            actual_interval,
            started: Instant::now(),
            started_at: Local::now(),
            stopped: false,
        });
        Ok(actual_interval)
    }

    async fn stream_pull(&self) -> Result<bool, BackendError> {
        if !self.config.pull_period.is_zero() {
            tokio::time::sleep(self.config.pull_period).await;
        }
        let mut state = self.lock()?;
        if state.stream.is_none() {
            return Err(BackendError::Remote {
                op: "stream_pull",
                message: "Not currently streaming!".to_string(),
            });
        }
        state.pulls += 1;
        Ok(self
            .config
            .overflow_every
            .is_some_and(|n| n > 0 && state.pulls % n == 0))
    }

    async fn stream_is_active(&self) -> Result<bool, BackendError> {
        Ok(self.lock()?.stream.as_ref().is_some_and(Stream::is_active))
    }

    async fn stream_stop(&self) -> Result<(), BackendError> {
        if let Some(stream) = self.lock()?.stream.as_mut() {
            stream.stopped = true;
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        state.stream = None;
        state.pulls = 0;
        Ok(())
    }

    async fn save_buffer(&self, request: &SaveRequest) -> Result<SaveReceipt, BackendError> {
        let state = self.lock()?;
        let Some(stream) = state.stream.as_ref() else {
            return Ok(SaveReceipt {
                success: false,
                title: "ERROR: File NOT saved!".to_string(),
                body: "Nothing has been acquired yet".to_string(),
            });
        };

        let mut name = String::new();
        if write!(name, "{}", stream.started_at.format(&request.suffix)).is_err() {
            return Ok(SaveReceipt {
                success: false,
                title: "ERROR: File NOT saved!".to_string(),
                body: format!("Invalid file suffix '{}'", request.suffix),
            });
        }
        if !name.ends_with(".hdf5") {
            name.push_str(".hdf5");
        }

        let path = format!("{}/{}", request.directory.trim_end_matches('/'), name);
        Ok(SaveReceipt {
            success: true,
            title: "File saved!".to_string(),
            body: path,
        })
    }

    async fn directory_listing(&self) -> Result<Vec<String>, BackendError> {
        let mut dirs = self.config.directories.clone();
        dirs.sort();
        Ok(dirs)
    }

    async fn time_axis(&self, bin_size: u32) -> Result<TimeAxis, BackendError> {
        let state = self.lock()?;
        let Some(stream) = state.stream.as_ref() else {
            return Ok(TimeAxis::default());
        };
        let samples = stream.buffered_samples();
        let bin = Self::effective_bin(samples, bin_size);
        let n = samples / bin;
        if n < 2 {
            return Ok(TimeAxis::default());
        }

        let span = stream.actual_interval * samples as f64;
        let step = span / (n - 1) as f64;
        let time = (0..n).map(|i| i as f64 * step).collect();
        let freq = (0..=n / 2).map(|k| k as f64 / (n as f64 * step)).collect();
        Ok(TimeAxis { time, freq })
    }

    async fn time_series(&self, bin_size: u32) -> Result<ChannelTraces, BackendError> {
        let state = self.lock()?;
        let mut traces = ChannelTraces::new();
        let Some(stream) = state.stream.as_ref() else {
            return Ok(traces);
        };
        let samples = stream.buffered_samples();
        let bin = Self::effective_bin(samples, bin_size);
        let dt = stream.actual_interval * bin as f64;
        let omega = 2.0 * std::f64::consts::PI * self.config.signal_hz;

        for (id, channel) in Self::enabled_channels(&state) {
            let amplitude = channel.range / 2.0;
            let values = (0..samples / bin)
                .map(|i| amplitude * (omega * i as f64 * dt).sin())
                .collect();
            traces.insert(id, values);
        }
        Ok(traces)
    }

    async fn spectrum(&self, bin_size: u32) -> Result<ChannelTraces, BackendError> {
        let state = self.lock()?;
        let mut traces = ChannelTraces::new();
        let Some(stream) = state.stream.as_ref() else {
            return Ok(traces);
        };
        let samples = stream.buffered_samples();
        let bin = Self::effective_bin(samples, bin_size);
        let n = samples / bin;
        if n < 2 {
            return Ok(traces);
        }
        let df = 1.0 / (n as f64 * stream.actual_interval * bin as f64);
        let peak = (self.config.signal_hz / df).round() as usize;

        for (id, channel) in Self::enabled_channels(&state) {
            let amplitude = channel.range / 2.0;
            let mut psd = vec![0.0; n / 2 + 1];
            if let Some(slot) = psd.get_mut(peak) {
                *slot = amplitude * amplitude / 2.0 / df;
            }
            traces.insert(id, psd);
        }
        Ok(traces)
    }

    async fn band_power(
        &self,
        f_lo: f64,
        f_hi: f64,
    ) -> Result<BTreeMap<ChannelId, Option<f64>>, BackendError> {
        let state = self.lock()?;
        let has_data = state
            .stream
            .as_ref()
            .is_some_and(|s| s.buffered_samples() > 0);
        let in_band = f_lo < self.config.signal_hz && self.config.signal_hz < f_hi;

        Ok(ChannelId::ALL
            .iter()
            .map(|id| {
                let power = state
                    .channels
                    .get(id)
                    .filter(|c| c.enabled && has_data)
                    .map(|c| {
                        let amplitude = c.range / 2.0;
                        if in_band {
                            amplitude * amplitude / 2.0
                        } else {
                            0.0
                        }
                    });
                (*id, power)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Coupling;
    use std::time::Duration;

    fn request(stream: f64, buffer: f64, dt: f64) -> StreamRequest {
        StreamRequest {
            stream_duration: stream,
            buffer_duration: buffer,
            sample_interval: dt,
        }
    }

    #[test]
    fn test_interval_rounds_down_to_grid() {
        let actual = SimulatedBackend::quantize_interval(150e-9);
        assert!((actual - 100e-9).abs() < 1e-15);
        let actual = SimulatedBackend::quantize_interval(1e-3);
        assert!((actual - 1e-3).abs() < 1e-12);
        let actual = SimulatedBackend::quantize_interval(10e-9);
        assert!((actual - 100e-9).abs() < 1e-15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_goes_inactive_after_duration() {
        let backend = SimulatedBackend::default();
        backend.stream_setup(&request(2.0, 2.0, 1e-3)).await.unwrap();
        assert!(backend.stream_is_active().await.unwrap());

        tokio::time::advance(Duration::from_millis(2100)).await;
        assert!(!backend.stream_is_active().await.unwrap());

        // A finished stream can be set up again
        backend.stream_setup(&request(2.0, 2.0, 1e-3)).await.unwrap();
        assert!(backend.stream_is_active().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_while_streaming_is_rejected() {
        let backend = SimulatedBackend::default();
        backend.stream_setup(&request(10.0, 1.0, 1e-3)).await.unwrap();
        let err = backend.stream_setup(&request(10.0, 1.0, 1e-3)).await;
        assert!(matches!(err, Err(BackendError::Remote { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pull_reports_overflow_periodically() {
        let backend = SimulatedBackend::new(SimulatorConfig {
            overflow_every: Some(3),
            ..Default::default()
        });
        assert!(backend.stream_pull().await.is_err());

        backend.stream_setup(&request(10.0, 1.0, 1e-3)).await.unwrap();
        let flags: Vec<bool> = [
            backend.stream_pull().await.unwrap(),
            backend.stream_pull().await.unwrap(),
            backend.stream_pull().await.unwrap(),
        ]
        .to_vec();
        assert_eq!(flags, vec![false, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_series_only_for_enabled_channels() {
        let backend = SimulatedBackend::default();
        backend
            .set_channel(ChannelId::A, &ChannelConfig::new(true, 1.0, Coupling::Dc))
            .await
            .unwrap();
        backend
            .set_channel(ChannelId::B, &ChannelConfig::new(false, 1.0, Coupling::Dc))
            .await
            .unwrap();
        backend.stream_setup(&request(1.0, 1.0, 1e-3)).await.unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;

        let series = backend.time_series(1).await.unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[&ChannelId::A].len(), 500);

        let axis = backend.time_axis(10).await.unwrap();
        assert_eq!(axis.time.len(), 50);
        assert_eq!(axis.freq.len(), 26);

        let power = backend.band_power(40.0, 60.0).await.unwrap();
        assert!(power[&ChannelId::A].unwrap() > 0.0);
        assert_eq!(power[&ChannelId::B], None);
    }

    #[tokio::test]
    async fn test_invalid_range_rejected() {
        let backend = SimulatedBackend::default();
        let err = backend
            .set_channel(ChannelId::A, &ChannelConfig::new(true, 3.0, Coupling::Dc))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_save_formats_suffix() {
        let backend = SimulatedBackend::default();
        let request_save = SaveRequest {
            directory: "data/runs".to_string(),
            suffix: "capture".to_string(),
            bin_size: 1,
        };
        let receipt = backend.save_buffer(&request_save).await.unwrap();
        assert!(!receipt.success);

        backend.stream_setup(&request(1.0, 1.0, 1e-3)).await.unwrap();
        let receipt = backend.save_buffer(&request_save).await.unwrap();
        assert!(receipt.success);
        assert_eq!(receipt.body, "data/runs/capture.hdf5");
    }
}
