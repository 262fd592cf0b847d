use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::{
    ChannelConfig, ChannelId, ChannelTraces, SaveReceipt, SaveRequest, StreamRequest, TimeAxis,
};

/// Errors raised by a remote backend call
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to spawn backend process: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Backend call '{op}' timed out after {timeout:?}")]
    Timeout {
        op: &'static str,
        timeout: std::time::Duration,
    },

    #[error("Backend connection closed")]
    Disconnected,

    #[error("Backend protocol error: {0}")]
    Protocol(String),

    #[error("Backend rejected '{op}': {message}")]
    Remote { op: &'static str, message: String },
}

/// The remote measurement backend.
///
/// Every method is one round trip. The session controller never issues two
/// calls concurrently from its poll loop, but chart refreshes may interleave
/// with it, so implementations must tolerate calls from more than one task.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable name of the backend
    fn name(&self) -> &str;

    async fn set_channel(&self, id: ChannelId, config: &ChannelConfig)
        -> Result<(), BackendError>;

    /// Start streaming. Returns the sample interval the instrument will
    /// actually use, which may differ from the requested one.
    async fn stream_setup(&self, request: &StreamRequest) -> Result<f64, BackendError>;

    /// Drain newly captured samples into the backend buffer.
    /// Returns true if a sample overflowed or went out of range.
    async fn stream_pull(&self) -> Result<bool, BackendError>;

    async fn stream_is_active(&self) -> Result<bool, BackendError>;

    async fn stream_stop(&self) -> Result<(), BackendError>;

    /// Close and reopen the instrument connection
    async fn reconnect(&self) -> Result<(), BackendError>;

    async fn save_buffer(&self, request: &SaveRequest) -> Result<SaveReceipt, BackendError>;

    /// Flat list of separator-delimited directory paths under the data root
    async fn directory_listing(&self) -> Result<Vec<String>, BackendError>;

    async fn time_axis(&self, bin_size: u32) -> Result<TimeAxis, BackendError>;

    /// Buffered samples in volts
    async fn time_series(&self, bin_size: u32) -> Result<ChannelTraces, BackendError>;

    /// Power spectral density in V^2/Hz
    async fn spectrum(&self, bin_size: u32) -> Result<ChannelTraces, BackendError>;

    /// PSD integrated over `(f_lo, f_hi)`; `None` for channels with no data
    async fn band_power(
        &self,
        f_lo: f64,
        f_hi: f64,
    ) -> Result<BTreeMap<ChannelId, Option<f64>>, BackendError>;
}
