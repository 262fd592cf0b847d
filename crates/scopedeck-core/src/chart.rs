use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use scopedeck_backend::{Backend, BackendError, ChannelId, ChannelTraces, TimeAxis};

use crate::with_timeout;

/// One fetch of the chart data
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartSnapshot {
    pub axis: TimeAxis,
    pub traces: ChannelTraces,
    /// Power spectral density per channel, indexed like `axis.freq`
    pub spectrum: ChannelTraces,
}

impl ChartSnapshot {
    pub async fn fetch(
        backend: &dyn Backend,
        bin_size: u32,
        timeout: Option<Duration>,
    ) -> Result<Self, BackendError> {
        let axis = with_timeout(timeout, "time_axis", backend.time_axis(bin_size)).await?;
        let traces = with_timeout(timeout, "time_series", backend.time_series(bin_size)).await?;
        let spectrum = with_timeout(timeout, "spectrum", backend.spectrum(bin_size)).await?;
        Ok(Self {
            axis,
            traces,
            spectrum,
        })
    }

    pub fn points(&self) -> usize {
        self.axis.time.len()
    }

    /// Peak absolute value of each channel trace
    pub fn peaks(&self) -> BTreeMap<ChannelId, f64> {
        self.traces
            .iter()
            .map(|(id, trace)| (*id, trace.iter().fold(0.0_f64, |m, v| m.max(v.abs()))))
            .collect()
    }

    /// Frequency of the strongest PSD bin of each channel
    pub fn peak_frequencies(&self) -> BTreeMap<ChannelId, f64> {
        self.spectrum
            .iter()
            .filter_map(|(id, psd)| {
                let (index, _) = psd
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))?;
                self.axis.freq.get(index).map(|f| (*id, *f))
            })
            .collect()
    }
}

/// Background chart updater.
///
/// Requests never wait for the fetch. Requests made while a fetch is in
/// flight collapse into one follow-up fetch, and consecutive fetches are at
/// least `min_interval` apart.
pub struct ChartRefresher {
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl ChartRefresher {
    pub fn spawn<F>(
        backend: Arc<dyn Backend>,
        bin_size: u32,
        min_interval: Duration,
        timeout: Option<Duration>,
        mut on_snapshot: F,
    ) -> Self
    where
        F: FnMut(ChartSnapshot) + Send + 'static,
    {
        let wake = Arc::new(Notify::new());
        let notified = Arc::clone(&wake);
        let task = tokio::spawn(async move {
            loop {
                notified.notified().await;
                match ChartSnapshot::fetch(backend.as_ref(), bin_size, timeout).await {
                    Ok(snapshot) => on_snapshot(snapshot),
                    // A missed frame is not worth more than a log line
                    Err(e) => warn!(error = %e, "Chart refresh failed"),
                }
                if !min_interval.is_zero() {
                    tokio::time::sleep(min_interval).await;
                }
            }
        });
        debug!(bin_size, ?min_interval, "Chart refresher started");
        Self { wake, task }
    }

    /// Schedule a refresh without waiting for it
    pub fn request(&self) {
        self.wake.notify_one();
    }
}

impl Drop for ChartRefresher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
