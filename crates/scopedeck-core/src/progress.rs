use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Default update period of the progress bar
pub const DEFAULT_TICK: Duration = Duration::from_millis(10);

const FULL: f64 = 100.0;

/// Time-based progress bar for single captures.
///
/// Progress is a percentage estimated from ticks rather than reported by the
/// instrument: each tick adds `tick / duration * 100` until the bar reaches
/// 100. The bar may therefore finish before or after the capture does.
/// Cancelling, or dropping the indicator, stops the ticker where it is.
pub struct ProgressIndicator {
    tick: Duration,
    value: watch::Sender<f64>,
    task: Option<JoinHandle<()>>,
}

impl ProgressIndicator {
    pub fn new(tick: Duration) -> Self {
        let (value, _) = watch::channel(0.0);
        Self {
            tick: tick.max(Duration::from_millis(1)),
            value,
            task: None,
        }
    }

    /// Reset to zero and advance over `duration`
    pub fn start(&mut self, duration: Duration) {
        self.cancel();
        self.value.send_replace(0.0);

        let step = if duration.is_zero() {
            FULL
        } else {
            self.tick.as_secs_f64() / duration.as_secs_f64() * FULL
        };
        let tick = self.tick;
        let value = self.value.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            // The first tick completes immediately
            interval.tick().await;
            let mut progress = 0.0_f64;
            while progress < FULL {
                interval.tick().await;
                progress = (progress + step).min(FULL);
                value.send_replace(progress);
            }
        }));
    }

    /// Halt the ticker, leaving the bar at its current value
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn value(&self) -> f64 {
        *self.value.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<f64> {
        self.value.subscribe()
    }
}

impl Default for ProgressIndicator {
    fn default() -> Self {
        Self::new(DEFAULT_TICK)
    }
}

impl Drop for ProgressIndicator {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_progress_fills_over_duration() {
        let mut progress = ProgressIndicator::default();
        progress.start(Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(505)).await;
        let halfway = progress.value();
        assert!((halfway - 50.0).abs() < 2.0, "got {halfway}");

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(progress.value(), 100.0);
        assert!(!progress.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_freezes_value() {
        let mut progress = ProgressIndicator::default();
        progress.start(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(305)).await;

        progress.cancel();
        let frozen = progress.value();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(progress.value(), frozen);
        assert!(frozen > 0.0 && frozen < 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_resets_to_zero() {
        let mut progress = ProgressIndicator::default();
        progress.start(Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(progress.value(), 100.0);

        progress.start(Duration::from_secs(10));
        assert_eq!(progress.value(), 0.0);
        assert!(progress.is_running());
    }
}
