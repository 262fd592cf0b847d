use std::time::Duration;
use tracing::{info, warn};

use scopedeck_backend::{Backend, SaveRequest};

use crate::{with_timeout, Notification, SaveTarget};

/// Ask the backend to save its current buffer.
///
/// Never fails: a remote error is turned into an error notification so the
/// caller can show it like any other save result.
pub async fn save_buffer(
    backend: &dyn Backend,
    target: &SaveTarget,
    bin_size: u32,
    timeout: Option<Duration>,
) -> Notification {
    let request = SaveRequest {
        directory: target.directory.clone(),
        suffix: target.suffix.clone(),
        bin_size: bin_size.max(1),
    };

    match with_timeout(timeout, "save_buffer", backend.save_buffer(&request)).await {
        Ok(receipt) => {
            info!(
                success = receipt.success,
                directory = %request.directory,
                "Buffer save finished"
            );
            receipt.into()
        }
        Err(e) => {
            warn!(error = %e, "Buffer save failed");
            Notification::failure(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopedeck_backend::{SimulatedBackend, StreamRequest};

    fn target() -> SaveTarget {
        SaveTarget {
            directory: "C:\\data".to_string(),
            suffix: "%Y".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_after_capture_succeeds() {
        let backend = SimulatedBackend::default();
        backend
            .stream_setup(&StreamRequest {
                stream_duration: 1.0,
                buffer_duration: 1.0,
                sample_interval: 1e-3,
            })
            .await
            .unwrap();

        let note = save_buffer(&backend, &target(), 0, None).await;
        assert!(note.success, "{note:?}");
    }

    #[tokio::test]
    async fn test_save_before_capture_reports_failure() {
        let backend = SimulatedBackend::default();
        let note = save_buffer(&backend, &target(), 1, None).await;
        assert!(!note.success);
        assert_eq!(note.title, "ERROR: File NOT saved!");
    }
}
