use std::future::Future;
use std::time::Duration;

use scopedeck_backend::BackendError;

/// Await a backend call, failing with [`BackendError::Timeout`] once
/// `timeout` elapses. `None` waits forever.
pub async fn with_timeout<T, F>(
    timeout: Option<Duration>,
    op: &'static str,
    call: F,
) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| BackendError::Timeout { op, timeout })?,
        None => call.await,
    }
}
