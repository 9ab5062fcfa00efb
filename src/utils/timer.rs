use crate::core::error::{Result, WorkflowError};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Waits for `duration` unless `cancel` fires first.
pub async fn delay(duration: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        _ = sleep(duration) => Ok(()),
    }
}

/// Drives `fut` to completion unless `cancel` fires first, in which case the
/// future is dropped and its request aborted.
pub async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
        out = fut => out,
    }
}
