//! Cancellation helpers

use std::future::Future;
use tokio_util::sync::CancellationToken;
use volsched_core::{VolschedError, VolschedResult};

/// Run a cluster call, abandoning it as soon as the token is cancelled
pub async fn cancellable<F, T>(cancel: &CancellationToken, call: F) -> VolschedResult<T>
where
    F: Future<Output = VolschedResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VolschedError::Cancelled),
        result = call => result,
    }
}
