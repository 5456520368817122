//! Scoped timing of a single operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::adapter::{AdapterError, AdapterResult};
use crate::measurement::Operation;

/// Awaits `future` and returns its output along with the elapsed wall-clock time.
///
/// The clock starts right before the future is first polled and stops as soon as it completes,
/// regardless of whether the output is a success or an error.
pub async fn measure<F: Future>(future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}

/// Like [`measure`], but fails the operation with [`AdapterError::Timeout`] once `timeout`
/// elapses.
pub async fn measure_with_timeout<T, F>(
    operation: Operation,
    timeout: Duration,
    future: F,
) -> (AdapterResult<T>, Duration)
where
    F: Future<Output = AdapterResult<T>>,
{
    measure(async move {
        match tokio::time::timeout(timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Timeout {
                operation: operation.as_str(),
                timeout,
            }),
        }
    })
    .await
}

/// Converts a duration to fractional milliseconds.
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}
