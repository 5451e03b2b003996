//! Deadlines for in-flight operations.
//!
//! The operation runs as its own task. When the deadline passes first the
//! caller gets the timeout error right away, while the task keeps running
//! and its eventual outcome is dropped.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinError;
use tracing::debug;

use crate::error::{Error, Result};

/// Races `operation` against a timer of `timeout`.
///
/// If the timer fires first, `on_timeout` builds the returned error and the
/// operation is left running without anyone observing its result. If the
/// operation settles first, the timer is dropped.
///
/// # Errors
///
/// Returns the operation's own error, the error produced by `on_timeout`, or
/// [`Error::TaskFailed`] if the operation's task panicked.
///
/// # Panics
///
/// Panics if called outside of a Tokio runtime.
pub async fn with_timeout<F, T, O>(operation: F, timeout: Duration, on_timeout: O) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
    O: FnOnce(Duration) -> Error,
{
    let task = tokio::spawn(operation);

    tokio::select! {
        joined = task => joined.unwrap_or_else(|err| Err(task_failed(&err))),
        () = tokio::time::sleep(timeout) => {
            debug!(timeout_ms = timeout.as_millis(), "operation timed out, abandoning it");
            Err(on_timeout(timeout))
        }
    }
}

fn task_failed(err: &JoinError) -> Error {
    Error::TaskFailed(err.to_string())
}
