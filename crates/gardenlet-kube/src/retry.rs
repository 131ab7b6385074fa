//! Status polling
//!
//! [`until_timeout`] is the one poll loop every wait operation goes through.
//! The polled function classifies each attempt:
//!
//! - [`Poll::Ready`]: done, return the value
//! - [`Poll::Minor`]: not there yet, try again after `interval`
//! - [`Poll::Severe`]: give up immediately
//!
//! The whole loop runs under `tokio::time::timeout`, so a hanging API call is
//! bounded as well. Dropping the returned future cancels the wait.
//!
//! On top of it, [`wait_until_object_ready`] and [`wait_until_object_deleted`]
//! implement the ready/cleanup contract shared by all components.

use std::future::Future;
use std::time::Duration;

use gardenlet_core::{ObjectKey, WaitTimings};
use kube::api::DynamicObject;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::client::ObjectClient;
use crate::error::{KubeError, Result};
use crate::health::ExtensionStatus;
use crate::object::status_of;

/// Outcome of a single poll attempt
#[derive(Debug)]
pub enum Poll<T> {
    /// Condition met
    Ready(T),
    /// Condition not met yet, retry
    Minor(KubeError),
    /// Condition can not be met, stop
    Severe(KubeError),
}

/// Poll `f` every `interval` until it is ready, fails severely or `timeout` elapses
///
/// The first attempt runs immediately. On timeout the last minor error is
/// carried in [`KubeError::Timeout`].
pub async fn until_timeout<T, F, Fut>(
    operation: &str,
    interval: Duration,
    timeout: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Poll<T>>,
{
    let started = Instant::now();
    let mut last_minor: Option<KubeError> = None;

    let polling = async {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f(attempt).await {
                Poll::Ready(value) => return Ok(value),
                Poll::Severe(err) => {
                    warn!(
                        operation = %operation,
                        attempt = attempt,
                        error = %err,
                        "Giving up after severe error"
                    );
                    return Err(err);
                }
                Poll::Minor(err) => {
                    debug!(
                        operation = %operation,
                        attempt = attempt,
                        error = %err,
                        "Condition not met yet, retrying"
                    );
                    last_minor = Some(err);
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    let outcome = tokio::time::timeout(timeout, polling).await;
    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(KubeError::Timeout {
            operation: operation.to_string(),
            timeout,
            last_error: last_minor.map(|e| e.to_string()),
        }),
    };

    if result.is_ok() {
        debug!(
            operation = %operation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Condition met"
        );
    }
    result
}

/// Number of attempts after which a retriable error becomes severe
pub fn severe_threshold_attempts(interval: Duration, severe_threshold: Duration) -> u32 {
    if interval.is_zero() {
        return u32::MAX;
    }
    let attempts = severe_threshold.as_nanos() / interval.as_nanos();
    u32::try_from(attempts).unwrap_or(u32::MAX)
}

/// Minor error while `attempt <= threshold`, severe afterwards
pub fn minor_or_severe<T>(attempt: u32, threshold: u32, err: KubeError) -> Poll<T> {
    if attempt > threshold {
        Poll::Severe(err)
    } else {
        Poll::Minor(err)
    }
}

/// Poll an object until `health` accepts it
///
/// - object missing: minor, the object is expected to appear
/// - API error: severe
/// - health failure: minor, or severe once a retriable failure outlived
///   `severe_threshold`
///
/// Returns the object as observed when it became ready.
pub async fn wait_until_object_ready<C, H>(
    client: &C,
    key: &ObjectKey,
    timings: &WaitTimings,
    health: H,
) -> Result<DynamicObject>
where
    C: ObjectClient + ?Sized,
    H: Fn(&DynamicObject) -> Result<()>,
{
    let operation = format!("error while waiting for {} to become ready", key);
    let threshold = severe_threshold_attempts(timings.interval, timings.severe_threshold);

    until_timeout(&operation, timings.interval, timings.timeout, |attempt| {
        let health = &health;
        async move {
            let object = match client.get(key).await {
                Ok(Some(object)) => object,
                Ok(None) => {
                    return Poll::Minor(KubeError::NotFound {
                        key: key.to_string(),
                    });
                }
                Err(e) => return Poll::Severe(e),
            };

            match health(&object) {
                Ok(()) => Poll::Ready(object),
                Err(e) if e.is_retriable() => minor_or_severe(attempt, threshold, e),
                Err(e) => Poll::Minor(e),
            }
        }
    })
    .await
    .map_err(|e| wrap_wait_error(&operation, e))
}

/// Poll until an object is gone
///
/// An error reported in `status.lastError` while the object lingers is
/// carried along so a timeout explains why deletion is stuck.
pub async fn wait_until_object_deleted<C>(
    client: &C,
    key: &ObjectKey,
    timings: &WaitTimings,
) -> Result<()>
where
    C: ObjectClient + ?Sized,
{
    let operation = format!("error while waiting for {} to be deleted", key);

    until_timeout(&operation, timings.interval, timings.timeout, |_| async move {
        let object = match client.get(key).await {
            Ok(Some(object)) => object,
            Ok(None) => return Poll::Ready(()),
            Err(e) => return Poll::Severe(e),
        };

        let last_error = status_of::<ExtensionStatus>(&object)
            .ok()
            .flatten()
            .and_then(|s| s.last_error)
            .map(|e| e.description);

        Poll::Minor(KubeError::StillPresent {
            key: key.to_string(),
            last_error,
        })
    })
    .await
    .map_err(|e| wrap_wait_error(&operation, e))
}

/// Timeouts already name the operation; everything else gets wrapped
pub(crate) fn wrap_wait_error(operation: &str, err: KubeError) -> KubeError {
    match err {
        KubeError::Timeout { .. } => err,
        other => KubeError::WaitFailed {
            operation: operation.to_string(),
            source: Box::new(other),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const MS: Duration = Duration::from_millis(1);

    #[tokio::test]
    async fn test_ready_immediately() {
        let result = until_timeout("op", MS, Duration::from_secs(1), |_| async { Poll::Ready(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_ready_after_minor_errors() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = until_timeout("op", MS, Duration::from_secs(5), move |_| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Poll::Minor(KubeError::Precondition("not yet".to_string()))
                } else {
                    Poll::Ready("done")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_severe_stops_immediately() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = until_timeout("op", MS, Duration::from_secs(5), move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Poll::Severe(KubeError::Precondition("broken".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(KubeError::Precondition(_))));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_carries_last_minor_error() {
        let result: Result<()> = until_timeout("waiting for x", MS, Duration::from_millis(30), |_| async {
            Poll::Minor(KubeError::Precondition("still waiting".to_string()))
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_timeout());
        let msg = err.to_string();
        assert!(msg.starts_with("waiting for x: timed out"));
        assert!(msg.contains("still waiting"));
    }

    #[test]
    fn test_severe_threshold_attempts() {
        assert_eq!(
            severe_threshold_attempts(Duration::from_secs(5), Duration::from_secs(30)),
            6
        );
        assert_eq!(
            severe_threshold_attempts(Duration::ZERO, Duration::from_secs(30)),
            u32::MAX
        );
    }

    #[test]
    fn test_minor_or_severe() {
        let err = || KubeError::Precondition("x".to_string());
        assert!(matches!(minor_or_severe::<()>(3, 3, err()), Poll::Minor(_)));
        assert!(matches!(minor_or_severe::<()>(4, 3, err()), Poll::Severe(_)));
    }
}
