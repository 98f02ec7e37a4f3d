//! Task execution harness: every background job runs through [`run_task`], which replaces the
//! Python worker's `DatabaseTask` base class with plain function composition — timing, retry
//! and conflict-swallowing are applied around the task body rather than inherited into it.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{TaskError, TaskResult};
use crate::metrics::Metrics;

/// Maximum number of attempts (the first try plus up to two retries) before a transient
/// failure is allowed to propagate.
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Run `body`, timing it, retrying on [`TaskError::Transient`] with exponential backoff, and
/// turning a swallowed [`TaskError::Conflict`] into `on_conflict`.
///
/// [`TaskError::Invariant`] is never retried or swallowed: it always propagates to the caller.
pub async fn run_task<T, F, Fut>(
    name: &str,
    metrics: &dyn Metrics,
    on_conflict: T,
    body: F,
) -> TaskResult<T>
where
    T: Clone,
    F: Fn() -> Fut,
    Fut: Future<Output = TaskResult<T>>,
{
    let start = Instant::now();
    let mut attempt = 0;
    let result = loop {
        attempt += 1;
        match body().await {
            Ok(value) => break Ok(value),
            Err(TaskError::Conflict(reason)) => {
                info!(task = name, reason = %reason, "task conflict, skipping");
                metrics.incr(&format!("task.{name}.conflict"));
                break Ok(on_conflict.clone());
            }
            Err(TaskError::Invariant(reason)) => {
                metrics.incr(&format!("task.{name}.invariant"));
                break Err(TaskError::Invariant(reason));
            }
            Err(err @ TaskError::Transient(_)) if attempt < MAX_ATTEMPTS => {
                let delay = RETRY_BASE_DELAY * 2_u32.pow(attempt - 1);
                warn!(task = name, attempt, ?delay, error = %err, "transient task failure, retrying");
                metrics.incr(&format!("task.{name}.retry"));
                tokio::time::sleep(delay).await;
            }
            Err(err) => break Err(err),
        }
    };

    metrics.timer(&format!("task.{name}"), start.elapsed());
    match &result {
        Ok(_) => info!(task = name, attempts = attempt, "task completed"),
        Err(err) => warn!(task = name, attempts = attempt, error = %err, "task failed"),
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::metrics::RecordingMetrics;

    #[tokio::test]
    async fn succeeds_on_first_try_without_retry() {
        let metrics = RecordingMetrics::new();
        let calls = AtomicU32::new(0);
        let result = run_task("ok", &metrics, 0_i32, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        })
        .await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let metrics = RecordingMetrics::new();
        let calls = AtomicU32::new(0);
        let result = run_task("flaky", &metrics, 0_i32, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TaskError::Transient(anyhow::anyhow!("db hiccup")))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.count("task.flaky.retry"), 2);
    }

    #[tokio::test]
    async fn conflict_is_swallowed_into_fallback_value() {
        let metrics = RecordingMetrics::new();
        let result = run_task("dup", &metrics, -1_i32, || async {
            Err(TaskError::Conflict("already upserted".into()))
        })
        .await;
        assert_eq!(result.unwrap(), -1);
        assert_eq!(metrics.count("task.dup.conflict"), 1);
    }

    #[tokio::test]
    async fn invariant_violation_propagates_without_retry() {
        let metrics = RecordingMetrics::new();
        let calls = AtomicU32::new(0);
        let result = run_task("broken", &metrics, 0_i32, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TaskError::Invariant("station missing".into()))
        })
        .await;
        assert!(matches!(result, Err(TaskError::Invariant(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_and_propagates_transient_error() {
        let metrics = RecordingMetrics::new();
        let calls = AtomicU32::new(0);
        let result = run_task("always_flaky", &metrics, 0_i32, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<i32, _>(TaskError::Transient(anyhow::anyhow!("still down")))
        })
        .await;
        assert!(matches!(result, Err(TaskError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
