//! Retry-until-success scheduling
//!
//! Runs a caller-supplied dial attempt repeatedly on a fixed interval until
//! it succeeds, the budget is exhausted, or the task is cancelled. The loop
//! runs on its own spawned task so a slow attempt never stalls connection
//! I/O processing.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{LinkError, Result};

/// Retry policy: total budget and fixed inter-attempt interval
///
/// `timeout: None` means retry forever. The budget is a soft bound on the
/// number of attempts (`timeout / interval`, rounded down), not a wall-clock
/// deadline: the interval is measured from attempt completion, so an attempt
/// that takes long stretches the cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total duration allowed across all attempts, `None` for unbounded
    pub timeout: Option<Duration>,
    /// Fixed wait between attempt completion and the next attempt
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Create a bounded policy
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            interval,
        }
    }

    /// Create an unbounded policy that retries until success or cancellation
    pub fn forever(interval: Duration) -> Self {
        Self {
            timeout: None,
            interval,
        }
    }

    /// Create from millisecond configuration values
    pub fn from_millis(timeout_ms: Option<u64>, interval_ms: u64) -> Self {
        Self {
            timeout: timeout_ms.map(Duration::from_millis),
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(LinkError::ConfigError(
                "Retry interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handle on an in-flight retry task
///
/// Resolves exactly once: `true` when an attempt succeeded within the
/// budget, `false` on exhaustion or cancellation (indistinguishable by
/// design). Clonable; every clone observes the same resolution.
#[derive(Debug, Clone)]
pub struct RetryHandle {
    result: watch::Receiver<Option<bool>>,
}

impl RetryHandle {
    /// Wait for the retry task to resolve
    pub async fn wait(mut self) -> bool {
        match self.result.wait_for(|r| r.is_some()).await {
            Ok(value) => (*value).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Poll for the result without waiting
    pub fn try_result(&self) -> Option<bool> {
        *self.result.borrow()
    }

    fn resolved(value: bool) -> Self {
        let (tx, rx) = watch::channel(Some(value));
        drop(tx);
        Self { result: rx }
    }
}

#[derive(Clone)]
struct ActiveTask {
    cancel: CancellationToken,
    result: watch::Receiver<Option<bool>>,
    interval: Duration,
}

/// Fixed-interval retry scheduler
///
/// At most one retry task is in flight per scheduler. Starting a new task
/// while one is active cancels the previous task first; the superseded
/// task resolves `false`.
#[derive(Default)]
pub struct Retrier {
    current: Mutex<Option<ActiveTask>>,
}

impl Retrier {
    /// Create a new scheduler with no task in flight
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a retry task and return a handle on its result.
    ///
    /// Repeats `attempt` until it returns `true`, the budget is exhausted,
    /// or the task is cancelled. Between attempts the loop waits one
    /// interval, observing cancellation during the wait. Must be called
    /// within a Tokio runtime.
    pub fn begin<F, Fut>(&self, attempt: F, policy: RetryPolicy) -> RetryHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        if policy.interval.is_zero() {
            warn!("Retry interval must be non-zero, refusing retry task");
            return RetryHandle::resolved(false);
        }

        let (result_tx, result_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        {
            let mut current = self.current.lock();
            if let Some(previous) = current.take() {
                previous.cancel.cancel();
            }
            *current = Some(ActiveTask {
                cancel: cancel.clone(),
                result: result_rx.clone(),
                interval: policy.interval,
            });
        }

        tokio::spawn(async move {
            let succeeded = run_attempts(attempt, policy, cancel).await;
            let _ = result_tx.send(Some(succeeded));
        });

        RetryHandle { result: result_rx }
    }

    /// Cancel the in-flight task without waiting for it to resolve
    pub fn cancel(&self) {
        if let Some(task) = self.current.lock().as_ref() {
            task.cancel.cancel();
        }
    }

    /// Cancel the in-flight task and wait up to two intervals for it to
    /// resolve. Cancellation is cooperative: an attempt already in flight
    /// completes before the loop observes the signal. On grace expiry the
    /// loop is abandoned and the condition is only logged.
    pub async fn stop(&self) {
        let task = self.current.lock().clone();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        let grace = task.interval * 2;
        let mut result = task.result.clone();
        if time::timeout(grace, result.wait_for(|r| r.is_some()))
            .await
            .is_err()
        {
            warn!(
                "Retry task did not acknowledge cancellation within {:?}, abandoning it",
                grace
            );
        }
    }
}

async fn run_attempts<F, Fut>(mut attempt: F, policy: RetryPolicy, cancel: CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    // Only the interval accumulates into the budget, never attempt duration
    let mut elapsed = Duration::ZERO;
    loop {
        if let Some(budget) = policy.timeout {
            if elapsed >= budget {
                debug!("Retry budget of {budget:?} exhausted");
                return false;
            }
        }

        if attempt().await {
            return true;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Retry task cancelled");
                return false;
            }
            _ = time::sleep(policy.interval) => {}
        }
        elapsed += policy.interval;
    }
}
