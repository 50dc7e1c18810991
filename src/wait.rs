//! Bounded, cancellable polling used while an instance converges on a
//! target status.

use std::fmt::Debug;
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Number of checks made when no policy is configured.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
/// Delay between checks when no policy is configured.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// How often and how long to poll.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WaitPolicy {
    /// Maximum number of checks before giving up.
    pub max_attempts: u32,
    /// Sleep between consecutive checks. Zero is allowed.
    pub interval: Duration,
}

impl WaitPolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_INTERVAL)
    }
}

/// Reasons a wait ends without the condition being met.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WaitError<S, E>
where
    S: Debug,
    E: std::error::Error + 'static,
{
    /// Every attempt ran and none satisfied the condition.
    #[error("condition not met after {attempts} attempts")]
    Exhausted {
        /// Attempts made.
        attempts: u32,
        /// Last value observed by the check, if any.
        last: Option<S>,
    },
    /// The cancellation token fired before the condition was met.
    #[error("wait cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts completed before cancellation.
        attempts: u32,
    },
    /// The check itself failed; polling stops immediately.
    #[error("check failed on attempt {attempt}: {source}")]
    Check {
        /// Attempt on which the failure happened.
        attempt: u32,
        /// Underlying failure.
        #[source]
        source: E,
    },
}

/// Runs `check` until it breaks, fails, the attempts run out, or `cancel`
/// fires.
///
/// The check receives the 1-based attempt number and returns
/// [`ControlFlow::Break`] with the final value once satisfied, or
/// [`ControlFlow::Continue`] with what it observed. The policy interval is
/// slept between attempts but not after the last one, and the sleep is
/// interrupted by cancellation.
///
/// # Errors
///
/// Returns [`WaitError::Exhausted`] carrying the last observation when no
/// attempt succeeds, [`WaitError::Cancelled`] when the token fires, and
/// [`WaitError::Check`] when the check fails.
pub async fn wait_for<T, S, E, F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, WaitError<S, E>>
where
    S: Debug,
    E: std::error::Error + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ControlFlow<T, S>, E>>,
{
    let mut last = None;

    for attempt in 1..=policy.max_attempts {
        let completed = attempt - 1;
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled {
                attempts: completed,
            });
        }
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(WaitError::Cancelled { attempts: completed });
            }
            outcome = check(attempt) => outcome,
        };

        match outcome.map_err(|source| WaitError::Check { attempt, source })? {
            ControlFlow::Break(value) => return Ok(value),
            ControlFlow::Continue(observed) => {
                debug!(attempt, ?observed, "wait condition not met");
                last = Some(observed);
            }
        }

        if attempt < policy.max_attempts {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(WaitError::Cancelled { attempts: attempt });
                }
                () = sleep(policy.interval) => {}
            }
        }
    }

    Err(WaitError::Exhausted {
        attempts: policy.max_attempts,
        last,
    })
}
