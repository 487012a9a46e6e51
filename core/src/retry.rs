//! Validation-driven retry around backend calls: exponential backoff, a
//! per-attempt timeout, and a correction directive injected after schema
//! failures. Cancellation aborts immediately and is never counted as an
//! attempt.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::schema::SchemaViolation;
use crate::schema::correction_directive;
use crate::util::backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug)]
pub enum AttemptError {
    /// The response parsed but violated the role's schema.
    Schema(Vec<SchemaViolation>),
    /// Transport-level failure; retried without a correction directive.
    Transport(String),
}

#[derive(Debug)]
pub enum RetryError {
    Exhausted {
        attempts: u32,
        last: AttemptError,
    },
    TimedOut(Duration),
    Cancelled,
}

#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub value: T,
    /// Number of failed attempts before the one that succeeded.
    pub retries_used: u32,
}

/// Drive `attempt_fn` until it succeeds or the policy is exhausted. The
/// closure receives the 1-based attempt number and, after a schema failure,
/// the correction directive to prepend to the prompt.
pub async fn run_with_retries<T, F, Fut>(
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<RetryOutcome<T>, RetryError>
where
    F: FnMut(u32, Option<String>) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut correction: Option<String> = None;
    let mut last: Option<AttemptError> = None;
    let mut timed_out = false;

    for attempt in 1..=policy.max_attempts {
        let fut = attempt_fn(attempt, correction.clone());
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = tokio::time::timeout(policy.attempt_timeout, fut) => r,
        };

        match outcome {
            Err(_) => {
                debug!(attempt, "attempt timed out");
                timed_out = true;
                last = Some(AttemptError::Transport("attempt timed out".to_string()));
            }
            Ok(Ok(value)) => {
                return Ok(RetryOutcome {
                    value,
                    retries_used: attempt - 1,
                });
            }
            Ok(Err(AttemptError::Schema(violations))) => {
                debug!(attempt, count = violations.len(), "schema violations");
                correction = Some(correction_directive(&violations));
                timed_out = false;
                last = Some(AttemptError::Schema(violations));
            }
            Ok(Err(AttemptError::Transport(message))) => {
                debug!(attempt, error = %message, "transport failure");
                timed_out = false;
                last = Some(AttemptError::Transport(message));
            }
        }

        if attempt < policy.max_attempts {
            let delay = backoff(attempt, policy.initial_delay, policy.max_delay);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    if timed_out {
        return Err(RetryError::TimedOut(policy.attempt_timeout));
    }
    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last: last.unwrap_or_else(|| AttemptError::Transport("no attempts ran".to_string())),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(5),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_schema_failures_with_correction() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen_corrections = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();

        let outcome = run_with_retries(fast_policy(), &cancel, |attempt, correction| {
            let calls = Arc::clone(&calls);
            let seen = Arc::clone(&seen_corrections);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if correction.is_some() {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                if attempt < 3 {
                    Err(AttemptError::Schema(vec![SchemaViolation {
                        path: "$.summary".to_string(),
                        message: "missing".to_string(),
                    }]))
                } else {
                    Ok("parsed")
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome.value, "parsed");
        assert_eq!(outcome.retries_used, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Attempts 2 and 3 both carried the correction directive.
        assert_eq!(seen_corrections.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_retry_without_correction() {
        let cancel = CancellationToken::new();
        let outcome = run_with_retries(fast_policy(), &cancel, |attempt, correction| async move {
            assert!(correction.is_none());
            if attempt == 1 {
                Err(AttemptError::Transport("connection reset".to_string()))
            } else {
                Ok(attempt)
            }
        })
        .await
        .unwrap();
        assert_eq!(outcome.value, 2);
        assert_eq!(outcome.retries_used, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_the_last_error() {
        let cancel = CancellationToken::new();
        let err = run_with_retries::<(), _, _>(fast_policy(), &cancel, |_, _| async {
            Err(AttemptError::Transport("down".to_string()))
        })
        .await
        .unwrap_err();
        match err {
            RetryError::Exhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, AttemptError::Transport(_)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_without_counting_an_attempt() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let err = run_with_retries::<(), _, _>(fast_policy(), &cancel, |_, _| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::Transport("never".to_string()))
            }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_attempts_surface_timed_out() {
        let cancel = CancellationToken::new();
        let err = run_with_retries::<(), _, _>(fast_policy(), &cancel, |_, _| async {
            std::future::pending::<Result<(), AttemptError>>().await
        })
        .await
        .unwrap_err();
        assert!(matches!(err, RetryError::TimedOut(_)));
    }
}
