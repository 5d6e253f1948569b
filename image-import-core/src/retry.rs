//! Backoff and deadline helper for predicate-driven retries.
//!
//! [`retry_until`] runs an operation until it reports [`Attempt::Done`] or
//! [`Attempt::Fail`], sleeping between [`Attempt::Retry`] results according to a capped
//! exponential [`Backoff`]. The whole loop is bounded by a deadline and races a
//! [`CancellationToken`]. Time comes from `tokio::time`, so tests run it with a paused
//! clock.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest deadline honoured; larger ones would overflow `Instant` arithmetic.
pub const MAX_DEADLINE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Capped exponential backoff: `initial`, `initial * multiplier`, ... never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(12),
            multiplier: 2,
        }
    }
}

impl Backoff {
    pub fn intervals(&self) -> Intervals {
        Intervals {
            next: self.initial.min(self.max),
            max: self.max,
            multiplier: self.multiplier,
        }
    }
}

/// Endless iterator over backoff intervals.
#[derive(Debug, Clone)]
pub struct Intervals {
    next: Duration,
    max: Duration,
    multiplier: u32,
}

impl Iterator for Intervals {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next;
        self.next = current
            .checked_mul(self.multiplier)
            .map_or(self.max, |grown| grown.min(self.max));
        Some(current)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Overall budget measured from the first attempt.
    pub deadline: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline,
            backoff: Backoff::default(),
        }
    }
}

/// Verdict of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T, E> {
    Done(T),
    Retry,
    Fail(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completed<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    Failed { error: E, attempts: u32 },
    TimedOut { attempts: u32, elapsed: Duration },
    Cancelled { attempts: u32, elapsed: Duration },
}

/// Run `op` until it is done, fails, the deadline passes, or `cancel` fires.
///
/// `op` receives the 1-based attempt number. When the time left is not more than the
/// next backoff interval, the helper waits out the remainder and reports `TimedOut`
/// without another attempt.
pub async fn retry_until<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<Completed<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Attempt<T, E>>,
{
    let started = Instant::now();
    let deadline = started + policy.deadline.min(MAX_DEADLINE);
    let mut intervals = policy.backoff.intervals();
    let mut attempts = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts,
                elapsed: started.elapsed(),
            });
        }

        attempts += 1;
        let verdict = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, elapsed: started.elapsed() });
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(RetryError::TimedOut { attempts, elapsed: started.elapsed() });
            }
            verdict = op(attempts) => verdict,
        };

        match verdict {
            Attempt::Done(value) => {
                return Ok(Completed {
                    value,
                    attempts,
                    elapsed: started.elapsed(),
                })
            }
            Attempt::Fail(error) => return Err(RetryError::Failed { error, attempts }),
            Attempt::Retry => {}
        }

        let delay = intervals.next().unwrap_or(policy.backoff.max);
        let remaining = deadline.saturating_duration_since(Instant::now());
        let expires = remaining <= delay;
        let wait = if expires { remaining } else { delay };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, elapsed: started.elapsed() });
            }
            _ = tokio::time::sleep(wait) => {}
        }

        if expires {
            return Err(RetryError::TimedOut {
                attempts,
                elapsed: started.elapsed(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn default_backoff_doubles_from_two_and_caps_at_twelve() {
        let seq: Vec<u64> = Backoff::default()
            .intervals()
            .take(8)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(seq, vec![2, 4, 8, 12, 12, 12, 12, 12]);
    }

    #[test]
    fn intervals_are_non_decreasing_and_capped_for_long_runs() {
        let backoff = Backoff::default();
        let seq: Vec<Duration> = backoff.intervals().take(10_000).collect();
        assert!(seq.windows(2).all(|w| w[0] <= w[1]));
        assert!(seq.iter().all(|d| *d <= backoff.max));
    }

    #[test]
    fn huge_multiplier_saturates_at_max() {
        let backoff = Backoff {
            initial: secs(1),
            max: secs(30),
            multiplier: u32::MAX,
        };
        let seq: Vec<u64> = backoff.intervals().take(4).map(|d| d.as_secs()).collect();
        assert_eq!(seq, vec![1, 30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn done_on_third_attempt_after_two_backoffs() {
        let policy = RetryPolicy::with_deadline(secs(3600));
        let cancel = CancellationToken::new();
        let started = Instant::now();

        let res: Result<Completed<&str>, RetryError<()>> =
            retry_until(&policy, &cancel, |attempt| async move {
                if attempt < 3 {
                    Attempt::Retry
                } else {
                    Attempt::Done("ready")
                }
            })
            .await;

        let done = res.expect("should complete");
        assert_eq!(done.value, "ready");
        assert_eq!(done.attempts, 3);
        assert_eq!(started.elapsed().as_secs(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_stops_without_further_attempts() {
        let policy = RetryPolicy::with_deadline(secs(3600));
        let cancel = CancellationToken::new();
        let mut calls = 0;

        let res: Result<Completed<()>, RetryError<&str>> = retry_until(&policy, &cancel, |_| {
            calls += 1;
            async { Attempt::Fail("broken") }
        })
        .await;

        assert_eq!(
            res,
            Err(RetryError::Failed {
                error: "broken",
                attempts: 1
            })
        );
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_of_six_allows_exactly_two_attempts() {
        let policy = RetryPolicy::with_deadline(secs(6));
        let cancel = CancellationToken::new();

        let res: Result<Completed<()>, RetryError<()>> =
            retry_until(&policy, &cancel, |_| async { Attempt::Retry }).await;

        match res {
            Err(RetryError::TimedOut { attempts, elapsed }) => {
                assert_eq!(attempts, 2);
                assert_eq!(elapsed.as_secs(), 6);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_is_cut_off_by_deadline() {
        let policy = RetryPolicy::with_deadline(secs(5));
        let cancel = CancellationToken::new();

        let res: Result<Completed<()>, RetryError<()>> = retry_until(&policy, &cancel, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Attempt::Done(())
        })
        .await;

        match res {
            Err(RetryError::TimedOut { attempts, elapsed }) => {
                assert_eq!(attempts, 1);
                assert_eq!(elapsed.as_secs(), 5);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_wait() {
        let policy = RetryPolicy::with_deadline(secs(3600));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(secs(3)).await;
            trigger.cancel();
        });

        let res: Result<Completed<()>, RetryError<()>> =
            retry_until(&policy, &cancel, |_| async { Attempt::Retry }).await;

        // attempts at t=0 and t=2, then the 4s wait is interrupted at t=3
        match res {
            Err(RetryError::Cancelled { attempts, elapsed }) => {
                assert_eq!(attempts, 2);
                assert_eq!(elapsed.as_secs(), 3);
            }
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_deadline_is_clamped_not_overflowed() {
        let policy = RetryPolicy::with_deadline(Duration::from_secs(i64::MAX as u64));
        let cancel = CancellationToken::new();

        let res: Result<Completed<u32>, RetryError<()>> =
            retry_until(&policy, &cancel, |n| async move {
                if n < 3 {
                    Attempt::Retry
                } else {
                    Attempt::Done(n)
                }
            })
            .await;

        let done = res.expect("huge deadline should behave as unbounded");
        assert_eq!(done.value, 3);
        assert_eq!(done.elapsed.as_secs(), 2 + 4);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_makes_no_attempt() {
        let policy = RetryPolicy::with_deadline(secs(3600));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let res: Result<Completed<()>, RetryError<()>> =
            retry_until(&policy, &cancel, |_| async { Attempt::Done(()) }).await;

        assert!(matches!(res, Err(RetryError::Cancelled { attempts: 0, .. })));
    }
}
