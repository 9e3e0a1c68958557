//! Bounded-attempt retry helper.
//!
//! Network-touching components wrap single calls in [`retry`] or
//! [`retry_when`]. The default policy makes exactly one attempt with no
//! back-off, so wrapping is free unless an operator opts in.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Shortest delay ever returned by [`Backoff::ExponentialJitter`].
pub const MIN_DELAY: Duration = Duration::from_millis(1);

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Backoff {
    /// Retry immediately.
    #[default]
    None,

    /// Always wait the same amount.
    Fixed(Duration),

    /// `2^min(attempt, 30)` seconds scaled by a uniform factor in `[2/3, 4/3]`.
    ExponentialJitter,
}

impl Backoff {
    /// Calculate the delay before retry number `attempt` (zero-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Fixed(d) => *d,
            Backoff::ExponentialJitter => exponential_jitter(attempt),
        }
    }
}

/// Exponent cap for [`exponential_jitter`].
pub const MAX_EXPONENT: u32 = 30;

/// Jittered exponential delay for the given attempt.
///
/// With `i = min(attempt, MAX_EXPONENT)`, always within
/// `[2^i * 2/3, 2^i * 4/3]` seconds and never below [`MIN_DELAY`]. Attempts
/// past the cap keep the delay of attempt [`MAX_EXPONENT`].
pub fn exponential_jitter(attempt: u32) -> Duration {
    let base = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
    let factor = rand::rng().random_range((2.0 / 3.0)..=(4.0 / 3.0));
    let delay = Duration::from_secs_f64(base * factor);
    delay.max(MIN_DELAY)
}

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero behaves like one.
    pub attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            backoff: Backoff::None,
        }
    }
}

impl RetryPolicy {
    /// Policy with `attempts` tries and jittered exponential back-off.
    pub fn exponential(attempts: u32) -> Self {
        Self {
            attempts,
            backoff: Backoff::ExponentialJitter,
        }
    }
}

/// Call `op` until it succeeds or the policy's attempts are used up.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry_when(policy, |_| true, op).await
}

/// Like [`retry`], but stops early on errors `should_retry` rejects.
pub async fn retry_when<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                attempt += 1;
                if attempt >= attempts || !should_retry(&e) {
                    return Err(e);
                }

                let delay = policy.backoff.delay(attempt - 1);
                debug!(
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after failure"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[rstest]
    #[case(0)]
    #[case(1)]
    #[case(3)]
    #[case(6)]
    #[case(30)]
    #[case(31)]
    #[case(u32::MAX)]
    fn test_exponential_jitter_bounds(#[case] attempt: u32) {
        let base = 2f64.powi(attempt.min(MAX_EXPONENT) as i32);
        let slack = base * 1e-9 + 1e-9;
        for _ in 0..200 {
            let d = exponential_jitter(attempt).as_secs_f64();
            assert!(d >= base * 2.0 / 3.0 - slack, "{d} below bound");
            assert!(d <= base * 4.0 / 3.0 + slack, "{d} above bound");
        }
    }

    #[test]
    fn test_default_policy_single_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.backoff.delay(5), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Backoff::None,
        };

        let result: Result<u32, &str> = retry(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Backoff::None,
        };

        let result: Result<(), &str> = retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down") }
        })
        .await;

        assert_eq!(result, Err("down"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_when_stops_on_terminal_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            attempts: 5,
            backoff: Backoff::None,
        };

        let result: Result<(), &str> = retry_when(
            &policy,
            |e| *e == "transient",
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("rejected") }
            },
        )
        .await;

        assert_eq!(result, Err("rejected"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_waits() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(10)),
        };
        let start = tokio::time::Instant::now();

        let _: Result<(), ()> = retry(&policy, |_| async { Err(()) }).await;

        assert!(start.elapsed() >= Duration::from_secs(20));
    }
}
