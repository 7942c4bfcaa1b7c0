//! Retrying around idempotent attempts with backoff and jitter.
//!
//! [`with_policy`] drives an async attempt up to `trial` times, sleeping
//! between failures. The sleep honours cancellation, and the final failure
//! aggregates every attempt's error so nothing is lost in the retelling.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RetryError;

/// Retry policy: how often, how long between attempts, how the delay grows.
#[derive(Clone, Copy, Debug)]
pub struct Policy {
    /// Total number of attempts (not retries); clamped to at least 1.
    pub trial: u32,
    /// Delay before the second attempt.
    pub interval: Duration,
    /// Cap on the grown delay.
    pub max_interval: Duration,
    /// Growth factor per failed attempt; `1.0` keeps the delay constant.
    pub factor: f64,
    /// Randomisation band: the actual sleep is `delay ± jitter`.
    pub jitter: Option<Duration>,
}

impl Default for Policy {
    /// 3 attempts, 100ms start, 30s cap, constant delay, no jitter.
    fn default() -> Self {
        Self {
            trial: 3,
            interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            factor: 1.0,
            jitter: None,
        }
    }
}

impl Policy {
    /// Fixed-interval policy.
    pub fn with_interval(trial: u32, interval: Duration) -> Self {
        Self {
            trial,
            interval,
            ..Self::default()
        }
    }

    /// Exponential policy growing by `factor` up to `max_interval`.
    pub fn with_backoff(trial: u32, interval: Duration, factor: f64, max_interval: Duration) -> Self {
        Self {
            trial,
            interval,
            max_interval,
            factor,
            jitter: None,
        }
    }

    /// Adds a jitter band to this policy.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }

    fn next_delay(&self, prev: Duration) -> Duration {
        let grown = prev.as_secs_f64() * self.factor.max(0.0);
        Duration::from_secs_f64(grown.min(self.max_interval.as_secs_f64()))
    }
}

/// Calls `attempt` until it succeeds or the policy is exhausted.
///
/// Sleeps `interval ± jitter` between failures, growing the delay by
/// `factor`. A cancellation of `token` during a sleep short-circuits with
/// [`RetryError::Canceled`].
pub async fn with_policy<T, E, F, Fut>(
    token: &CancellationToken,
    policy: &Policy,
    mut attempt: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let trials = policy.trial.max(1);
    let mut attempts = Vec::new();
    let mut delay = policy.interval;

    for n in 1..=trials {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!(attempt = n, error = %e, "attempt failed");
                attempts.push(e.to_string());
            }
        }

        if n < trials {
            let nap = jittered(delay, policy.jitter);
            tokio::select! {
                _ = tokio::time::sleep(nap) => {}
                _ = token.cancelled() => return Err(RetryError::Canceled),
            }
            delay = policy.next_delay(delay);
        }
    }

    Err(RetryError::Exhausted { attempts })
}

/// Applies the `± jitter` band, clamped at zero.
fn jittered(delay: Duration, jitter: Option<Duration>) -> Duration {
    let Some(jitter) = jitter.filter(|j| !j.is_zero()) else {
        return delay;
    };
    let delay_ms = delay.as_millis().min(u128::from(u64::MAX)) as u64;
    let jitter_ms = jitter.as_millis().min(u128::from(u64::MAX)) as u64;
    let offset = rand::rng().random_range(0..=jitter_ms.saturating_mul(2));
    Duration::from_millis(delay_ms.saturating_sub(jitter_ms).saturating_add(offset))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn first_success_means_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let token = CancellationToken::new();

        let result = with_policy(&token, &Policy::default(), move || {
            let counted = counted.clone();
            async move {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok::<_, std::io::Error>(42)
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_calls_exactly_trial_times() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let token = CancellationToken::new();
        let policy = Policy::with_interval(4, Duration::from_millis(10));

        let err = with_policy(&token, &policy, move || {
            let counted = counted.clone();
            async move {
                let n = counted.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), String>(format!("failure {n}"))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match err {
            RetryError::Exhausted { attempts } => {
                assert_eq!(attempts.len(), 4);
                assert_eq!(attempts[0], "failure 1");
                assert_eq!(attempts[3], "failure 4");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn later_success_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = calls.clone();
        let token = CancellationToken::new();
        let policy = Policy::with_interval(5, Duration::from_millis(1));

        with_policy(&token, &policy, move || {
            let counted = counted.clone();
            async move {
                if counted.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                    Err("not yet")
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_the_sleep() {
        let token = CancellationToken::new();
        let policy = Policy::with_interval(10, Duration::from_secs(3600));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let started = std::time::Instant::now();
        let err = with_policy(&token, &policy, || async { Err::<(), _>("nope") })
            .await
            .unwrap_err();
        assert!(matches!(err, RetryError::Canceled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = Policy::with_backoff(
            5,
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(300),
        );
        let d1 = policy.next_delay(Duration::from_millis(100));
        assert_eq!(d1, Duration::from_millis(200));
        let d2 = policy.next_delay(d1);
        assert_eq!(d2, Duration::from_millis(300));
        let d3 = policy.next_delay(d2);
        assert_eq!(d3, Duration::from_millis(300));
    }

    #[test]
    fn jitter_stays_inside_the_band() {
        let delay = Duration::from_millis(100);
        for _ in 0..100 {
            let j = jittered(delay, Some(Duration::from_millis(30)));
            assert!(j >= Duration::from_millis(70) && j <= Duration::from_millis(130));
        }
        assert_eq!(jittered(delay, None), delay);
    }
}
