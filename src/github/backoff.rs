//! Exponential backoff for endpoints that answer "not ready yet".
//!
//! GitHub computes some statistics lazily and answers 202 until they exist.
//! The retrier polls such an endpoint a bounded number of times, sleeping
//! `base * 2^attempt` plus jitter between polls. It never errors; exhausting
//! the attempts or hitting a hard failure yields `None`, and absence of data
//! is the signal callers degrade on.

use core::time::Duration;
use rand::Rng;

const LOG_TARGET: &str = "   backoff";

/// Outcome of one poll of an eventually-consistent endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The upstream produced the data.
    Ready(T),

    /// The upstream is still computing; poll again after a delay.
    StillComputing,

    /// The data cannot be produced. Stop polling; not a fatal condition.
    Unavailable,
}

/// Retry schedule for a single eventually-consistent fetch.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Ceiling on the number of polls.
    pub max_attempts: u32,

    /// Delay after the first still-computing answer; doubles per attempt.
    pub base_delay: Duration,

    /// Upper bound (exclusive) on the random jitter added to each delay.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay to sleep after `attempt` (0-based) answered still-computing:
    /// `base * 2^attempt + jitter`, jitter uniform in `[0, max_jitter)`.
    fn delay_after(&self, attempt: u32) -> Duration {
        let backoff = self.base_delay.saturating_mul(2_u32.saturating_pow(attempt));

        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
        };

        backoff + jitter
    }
}

/// Poll `op` until it yields data, up to the policy's attempt ceiling, sleeping
/// with exponential backoff after every still-computing answer.
///
/// Returns `None` when the data is unavailable or the attempts are exhausted.
pub async fn retry_until_ready<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PollOutcome<T>>,
{
    for attempt in 0..policy.max_attempts {
        match op().await {
            PollOutcome::Ready(value) => return Some(value),
            PollOutcome::Unavailable => return None,
            PollOutcome::StillComputing => {
                let delay = policy.delay_after(attempt);
                log::debug!(target: LOG_TARGET, "attempt {} still computing, retrying in {delay:?}", attempt + 1);
                tokio::time::sleep(delay).await;
            }
        }
    }

    log::debug!(target: LOG_TARGET, "gave up after {} attempts", policy.max_attempts);

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_doubles_per_attempt_within_jitter_bounds() {
        let policy = BackoffPolicy::default();

        for attempt in 0..policy.max_attempts {
            let floor = Duration::from_millis(500 * 2_u64.pow(attempt));
            let delay = policy.delay_after(attempt);
            assert!(delay >= floor, "attempt {attempt}: {delay:?} < {floor:?}");
            assert!(delay < floor + Duration::from_millis(300), "attempt {attempt}: {delay:?} too large");
        }
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = BackoffPolicy {
            max_jitter: Duration::ZERO,
            ..BackoffPolicy::default()
        };

        assert_eq!(policy.delay_after(0), Duration::from_millis(500));
        assert_eq!(policy.delay_after(3), Duration::from_millis(4000));
    }

    #[tokio::test(start_paused = true)]
    async fn still_computing_forever_stops_after_attempt_ceiling() {
        let policy = BackoffPolicy::default();
        let attempts = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Option<()> = retry_until_ready(&policy, || {
            _ = attempts.fetch_add(1, Ordering::SeqCst);
            async { PollOutcome::StillComputing }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 6);

        // One sleep per attempt; each at least base * 2^i.
        let floor: u64 = (0..6).map(|i| 500 * 2_u64.pow(i)).sum();
        assert!(start.elapsed() >= Duration::from_millis(floor));
    }

    #[tokio::test]
    async fn unavailable_stops_immediately() {
        let policy = BackoffPolicy::default();
        let attempts = AtomicU32::new(0);

        let result: Option<()> = retry_until_ready(&policy, || {
            _ = attempts.fetch_add(1, Ordering::SeqCst);
            async { PollOutcome::Unavailable }
        })
        .await;

        assert!(result.is_none());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_after_a_few_polls_returns_the_payload() {
        let policy = BackoffPolicy::default();
        let attempts = AtomicU32::new(0);

        let result = retry_until_ready(&policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move { if n < 2 { PollOutcome::StillComputing } else { PollOutcome::Ready(42) } }
        })
        .await;

        assert_eq!(result, Some(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
