//! Reconnect and timeout utilities.
//!
//! `BackoffPolicy` paces the transport's own reconnects after network blips.
//! `ReconnectPolicy` bounds how many times a streaming session renews and
//! reconnects after a terminal close. Neither retries request/response calls:
//! those get at most one resubmission, driven by the API client.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::ClientDefaults;

/// Exponential backoff with lightweight jitter.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// Delay used before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for exponential backoff delay growth.
    pub max_backoff: Duration,
    /// Maximum random jitter added to each retry delay.
    pub jitter: Duration,
}

impl BackoffPolicy {
    /// Computes the delay to apply before the given retry attempt.
    ///
    /// `attempt` is 1-based and should correspond to the current attempt index.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_backoff;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_backoff);
        }
        delay + jitter_duration(self.jitter, attempt)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: ClientDefaults::TRANSPORT_BACKOFF,
            max_backoff: ClientDefaults::TRANSPORT_MAX_BACKOFF,
            jitter: ClientDefaults::TRANSPORT_JITTER,
        }
    }
}

/// Attempt budget for a streaming session.
///
/// Attempts are counted, not timed: a session gives up after `budget`
/// reconnects regardless of how long they took.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReconnectPolicy {
    pub budget: u32,
    /// Fixed pause between a successful renewal and the reconnect.
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.budget
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            budget: ClientDefaults::STREAM_ATTEMPT_BUDGET,
            delay: ClientDefaults::STREAM_RECONNECT_DELAY,
        }
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos + 1))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{with_timeout, BackoffPolicy, ReconnectPolicy};

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = BackoffPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            jitter: Duration::ZERO,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = BackoffPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            jitter: Duration::from_millis(5),
        };

        for attempt in 1..20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[test]
    fn reconnect_policy_counts_against_budget() {
        let policy = ReconnectPolicy {
            budget: 3,
            delay: Duration::from_millis(1),
        };
        assert!(policy.allows(0));
        assert!(policy.allows(2));
        assert!(!policy.allows(3));
    }

    #[test]
    fn timeout_elapses_for_stalled_future() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let stalled = with_timeout(Duration::from_secs(1), std::future::pending::<()>()).await;
            assert!(stalled.is_err());

            let ready = with_timeout(Duration::from_secs(1), async { 7 }).await;
            assert_eq!(ready.expect("ready value"), 7);
        });
    }
}
