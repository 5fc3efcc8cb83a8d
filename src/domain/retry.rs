//! Bounded polling
//!
//! Every wait in carrier (staging, provisioning, workload readiness) is a
//! fixed-interval poll with an overall timeout that reports a distinct
//! timeout outcome.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

/// Interval and timeout of a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub timeout: Duration,
    /// Probe once before the first sleep
    pub first_probe_immediate: bool,
}

impl RetryPolicy {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            first_probe_immediate: true,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(180))
    }
}

#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error("timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),

    #[error(transparent)]
    Probe(E),
}

/// Run `probe` until it yields `Some`, fails, or the policy times out.
///
/// Probe errors abort the poll immediately.
pub async fn poll_until<T, E, F, Fut>(policy: &RetryPolicy, mut probe: F) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let deadline = Instant::now() + policy.timeout;

    if !policy.first_probe_immediate {
        tokio::time::sleep(policy.interval).await;
    }

    loop {
        if let Some(value) = probe().await.map_err(PollError::Probe)? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::Timeout(policy.timeout));
        }
        let remaining = deadline - now;
        tokio::time::sleep(policy.interval.min(remaining)).await;

        if Instant::now() >= deadline {
            // One last look so a probe that turned true during the final sleep still counts.
            return match probe().await.map_err(PollError::Probe)? {
                Some(value) => Ok(value),
                None => Err(PollError::Timeout(policy.timeout)),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(timeout_ms: u64) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_poll_returns_when_ready() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, PollError<String>> = poll_until(&fast(1000), || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(if n >= 3 { Some(n) } else { None }) }
        })
        .await;

        assert_eq!(result.ok(), Some(3));
    }

    #[tokio::test]
    async fn test_poll_times_out() {
        let result: Result<(), PollError<String>> =
            poll_until(&fast(30), || async { Ok(None) }).await;

        assert!(matches!(result, Err(PollError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_probe_error_aborts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), PollError<String>> = poll_until(&fast(1000), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("broken".to_string()) }
        })
        .await;

        assert!(matches!(result, Err(PollError::Probe(ref e)) if e == "broken"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_immediate_first_probe_default() {
        let policy = RetryPolicy::default();
        assert!(policy.first_probe_immediate);
        assert_eq!(policy.interval, Duration::from_secs(1));
    }

    #[test]
    fn test_ready_value_wins_over_zero_timeout() {
        let policy = fast(0);
        let result: Result<&str, PollError<String>> =
            tokio_test::block_on(poll_until(&policy, || async { Ok(Some("ready")) }));
        assert_eq!(result.ok(), Some("ready"));
    }
}
