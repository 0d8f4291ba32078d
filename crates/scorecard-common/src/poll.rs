//! Fixed-interval polling with a hard deadline
//!
//! One primitive serves readiness waits, cleanup confirmation, discovery
//! refresh and pod discovery. The predicate decides what is fatal: returning
//! `Err` stops the poll immediately, returning `Ok(None)`/`Ok(false)` keeps
//! polling until the deadline, which yields [`Error::Timeout`].

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::Error;

/// Interval used by every poll unless overridden
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polling parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between checks
    pub interval: Duration,
    /// Hard deadline measured from the start of the poll
    pub timeout: Duration,
    /// Check before the first sleep
    pub immediate: bool,
}

impl PollConfig {
    /// Poll that sleeps one interval before the first check
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            immediate: false,
        }
    }

    /// Poll that checks right away
    pub const fn immediate(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            immediate: true,
        }
    }

    /// Poll at [`DEFAULT_POLL_INTERVAL`] for up to `timeout`
    pub const fn every_second(timeout: Duration) -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, timeout)
    }
}

/// Poll until `check` yields a value.
///
/// Returns the first `Some`, propagates the first `Err`, and fails with
/// [`Error::Timeout`] once the deadline passes. The check runs once more at
/// the deadline so a slow final interval is not wasted.
pub async fn poll_for<T, F, Fut>(
    config: &PollConfig,
    operation: &str,
    mut check: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, Error>>,
{
    let deadline = Instant::now() + config.timeout;

    if !config.immediate {
        tokio::time::sleep(config.interval.min(config.timeout)).await;
    }

    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::timeout(
                operation,
                format!("condition not met within {:?}", config.timeout),
            ));
        }

        trace!(operation = %operation, "condition not yet met");
        tokio::time::sleep(config.interval.min(deadline - now)).await;
    }
}

/// Poll until `check` returns `Ok(true)`.
pub async fn poll_until<F, Fut>(
    config: &PollConfig,
    operation: &str,
    mut check: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    poll_for(config, operation, || {
        let fut = check();
        async move {
            let done = fut.await?;
            Ok::<_, Error>(done.then_some(()))
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast() -> PollConfig {
        PollConfig::immediate(Duration::from_millis(5), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_returns_first_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let value = poll_for(&fast(), "counter", || {
            let n = c.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok((n >= 3).then_some(n)) }
        })
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_with_timeout_error() {
        let err = poll_until(&fast(), "never", || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.context(), Some("never"));
    }

    #[tokio::test]
    async fn test_error_stops_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let err = poll_until(&fast(), "fatal", || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err::<bool, _>(Error::internal("gone")) }
        })
        .await
        .unwrap_err();
        assert!(!err.is_timeout());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_immediate_sleeps_first() {
        let config = PollConfig::new(Duration::from_millis(20), Duration::from_millis(200));
        let start = std::time::Instant::now();
        poll_until(&config, "sleepy", || async { Ok(true) })
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_every_second_defaults() {
        let config = PollConfig::every_second(Duration::from_secs(10));
        assert_eq!(config.interval, DEFAULT_POLL_INTERVAL);
        assert!(!config.immediate);
    }
}
