//! Bounded waits. Nothing in a page agent blocks without a timeout.

use crate::browser::{ElementHandle, Locator, PageCapabilities};
use crate::config::TimingConfig;
use crate::error::Result;
use std::future::Future;
use std::time::{Duration, Instant};

/// Call `probe` every `interval` until it yields a value or `timeout` passes.
pub async fn poll_until<F, Fut, T>(
    timeout: Duration,
    interval: Duration,
    mut probe: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = probe().await? {
            return Ok(Some(value));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait for the first locator of `chain` to match, bounded by the element timeout.
pub async fn wait_for(
    page: &dyn PageCapabilities,
    chain: &[Locator],
    timing: &TimingConfig,
) -> Result<Option<ElementHandle>> {
    poll_until(
        Duration::from_millis(timing.element_timeout_ms),
        Duration::from_millis(timing.poll_interval_ms),
        || page.locate(chain),
    )
    .await
}

/// Fixed visual settle.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_poll_until_value() {
        let calls = AtomicUsize::new(0);
        let value = poll_until(Duration::from_secs(1), Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok((n >= 2).then_some(n)) }
        })
        .await
        .unwrap();
        assert_eq!(value, Some(2));
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let value: Option<()> = poll_until(
            Duration::from_millis(20),
            Duration::from_millis(5),
            || async { Ok(None) },
        )
        .await
        .unwrap();
        assert!(value.is_none());
    }
}
