//! Bounded polling for asynchronous device readiness.
//!
//! Devices and helper-populated directories show up some time after the
//! kernel or a helper process is asked for them. These helpers poll a
//! single observation at a fixed interval until it holds or the retry
//! budget runs out. A wait cannot be cancelled once started.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tracing::debug;
use userboot_shared::constants::wait;
use userboot_shared::errors::{BootError, BootResult};

use crate::platform::Platform;

/// Retry budget and delay of a bounded wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Observations allowed after the first one.
    pub retries: u32,
    /// Fixed delay between observations.
    pub interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            retries: wait::RETRIES,
            interval: Duration::from_millis(wait::INTERVAL_MS),
        }
    }
}

/// Poll `observe` until it returns true.
///
/// Makes at most `retries + 1` observations. Fails with
/// [`BootError::DeviceNotReady`] naming `path` once the budget is spent.
pub async fn wait_until<F, Fut>(path: &Path, policy: WaitPolicy, mut observe: F) -> BootResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let mut remaining = policy.retries;
    loop {
        if observe().await {
            return Ok(());
        }
        if remaining == 0 {
            return Err(BootError::not_ready(path));
        }
        remaining -= 1;
        debug!(path = %path.display(), remaining, "not ready, retrying");
        tokio::time::sleep(policy.interval).await;
    }
}

/// Wait for `path` to exist.
pub async fn wait_for_path(
    platform: &dyn Platform,
    path: &Path,
    policy: WaitPolicy,
) -> BootResult<()> {
    wait_until(path, policy, move || async move {
        match platform.exists(path).await {
            Ok(found) => found,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "existence check failed");
                false
            }
        }
    })
    .await
}

/// Wait for a mount at `path` to be populated.
///
/// A freshly created mount point holds at most one entry; a populated
/// device view holds more.
pub async fn wait_for_populated(
    platform: &dyn Platform,
    path: &Path,
    policy: WaitPolicy,
) -> BootResult<()> {
    wait_until(path, policy, move || async move {
        match platform.read_dir(path).await {
            Ok(entries) => entries.len() > 1,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "listing failed");
                false
            }
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy(retries: u32) -> WaitPolicy {
        WaitPolicy {
            retries,
            interval: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_observes_retries_plus_one() {
        for retries in 0..6 {
            let calls = Cell::new(0u32);
            let result = wait_until(Path::new("/dev/sda"), policy(retries), || {
                calls.set(calls.get() + 1);
                async { false }
            })
            .await;

            assert!(matches!(result, Err(BootError::DeviceNotReady { .. })));
            assert_eq!(calls.get(), retries + 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_kth_attempt_stops_there() {
        let retries = 5;
        for k in 1..=retries + 1 {
            let calls = Cell::new(0u32);
            let result = wait_until(Path::new("/dev/sda"), policy(retries), || {
                calls.set(calls.get() + 1);
                let ready = calls.get() == k;
                async move { ready }
            })
            .await;

            assert!(result.is_ok());
            assert_eq!(calls.get(), k);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleeps_fixed_interval_between_observations() {
        let start = tokio::time::Instant::now();
        let _ = wait_until(Path::new("/x"), policy(3), || async { false }).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_success_does_not_sleep() {
        let start = tokio::time::Instant::now();
        wait_until(Path::new("/x"), policy(3), || async { true })
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_error_names_path() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        let err = rt
            .block_on(wait_until(Path::new("/dev/vdb"), policy(0), || async {
                false
            }))
            .unwrap_err();
        assert_eq!(err.to_string(), "/dev/vdb not ready");
    }
}
