//! Polling helpers for expiry-dependent tests.
//!
//! A live store expires keys on its own clock, so tests that wait out a lease
//! poll instead of sleeping a fixed amount.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// First delay between polls.
const INITIAL_DELAY: Duration = Duration::from_millis(50);

/// Longest delay between polls.
const MAX_DELAY: Duration = Duration::from_millis(800);

/// Poll `condition` until it holds or `timeout` elapses.
///
/// Backs off exponentially from 50ms, capped at 800ms and at the time left.
///
/// # Example
///
/// ```no_run
/// use env_tests::eventual::assert_eventually;
/// use std::time::Duration;
///
/// # async fn lock_is_free() -> bool { true }
/// # async fn example() {
/// assert_eventually(Duration::from_secs(3), || async { lock_is_free().await })
///     .await
///     .expect("lease should expire");
/// # }
/// ```
pub async fn assert_eventually<F, Fut>(timeout: Duration, mut condition: F) -> Result<(), String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();
    let mut delay = INITIAL_DELAY;

    loop {
        if condition().await {
            return Ok(());
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(format!("Condition not met within {timeout:?}"));
        }

        sleep(delay.min(timeout.saturating_sub(elapsed))).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}
