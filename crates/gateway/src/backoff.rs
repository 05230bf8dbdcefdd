//! Retry policy and cancellable backoff sleeps.

use sleuth_config::GatewayConfig;
use sleuth_core::CancelFlag;
use std::time::Duration;

/// How many times to try a request and how long to wait between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_cap: Duration,
    /// Granularity of the cancellation check while sleeping
    pub tick: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            backoff_cap: Duration::from_secs(16),
            tick: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_cap: Duration::from_secs(config.backoff_cap_secs),
            tick: Duration::from_millis(config.backoff_tick_ms.max(1)),
        }
    }

    /// Wait after the failed `attempt` (1-based): `min(2^(attempt-1), cap)` seconds.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let secs = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        Duration::from_secs(secs).min(self.backoff_cap)
    }
}

/// Sleep for `total` in `tick` increments, stopping early on cancellation.
///
/// Returns `false` if cancellation was observed.
pub async fn sleep_with_cancel(total: Duration, tick: Duration, cancel: &CancelFlag) -> bool {
    let deadline = tokio::time::Instant::now() + total;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        let step = tick.min(deadline - now);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            _ = tokio::time::sleep(step) => {}
        }
    }
}
