//! Backoff delay for a `RateLimited` classification.
//!
//! `delay = base_delay * (attempt + 1) + uniform_jitter(0, max_jitter]`. Unlike a
//! classic exponential backoff this grows linearly with the attempt number —
//! that's what the spec calls for, since each attempt is typically against a
//! different endpoint and the goal is just to avoid a thundering-herd retry
//! against the one that's cooling down, not to punish the cluster as a whole.

use std::time::Duration;

pub const DEFAULT_BASE_DELAY_MS: u64 = 150;
pub const DEFAULT_MAX_JITTER_MS: u64 = 200;

pub fn rate_limit_delay(attempt: u32, base_delay_ms: u64, max_jitter_ms: u64) -> Duration {
    let linear = base_delay_ms.saturating_mul((attempt as u64) + 1);
    let jitter = if max_jitter_ms == 0 {
        0
    } else {
        rand::random::<u64>() % (max_jitter_ms + 1)
    };
    Duration::from_millis(linear + jitter)
}
