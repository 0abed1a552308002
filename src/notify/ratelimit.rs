//! Per-webhook-URL rate limiting (spec §4.7).
//!
//! Fixed window, keyed by destination URL. Grounded on the donor's
//! `DashMap`-backed TTL cache (`rpc_pool.rs`'s `account_cache`/`prune_cache`)
//! shape: a concurrent map of bucket state plus a periodic sweep that drops
//! entries old enough that nothing in the window could still reference them.

use dashmap::DashMap;
use std::time::{Duration, Instant};

struct Bucket {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    window: Duration,
    max_per_window: u32,
    buckets: DashMap<String, Bucket>,
}

impl RateLimiter {
    pub fn new(window: Duration, max_per_window: u32) -> Self {
        Self {
            window,
            max_per_window,
            buckets: DashMap::new(),
        }
    }

    /// Returns `true` if the send is allowed (and records it), `false` if the
    /// window's budget for this URL is already spent.
    pub fn allow(&self, url: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.buckets.entry(url.to_string()).or_insert_with(|| Bucket {
            window_start: now,
            count: 0,
        });

        if now.duration_since(entry.window_start) > self.window {
            entry.window_start = now;
            entry.count = 1;
            return true;
        }

        if entry.count >= self.max_per_window {
            return false;
        }

        entry.count += 1;
        true
    }

    /// Drops bucket entries whose window closed more than `2 * window` ago —
    /// nothing still live could be checking against them.
    pub fn gc(&self) {
        let now = Instant::now();
        let stale_after = self.window * 2;
        self.buckets
            .retain(|_, bucket| now.duration_since(bucket.window_start) <= stale_after);
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_max_then_blocks() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 3);
        assert!(limiter.allow("https://hook"));
        assert!(limiter.allow("https://hook"));
        assert!(limiter.allow("https://hook"));
        assert!(!limiter.allow("https://hook"));
    }

    #[test]
    fn separate_urls_have_independent_budgets() {
        let limiter = RateLimiter::new(Duration::from_secs(60), 1);
        assert!(limiter.allow("https://hook-a"));
        assert!(limiter.allow("https://hook-b"));
    }

    #[test]
    fn window_reset_allows_again() {
        let limiter = RateLimiter::new(Duration::from_millis(10), 1);
        assert!(limiter.allow("https://hook"));
        assert!(!limiter.allow("https://hook"));
        std::thread::sleep(Duration::from_millis(30));
        assert!(limiter.allow("https://hook"));
    }

    #[test]
    fn gc_drops_old_buckets_but_keeps_recent_ones() {
        let limiter = RateLimiter::new(Duration::from_millis(5), 10);
        limiter.allow("https://stale");
        std::thread::sleep(Duration::from_millis(20));
        limiter.allow("https://fresh");
        limiter.gc();
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn concurrent_access_never_exceeds_budget() {
        use std::sync::Arc;
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(60), 50));
        let mut handles = Vec::new();
        let allowed = Arc::new(std::sync::atomic::AtomicU32::new(0));
        for _ in 0..10 {
            let limiter = limiter.clone();
            let allowed = allowed.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    if limiter.allow("https://hook") {
                        allowed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(allowed.load(std::sync::atomic::Ordering::SeqCst), 50);
    }
}
