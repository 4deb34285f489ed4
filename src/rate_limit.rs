//! Fixed-window rate limiting
//!
//! Counters are keyed by caller-composed scope strings such as
//! `submit:203.0.113.7`, so one limiter instance serves every guarded
//! action. The limiter is an owned component with an injectable clock
//! (`check_at`) rather than a process-global map, so a distributed counter
//! backend can replace it without touching call sites.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, error};

/// Entries older than their window are swept once the table crosses this size
const CLEANUP_THRESHOLD: usize = 10_000;

/// Minimum gap between opportunistic sweeps (milliseconds)
const CLEANUP_INTERVAL_MS: u64 = 60_000;

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window (0 when denied)
    pub remaining: u32,
    /// When the current window resets (unix milliseconds)
    pub reset_at_ms: u64,
    /// Seconds the client should wait before retrying; at least 1 when denied
    pub retry_after_secs: u64,
}

#[derive(Debug)]
struct Entry {
    count: u32,
    reset_at_ms: u64,
}

#[derive(Debug)]
struct LimiterState {
    entries: HashMap<String, Entry>,
    last_cleanup_ms: u64,
}

impl LimiterState {
    fn cleanup(&mut self, now_ms: u64) {
        let due = now_ms.saturating_sub(self.last_cleanup_ms) >= CLEANUP_INTERVAL_MS;
        if !due && self.entries.len() < CLEANUP_THRESHOLD {
            return;
        }
        self.last_cleanup_ms = now_ms;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at_ms > now_ms);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Rate limiter cleanup removed {} expired entries", removed);
        }
    }
}

/// Fixed-window counter over opaque string keys
#[derive(Debug)]
pub struct RateLimiter {
    inner: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create an empty limiter
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LimiterState {
                entries: HashMap::new(),
                last_cleanup_ms: 0,
            }),
        }
    }

    /// Check and count a request against `key` using the wall clock
    pub fn check(&self, key: &str, limit: u32, window_ms: u64) -> RateLimitDecision {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.check_at(now_ms, key, limit, window_ms)
    }

    /// Check and count a request at an explicit instant.
    ///
    /// Never fails: if the counter state is unusable the request is allowed,
    /// since blocking legitimate traffic is the worse failure direction for
    /// an abuse guard. The degradation is logged.
    pub fn check_at(
        &self,
        now_ms: u64,
        key: &str,
        limit: u32,
        window_ms: u64,
    ) -> RateLimitDecision {
        let mut state = match self.inner.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                error!("Rate limiter state poisoned; allowing request for key={}", key);
                drop(poisoned.into_inner());
                return RateLimitDecision {
                    allowed: true,
                    remaining: limit.saturating_sub(1),
                    reset_at_ms: now_ms.saturating_add(window_ms),
                    retry_after_secs: 0,
                };
            }
        };

        state.cleanup(now_ms);

        let entry = state.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            reset_at_ms: now_ms.saturating_add(window_ms),
        });

        // Window elapsed: start fresh
        if now_ms >= entry.reset_at_ms {
            entry.count = 0;
            entry.reset_at_ms = now_ms.saturating_add(window_ms);
        }

        let reset_at_ms = entry.reset_at_ms;

        if entry.count < limit {
            entry.count += 1;
            RateLimitDecision {
                allowed: true,
                remaining: limit - entry.count,
                reset_at_ms,
                retry_after_secs: 0,
            }
        } else {
            let wait_ms = reset_at_ms.saturating_sub(now_ms);
            RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms,
                // ceil to whole seconds, minimum 1
                retry_after_secs: wait_ms.div_ceil(1000).max(1),
            }
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: u64 = 900_000; // 15 minutes

    #[test]
    fn test_sixth_request_denied() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;

        for i in 0..5 {
            let decision = limiter.check_at(t0 + i, "submit:1.2.3.4", 5, WINDOW);
            assert!(decision.allowed, "request {} should be allowed", i + 1);
            assert_eq!(decision.remaining, 4 - i as u32);
        }

        let denied = limiter.check_at(t0 + 10, "submit:1.2.3.4", 5, WINDOW);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.retry_after_secs >= 1);
        assert_eq!(denied.reset_at_ms, t0 + WINDOW);
    }

    #[test]
    fn test_window_rollover_allows_again() {
        let limiter = RateLimiter::new();
        let t0 = 1_000_000;

        for _ in 0..5 {
            limiter.check_at(t0, "submit:1.2.3.4", 5, WINDOW);
        }
        assert!(!limiter.check_at(t0 + 1, "submit:1.2.3.4", 5, WINDOW).allowed);

        // First request after the window elapses starts a fresh count
        let decision = limiter.check_at(t0 + WINDOW, "submit:1.2.3.4", 5, WINDOW);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 4);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new();
        let t0 = 0;

        for _ in 0..5 {
            limiter.check_at(t0, "submit:1.2.3.4", 5, WINDOW);
        }
        assert!(!limiter.check_at(t0, "submit:1.2.3.4", 5, WINDOW).allowed);
        // Different client and different action both unaffected
        assert!(limiter.check_at(t0, "submit:5.6.7.8", 5, WINDOW).allowed);
        assert!(limiter.check_at(t0, "login:1.2.3.4", 5, WINDOW).allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let limiter = RateLimiter::new();
        let t0 = 0;
        for _ in 0..2 {
            limiter.check_at(t0, "k", 2, 10_000);
        }
        // 9.5s remaining rounds up to 10
        let denied = limiter.check_at(t0 + 500, "k", 2, 10_000);
        assert_eq!(denied.retry_after_secs, 10);

        // Sub-second remainder still reports at least 1
        let denied = limiter.check_at(t0 + 9_900, "k", 2, 10_000);
        assert_eq!(denied.retry_after_secs, 1);
    }

    #[test]
    fn test_cleanup_bounds_table() {
        let limiter = RateLimiter::new();
        for i in 0..100 {
            limiter.check_at(0, &format!("k{}", i), 5, 1_000);
        }
        // All windows expired; next check after the cleanup interval sweeps them
        let _ = limiter.check_at(CLEANUP_INTERVAL_MS + 1_001, "fresh", 5, 1_000);
        let state = limiter.inner.lock().unwrap();
        assert_eq!(state.entries.len(), 1);
    }

    #[test]
    fn test_concurrent_increments_not_lost() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0u32;
                for _ in 0..25 {
                    if limiter.check_at(1, "shared", 100, WINDOW).allowed {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 200 attempts against a limit of 100: exactly 100 admitted
        assert_eq!(total, 100);
    }
}
