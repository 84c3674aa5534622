// ============================
// crates/backend-lib/src/auth/rate_limit.rs
// ============================
//! Rate limiting for password login attempts.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default number of failed attempts before rate limiting
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default lockout duration (5 minutes)
const DEFAULT_LOCKOUT_DURATION: Duration = Duration::from_secs(5 * 60);

/// Entry in the rate limit map
#[derive(Debug, Clone)]
struct RateLimitEntry {
    /// Number of failed attempts
    failed_attempts: u32,
    /// Time of the last failed attempt
    last_failure: Instant,
    /// When the lockout expires
    lockout_expiry: Option<Instant>,
}

/// Rate limiter for authentication attempts, keyed by client address
#[derive(Debug, Clone)]
pub struct AuthRateLimiter {
    attempts: Arc<DashMap<String, RateLimitEntry>>,
    max_attempts: u32,
    lockout_duration: Duration,
}

impl Default for AuthRateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_LOCKOUT_DURATION)
    }
}

impl AuthRateLimiter {
    /// Create a new auth rate limiter
    pub fn new(max_attempts: u32, lockout_duration: Duration) -> Self {
        Self {
            attempts: Arc::new(DashMap::new()),
            max_attempts,
            lockout_duration,
        }
    }

    /// Record a failed authentication attempt
    pub fn record_failed_attempt(&self, client: &str) {
        let now = Instant::now();

        let mut entry = self.attempts.entry(client.to_string()).or_insert_with(|| RateLimitEntry {
            failed_attempts: 0,
            last_failure: now,
            lockout_expiry: None,
        });

        // Expired lockout starts a fresh window
        if entry.lockout_expiry.is_some_and(|expiry| now > expiry) {
            entry.failed_attempts = 0;
            entry.lockout_expiry = None;
        }

        entry.failed_attempts += 1;
        entry.last_failure = now;

        if entry.failed_attempts >= self.max_attempts && entry.lockout_expiry.is_none() {
            entry.lockout_expiry = Some(now + self.lockout_duration);
            tracing::warn!(client, "client locked out after failed login attempts");
        }
    }

    /// Record a successful authentication
    pub fn record_success(&self, client: &str) {
        self.attempts.remove(client);
    }

    /// Check if a client is allowed to attempt authentication
    pub fn check_rate_limit(&self, client: &str) -> bool {
        match self.attempts.get(client) {
            Some(entry) => !entry.lockout_expiry.is_some_and(|expiry| Instant::now() < expiry),
            None => true,
        }
    }

    /// Clean up expired lockouts
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.attempts.retain(|_, entry| {
            if let Some(expiry) = entry.lockout_expiry {
                return now < expiry;
            }
            // Otherwise, keep entries for a day
            now.duration_since(entry.last_failure) < Duration::from_secs(24 * 60 * 60)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockout_after_max_attempts() {
        let limiter = AuthRateLimiter::new(3, Duration::from_secs(60));
        for _ in 0..2 {
            limiter.record_failed_attempt("10.0.0.1");
            assert!(limiter.check_rate_limit("10.0.0.1"));
        }
        limiter.record_failed_attempt("10.0.0.1");
        assert!(!limiter.check_rate_limit("10.0.0.1"));
        assert!(limiter.check_rate_limit("10.0.0.2"));
    }

    #[test]
    fn test_success_resets() {
        let limiter = AuthRateLimiter::new(2, Duration::from_secs(60));
        limiter.record_failed_attempt("c");
        limiter.record_success("c");
        limiter.record_failed_attempt("c");
        assert!(limiter.check_rate_limit("c"));
    }

    #[test]
    fn test_lockout_expires() {
        let limiter = AuthRateLimiter::new(1, Duration::from_millis(10));
        limiter.record_failed_attempt("c");
        assert!(!limiter.check_rate_limit("c"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.check_rate_limit("c"));
        limiter.cleanup();
        assert!(limiter.check_rate_limit("c"));
    }
}
