//! Keyed request rate limiting
//!
//! Each identity gets a budget of `rps × ttl` requests per window of `ttl`.
//! The first request of a window opens it; each later request spends one
//! unit, and a request arriving with nothing left is rejected with
//! [`WorkError::TooManyRequests`] until the window expires.
//!
//! ```rust
//! use rust_work_queue::rate_limit::{RateLimitConfig, RateLimiter};
//! use std::collections::HashMap;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new(2).with_ttl(Duration::from_secs(1)),
//! ).unwrap();
//!
//! let mut headers = HashMap::new();
//! headers.insert("Authorization".to_string(), "token-a".to_string());
//!
//! // opening request plus a budget of 2
//! for _ in 0..3 {
//!     limiter.check(&headers).unwrap();
//! }
//! assert!(limiter.check(&headers).is_err());
//! ```

use crate::core::{Result, WorkError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Header consulted first for the caller's identity
pub const AUTHORIZATION_HEADER: &str = "Authorization";
/// Header consulted when no authorization header is present
pub const HOST_HEADER: &str = "Host";

/// Rate limiter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Allowed requests per second
    pub rps: u32,
    /// Window length
    pub ttl: Duration,
    /// Optional namespace for keys
    pub prefix: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rps: 100,
            ttl: Duration::from_secs(10),
            prefix: None,
        }
    }
}

impl RateLimitConfig {
    /// Settings allowing `rps` requests per second over the default window
    #[must_use]
    pub fn new(rps: u32) -> Self {
        Self {
            rps,
            ..Default::default()
        }
    }

    /// Set the window length
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Namespace keys with `prefix`
    #[must_use = "builder methods return a new value and do not modify the original"]
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Requests allowed per window after the opening one
    pub fn budget(&self) -> u64 {
        (f64::from(self.rps) * self.ttl.as_secs_f64()) as u64
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rps == 0 {
            return Err(WorkError::capacity_misuse("rps", "rps must be at least 1"));
        }
        if self.ttl.is_zero() {
            return Err(WorkError::capacity_misuse("ttl", "ttl must be non-zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    remaining: u64,
    expires_at: Instant,
}

/// Per-identity request budgets
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimiter {
    /// Create a limiter after validating `config`
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            windows: DashMap::new(),
        })
    }

    /// Settings of this limiter
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Identity of a request: `Authorization`, falling back to `Host`
    ///
    /// An empty header counts as absent.
    pub fn identity(headers: &HashMap<String, String>) -> Option<&str> {
        let present = |name: &str| {
            headers
                .get(name)
                .map(String::as_str)
                .filter(|value| !value.is_empty())
        };
        present(AUTHORIZATION_HEADER).or_else(|| present(HOST_HEADER))
    }

    /// Storage key for an identity
    pub fn key_for(&self, identity: &str) -> String {
        match &self.config.prefix {
            Some(prefix) => format!("rate_limit:{}:{}", prefix, identity),
            None => format!("rate_limit:{}", identity),
        }
    }

    /// Admit or reject a request described by its headers
    ///
    /// Requests carrying neither identity header are not limited.
    pub fn check(&self, headers: &HashMap<String, String>) -> Result<()> {
        match Self::identity(headers) {
            Some(identity) => self.check_identity(identity),
            None => Ok(()),
        }
    }

    /// Admit or reject a request from `identity`
    pub fn check_identity(&self, identity: &str) -> Result<()> {
        let key = self.key_for(identity);
        let now = Instant::now();

        match self.windows.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(self.open_window(now));
                Ok(())
            }
            Entry::Occupied(mut entry) => {
                let window = entry.get_mut();
                if now >= window.expires_at {
                    *window = self.open_window(now);
                    Ok(())
                } else if window.remaining > 0 {
                    window.remaining -= 1;
                    Ok(())
                } else {
                    log::debug!("rate limit exhausted for {}", entry.key());
                    Err(WorkError::too_many_requests(entry.key().clone()))
                }
            }
        }
    }

    /// Budget left in the current window, if one is open
    pub fn remaining(&self, identity: &str) -> Option<u64> {
        let now = Instant::now();
        self.windows
            .get(&self.key_for(identity))
            .filter(|w| now < w.expires_at)
            .map(|w| w.remaining)
    }

    /// Drop expired windows; returns how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| now < w.expires_at);
        before - self.windows.len()
    }

    /// Number of tracked windows
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Whether no window is tracked
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn open_window(&self, now: Instant) -> Window {
        Window {
            remaining: self.config.budget(),
            expires_at: now + self.config.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_budget() {
        assert_eq!(RateLimitConfig::default().budget(), 1000);
        let config = RateLimitConfig::new(5).with_ttl(Duration::from_millis(400));
        assert_eq!(config.budget(), 2);
        assert!(RateLimitConfig::new(0).validate().is_err());
        assert!(RateLimitConfig::new(1)
            .with_ttl(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_identity_precedence() {
        let both = headers(&[("Authorization", "abc"), ("Host", "10.0.0.1")]);
        assert_eq!(RateLimiter::identity(&both), Some("abc"));
        let host = headers(&[("Host", "10.0.0.1")]);
        assert_eq!(RateLimiter::identity(&host), Some("10.0.0.1"));
        assert_eq!(RateLimiter::identity(&headers(&[])), None);
    }

    #[test]
    fn test_empty_authorization_falls_back_to_host() {
        let request = headers(&[("Authorization", ""), ("Host", "10.0.0.1")]);
        assert_eq!(RateLimiter::identity(&request), Some("10.0.0.1"));

        let limiter = RateLimiter::new(RateLimitConfig::new(1).with_ttl(Duration::from_secs(1)))
            .unwrap();
        let admitted = (0..10).filter(|_| limiter.check(&request).is_ok()).count();
        assert_eq!(admitted, 2);
        assert_eq!(limiter.remaining("10.0.0.1"), Some(0));

        let blank = headers(&[("Authorization", ""), ("Host", "")]);
        assert_eq!(RateLimiter::identity(&blank), None);
    }

    #[test]
    fn test_exhaustion() {
        let limiter = RateLimiter::new(RateLimitConfig::new(3).with_ttl(Duration::from_secs(1)))
            .unwrap();

        limiter.check_identity("user").unwrap();
        assert_eq!(limiter.remaining("user"), Some(3));
        for _ in 0..3 {
            limiter.check_identity("user").unwrap();
        }
        assert_eq!(limiter.remaining("user"), Some(0));
        assert!(matches!(
            limiter.check_identity("user"),
            Err(WorkError::TooManyRequests { ref key }) if key == "rate_limit:user"
        ));

        // other identities are independent
        limiter.check_identity("other").unwrap();
    }

    #[test]
    fn test_window_expiry() {
        let limiter = RateLimiter::new(
            RateLimitConfig::new(10)
                .with_ttl(Duration::from_millis(100))
                .with_prefix("api"),
        )
        .unwrap();

        limiter.check_identity("user").unwrap();
        limiter.check_identity("user").unwrap();
        assert!(limiter.check_identity("user").is_err());
        assert_eq!(limiter.key_for("user"), "rate_limit:api:user");

        thread::sleep(Duration::from_millis(150));
        assert_eq!(limiter.remaining("user"), None);
        assert_eq!(limiter.purge_expired(), 1);
        assert!(limiter.is_empty());
        limiter.check_identity("user").unwrap();
    }

    #[test]
    fn test_unidentified_requests_pass() {
        let limiter = RateLimiter::new(RateLimitConfig::new(1).with_ttl(Duration::from_secs(1)))
            .unwrap();
        for _ in 0..10 {
            limiter.check(&headers(&[])).unwrap();
        }
        assert!(limiter.is_empty());
    }

    #[test]
    fn test_concurrent_admissions_respect_budget() {
        let limiter = Arc::new(
            RateLimiter::new(RateLimitConfig::new(20).with_ttl(Duration::from_secs(5))).unwrap(),
        );
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = Arc::clone(&limiter);
                thread::spawn(move || {
                    (0..50)
                        .filter(|_| l.check_identity("shared").is_ok())
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted as u64, 1 + limiter.config().budget());
    }
}
