//! Per-caller sliding-window quota for caller-initiated observations.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::QuotaConfig;

/// Who is asking for an observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind", content = "id")]
pub enum CallerIdentity {
    /// A wallet address.
    Wallet(String),
    /// A source IP address.
    Ip(IpAddr),
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wallet(address) => f.write_str(address),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

impl std::str::FromStr for CallerIdentity {
    type Err = std::convert::Infallible;

    /// Parses an IP address, treating anything else as a wallet address.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Ok(s.parse::<IpAddr>()
            .map_or_else(|_| Self::Wallet(s.to_owned()), Self::Ip))
    }
}

/// A rejected request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("quota of {limit} requests exhausted, retry in {retry_after:?}")]
pub struct QuotaExceeded {
    /// Requests allowed per window.
    pub limit: usize,
    /// Time until the oldest counted request leaves the window.
    pub retry_after: Duration,
}

/// How an accepted request was admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Counted against the quota; `remaining` requests are left.
    Counted {
        /// Requests left in the current window.
        remaining: usize,
    },
    /// The caller is on the allow-list.
    Bypassed,
}

/// Sliding-window request counter keyed by caller.
///
/// Check-and-record for one caller happens under that caller's shard lock.
#[derive(Debug, Clone)]
pub struct QuotaLimiter {
    max_requests: usize,
    window: Duration,
    allow_list: Arc<HashSet<String>>,
    windows: Arc<DashMap<CallerIdentity, VecDeque<Instant>>>,
}

impl Default for QuotaLimiter {
    fn default() -> Self {
        Self::from_config(&QuotaConfig::default())
    }
}

impl QuotaLimiter {
    /// Creates a limiter.
    #[must_use]
    pub fn new(max_requests: usize, window: Duration, allow_list: impl IntoIterator<Item = String>) -> Self {
        Self {
            max_requests,
            window,
            allow_list: Arc::new(allow_list.into_iter().map(|s| s.trim().to_owned()).collect()),
            windows: Arc::new(DashMap::new()),
        }
    }

    /// Creates a limiter from configuration.
    #[must_use]
    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(
            config.max_requests,
            Duration::from_secs(config.window_secs),
            config.allow_list.iter().cloned(),
        )
    }

    /// Returns `true` if `caller` bypasses the quota.
    #[must_use]
    pub fn is_allowed(&self, caller: &CallerIdentity) -> bool {
        self.allow_list.contains(&caller.to_string())
    }

    /// Admits and records one request from `caller`.
    ///
    /// # Errors
    ///
    /// Returns [`QuotaExceeded`] when the caller's window is full.
    pub fn check(&self, caller: &CallerIdentity) -> Result<Admission, QuotaExceeded> {
        self.check_at(caller, Instant::now())
    }

    fn check_at(&self, caller: &CallerIdentity, now: Instant) -> Result<Admission, QuotaExceeded> {
        if self.is_allowed(caller) {
            return Ok(Admission::Bypassed);
        }
        self.windows.retain(|_, seen| {
            seen.back()
                .is_some_and(|&last| now.saturating_duration_since(last) < self.window)
        });
        let mut window = self.windows.entry(caller.clone()).or_default();
        while window
            .front()
            .is_some_and(|&seen| now.saturating_duration_since(seen) >= self.window)
        {
            window.pop_front();
        }
        if window.len() >= self.max_requests {
            let retry_after = window
                .front()
                .map_or(Duration::ZERO, |&oldest| {
                    self.window.saturating_sub(now.saturating_duration_since(oldest))
                });
            return Err(QuotaExceeded {
                limit: self.max_requests,
                retry_after,
            });
        }
        window.push_back(now);
        Ok(Admission::Counted {
            remaining: self.max_requests - window.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wallet(s: &str) -> CallerIdentity {
        CallerIdentity::Wallet(s.to_owned())
    }

    #[test]
    fn test_eleventh_request_in_window_is_rejected() {
        let limiter = QuotaLimiter::default();
        let caller = wallet("caller");
        let start = Instant::now();
        for i in 0..10 {
            let admitted = limiter.check_at(&caller, start + Duration::from_secs(i)).unwrap();
            assert_eq!(admitted, Admission::Counted { remaining: 9 - i as usize });
        }
        let err = limiter
            .check_at(&caller, start + Duration::from_secs(10))
            .unwrap_err();
        assert_eq!(err.limit, 10);
        assert_eq!(err.retry_after, Duration::from_secs(3590));
    }

    #[test]
    fn test_allow_listed_caller_is_never_rejected() {
        let limiter = QuotaLimiter::new(10, Duration::from_secs(3600), ["admin".to_owned()]);
        for _ in 0..20 {
            assert_eq!(limiter.check(&wallet("admin")).unwrap(), Admission::Bypassed);
        }
    }

    #[test]
    fn test_window_slides() {
        let limiter = QuotaLimiter::new(2, Duration::from_secs(60), []);
        let caller: CallerIdentity = "10.0.0.7".parse().unwrap();
        assert!(matches!(caller, CallerIdentity::Ip(_)));
        let start = Instant::now();
        limiter.check_at(&caller, start).unwrap();
        limiter.check_at(&caller, start + Duration::from_secs(30)).unwrap();
        assert!(limiter.check_at(&caller, start + Duration::from_secs(59)).is_err());
        assert!(limiter.check_at(&caller, start + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn test_callers_are_counted_separately() {
        let limiter = QuotaLimiter::new(1, Duration::from_secs(60), []);
        assert!(limiter.check(&wallet("a")).is_ok());
        assert!(limiter.check(&wallet("b")).is_ok());
        assert!(limiter.check(&wallet("a")).is_err());
    }

    #[test]
    fn test_idle_callers_are_forgotten() {
        let limiter = QuotaLimiter::new(1, Duration::from_secs(60), []);
        let start = Instant::now();
        limiter.check_at(&wallet("a"), start).unwrap();
        limiter.check_at(&"10.0.0.9".parse().unwrap(), start).unwrap();
        assert_eq!(limiter.windows.len(), 2);

        limiter.check_at(&wallet("b"), start + Duration::from_secs(60)).unwrap();
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key(&wallet("b")));
    }

    #[test]
    fn test_ip_allow_list_matches_display_form() {
        let limiter = QuotaLimiter::new(1, Duration::from_secs(60), ["127.0.0.1".to_owned()]);
        let caller: CallerIdentity = "127.0.0.1".parse().unwrap();
        assert!(limiter.is_allowed(&caller));
    }
}
