//! Per-resource rate limiting
//!
//! Each resource may carry a [`RateLimiter`]; the handler checks it right
//! after authorization with a `<resource>:<client>` key and answers
//! `429 Too Many Requests` when the check fails.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use crate::request::RestRequest;

/// Counts requests per key
#[async_trait]
pub trait RateLimiter: Send + Sync + 'static {
    /// Record one request for `key`; `false` once the key is over its limit
    async fn check(&self, key: &str) -> bool;
}

/// Requests allowed per period
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u32,
    pub period: Duration,
}

impl RateLimit {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self { limit, period }
    }

    /// Limiter enforcing this limit in process memory
    pub fn memory_limiter(&self) -> MemoryRateLimiter {
        MemoryRateLimiter::new(self.limit, self.period)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limiter kept in a [`DashMap`]
///
/// A key's window starts with its first request and resets once `period`
/// has elapsed. Expired windows are swept at most once per period.
#[derive(Debug)]
pub struct MemoryRateLimiter {
    limit: u32,
    period: Duration,
    windows: DashMap<String, Window>,
    last_sweep: Mutex<Instant>,
}

impl MemoryRateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            limit,
            period,
            windows: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    /// Forget every window
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Drop expired windows once a period has passed since the last sweep
    fn sweep(&self, now: Instant) {
        let Ok(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) <= self.period {
            return;
        }
        *last = now;
        drop(last);

        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.duration_since(window.started) <= self.period);
        tracing::debug!(
            evicted = before.saturating_sub(self.windows.len()),
            "Expired rate limit windows swept"
        );
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        self.sweep(now);

        let mut window = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(window.started) > self.period {
            *window = Window {
                started: now,
                count: 0,
            };
        }

        if window.count < self.limit {
            window.count += 1;
            true
        } else {
            false
        }
    }
}

/// Rate limit key for a request
///
/// The client is the auth identity when it is a string or number, else the
/// first `x-forwarded-for` entry, else `anonymous`.
pub fn client_key(resource: &str, auth: &Value, request: &RestRequest) -> String {
    let client = match auth {
        Value::String(identity) => identity.clone(),
        Value::Number(identity) => identity.to_string(),
        _ => request
            .header("x-forwarded-for")
            .and_then(|forwarded| forwarded.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .unwrap_or("anonymous")
            .to_string(),
    };
    format!("{}:{}", resource, client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_period() {
        let limiter = MemoryRateLimiter::new(2, Duration::from_secs(60));
        assert!(limiter.check("pets:a").await);
        assert!(limiter.check("pets:a").await);
        assert!(!limiter.check("pets:a").await);
        assert!(limiter.check("pets:b").await);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.check("pets:a").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_holds_within_period() {
        let limiter = RateLimit::new(1, Duration::from_secs(10)).memory_limiter();
        assert!(limiter.check("k").await);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(!limiter.check("k").await);

        limiter.clear();
        assert!(limiter.check("k").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_windows_are_evicted() {
        let limiter = MemoryRateLimiter::new(5, Duration::from_secs(60));
        for client in 0..1000 {
            assert!(limiter.check(&format!("pets:{client}")).await);
        }
        assert_eq!(limiter.tracked(), 1000);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(limiter.check("pets:late").await);
        assert_eq!(limiter.tracked(), 1001);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.check("pets:fresh").await);
        assert_eq!(limiter.tracked(), 1);
    }

    #[test]
    fn test_client_key() {
        let request = RestRequest::new(Method::GET, "/pets".parse().unwrap())
            .unwrap()
            .with_header("x-forwarded-for", " 10.0.0.1 , 10.0.0.2");

        assert_eq!(client_key("pets", &json!("alice"), &request), "pets:alice");
        assert_eq!(client_key("pets", &json!(7), &request), "pets:7");
        assert_eq!(client_key("pets", &json!(true), &request), "pets:10.0.0.1");

        let bare = RestRequest::new(Method::GET, "/pets".parse().unwrap()).unwrap();
        assert_eq!(client_key("pets", &json!(true), &bare), "pets:anonymous");
    }
}
