//! Fixed-window rate limiting.
//!
//! The limiter is an injectable component, not a process-wide singleton:
//! handlers and services receive the instance through application state, and
//! tests drive it with explicit instants. State is a bounded-lifetime cache
//! (identity to count/window), swept periodically; requests beyond quota are
//! rejected with a retry-after hint, never queued.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::AppError;
use crate::state::AppState;

struct WindowEntry {
    count: u32,
    window_reset_at: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Mutex<HashMap<String, WindowEntry>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Count one request for `key`. Returns how long to wait when the
    /// window's quota is exhausted.
    pub async fn check(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
    ) -> Result<(), Duration> {
        self.check_at(key, max_requests, window, Instant::now()).await
    }

    /// Like [`check`](Self::check) with an explicit clock, so tests control
    /// time.
    pub async fn check_at(
        &self,
        key: &str,
        max_requests: u32,
        window: Duration,
        now: Instant,
    ) -> Result<(), Duration> {
        let mut map = self.inner.lock().await;
        let entry = map.entry(key.to_owned()).or_insert_with(|| WindowEntry {
            count: 0,
            window_reset_at: now + window,
        });

        if now >= entry.window_reset_at {
            entry.count = 0;
            entry.window_reset_at = now + window;
        }

        entry.count += 1;
        if entry.count <= max_requests {
            Ok(())
        } else {
            Err(entry.window_reset_at.saturating_duration_since(now))
        }
    }

    /// Drop entries whose window already ended.
    pub async fn sweep(&self) {
        self.sweep_at(Instant::now()).await
    }

    pub async fn sweep_at(&self, now: Instant) {
        let mut map = self.inner.lock().await;
        map.retain(|_, entry| entry.window_reset_at > now);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

/// Extract client IP: X-Forwarded-For first, then the peer address.
pub fn extract_ip(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        // Comma-separated; the first entry is the original client.
        if let Some(first) = forwarded.split(',').next() {
            let ip = first.trim();
            if !ip.is_empty() {
                return ip.to_owned();
            }
        }
    }

    request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Per-IP limit for the login-request route: 10 requests/minute.
pub async fn login_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ip = extract_ip(&request);
    if let Err(retry_after) = state
        .rate_limiter
        .check(&format!("login-ip:{ip}"), 10, Duration::from_secs(60))
        .await
    {
        return Err(AppError::RateLimited {
            retry_after_secs: retry_after.as_secs().max(1),
        });
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn quota_enforced_within_window() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();

        for _ in 0..5 {
            assert!(limiter.check_at("k", 5, WINDOW, t0).await.is_ok());
        }
        let retry_after = limiter.check_at("k", 5, WINDOW, t0).await.unwrap_err();
        assert_eq!(retry_after, WINDOW);
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();

        for _ in 0..5 {
            limiter.check_at("k", 5, WINDOW, t0).await.ok();
        }
        assert!(limiter.check_at("k", 5, WINDOW, t0).await.is_err());

        let later = t0 + WINDOW + Duration::from_secs(1);
        assert!(limiter.check_at("k", 5, WINDOW, later).await.is_ok());
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();

        for _ in 0..5 {
            limiter.check_at("a", 5, WINDOW, t0).await.ok();
        }
        assert!(limiter.check_at("a", 5, WINDOW, t0).await.is_err());
        assert!(limiter.check_at("b", 5, WINDOW, t0).await.is_ok());
    }

    #[tokio::test]
    async fn retry_after_shrinks_as_the_window_ages() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();

        limiter.check_at("k", 1, WINDOW, t0).await.ok();
        let midway = t0 + Duration::from_secs(1800);
        let retry_after = limiter.check_at("k", 1, WINDOW, midway).await.unwrap_err();
        assert_eq!(retry_after, Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn sweep_drops_expired_windows_only() {
        let limiter = RateLimiter::new();
        let t0 = Instant::now();

        limiter.check_at("old", 5, Duration::from_secs(60), t0).await.ok();
        limiter.check_at("fresh", 5, WINDOW, t0).await.ok();
        assert_eq!(limiter.len().await, 2);

        limiter.sweep_at(t0 + Duration::from_secs(120)).await;
        assert_eq!(limiter.len().await, 1);
    }
}
