//! Fixed-window request budget per client, applied at the edge of the public
//! write endpoints (contact form, login). Abuse control, not correctness.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::ApiError;

// Expired windows are swept once the table grows past this many clients.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

pub struct RateLimiter {
    max: u32,
    window: Duration,
    trust_proxy: bool,
    clients: Mutex<HashMap<String, Window>>,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration, trust_proxy: bool) -> Self {
        Self {
            max,
            window,
            trust_proxy,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn check(&self, key: &str) -> Decision {
        self.check_at(key, Instant::now())
    }

    /// Counts one request for `key` at `now`.
    pub fn check_at(&self, key: &str, now: Instant) -> Decision {
        let mut clients = self.clients.lock();

        if clients.len() > SWEEP_THRESHOLD {
            let window = self.window;
            clients.retain(|_, w| now.duration_since(w.started) < window);
        }

        let entry = clients.entry(key.to_owned()).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        let allowed = entry.count < self.max;
        if allowed {
            entry.count += 1;
        }

        Decision {
            allowed,
            limit: self.max,
            remaining: self.max.saturating_sub(entry.count),
            reset_after: self
                .window
                .saturating_sub(now.duration_since(entry.started)),
        }
    }

    /// Peer address, or the first `X-Forwarded-For` hop behind a trusted proxy.
    pub fn client_key(&self, req: &Request) -> String {
        if self.trust_proxy {
            let forwarded = req
                .headers()
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty());
            if let Some(ip) = forwarded {
                return ip.to_owned();
            }
        }
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_owned())
    }
}

fn set_headers(headers: &mut HeaderMap, decision: &Decision) {
    let reset = decision.reset_after.as_secs_f64().ceil() as u64;
    headers.insert("ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert("ratelimit-reset", HeaderValue::from(reset));
}

/// Middleware: rejects with 429 once the client's budget is spent.
pub async fn enforce(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let key = limiter.client_key(&req);
    let decision = limiter.check(&key);

    let mut response = if decision.allowed {
        next.run(req).await
    } else {
        tracing::warn!(client = %key, path = %req.uri().path(), "rate limit exceeded");
        ApiError::TooManyRequests("Troppe richieste, riprova più tardi.".into()).into_response()
    };
    set_headers(response.headers_mut(), &decision);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn budget_is_spent_then_refilled_after_window() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60), false);
        let t0 = Instant::now();

        assert!(limiter.check_at("1.2.3.4", t0).allowed);
        let second = limiter.check_at("1.2.3.4", t0);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);
        assert!(!limiter.check_at("1.2.3.4", t0 + Duration::from_secs(1)).allowed);

        // Other clients have their own budget.
        assert!(limiter.check_at("5.6.7.8", t0).allowed);

        let later = limiter.check_at("1.2.3.4", t0 + Duration::from_secs(60));
        assert!(later.allowed);
        assert_eq!(later.remaining, 1);
    }

    #[test]
    fn forwarded_header_only_trusted_when_configured() {
        let req = || {
            axum::http::Request::builder()
                .header("x-forwarded-for", "9.9.9.9, 10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };
        let trusting = RateLimiter::new(1, Duration::from_secs(1), true);
        assert_eq!(trusting.client_key(&req()), "9.9.9.9");
        let direct = RateLimiter::new(1, Duration::from_secs(1), false);
        assert_eq!(direct.client_key(&req()), "unknown");
    }
}
