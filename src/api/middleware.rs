//! HTTP middleware: login rate limiting, security headers and request timing.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::config::Config;

/// Requests slower than this are logged at `WARN`.
const SLOW_REQUEST: Duration = Duration::from_secs(1);

/// Router-level security settings derived from [`Config`].
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Allowed CORS origins; permissive when `None`
    pub cors_origins: Option<Vec<String>>,
    /// Limiter applied to the login endpoint
    pub login_limiter: Option<RateLimiter>,
}

impl SecurityConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            cors_origins: config.cors_origins.clone(),
            login_limiter: Some(
                RateLimiter::new(config.login_rate_limit, Duration::from_secs(60))
                    .with_trusted_proxies(config.trusted_proxies.clone()),
            ),
        }
    }

    /// No rate limiting and permissive CORS (for tests).
    pub fn disabled() -> Self {
        Self {
            cors_origins: None,
            login_limiter: None,
        }
    }

    pub fn with_login_rate_limit(max_attempts: u32) -> Self {
        Self {
            cors_origins: None,
            login_limiter: Some(RateLimiter::new(max_attempts, Duration::from_secs(60))),
        }
    }

    pub fn with_cors_origins(origins: Vec<String>) -> Self {
        Self {
            cors_origins: Some(origins),
            login_limiter: None,
        }
    }
}

/// In-memory sliding-window limiter keyed by client IP.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    /// Peers allowed to report the client address in forwarding headers
    trusted_proxies: Arc<Vec<IpAddr>>,
    requests: Arc<Mutex<HashMap<IpAddr, Vec<Instant>>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            trusted_proxies: Arc::new(Vec::new()),
            requests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_trusted_proxies(mut self, proxies: Vec<IpAddr>) -> Self {
        self.trusted_proxies = Arc::new(proxies);
        self
    }

    /// Record an attempt from `ip`; false once the window is full.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut requests = self.requests.lock().expect("rate limiter lock poisoned");

        // Drop IPs that have gone quiet so the map does not grow unbounded
        requests.retain(|_, attempts| {
            attempts.retain(|&t| now.duration_since(t) < self.window);
            !attempts.is_empty()
        });

        let entry = requests.entry(ip).or_default();
        if entry.len() < self.max_requests as usize {
            entry.push(now);
            true
        } else {
            false
        }
    }
}

pub async fn rate_limit_middleware(
    State(rate_limiter): State<RateLimiter>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = extract_client_ip(&request, &rate_limiter.trusted_proxies);

    if rate_limiter.check(ip) {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Login rate limit exceeded for IP: {}", ip);
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// The connecting peer, or the client it forwards for when the peer is a
/// trusted proxy. Without connection info the peer counts as localhost.
fn extract_client_ip(request: &Request<Body>, trusted_proxies: &[IpAddr]) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .unwrap_or(IpAddr::from([127, 0, 0, 1]));

    if !trusted_proxies.contains(&peer) {
        if request.headers().contains_key("X-Forwarded-For") {
            tracing::debug!(%peer, "Ignoring X-Forwarded-For from untrusted peer");
        }
        return peer;
    }

    // Rightmost hop that is not one of our own proxies
    let forwarded = request
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.rsplit(',')
                .filter_map(|ip| ip.trim().parse::<IpAddr>().ok())
                .find(|ip| !trusted_proxies.contains(ip))
        });

    let real_ip = || {
        request
            .headers()
            .get("X-Real-IP")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
    };

    forwarded.or_else(real_ip).unwrap_or(peer)
}

pub async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

pub async fn request_timing(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    if elapsed >= SLOW_REQUEST {
        tracing::warn!(%method, %path, status, elapsed_ms = elapsed.as_millis() as u64, "Slow request");
    } else {
        tracing::debug!(%method, %path, status, elapsed_ms = elapsed.as_millis() as u64, "Request handled");
    }
    response
}
