//! Per-client request budgets, split by route class.
//!
//! Each client has one allowance per [`RouteClass`]. Payment routes (group
//! creation and joins) get the tightest budget. Rejections use the usual
//! `{ "error": .. }` body plus a `Retry-After` header.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use tokio::sync::Mutex;
use tracing::warn;

/// Which allowance a request draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    Read,
    Write,
    /// Requests carrying a payment signature the server verifies on-chain.
    Payment,
}

impl RouteClass {
    pub fn of(method: &Method, path: &str) -> Self {
        if *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS {
            return RouteClass::Read;
        }
        if *method != Method::POST {
            return RouteClass::Write;
        }
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["api", "groups"] | ["api", "groups", _, "join"] => RouteClass::Payment,
            _ => RouteClass::Write,
        }
    }

    fn label(self) -> &'static str {
        match self {
            RouteClass::Read => "read",
            RouteClass::Write => "write",
            RouteClass::Payment => "payment",
        }
    }
}

/// Sustained rate plus how much may be spent at once.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    pub per_sec: f64,
    pub burst: f64,
}

impl Budget {
    pub fn per_sec(per_sec: f64, burst: f64) -> Self {
        Self { per_sec, burst }
    }

    pub fn per_minute(per_min: f64, burst: f64) -> Self {
        Self {
            per_sec: per_min / 60.0,
            burst,
        }
    }
}

#[derive(Debug)]
struct Allowance {
    tokens: f64,
    seen: Instant,
}

impl Allowance {
    fn full(budget: &Budget, now: Instant) -> Self {
        Self {
            tokens: budget.burst,
            seen: now,
        }
    }

    /// Spend one token, or report how long until one is available.
    fn spend(&mut self, budget: &Budget, now: Instant) -> Result<(), Duration> {
        let idle = now.saturating_duration_since(self.seen).as_secs_f64();
        self.seen = now;
        self.tokens = (self.tokens + idle * budget.per_sec).min(budget.burst);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(missing / budget.per_sec.max(f64::EPSILON)))
    }
}

/// Leave, delete, messages and other writes without a payment.
pub const WRITE_BUDGET: Budget = Budget {
    per_sec: 2.0,
    burst: 10.0,
};

#[derive(Clone)]
pub struct RateLimiter {
    allowances: Arc<Mutex<HashMap<(IpAddr, RouteClass), Allowance>>>,
    read: Budget,
    write: Budget,
    payment: Budget,
}

impl RateLimiter {
    pub fn new(read: Budget, write: Budget, payment: Budget) -> Self {
        Self {
            allowances: Arc::new(Mutex::new(HashMap::new())),
            read,
            write,
            payment,
        }
    }

    pub fn budget(&self, class: RouteClass) -> Budget {
        match class {
            RouteClass::Read => self.read,
            RouteClass::Write => self.write,
            RouteClass::Payment => self.payment,
        }
    }

    /// `Err` carries how long the client should wait.
    pub async fn check(&self, ip: IpAddr, class: RouteClass) -> Result<(), Duration> {
        let budget = self.budget(class);
        let now = Instant::now();
        let mut allowances = self.allowances.lock().await;
        allowances
            .entry((ip, class))
            .or_insert_with(|| Allowance::full(&budget, now))
            .spend(&budget, now)
    }

    /// Forget clients idle for at least `max_idle`. Returns how many went.
    pub async fn purge_stale(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut allowances = self.allowances.lock().await;
        let before = allowances.len();
        allowances.retain(|_, a| now.saturating_duration_since(a.seen) < max_idle);
        before - allowances.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(
            Budget::per_sec(10.0, 30.0),
            WRITE_BUDGET,
            Budget::per_minute(12.0, 3.0),
        )
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(ip) = client_ip(&req) else {
        return next.run(req).await;
    };
    let class = RouteClass::of(req.method(), req.uri().path());

    match limiter.check(ip, class).await {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            let retry_after = wait.as_secs().max(1);
            warn!(ip = %ip, class = class.label(), path = %req.uri().path(), retry_after, "Request budget spent");
            let body = serde_json::json!({ "error": "Too many requests, slow down" });
            let mut resp = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
            resp
        }
    }
}

/// The peer address, else the first `x-forwarded-for` hop, else `x-real-ip`.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<std::net::SocketAddr>>() {
        return Some(peer.ip());
    }

    let header_ip = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    };

    header_ip("x-forwarded-for").or_else(|| header_ip("x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, routing::post, Router};
    use tower::ServiceExt;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn classifies_routes() {
        assert_eq!(RouteClass::of(&Method::GET, "/api/groups/public"), RouteClass::Read);
        assert_eq!(RouteClass::of(&Method::POST, "/api/groups"), RouteClass::Payment);
        assert_eq!(RouteClass::of(&Method::POST, "/api/groups/g-1/join"), RouteClass::Payment);
        assert_eq!(RouteClass::of(&Method::POST, "/api/groups/g-1/leave"), RouteClass::Write);
        assert_eq!(RouteClass::of(&Method::DELETE, "/api/groups/g-1"), RouteClass::Write);
        assert_eq!(RouteClass::of(&Method::POST, "/api/groups/g-1/messages"), RouteClass::Write);
    }

    #[tokio::test]
    async fn burst_then_wait_hint() {
        let limiter = RateLimiter::new(
            Budget::per_sec(10.0, 5.0),
            Budget::per_sec(1.0, 1.0),
            Budget::per_minute(6.0, 1.0),
        );
        let client = ip("127.0.0.1");

        for _ in 0..5 {
            assert!(limiter.check(client, RouteClass::Read).await.is_ok());
        }
        let wait = limiter.check(client, RouteClass::Read).await.unwrap_err();
        assert!(wait <= Duration::from_millis(100));

        assert!(limiter.check(client, RouteClass::Payment).await.is_ok());
        let wait = limiter.check(client, RouteClass::Payment).await.unwrap_err();
        assert!(wait > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn classes_and_clients_have_separate_allowances() {
        let tight = Budget::per_minute(1.0, 1.0);
        let limiter = RateLimiter::new(tight, tight, tight);

        assert!(limiter.check(ip("10.0.0.1"), RouteClass::Payment).await.is_ok());
        assert!(limiter.check(ip("10.0.0.1"), RouteClass::Payment).await.is_err());
        // Spent payments leave reads and other clients untouched.
        assert!(limiter.check(ip("10.0.0.1"), RouteClass::Read).await.is_ok());
        assert!(limiter.check(ip("10.0.0.2"), RouteClass::Payment).await.is_ok());
    }

    #[tokio::test]
    async fn purge_forgets_idle_clients() {
        let limiter = RateLimiter::default();
        limiter.check(ip("192.168.1.1"), RouteClass::Read).await.unwrap();
        limiter.check(ip("192.168.1.1"), RouteClass::Write).await.unwrap();

        assert_eq!(limiter.purge_stale(Duration::from_secs(600)).await, 0);
        assert_eq!(limiter.purge_stale(Duration::ZERO).await, 2);
        assert!(limiter.allowances.lock().await.is_empty());
    }

    #[tokio::test]
    async fn middleware_limits_joins_but_not_reads() {
        let generous = Budget::per_sec(100.0, 100.0);
        let limiter = RateLimiter::new(generous, generous, Budget::per_minute(1.0, 1.0));
        let app = Router::new()
            .route("/api/groups/public", get(|| async { "ok" }))
            .route("/api/groups/:id/join", post(|| async { "joined" }))
            .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware));

        let request = |method: Method, uri: &str| {
            Request::builder()
                .method(method)
                .uri(uri)
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request(Method::POST, "/api/groups/g/join")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(request(Method::POST, "/api/groups/g/join")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after: u64 = second.headers()[header::RETRY_AFTER].to_str().unwrap().parse().unwrap();
        assert!(retry_after >= 1);
        let bytes = axum::body::to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().is_some());

        let read = app.oneshot(request(Method::GET, "/api/groups/public")).await.unwrap();
        assert_eq!(read.status(), StatusCode::OK);
    }
}
