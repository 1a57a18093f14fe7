use std::collections::HashMap;
use std::hash::Hash;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Sustained refill rate and burst size of a bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quota {
    pub per_second: f64,
    pub burst: f64,
}

#[derive(Debug)]
struct Bucket {
    available: f64,
    touched: Instant,
}

impl Bucket {
    fn full(quota: Quota) -> Self {
        Self {
            available: quota.burst,
            touched: Instant::now(),
        }
    }

    /// Refill for the time since the last call, then take one token.
    fn take(&mut self, quota: Quota) -> bool {
        let now = Instant::now();
        let idle = now.duration_since(self.touched).as_secs_f64();
        self.touched = now;
        self.available = quota.burst.min(self.available + idle * quota.per_second);

        let allowed = self.available >= 1.0;
        if allowed {
            self.available -= 1.0;
        }
        allowed
    }
}

/// Token-bucket limiter keyed by client IP (HTTP) or principal (WebSocket
/// events).
#[derive(Clone)]
pub struct RateLimiter<K = IpAddr> {
    buckets: Arc<Mutex<HashMap<K, Bucket>>>,
    quota: Quota,
}

impl<K: Eq + Hash> RateLimiter<K> {
    pub fn new(per_second: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            quota: Quota { per_second, burst },
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Whether `key` may act now. Unknown keys start with a full burst.
    pub async fn check(&self, key: K) -> bool {
        let quota = self.quota;
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(key)
            .or_insert_with(|| Bucket::full(quota))
            .take(quota)
    }

    /// Forget keys idle for at least `max_idle`.
    pub async fn purge_stale(&self, max_idle: Duration) {
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.touched.elapsed() < max_idle);
        let purged = before - buckets.len();
        if purged > 0 {
            debug!(purged, remaining = buckets.len(), "Purged idle rate-limit buckets");
        }
    }
}

impl Default for RateLimiter<IpAddr> {
    fn default() -> Self {
        Self::new(10.0, 30.0)
    }
}

/// Reject requests from clients that exhausted their bucket with `429`.
/// Requests whose origin cannot be determined are let through.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    match extract_client_ip(&req) {
        Some(ip) if !limiter.check(ip).await => {
            warn!(ip = %ip, "Rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
        _ => Ok(next.run(req).await),
    }
}

/// Peer address when the server was started with connect info, otherwise
/// the first `X-Forwarded-For` hop, otherwise `X-Real-IP`.
fn extract_client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let header = |name: &str| req.headers().get(name).and_then(|v| v.to_str().ok());

    peer.or_else(|| {
        header("x-forwarded-for")
            .and_then(|value| value.split(',').next())
            .and_then(|hop| hop.trim().parse().ok())
    })
    .or_else(|| header("x-real-ip").and_then(|value| value.trim().parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_shared::PrincipalId;

    #[tokio::test]
    async fn burst_is_spent_then_refused() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();

        for _ in 0..5 {
            assert!(limiter.check(ip).await);
        }
        assert!(!limiter.check(ip).await);
    }

    #[tokio::test]
    async fn principals_have_independent_buckets() {
        let limiter = RateLimiter::new(0.0, 2.0);
        let (a, b) = (PrincipalId::new(), PrincipalId::new());

        assert!(limiter.check(a).await);
        assert!(limiter.check(a).await);
        assert!(!limiter.check(a).await);

        assert!(limiter.check(b).await);
    }

    #[tokio::test]
    async fn idle_buckets_are_purged() {
        let limiter = RateLimiter::new(10.0, 5.0);
        let ip: IpAddr = "192.168.1.1".parse().unwrap();
        assert!(limiter.check(ip).await);

        limiter.purge_stale(Duration::from_secs(3600)).await;
        assert_eq!(limiter.buckets.lock().await.len(), 1);

        limiter.purge_stale(Duration::ZERO).await;
        assert!(limiter.buckets.lock().await.is_empty());
    }

    #[test]
    fn default_quota_allows_bursts() {
        let quota = RateLimiter::default().quota();
        assert_eq!(quota.per_second, 10.0);
        assert_eq!(quota.burst, 30.0);
    }

    #[test]
    fn forwarded_headers_identify_the_client_without_connect_info() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(())
            .unwrap();
        assert_eq!(extract_client_ip(&req), Some("203.0.113.7".parse().unwrap()));

        let req = Request::builder()
            .header("x-real-ip", "198.51.100.2")
            .body(())
            .unwrap();
        assert_eq!(extract_client_ip(&req), Some("198.51.100.2".parse().unwrap()));

        let req = Request::builder().body(()).unwrap();
        assert_eq!(extract_client_ip(&req), None);
    }
}
