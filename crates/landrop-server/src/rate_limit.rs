use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

/// Refill state for one client IP.
#[derive(Debug)]
struct Bucket {
    level: f64,
    touched: Instant,
}

/// Per-IP token bucket guarding the HTTP surface. LAN hubs see few
/// clients, so a single mutex over the bucket map is plenty.
#[derive(Clone)]
pub struct IpThrottle {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    refill_per_sec: f64,
    burst: f64,
}

impl IpThrottle {
    pub fn new(refill_per_sec: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            refill_per_sec,
            burst,
        }
    }

    pub async fn allow(&self, ip: IpAddr) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(ip).or_insert(Bucket {
            level: self.burst,
            touched: now,
        });

        let elapsed = now.duration_since(bucket.touched).as_secs_f64();
        bucket.level = (bucket.level + elapsed * self.refill_per_sec).min(self.burst);
        bucket.touched = now;

        if bucket.level >= 1.0 {
            bucket.level -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets idle longer than the given number of seconds.
    pub async fn sweep(&self, max_idle_secs: f64) {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, b| now.duration_since(b.touched).as_secs_f64() < max_idle_secs);
    }
}

impl Default for IpThrottle {
    // 20 req/s sustained, burst of 40: generous for signaling and
    // inventory polls, still a lid on runaway upload retry loops.
    fn default() -> Self {
        Self::new(20.0, 40.0)
    }
}

pub async fn throttle_middleware(
    State(throttle): State<IpThrottle>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip());

    if let Some(ip) = ip {
        if !throttle.allow(ip).await {
            warn!(ip = %ip, "Rate limit exceeded");
            return Err(StatusCode::TOO_MANY_REQUESTS);
        }
    }

    Ok(next.run(req).await)
}
