//! Token bucket rate limiting for the REST API.
//!
//! One bucket is shared by every client. It holds up to `burst` tokens and
//! refills at `rate` tokens per second; a request that finds the bucket empty
//! is answered with 429 without reaching its handler.

use crate::alert_logic::state::AppError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;
use tracing::debug;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// `rate` requests per second with bursts of up to `burst`. Both are
    /// raised to at least 1.
    pub fn new(rate: u32, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            rate: f64::from(rate.max(1)),
            burst,
            bucket: Mutex::new(Bucket { tokens: burst, last_refill: Instant::now() }),
        }
    }

    /// Global limiter: `per_sec` requests per second, burst of the same size.
    /// `None` when `per_sec` is 0, which turns limiting off.
    pub fn per_second(per_sec: u32) -> Option<Arc<Self>> {
        (per_sec > 0).then(|| Arc::new(Self::new(per_sec, per_sec)))
    }

    /// Takes one token if one is available.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

pub async fn limit_requests(State(limiter): State<Arc<RateLimiter>>, request: Request, next: Next) -> Response {
    if limiter.try_acquire() {
        next.run(request).await
    } else {
        debug!(path = %request.uri().path(), "rate limit exceeded");
        AppError::RateLimited.into_response()
    }
}
