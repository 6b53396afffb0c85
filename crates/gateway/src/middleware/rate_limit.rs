//! Rate limiting middleware using token bucket algorithm

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::QuantaClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use studyvault_common::errors::{AppError, Result};

/// Rate limiter using governor crate
pub type GlobalRateLimiter = RateLimiter<NotKeyed, InMemoryState, QuantaClock>;

/// Shared limiter for the assistant endpoint
pub struct ChatRateLimiter {
    limiter: GlobalRateLimiter,
    requests_per_second: u32,
}

impl ChatRateLimiter {
    /// Zero values are raised to one
    pub fn new(requests_per_second: u32, burst: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(burst).unwrap_or(rate);
        let quota = Quota::per_second(rate).allow_burst(burst);

        Self {
            limiter: RateLimiter::direct(quota),
            requests_per_second: rate.get(),
        }
    }

    pub fn check(&self) -> Result<()> {
        self.limiter.check().map_err(|_| AppError::RateLimited {
            limit: self.requests_per_second,
        })
    }
}

/// Rate limiting middleware
pub async fn rate_limit(
    State(limiter): State<Arc<ChatRateLimiter>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    if let Err(e) = limiter.check() {
        tracing::warn!(path = %request.uri().path(), "Rate limit exceeded");
        return Err(e);
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_refusal() {
        let limiter = ChatRateLimiter::new(1, 2);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_ok());
        assert!(matches!(limiter.check(), Err(AppError::RateLimited { limit: 1 })));
    }

    #[test]
    fn test_zero_quota_is_raised() {
        let limiter = ChatRateLimiter::new(0, 0);
        assert!(limiter.check().is_ok());
    }
}
