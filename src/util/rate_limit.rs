//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    let quota = Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN));
    Arc::new(RateLimiter::direct(quota))
}

/// Default inbound message rate per connection.
/// Mouse-look alone can produce one message per frame.
pub const INBOUND_RATE_LIMIT: u32 = 120;

/// Per-connection inbound limiter
#[derive(Clone)]
pub struct ConnectionRateLimiter {
    inbound: Arc<Limiter>,
}

impl ConnectionRateLimiter {
    pub fn new(messages_per_second: u32) -> Self {
        Self {
            inbound: create_limiter(messages_per_second),
        }
    }

    /// Check if an inbound message is allowed (returns true if allowed)
    pub fn check_inbound(&self) -> bool {
        self.inbound.check().is_ok()
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::new(INBOUND_RATE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_above_quota_is_rejected() {
        let limiter = ConnectionRateLimiter::new(3);
        let allowed = (0..10).filter(|_| limiter.check_inbound()).count();
        assert_eq!(allowed, 3);
    }

    #[test]
    fn zero_quota_still_allows_one() {
        let limiter = ConnectionRateLimiter::new(0);
        assert!(limiter.check_inbound());
    }
}
