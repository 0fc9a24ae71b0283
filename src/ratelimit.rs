use governor::{
    Quota, RateLimiter as GovernorRateLimiter,
    clock::{QuantaClock, QuantaInstant},
    middleware::NoOpMiddleware,
    state::{InMemoryState, NotKeyed},
};
use nonzero_ext::nonzero;
use std::{num::NonZeroU32, time::Duration};

// The portal chokes on bursts during login, so never let more than one request
// through at once.
const MAX_BURST: NonZeroU32 = nonzero!(1u32);

type SpecificGovernorRateLimiter =
    GovernorRateLimiter<NotKeyed, InMemoryState, QuantaClock, NoOpMiddleware<QuantaInstant>>;

/// Process-wide request pacing: no two requests closer than the configured
/// interval.
pub struct RateLimiter {
    between_req: SpecificGovernorRateLimiter,
}

impl RateLimiter {
    /// Returns `None` for a zero interval, i.e. no pacing at all.
    pub fn with_interval(interval: Duration) -> Option<Self> {
        let quota = Quota::with_period(interval)?.allow_burst(MAX_BURST);
        Some(RateLimiter {
            between_req: GovernorRateLimiter::direct(quota),
        })
    }

    pub async fn wait_until_ready(&self) {
        self.between_req.until_ready().await;
    }
}
