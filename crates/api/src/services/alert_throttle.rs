//! Keyed alert throttle.
//!
//! Allows one alert per (asset, alert type) per window using a governor
//! keyed limiter with a burst of one.

use std::{num::NonZeroU32, time::Duration};

use domain::models::AlertType;
use domain::ports::AlertThrottle;
use governor::{
    clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter as GovRateLimiter,
};
use uuid::Uuid;

type ThrottleKey = (Uuid, AlertType);
type KeyedRateLimiter =
    GovRateLimiter<ThrottleKey, DefaultKeyedStateStore<ThrottleKey>, DefaultClock>;

pub struct GovernorAlertThrottle {
    limiter: KeyedRateLimiter,
    window: Duration,
}

impl GovernorAlertThrottle {
    /// Creates a throttle admitting one alert per key per `window`.
    /// Windows shorter than a second are rounded up.
    pub fn new(window: Duration) -> Self {
        let window = window.max(Duration::from_secs(1));
        let quota = Quota::with_period(window)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
        Self {
            limiter: GovRateLimiter::keyed(quota),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Drops keys whose window has fully elapsed.
    pub fn retain_recent(&self) {
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

impl AlertThrottle for GovernorAlertThrottle {
    fn try_acquire(&self, asset_id: Uuid, alert_type: AlertType) -> bool {
        self.limiter.check_key(&(asset_id, alert_type)).is_ok()
    }
}
