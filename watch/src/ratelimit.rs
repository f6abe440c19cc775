//! Rate limit coordination across scrape tasks.
//!
//! The game API answers `429` with an optional `X-RateLimit-Reset` header
//! (unix seconds). Once a class is limited every task polling that class
//! skips its ticks until the reset passes. Classes never block each other.
//!
//! Nothing here sleeps: callers compare against "now" on their own ticker.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::warn;
use reqwest::header::HeaderMap;

use crate::domain::ResourceClass;

pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Added to the server's reset time before polling again
pub const RESET_GRACE: Duration = Duration::from_secs(5);

/// Block length when the server gives no usable reset time
pub const DEFAULT_BLOCK: Duration = Duration::from_secs(10 * 60);

/// Shared per-class block list. Wrap in an `Arc` to share between tasks.
#[derive(Debug, Default)]
pub struct RateLimiter {
    blocked: Mutex<HashMap<ResourceClass, SystemTime>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a `429` for `class` and return when it may be polled again.
    pub fn record_limited(
        &self,
        class: ResourceClass,
        headers: &HeaderMap,
        now: SystemTime,
    ) -> SystemTime {
        let until = reset_time(headers).map_or(now + DEFAULT_BLOCK, |reset| reset + RESET_GRACE);
        self.state().insert(class, until);

        let wait = until.duration_since(now).unwrap_or_default();
        warn!("Rate limit hit, class={class} blocked for {}s", wait.as_secs());
        until
    }

    pub fn is_blocked(&self, class: ResourceClass, now: SystemTime) -> bool {
        self.state().get(&class).is_some_and(|&until| now < until)
    }

    /// Last recorded block for `class`, expired or not.
    pub fn blocked_until(&self, class: ResourceClass) -> Option<SystemTime> {
        self.state().get(&class).copied()
    }

    // A panicked writer can only have left a complete entry behind
    fn state(&self) -> MutexGuard<'_, HashMap<ResourceClass, SystemTime>> {
        self.blocked.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reset_time(headers: &HeaderMap) -> Option<SystemTime> {
    let value = headers.get(RESET_HEADER)?.to_str().ok()?;
    let secs: u64 = value.trim().parse().ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}
