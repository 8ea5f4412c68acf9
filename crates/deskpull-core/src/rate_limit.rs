//! Credit-aware pacing shared by every call of one pull run.
//!
//! The API reports how many credits remain in the current window. The
//! limiter remembers the last reported value and, once it drops below a
//! configured buffer, pauses for a fixed cooldown so the window can
//! refill. It also enforces an optional minimum delay before each call
//! and honours server-mandated waits.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use deskpull_core::rate_limit::{RateLimitConfig, RateLimiter};
//! use deskpull_core::traits::ResponseMeta;
//!
//! # async fn run() {
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new(2000).with_min_delay(Duration::from_millis(100)),
//! );
//! limiter.await_clearance(&ResponseMeta::default()).await;
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use crate::traits::ResponseMeta;

/// Default remaining-credit threshold that triggers a cooldown.
pub const DEFAULT_CREDIT_BUFFER: i64 = 5000;

/// Pause taken once the credit buffer is reached.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// Sentinel for "no credit signal seen yet".
const UNKNOWN: i64 = i64::MAX;

/// Configuration for the rate limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Pause once the remaining credits fall below this value.
    pub credit_buffer: i64,

    /// Delay applied before every call. `Duration::ZERO` disables it.
    pub min_delay: Duration,

    /// Length of the pause taken when the buffer is reached.
    pub cooldown: Duration,
}

impl RateLimitConfig {
    pub fn new(credit_buffer: i64) -> Self {
        Self {
            credit_buffer,
            ..Self::default()
        }
    }

    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            credit_buffer: DEFAULT_CREDIT_BUFFER,
            min_delay: Duration::ZERO,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Shared pacing state. Clones share the same budget.
///
/// Budget updates are last-writer-wins: the value is advisory, so a stale
/// read only shifts when the next pause starts.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    remaining: Arc<AtomicI64>,
    paused: Arc<AtomicBool>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            remaining: Arc::new(AtomicI64::new(UNKNOWN)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record the credit signal of a response. Responses without one leave
    /// the budget unchanged.
    pub fn observe(&self, meta: &ResponseMeta) {
        if let Some(remaining) = meta.remaining_credits {
            self.remaining.store(remaining, Ordering::Relaxed);
        }
    }

    /// Last reported remaining credits, `None` until the API reports one.
    pub fn remaining(&self) -> Option<i64> {
        match self.remaining.load(Ordering::Relaxed) {
            UNKNOWN => None,
            n => Some(n),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Suspend as long as pacing requires. Never fails.
    ///
    /// Only one cooldown runs at a time: callers arriving while the pause
    /// flag is set go straight through.
    pub async fn await_clearance(&self, meta: &ResponseMeta) {
        if !self.config.min_delay.is_zero() {
            tokio::time::sleep(self.config.min_delay).await;
        }

        if let Some(wait) = meta.retry_after {
            tracing::warn!(wait_ms = %wait.as_millis(), "Rate-limited: waiting (Retry-After)");
            tokio::time::sleep(wait).await;
        }

        let remaining = self.remaining.load(Ordering::Relaxed);
        if remaining < self.config.credit_buffer
            && self
                .paused
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            tracing::warn!(
                remaining,
                buffer = self.config.credit_buffer,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Credit buffer reached, pausing"
            );
            tokio::time::sleep(self.config.cooldown).await;
            self.paused.store(false, Ordering::Release);
            tracing::info!("Credit pause over, resuming");
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
