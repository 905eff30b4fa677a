//! Per-client guard in front of coupon matching.
//!
//! Three keys per client, all in the [`CounterStore`]:
//!
//! - `attempts`: every admitted validation, hourly window.
//! - `failures`: unmatched codes, short window; reaching the threshold arms
//!   the cooldown and resets this counter.
//! - `cooldown`: while present every attempt is refused before the
//!   coupon table is touched.
//!
//! The store is advisory. When it cannot be reached the limiter lets the
//! request through so checkout never depends on it.

mod memory;
mod redis_store;
mod store;

use std::{sync::Arc, time::Duration};

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

pub use memory::MemoryCounterStore;
pub use redis_store::RedisCounterStore;
pub use store::{CounterStore, CounterStoreError};

#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub attempts_per_window: i64,
    pub attempt_window: Duration,
    pub max_failures: i64,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            attempts_per_window: 10,
            attempt_window: Duration::from_secs(60 * 60),
            max_failures: 5,
            failure_window: Duration::from_secs(5 * 60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct RedemptionLimiter {
    store: Arc<dyn CounterStore>,
    policy: RateLimitPolicy,
}

impl RedemptionLimiter {
    pub fn new(store: Arc<dyn CounterStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn in_memory(policy: RateLimitPolicy) -> Self {
        Self::new(Arc::new(MemoryCounterStore::new()), policy)
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Gate one validation attempt. Refusals never reach the matcher.
    pub async fn admit(&self, client: &str) -> AppResult<()> {
        match self.store.exists(&cooldown_key(client)).await {
            Ok(true) => {
                debug!(client_ip = %client, "coupon attempt refused during cooldown");
                return Err(AppError::TooManyFailedAttempts);
            }
            Ok(false) => {}
            Err(err) => {
                warn!(error = %err, client_ip = %client, "cooldown lookup failed, allowing attempt");
                return Ok(());
            }
        }

        match self
            .store
            .incr(&attempts_key(client), self.policy.attempt_window)
            .await
        {
            Ok(count) if count > self.policy.attempts_per_window => {
                warn!(client_ip = %client, attempts = count, "coupon attempt rate limit exceeded");
                Err(AppError::RateLimited)
            }
            Ok(_) => Ok(()),
            Err(err) => {
                warn!(error = %err, client_ip = %client, "attempt counter unavailable, allowing attempt");
                Ok(())
            }
        }
    }

    /// Record a code that matched no coupon.
    pub async fn record_failure(&self, client: &str) {
        let failures = match self
            .store
            .incr(&failures_key(client), self.policy.failure_window)
            .await
        {
            Ok(count) => count,
            Err(err) => {
                warn!(error = %err, client_ip = %client, "failure counter unavailable");
                return;
            }
        };

        if failures < self.policy.max_failures {
            return;
        }

        if let Err(err) = self
            .store
            .set_nx(&cooldown_key(client), self.policy.cooldown)
            .await
        {
            warn!(error = %err, client_ip = %client, "failed to arm coupon cooldown");
            return;
        }
        if let Err(err) = self.store.delete(&failures_key(client)).await {
            warn!(error = %err, client_ip = %client, "failed to reset failure counter");
        }
        warn!(
            client_ip = %client,
            failures,
            cooldown_secs = self.policy.cooldown.as_secs(),
            "coupon probing detected, cooldown armed"
        );
    }

    /// A matched code clears the failure streak; the hourly budget is kept.
    pub async fn record_success(&self, client: &str) {
        if let Err(err) = self.store.delete(&failures_key(client)).await {
            warn!(error = %err, client_ip = %client, "failed to clear failure counter");
        }
    }
}

fn attempts_key(client: &str) -> String {
    format!("coupon:attempts:{client}")
}

fn failures_key(client: &str) -> String {
    format!("coupon:failures:{client}")
}

fn cooldown_key(client: &str) -> String {
    format!("coupon:cooldown:{client}")
}
