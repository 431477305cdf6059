//! Per-provider request budgets and retry backoff.
//!
//! Each provider owns a token bucket (requests per minute, refilled
//! continuously) and a semaphore capping concurrent calls. Both sit behind
//! per-provider locks so concurrent job workers drawing from one budget
//! never lose updates.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep, timeout_at};
use tracing::debug;

use crate::provider::ProviderHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub requests_per_minute: u32,
    pub max_in_flight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    /// Relative spread applied to each delay, e.g. `0.25` for ±25%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// `min(base * 2^attempt, max)`, jittered, never above `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let capped = self.base.saturating_mul(factor).min(self.max);
        if self.jitter <= 0.0 {
            return capped;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        capped.mul_f64((1.0 + spread).max(0.0)).min(self.max)
    }
}

/// How `acquire` behaves when the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Wait for capacity, but no longer than `max_wait`.
    Blocking { max_wait: Duration },
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limited on {provider}, capacity in {retry_in:?}")]
pub struct RateLimited {
    pub provider: String,
    pub retry_in: Duration,
}

#[derive(Debug)]
struct Bucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    blocked_until: Option<Instant>,
}

impl Bucket {
    fn new(requests_per_minute: u32) -> Self {
        let capacity = f64::from(requests_per_minute.max(1));
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
            blocked_until: None,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Takes one token, or reports how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        if let Some(until) = self.blocked_until {
            if now < until {
                return Err(until - now);
            }
            self.blocked_until = None;
        }
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64(
                (1.0 - self.tokens) / self.refill_per_sec,
            ))
        }
    }
}

struct ProviderBudget {
    bucket: Mutex<Bucket>,
    in_flight: Arc<Semaphore>,
}

/// Authorises one outbound provider call. Releases its in-flight slot on drop.
#[derive(Debug)]
pub struct Permit {
    provider: String,
    _slot: OwnedSemaphorePermit,
}

impl Permit {
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

pub struct RateLimiter {
    budgets: HashMap<String, ProviderBudget>,
    backoff: BackoffPolicy,
}

impl RateLimiter {
    pub fn new<I>(limits: I, backoff: BackoffPolicy) -> Self
    where
        I: IntoIterator<Item = (String, ProviderLimits)>,
    {
        let budgets = limits
            .into_iter()
            .map(|(provider, limits)| {
                (
                    provider,
                    ProviderBudget {
                        bucket: Mutex::new(Bucket::new(limits.requests_per_minute)),
                        in_flight: Arc::new(Semaphore::new(limits.max_in_flight.max(1))),
                    },
                )
            })
            .collect();
        Self { budgets, backoff }
    }

    pub async fn acquire(
        &self,
        handle: &ProviderHandle,
        mode: AcquireMode,
    ) -> Result<Permit, RateLimited> {
        let provider = handle.provider.as_str();
        let limited = |retry_in: Duration| RateLimited {
            provider: provider.to_string(),
            retry_in,
        };
        let budget = self
            .budgets
            .get(provider)
            .ok_or_else(|| limited(Duration::ZERO))?;
        let deadline = match mode {
            AcquireMode::Blocking { max_wait } => Some(Instant::now() + max_wait),
            AcquireMode::FailFast => None,
        };

        // Slot first, so a token is never spent on a call that cannot start.
        let slot = match deadline {
            None => Arc::clone(&budget.in_flight)
                .try_acquire_owned()
                .map_err(|_| limited(Duration::ZERO))?,
            Some(deadline) => {
                match timeout_at(deadline, Arc::clone(&budget.in_flight).acquire_owned()).await {
                    Ok(Ok(slot)) => slot,
                    _ => return Err(limited(Duration::ZERO)),
                }
            }
        };

        loop {
            let now = Instant::now();
            let taken = budget
                .bucket
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .try_take(now);
            let wait = match taken {
                Ok(()) => {
                    return Ok(Permit {
                        provider: provider.to_string(),
                        _slot: slot,
                    });
                }
                Err(wait) => wait,
            };
            match deadline {
                Some(deadline) if now + wait <= deadline => {
                    debug!(provider, wait_ms = wait.as_millis() as u64, "waiting for rate budget");
                    sleep(wait).await;
                }
                _ => return Err(limited(wait)),
            }
        }
    }

    /// Blocks new permits for `provider` until `retry_after` has passed.
    pub fn penalize(&self, provider: &str, retry_after: Duration) {
        if let Some(budget) = self.budgets.get(provider) {
            let mut bucket = budget.bucket.lock().unwrap_or_else(|e| e.into_inner());
            let until = Instant::now() + retry_after;
            bucket.blocked_until = Some(bucket.blocked_until.map_or(until, |b| b.max(until)));
        }
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff.delay(attempt)
    }

    pub fn available_tokens(&self, provider: &str) -> Option<f64> {
        let budget = self.budgets.get(provider)?;
        let mut bucket = budget.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.refill(Instant::now());
        Some(bucket.tokens)
    }
}
