//! Rolling error-rate health per provider.
//!
//! The router consults [`HealthTracker::is_healthy`] when walking a fallback
//! chain; the gateway feeds it one sample per provider call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthPolicy {
    /// How far back samples count towards the error rate.
    pub window: Duration,
    /// Error rate (0.0..=1.0) above which a provider is marked unhealthy.
    pub error_threshold: f64,
    /// Samples required in the window before the rate is trusted.
    pub min_samples: usize,
    pub cooldown: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            error_threshold: 0.5,
            min_samples: 4,
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderHealth {
    samples: VecDeque<(Instant, bool)>,
    unhealthy_until: Option<Instant>,
}

impl ProviderHealth {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some((at, _)) = self.samples.front() {
            if now.duration_since(*at) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn error_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let errors = self.samples.iter().filter(|(_, ok)| !ok).count();
        Some(errors as f64 / self.samples.len() as f64)
    }

    fn is_healthy(&self, now: Instant) -> bool {
        self.unhealthy_until.is_none_or(|until| now >= until)
    }
}

/// Per-provider health, one lock per provider.
pub struct HealthTracker {
    policy: HealthPolicy,
    providers: HashMap<String, Mutex<ProviderHealth>>,
}

impl HealthTracker {
    pub fn new<I, S>(policy: HealthPolicy, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            policy,
            providers: providers
                .into_iter()
                .map(|p| (p.into(), Mutex::new(ProviderHealth::default())))
                .collect(),
        }
    }

    /// Records one call outcome. Returns `true` when this sample tipped the
    /// provider into the unhealthy state.
    pub fn record(&self, provider: &str, success: bool) -> bool {
        let Some(slot) = self.providers.get(provider) else {
            return false;
        };
        let mut health = slot.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        health.prune(now, self.policy.window);
        health.samples.push_back((now, success));

        if !health.is_healthy(now) || health.samples.len() < self.policy.min_samples {
            return false;
        }
        match health.error_rate() {
            Some(rate) if rate > self.policy.error_threshold => {
                health.unhealthy_until = Some(now + self.policy.cooldown);
                health.samples.clear();
                warn!(
                    provider,
                    error_rate = rate,
                    cooldown_secs = self.policy.cooldown.as_secs(),
                    "provider marked unhealthy"
                );
                true
            }
            _ => false,
        }
    }

    /// Unknown providers are never healthy.
    pub fn is_healthy(&self, provider: &str) -> bool {
        self.providers.get(provider).is_some_and(|slot| {
            slot.lock()
                .unwrap_or_else(|e| e.into_inner())
                .is_healthy(Instant::now())
        })
    }

    pub fn mark_unhealthy(&self, provider: &str, cooldown: Duration) {
        if let Some(slot) = self.providers.get(provider) {
            let mut health = slot.lock().unwrap_or_else(|e| e.into_inner());
            health.unhealthy_until = Some(Instant::now() + cooldown);
            health.samples.clear();
        }
    }

    pub fn error_rate(&self, provider: &str) -> Option<f64> {
        let slot = self.providers.get(provider)?;
        let mut health = slot.lock().unwrap_or_else(|e| e.into_inner());
        health.prune(Instant::now(), self.policy.window);
        health.error_rate()
    }
}
