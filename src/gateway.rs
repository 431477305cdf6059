//! The single call path agents use to reach a model.
//!
//! `complete` routes the request, takes a limiter permit, calls the backend
//! and feeds the outcome back into provider health and the limiter's
//! penalty box.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{ConfigError, ProviderError};
use crate::health::HealthTracker;
use crate::limiter::{AcquireMode, RateLimiter};
use crate::provider::{
    BackendRegistry, CompletionRequest, CompletionResponse, ModelBackend, ProviderHandle,
};
use crate::router::{DegradedRouting, ProviderRouter};

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayResponse {
    pub response: CompletionResponse,
    pub handle: ProviderHandle,
    pub degraded: Option<DegradedRouting>,
}

pub struct ModelGateway {
    router: ProviderRouter,
    limiter: Arc<RateLimiter>,
    health: Arc<HealthTracker>,
    backends: BackendRegistry,
    mode: AcquireMode,
}

impl ModelGateway {
    pub fn new(
        router: ProviderRouter,
        limiter: Arc<RateLimiter>,
        backends: BackendRegistry,
        mode: AcquireMode,
    ) -> Self {
        let health = Arc::clone(router.health());
        Self {
            router,
            limiter,
            health,
            backends,
            mode,
        }
    }

    /// Wires router, health, limiter and backends from a validated config.
    pub fn from_config(config: &AppConfig, backends: BackendRegistry) -> Result<Self, ConfigError> {
        let providers = config.provider_ids();
        let health = Arc::new(HealthTracker::new(config.health_policy(), providers.clone()));
        let router = ProviderRouter::new(config.route_entries(), &providers, health)?;
        let limiter = Arc::new(RateLimiter::new(
            config.provider_limits(),
            config.backoff_policy(),
        ));
        Ok(Self::new(router, limiter, backends, config.acquire_mode()))
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<GatewayResponse, ProviderError> {
        let route = self.router.route(request.task_class)?;
        let handle = route.handle;

        let permit = self
            .limiter
            .acquire(&handle, self.mode)
            .await
            .map_err(|limited| ProviderError::RateLimited {
                provider: limited.provider,
                retry_after_ms: Some(limited.retry_in.as_millis() as u64),
            })?;

        debug!(
            job_id = %request.prompt_payload.job_id,
            stage = %request.prompt_payload.stage,
            provider = %handle,
            "calling model"
        );
        let result = self.backends.complete(&handle, request).await;
        drop(permit);

        match result {
            Ok(response) => {
                self.health.record(&handle.provider, true);
                Ok(GatewayResponse {
                    response,
                    handle,
                    degraded: route.degraded,
                })
            }
            Err(err) => {
                // A rejected request says nothing about the provider's health.
                if err.is_retryable() {
                    self.health.record(&handle.provider, false);
                }
                if err.is_throttle()
                    && let Some(retry_after) = err.retry_after()
                {
                    self.limiter.penalize(&handle.provider, retry_after);
                }
                warn!(provider = %handle, error = %err, "model call failed");
                Err(err)
            }
        }
    }
}
