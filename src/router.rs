use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::error::{ConfigError, ProviderError};
use crate::health::HealthTracker;
use crate::provider::{CostTier, ProviderHandle, TaskClass};

/// One ordered fallback chain for a task class. The first entry is the
/// primary provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub task_class: TaskClass,
    pub cost_tier: CostTier,
    /// `(provider, model)` pairs in fallback order.
    pub chain: Vec<(String, String)>,
}

/// Signal that a task class was served by a fallback provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DegradedRouting {
    pub task_class: TaskClass,
    pub primary: String,
    pub selected: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub handle: ProviderHandle,
    pub degraded: Option<DegradedRouting>,
}

/// Maps task classes to providers through a static policy table.
///
/// The table is validated once at construction; afterwards `route` is
/// deterministic for a given table and health snapshot.
pub struct ProviderRouter {
    routes: HashMap<TaskClass, Vec<ProviderHandle>>,
    health: Arc<HealthTracker>,
}

impl ProviderRouter {
    /// Builds the router, rejecting tables that leave a task class without a
    /// route or name a provider that is not configured.
    pub fn new(
        entries: Vec<RouteEntry>,
        known_providers: &[String],
        health: Arc<HealthTracker>,
    ) -> Result<Self, ConfigError> {
        let routes = build_table(entries, known_providers)?;
        Ok(Self { routes, health })
    }

    /// Selects the first healthy provider in the task class's chain.
    pub fn route(&self, task_class: TaskClass) -> Result<Route, ProviderError> {
        let chain = self
            .routes
            .get(&task_class)
            .ok_or(ProviderError::Unavailable(task_class))?;
        let primary = &chain[0];

        let handle = chain
            .iter()
            .find(|h| self.health.is_healthy(&h.provider))
            .ok_or(ProviderError::Unavailable(task_class))?;

        let degraded = (handle.provider != primary.provider).then(|| {
            warn!(
                task_class = %task_class,
                primary = %primary.provider,
                selected = %handle.provider,
                "degraded routing: primary provider unhealthy"
            );
            DegradedRouting {
                task_class,
                primary: primary.provider.clone(),
                selected: handle.provider.clone(),
            }
        });

        Ok(Route {
            handle: handle.clone(),
            degraded,
        })
    }

    /// The configured chain for a task class, primary first.
    pub fn chain(&self, task_class: TaskClass) -> &[ProviderHandle] {
        self.routes
            .get(&task_class)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }
}

/// Validates a policy table and resolves it into per-class chains.
pub(crate) fn build_table(
    entries: Vec<RouteEntry>,
    known_providers: &[String],
) -> Result<HashMap<TaskClass, Vec<ProviderHandle>>, ConfigError> {
    let mut routes: HashMap<TaskClass, Vec<ProviderHandle>> = HashMap::new();
    for entry in entries {
        if routes.contains_key(&entry.task_class) {
            return Err(ConfigError::Duplicate(format!(
                "route for {}",
                entry.task_class
            )));
        }
        let mut chain = Vec::with_capacity(entry.chain.len());
        for (provider, model) in entry.chain {
            if !known_providers.contains(&provider) {
                return Err(ConfigError::UnknownProvider {
                    task_class: entry.task_class,
                    provider,
                });
            }
            chain.push(ProviderHandle {
                provider,
                model,
                cost_tier: entry.cost_tier,
            });
        }
        if chain.is_empty() {
            return Err(ConfigError::MissingRoute(entry.task_class));
        }
        routes.insert(entry.task_class, chain);
    }

    if let Some(missing) = TaskClass::ALL.iter().find(|tc| !routes.contains_key(tc)) {
        return Err(ConfigError::MissingRoute(*missing));
    }
    Ok(routes)
}
