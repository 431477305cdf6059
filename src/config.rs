//! recruitflow configuration loaded from `recruitflow.toml`.
//!
//! [`AppConfig`] holds every tunable: providers and their budgets, the
//! routing policy table, retry, health and timeout settings. Missing fields
//! use sensible defaults. Provider API keys are read from the environment
//! variable named by `api_key_env`, which takes precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::health::HealthPolicy;
use crate::limiter::{AcquireMode, BackoffPolicy, ProviderLimits};
use crate::provider::{
    AnthropicClient, Backend, BackendRegistry, CostTier, OpenAiClient, ProviderKind,
    ScriptedBackend, TaskClass,
};
use crate::router::{RouteEntry, build_table};
use crate::workflow::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "recruitflow.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Where `JsonFileStore` keeps workflow documents.
    pub store_dir: PathBuf,
    /// Minimum assessment score for a candidate to receive outreach.
    pub engagement_min_score: f64,
    /// Candidates scoring from here up to `engagement_min_score` pause the
    /// job for manual review. Set it to `engagement_min_score` to skip them.
    pub review_min_score: f64,
    /// Upper bound on one agent invocation, including rate-limit waits.
    pub stage_timeout_secs: u64,
    /// How long an in-flight lease stays valid without being renewed.
    pub lease_ttl_secs: u64,
    /// Blocking wait for a rate-limit permit; `0` fails fast instead.
    pub acquire_max_wait_ms: u64,
    pub retry: RetrySettings,
    pub health: HealthSettings,
    pub providers: Vec<ProviderConfig>,
    pub routes: Vec<RouteConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSettings {
    pub window_secs: u64,
    pub error_threshold: f64,
    pub min_samples: usize,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteConfig {
    pub task_class: TaskClass,
    #[serde(default = "default_cost_tier")]
    pub cost_tier: CostTier,
    pub chain: Vec<RouteTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTarget {
    pub provider: String,
    pub model: String,
}

fn default_rpm() -> u32 {
    50
}

fn default_max_in_flight() -> usize {
    4
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_cost_tier() -> CostTier {
    CostTier::Standard
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter: 0.25,
        }
    }
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            window_secs: 60,
            error_threshold: 0.5,
            min_samples: 4,
            cooldown_secs: 30,
        }
    }
}

fn provider(id: &str, kind: ProviderKind, key_env: &str, rpm: u32) -> ProviderConfig {
    ProviderConfig {
        id: id.into(),
        kind,
        api_key: String::new(),
        api_key_env: Some(key_env.into()),
        base_url: None,
        requests_per_minute: rpm,
        max_in_flight: default_max_in_flight(),
        request_timeout_secs: default_request_timeout_secs(),
    }
}

fn route(task_class: TaskClass, cost_tier: CostTier, chain: &[(&str, &str)]) -> RouteConfig {
    RouteConfig {
        task_class,
        cost_tier,
        chain: chain
            .iter()
            .map(|(provider, model)| RouteTarget {
                provider: provider.to_string(),
                model: model.to_string(),
            })
            .collect(),
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from(".recruitflow"),
            engagement_min_score: 70.0,
            review_min_score: 50.0,
            stage_timeout_secs: 180,
            lease_ttl_secs: 300,
            acquire_max_wait_ms: 10_000,
            retry: RetrySettings::default(),
            health: HealthSettings::default(),
            providers: vec![
                provider("anthropic", ProviderKind::Anthropic, "ANTHROPIC_API_KEY", 50),
                provider("openai", ProviderKind::OpenAi, "OPENAI_API_KEY", 60),
            ],
            routes: vec![
                route(
                    TaskClass::ComplexReasoning,
                    CostTier::Premium,
                    &[("anthropic", "claude-opus-4-6"), ("openai", "gpt-4o")],
                ),
                route(
                    TaskClass::BulkClassification,
                    CostTier::Low,
                    &[
                        ("anthropic", "claude-haiku-4-5-20251001"),
                        ("openai", "gpt-4o-mini"),
                    ],
                ),
                route(
                    TaskClass::SafetySensitive,
                    CostTier::Standard,
                    &[
                        ("anthropic", "claude-sonnet-4-5-20250929"),
                        ("openai", "gpt-4o"),
                    ],
                ),
            ],
        }
    }
}

impl AppConfig {
    /// Loads `path`, or `recruitflow.toml` in the working directory when no
    /// path is given. A missing default file yields the defaults; a missing
    /// explicit file is an error. Environment keys are applied and the result
    /// validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_toml(&std::fs::read_to_string(path)?)?,
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::from_toml(&std::fs::read_to_string(path)?)?
                } else {
                    debug!("no {DEFAULT_CONFIG_FILE}, using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Environment variables take precedence over keys in the file.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for provider in &mut self.providers {
            if let Some(name) = &provider.api_key_env
                && let Some(key) = lookup(name)
                && !key.is_empty()
            {
                provider.api_key = key;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Invalid("at least one provider is required".into()));
        }
        let mut ids: Vec<String> = Vec::with_capacity(self.providers.len());
        for p in &self.providers {
            if p.id.trim().is_empty() {
                return Err(ConfigError::Invalid("provider id must not be empty".into()));
            }
            if ids.contains(&p.id) {
                return Err(ConfigError::Duplicate(format!("provider {}", p.id)));
            }
            if p.requests_per_minute == 0 || p.max_in_flight == 0 {
                return Err(ConfigError::Invalid(format!(
                    "provider {} needs requests_per_minute and max_in_flight above zero",
                    p.id
                )));
            }
            ids.push(p.id.clone());
        }

        build_table(self.route_entries(), &ids)?;

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if retry.base_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms exceeds retry.max_delay_ms".into(),
            ));
        }
        if !(0.0..1.0).contains(&retry.jitter) {
            return Err(ConfigError::Invalid("retry.jitter must be in [0, 1)".into()));
        }
        if !(self.health.error_threshold > 0.0 && self.health.error_threshold <= 1.0) {
            return Err(ConfigError::Invalid(
                "health.error_threshold must be in (0, 1]".into(),
            ));
        }
        if self.health.min_samples == 0 {
            return Err(ConfigError::Invalid("health.min_samples must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.engagement_min_score) {
            return Err(ConfigError::Invalid(
                "engagement_min_score must be in [0, 100]".into(),
            ));
        }
        if !(0.0..=self.engagement_min_score).contains(&self.review_min_score) {
            return Err(ConfigError::Invalid(
                "review_min_score must be in [0, engagement_min_score]".into(),
            ));
        }
        if self.stage_timeout_secs == 0 || self.lease_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "stage_timeout_secs and lease_ttl_secs must be above zero".into(),
            ));
        }
        // A lease must outlive the invocation it guards.
        if self.lease_ttl_secs <= self.stage_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl_secs ({}) must exceed stage_timeout_secs ({})",
                self.lease_ttl_secs, self.stage_timeout_secs
            )));
        }
        Ok(())
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.id.clone()).collect()
    }

    pub fn route_entries(&self) -> Vec<RouteEntry> {
        self.routes
            .iter()
            .map(|r| RouteEntry {
                task_class: r.task_class,
                cost_tier: r.cost_tier,
                chain: r
                    .chain
                    .iter()
                    .map(|t| (t.provider.clone(), t.model.clone()))
                    .collect(),
            })
            .collect()
    }

    pub fn provider_limits(&self) -> Vec<(String, ProviderLimits)> {
        self.providers
            .iter()
            .map(|p| {
                (
                    p.id.clone(),
                    ProviderLimits {
                        requests_per_minute: p.requests_per_minute,
                        max_in_flight: p.max_in_flight,
                    },
                )
            })
            .collect()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(self.retry.base_delay_ms),
            max: Duration::from_millis(self.retry.max_delay_ms),
            jitter: self.retry.jitter,
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            window: Duration::from_secs(self.health.window_secs),
            error_threshold: self.health.error_threshold,
            min_samples: self.health.min_samples,
            cooldown: Duration::from_secs(self.health.cooldown_secs),
        }
    }

    pub fn acquire_mode(&self) -> AcquireMode {
        match self.acquire_max_wait_ms {
            0 => AcquireMode::FailFast,
            ms => AcquireMode::Blocking {
                max_wait: Duration::from_millis(ms),
            },
        }
    }

    /// Lower bound of the manual review band, if the band is not empty.
    pub fn review_band(&self) -> Option<f64> {
        (self.review_min_score < self.engagement_min_score).then_some(self.review_min_score)
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// One backend per configured provider. `offline` swaps every provider for
    /// the deterministic scripted backend, so no network or keys are needed.
    pub fn backends(&self, offline: bool) -> Result<BackendRegistry, ConfigError> {
        let mut registry = BackendRegistry::new();
        for p in &self.providers {
            let backend = if offline || p.kind == ProviderKind::Scripted {
                Backend::Scripted(ScriptedBackend::demo())
            } else {
                if p.api_key.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "provider {} has no API key; set {}",
                        p.id,
                        p.api_key_env.as_deref().unwrap_or("api_key")
                    )));
                }
                let timeout = Duration::from_secs(p.request_timeout_secs);
                let key = p.api_key.clone();
                let built = match (p.kind, &p.base_url) {
                    (ProviderKind::Anthropic, Some(url)) => {
                        AnthropicClient::with_base_url(key, url.clone(), timeout)
                            .map(Backend::Anthropic)
                    }
                    (ProviderKind::Anthropic, None) => {
                        AnthropicClient::new(key, timeout).map(Backend::Anthropic)
                    }
                    (_, Some(url)) => {
                        OpenAiClient::with_base_url(key, url.clone(), timeout).map(Backend::OpenAi)
                    }
                    (_, None) => OpenAiClient::new(key, timeout).map(Backend::OpenAi),
                };
                built.map_err(|e| ConfigError::Invalid(format!("provider {}: {e}", p.id)))?
            };
            registry.register(p.id.clone(), backend);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.engagement_min_score, 70.0);
        assert_eq!(config.review_band(), Some(50.0));
        assert_eq!(config.provider_ids(), vec!["anthropic", "openai"]);
        assert!(config.providers.iter().all(|p| p.api_key.is_empty()));
    }

    #[test]
    fn deserialize_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            engagement_min_score = 80.0

            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.base_delay_ms, 500);
        assert_eq!(config.engagement_min_score, 80.0);
        assert_eq!(config.routes.len(), 3);
        config.validate().unwrap();

        // An empty band turns manual review off.
        let config = AppConfig::from_toml("review_min_score = 70.0").unwrap();
        config.validate().unwrap();
        assert_eq!(config.review_band(), None);
    }

    #[test]
    fn full_provider_and_route_table() {
        let config = AppConfig::from_toml(
            r#"
            [[providers]]
            id = "local"
            kind = "openai"
            base_url = "http://localhost:8000/v1"
            requests_per_minute = 600

            [[providers]]
            id = "fixture"
            kind = "scripted"

            [[routes]]
            task_class = "complex-reasoning"
            cost_tier = "premium"
            chain = [{ provider = "local", model = "qwen" }, { provider = "fixture", model = "x" }]

            [[routes]]
            task_class = "bulk-classification"
            chain = [{ provider = "fixture", model = "x" }]

            [[routes]]
            task_class = "safety-sensitive"
            chain = [{ provider = "local", model = "qwen" }]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.providers[0].max_in_flight, 4);
        assert_eq!(config.routes[1].cost_tier, CostTier::Standard);

        let entries = config.route_entries();
        assert_eq!(entries[0].chain[1], ("fixture".to_string(), "x".to_string()));

        // No key for "local", so only offline mode can build backends.
        assert!(matches!(config.backends(false), Err(ConfigError::Invalid(_))));
        let registry = config.backends(true).unwrap();
        assert!(registry.contains("local") && registry.contains("fixture"));
    }

    #[test]
    fn validation_rejects_bad_tables() {
        let mut config = AppConfig::default();
        config.routes.pop();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRoute(TaskClass::SafetySensitive))
        ));

        let mut config = AppConfig::default();
        config.routes[0].chain[0].provider = "mystery".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownProvider { .. })
        ));

        let mut config = AppConfig::default();
        config.providers.push(config.providers[0].clone());
        assert!(matches!(config.validate(), Err(ConfigError::Duplicate(_))));

        let mut config = AppConfig::default();
        config.providers[1].requests_per_minute = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 60_000;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.engagement_min_score = 120.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.review_min_score = 75.0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.stage_timeout_secs = config.lease_ttl_secs;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn environment_key_takes_precedence() {
        let mut config = AppConfig::default();
        config.providers[0].api_key = "from-file".into();
        config.apply_env(|name| match name {
            "ANTHROPIC_API_KEY" => Some("from-env".into()),
            "OPENAI_API_KEY" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.providers[0].api_key, "from-env");
        assert!(config.providers[1].api_key.is_empty());
        assert!(config.backends(false).is_err());
    }

    #[test]
    fn load_reads_explicit_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        std::fs::write(&path, "stage_timeout_secs = 30\nacquire_max_wait_ms = 0\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.stage_timeout(), Duration::from_secs(30));
        assert_eq!(config.acquire_mode(), AcquireMode::FailFast);

        assert!(matches!(
            AppConfig::load(Some(&tmp.path().join("missing.toml"))),
            Err(ConfigError::Io(_))
        ));
        std::fs::write(&path, "retry = 3").unwrap();
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Toml(_))
        ));
    }
}
