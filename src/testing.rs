//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::gateway::ModelGateway;
use crate::health::{HealthPolicy, HealthTracker};
use crate::limiter::{AcquireMode, BackoffPolicy, ProviderLimits, RateLimiter};
use crate::provider::{Backend, BackendRegistry, CostTier, ScriptedBackend, TaskClass};
use crate::router::{ProviderRouter, RouteEntry};
use crate::workflow::{Candidate, CandidateReference, Job};

pub const SCRIPTED: &str = "scripted";

/// Gateway routing every task class to one scripted provider with a generous
/// budget.
pub fn scripted_gateway(backend: ScriptedBackend) -> ModelGateway {
    let providers = vec![SCRIPTED.to_string()];
    let health = Arc::new(HealthTracker::new(HealthPolicy::default(), providers.clone()));
    let routes = TaskClass::ALL
        .iter()
        .map(|tc| RouteEntry {
            task_class: *tc,
            cost_tier: CostTier::Low,
            chain: vec![(SCRIPTED.to_string(), "fixture".to_string())],
        })
        .collect();
    let router = ProviderRouter::new(routes, &providers, health).expect("valid test routes");
    let limiter = Arc::new(RateLimiter::new(
        [(
            SCRIPTED.to_string(),
            ProviderLimits {
                requests_per_minute: 6000,
                max_in_flight: 16,
            },
        )],
        BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        },
    ));
    let mut backends = BackendRegistry::new();
    backends.register(SCRIPTED, Backend::Scripted(backend));
    ModelGateway::new(router, limiter, backends, AcquireMode::FailFast)
}

/// Two providers, "primary" then "fallback", on every route.
pub fn fallback_gateway(primary: ScriptedBackend, fallback: ScriptedBackend) -> ModelGateway {
    let providers = vec!["primary".to_string(), "fallback".to_string()];
    let health = Arc::new(HealthTracker::new(HealthPolicy::default(), providers.clone()));
    let routes = TaskClass::ALL
        .iter()
        .map(|tc| RouteEntry {
            task_class: *tc,
            cost_tier: CostTier::Standard,
            chain: providers
                .iter()
                .map(|p| (p.clone(), format!("{p}-model")))
                .collect(),
        })
        .collect();
    let router = ProviderRouter::new(routes, &providers, health).expect("valid test routes");
    let limits = ProviderLimits {
        requests_per_minute: 6000,
        max_in_flight: 16,
    };
    let limiter = Arc::new(RateLimiter::new(
        providers.iter().map(|p| (p.clone(), limits)),
        BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        },
    ));
    let mut backends = BackendRegistry::new();
    backends
        .register("primary", Backend::Scripted(primary))
        .register("fallback", Backend::Scripted(fallback));
    ModelGateway::new(router, limiter, backends, AcquireMode::FailFast)
}

pub fn test_job() -> Job {
    Job::new("Backend Engineer", vec!["Python".into()]).with_id("J1")
}

pub fn test_candidate(profile_text: &str) -> Candidate {
    Candidate::from_reference(&CandidateReference {
        source_platform: "linkedin".into(),
        listing_id: "li-1".into(),
        display_name: Some("Test Candidate".into()),
        profile_text: profile_text.into(),
        contact: Some("test@example.com".into()),
    })
}
