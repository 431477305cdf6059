//! Deterministic stand-in backend.
//!
//! Answers from a closure instead of a network call. Used by the test suite
//! and by `recruitflow run --offline`. Tracks how many calls are in flight
//! per job so tests can assert the one-invocation-per-job property.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use super::{
    CompletionRequest, CompletionResponse, FinishReason, ModelBackend, ProviderHandle, Usage,
};
use crate::error::ProviderError;
use crate::workflow::Stage;

type Responder =
    dyn Fn(&ProviderHandle, &CompletionRequest) -> Result<CompletionResponse, ProviderError>
        + Send
        + Sync;

#[derive(Debug, Default, Clone, Copy)]
struct Gauge {
    current: usize,
    peak: usize,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    responder: Arc<Responder>,
    latency: Duration,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<Mutex<HashMap<String, Gauge>>>,
}

impl ScriptedBackend {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&ProviderHandle, &CompletionRequest) -> Result<CompletionResponse, ProviderError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Arc::new(responder),
            latency: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Always answers with the same content.
    pub fn fixed(content: &str) -> Self {
        let content = content.to_string();
        Self::new(move |_, _| Ok(text_response(&content)))
    }

    /// Always fails with the same error.
    pub fn failing(error: ProviderError) -> Self {
        Self::new(move |_, _| Err(error.clone()))
    }

    /// Schema-valid answers for every stage, derived only from the request.
    pub fn demo() -> Self {
        Self::new(|_, request| {
            let ctx = &request.prompt_payload.context;
            let body = match request.prompt_payload.stage {
                Stage::Sourcing => demo_sourcing(ctx),
                Stage::Screening => demo_screening(ctx),
                Stage::Assessment => demo_assessment(ctx),
                Stage::Engagement => demo_engagement(ctx),
                Stage::Completed | Stage::Failed => {
                    return Err(ProviderError::Rejected {
                        status: 400,
                        message: "no work for a terminal stage".into(),
                    });
                }
            };
            Ok(text_response(&body.to_string()))
        })
    }

    /// Simulated response time, spent while the call counts as in flight.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed for one job.
    pub fn peak_in_flight(&self, job_id: &str) -> usize {
        self.in_flight
            .lock()
            .map(|g| g.get(job_id).map(|g| g.peak).unwrap_or(0))
            .unwrap_or(0)
    }

    fn enter(&self, job_id: &str) -> InFlightGuard {
        if let Ok(mut gauges) = self.in_flight.lock() {
            let gauge = gauges.entry(job_id.to_string()).or_default();
            gauge.current += 1;
            gauge.peak = gauge.peak.max(gauge.current);
        }
        InFlightGuard {
            job_id: job_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

/// Decrements the job's gauge even when the call future is dropped mid-flight.
struct InFlightGuard {
    job_id: String,
    in_flight: Arc<Mutex<HashMap<String, Gauge>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut gauges) = self.in_flight.lock()
            && let Some(gauge) = gauges.get_mut(&self.job_id)
        {
            gauge.current = gauge.current.saturating_sub(1);
        }
    }
}

impl ModelBackend for ScriptedBackend {
    async fn complete(
        &self,
        handle: &ProviderHandle,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let _guard = self.enter(&request.prompt_payload.job_id);
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        (self.responder)(handle, request)
    }
}

pub fn text_response(content: &str) -> CompletionResponse {
    CompletionResponse {
        content: content.to_string(),
        usage: Usage {
            input_tokens: 10,
            output_tokens: (content.len() / 4) as u64,
        },
        finish_reason: FinishReason::Stop,
    }
}

fn strings(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn demo_sourcing(ctx: &Value) -> Value {
    let requirements = strings(&ctx["requirements"]).join(", ");
    let candidates: Vec<Value> = [
        ("Ada Park", "ada.park@example.com", 7),
        ("Bo Lindqvist", "bo.l@example.com", 3),
        ("Chidi Okafor", "chidi@example.com", 5),
    ]
    .iter()
    .enumerate()
    .map(|(i, (name, contact, years))| {
        json!({
            "source_platform": "linkedin",
            "listing_id": format!("li-{}", 1001 + i),
            "display_name": name,
            "profile_text": format!("{name}. {years} years experience. Skills: {requirements}"),
            "contact": contact,
        })
    })
    .collect();
    json!({ "candidates": candidates })
}

fn matched_skills(text: &str, requirements: &[String]) -> Vec<String> {
    let lower = text.to_lowercase();
    requirements
        .iter()
        .filter(|r| lower.contains(&r.to_lowercase()))
        .cloned()
        .collect()
}

fn first_number(text: &str) -> u32 {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

fn demo_screening(ctx: &Value) -> Value {
    let text = ctx["raw_text"].as_str().unwrap_or_default();
    let requirements = strings(&ctx["requirements"]);
    let skills = matched_skills(text, &requirements);
    let name = text.split('.').next().unwrap_or("Unknown").trim();
    let years = first_number(text);
    json!({
        "name": name,
        "years_experience": years,
        "skills": skills,
        "qualifies": !skills.is_empty() && years >= 5,
    })
}

fn demo_assessment(ctx: &Value) -> Value {
    let skills = strings(&ctx["candidate"]["attributes"]["skills"]);
    let years = ctx["candidate"]["attributes"]["years_experience"]
        .as_u64()
        .unwrap_or(0);
    let score = (40 + 10 * skills.len() as u64 + 3 * years).min(100);
    let mut reasons: Vec<String> = skills.iter().map(|s| format!("matches: {s}")).collect();
    reasons.push(format!("{years} years of experience"));
    json!({ "score": score, "reasons": reasons })
}

fn demo_engagement(ctx: &Value) -> Value {
    let name = ctx["candidate_name"].as_str().unwrap_or("there");
    let title = ctx["job_title"].as_str().unwrap_or("an open role");
    json!({
        "subject": format!("Opportunity: {title}"),
        "body": format!("Hi {name},\n\nYour background looks like a strong fit for {title}. Would you be open to a short call?"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CostTier, PromptPayload, TaskClass};

    fn handle() -> ProviderHandle {
        ProviderHandle {
            provider: "scripted".into(),
            model: "fixture".into(),
            cost_tier: CostTier::Low,
        }
    }

    fn request(job_id: &str, stage: Stage, context: Value) -> CompletionRequest {
        CompletionRequest {
            task_class: TaskClass::BulkClassification,
            prompt_payload: PromptPayload {
                job_id: job_id.into(),
                stage,
                instructions: String::new(),
                context,
            },
            max_tokens: 64,
            temperature: 0.0,
        }
    }

    #[tokio::test]
    async fn demo_sourcing_returns_three_references() {
        let backend = ScriptedBackend::demo();
        let resp = backend
            .complete(
                &handle(),
                &request("J1", Stage::Sourcing, json!({"requirements": ["Python"]})),
            )
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&resp.content).unwrap();
        assert_eq!(parsed["candidates"].as_array().unwrap().len(), 3);
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn demo_screening_is_deterministic() {
        let backend = ScriptedBackend::demo();
        let ctx = json!({
            "raw_text": "Ada Park. 7 years experience. Skills: Python",
            "requirements": ["Python", "Kubernetes"],
        });
        let a = backend
            .complete(&handle(), &request("J1", Stage::Screening, ctx.clone()))
            .await
            .unwrap();
        let b = backend
            .complete(&handle(), &request("J1", Stage::Screening, ctx))
            .await
            .unwrap();
        assert_eq!(a, b);
        let parsed: Value = serde_json::from_str(&a.content).unwrap();
        assert_eq!(parsed["qualifies"], json!(true));
        assert_eq!(parsed["years_experience"], json!(7));
    }

    #[tokio::test]
    async fn failing_backend_repeats_error() {
        let backend = ScriptedBackend::failing(ProviderError::Timeout);
        for _ in 0..2 {
            let err = backend
                .complete(&handle(), &request("J1", Stage::Sourcing, json!({})))
                .await
                .unwrap_err();
            assert_eq!(err, ProviderError::Timeout);
        }
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gauge_tracks_concurrent_calls_per_job() {
        let backend = ScriptedBackend::fixed("{}").with_latency(Duration::from_millis(50));
        let h = handle();
        let r1 = request("J1", Stage::Sourcing, json!({}));
        let r2 = request("J1", Stage::Sourcing, json!({}));
        let r3 = request("J2", Stage::Sourcing, json!({}));
        let (a, b, c) = tokio::join!(
            backend.complete(&h, &r1),
            backend.complete(&h, &r2),
            backend.complete(&h, &r3),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(backend.peak_in_flight("J1"), 2);
        assert_eq!(backend.peak_in_flight("J2"), 1);
    }
}
