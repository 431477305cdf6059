//! Drives workflows through the recruitment pipeline.
//!
//! A job's worker repeats one cycle until the workflow is terminal:
//!
//! 1. reload the committed state (this is where cancellation is observed),
//! 2. pick the next unit of work, or advance the stage if none is left,
//! 3. commit an in-flight lease for the unit,
//! 4. invoke the stage agent under the stage timeout,
//! 5. apply the result through the state machine and commit.
//!
//! Nothing is handed to the next agent before the previous result is
//! committed. A version conflict means someone else wrote the workflow;
//! the worker reloads and re-evaluates instead of failing.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agent::{Agent, AgentContext, StageInput, StageOutput};
use crate::config::AppConfig;
use crate::error::{AgentError, FailureKind, OrchestratorError, StoreError};
use crate::gateway::ModelGateway;
use crate::router::DegradedRouting;
use crate::store::{StateStore, Versioned};
use crate::workflow::{
    Candidate, Job, JobSummary, Lease, RetryPolicy, Review, Stage, StateMachine, Transition,
    UnitOutcome, WorkUnit, WorkflowState,
};

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub retry: RetryPolicy,
    pub stage_timeout: Duration,
    pub lease_ttl: Duration,
    pub engagement_min_score: f64,
    /// Scores from here up to `engagement_min_score` wait for a reviewer
    /// instead of being skipped. `None` disables manual review.
    pub review_min_score: Option<f64>,
    /// Version conflicts tolerated in one `run` before giving up.
    pub max_conflicts: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stage_timeout: Duration::from_secs(180),
            lease_ttl: Duration::from_secs(300),
            engagement_min_score: 70.0,
            review_min_score: Some(50.0),
            max_conflicts: 16,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            retry: config.retry_policy(),
            stage_timeout: config.stage_timeout(),
            lease_ttl: config.lease_ttl(),
            engagement_min_score: config.engagement_min_score,
            review_min_score: config.review_band(),
            ..Self::default()
        }
    }
}

/// Progress notifications for front ends.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Invoking { job_id: String, unit: WorkUnit },
    Transitioned { job_id: String, transition: Transition },
    Degraded { job_id: String, routing: DegradedRouting },
}

pub type Observer = Arc<dyn Fn(&JobEvent) + Send + Sync>;

type ActiveJobs = Arc<Mutex<HashSet<String>>>;

/// Marks a job as running in this process until dropped.
struct ActiveJob {
    job_id: String,
    active: ActiveJobs,
}

impl ActiveJob {
    fn claim(active: &ActiveJobs, job_id: &str) -> Result<Self, OrchestratorError> {
        let mut jobs = active.lock().unwrap_or_else(|e| e.into_inner());
        if !jobs.insert(job_id.to_string()) {
            return Err(OrchestratorError::AlreadyRunning(job_id.to_string()));
        }
        Ok(Self {
            job_id: job_id.to_string(),
            active: Arc::clone(active),
        })
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        let mut jobs = self.active.lock().unwrap_or_else(|e| e.into_inner());
        jobs.remove(&self.job_id);
    }
}

pub struct Orchestrator<S> {
    store: Arc<S>,
    gateway: Arc<ModelGateway>,
    settings: OrchestratorSettings,
    worker_id: String,
    active: ActiveJobs,
    observer: Option<Observer>,
}

impl<S> Clone for Orchestrator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            settings: self.settings.clone(),
            worker_id: self.worker_id.clone(),
            active: Arc::clone(&self.active),
            observer: self.observer.clone(),
        }
    }
}

enum Committed {
    Version(u64),
    Conflict,
}

impl<S: StateStore + 'static> Orchestrator<S> {
    pub fn new(store: Arc<S>, gateway: Arc<ModelGateway>, settings: OrchestratorSettings) -> Self {
        Self {
            store,
            gateway,
            settings,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            active: Arc::new(Mutex::new(HashSet::new())),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Validates the job and stores a fresh workflow for it in `Sourcing`.
    pub async fn submit(&self, job: Job) -> Result<String, OrchestratorError> {
        job.validate().map_err(OrchestratorError::InvalidJob)?;
        let job_id = job.id.clone();
        let state = WorkflowState::new(job);
        self.store.create(&job_id, &state).await?;
        info!(job_id = %job_id, title = %state.job.title, "job submitted");
        Ok(job_id)
    }

    pub async fn summary(&self, job_id: &str) -> Result<JobSummary, OrchestratorError> {
        let Versioned { value, .. } = self.store.load(job_id).await?;
        Ok(JobSummary::from_state(&value))
    }

    /// Marks a non-terminal job `Failed` with a `Cancelled` error. The job's
    /// worker notices on its next reload and stops. Terminal jobs are left
    /// as they are.
    pub async fn cancel(&self, job_id: &str) -> Result<JobSummary, OrchestratorError> {
        let mut conflicts = 0;
        loop {
            let Versioned {
                version,
                value: mut state,
            } = self.store.load(job_id).await?;
            if state.stage.is_terminal() {
                return Ok(JobSummary::from_state(&state));
            }
            StateMachine::fail(
                &mut state,
                FailureKind::Cancelled,
                "cancelled by operator".into(),
            );
            if let Committed::Version(_) =
                self.commit(job_id, version, &state, &mut conflicts).await?
            {
                info!(job_id, "job cancelled");
                return Ok(JobSummary::from_state(&state));
            }
        }
    }

    /// Records a reviewer's decision for a candidate the workflow paused on.
    /// Approved candidates get outreach on the next `run`; rejected ones are
    /// skipped.
    pub async fn approve(
        &self,
        job_id: &str,
        candidate_id: &str,
        approved: bool,
    ) -> Result<JobSummary, OrchestratorError> {
        let mut conflicts = 0;
        loop {
            let Versioned {
                version,
                value: mut state,
            } = self.store.load(job_id).await?;
            if state.stage.is_terminal() {
                return Err(OrchestratorError::InvalidReview(format!(
                    "job {job_id} is already {}",
                    state.stage
                )));
            }
            if state.reviews.get(candidate_id) != Some(&Review::Pending) {
                return Err(OrchestratorError::InvalidReview(format!(
                    "candidate {candidate_id} is not awaiting review"
                )));
            }
            state.record_review(candidate_id, approved);
            if let Committed::Version(_) =
                self.commit(job_id, version, &state, &mut conflicts).await?
            {
                info!(job_id, candidate_id, approved, "review recorded");
                return Ok(JobSummary::from_state(&state));
            }
        }
    }

    /// Runs each job on its own task. Results come back in input order.
    pub async fn run_all(
        &self,
        job_ids: Vec<String>,
    ) -> Vec<(String, Result<JobSummary, OrchestratorError>)> {
        let mut set = JoinSet::new();
        for (index, job_id) in job_ids.iter().cloned().enumerate() {
            let this = self.clone();
            set.spawn(async move {
                let result = this.run(&job_id).await;
                (index, job_id, result)
            });
        }

        let mut results: Vec<Option<(String, Result<JobSummary, OrchestratorError>)>> =
            job_ids.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, job_id, result)) => results[index] = Some((job_id, result)),
                Err(e) => error!(error = %e, "job worker task failed"),
            }
        }

        results
            .into_iter()
            .zip(job_ids)
            .map(|(result, job_id)| {
                result.unwrap_or_else(|| {
                    let err = OrchestratorError::WorkerAborted {
                        job_id: job_id.clone(),
                    };
                    (job_id, Err(err))
                })
            })
            .collect()
    }

    /// Drives one job until it is `Completed` or `Failed`.
    pub async fn run(&self, job_id: &str) -> Result<JobSummary, OrchestratorError> {
        let _active = ActiveJob::claim(&self.active, job_id)?;
        let min_score = self.settings.engagement_min_score;
        let mut conflicts = 0;

        loop {
            let Versioned {
                version,
                value: mut state,
            } = self.store.load(job_id).await?;

            if state.stage.is_terminal() {
                info!(job_id, stage = %state.stage, "workflow finished");
                return Ok(JobSummary::from_state(&state));
            }

            let now = Utc::now();
            if let Some(lease) = &state.lease
                && lease.holder != self.worker_id
            {
                if lease.is_live(now) {
                    return Err(OrchestratorError::LeaseHeld {
                        job_id: job_id.to_string(),
                        holder: lease.holder.clone(),
                        until: lease.expires_at,
                    });
                }
                warn!(job_id, holder = %lease.holder, "reclaiming expired lease");
            }

            let Some(unit) = state.next_unit(min_score) else {
                let requested = self.reviews_to_request(&state);
                if !requested.is_empty() {
                    state.lease = None;
                    state.request_reviews(&requested);
                    if let Committed::Conflict =
                        self.commit(job_id, version, &state, &mut conflicts).await?
                    {
                        continue;
                    }
                    info!(job_id, candidates = requested.len(), "manual review requested");
                }
                if !state.pending_reviews().is_empty() {
                    info!(job_id, "workflow paused for manual review");
                    return Ok(JobSummary::from_state(&state));
                }

                // Nothing left in this stage, including stages with no work at all.
                state.lease = None;
                let transition = StateMachine::advance(
                    &mut state,
                    UnitOutcome::Success {
                        stage_complete: true,
                    },
                    &self.settings.retry,
                );
                if let Committed::Version(_) =
                    self.commit(job_id, version, &state, &mut conflicts).await?
                {
                    self.report_transition(job_id, transition);
                }
                continue;
            };

            state.lease = Some(Lease {
                holder: self.worker_id.clone(),
                unit: unit.clone(),
                acquired_at: now,
                expires_at: now
                    + chrono::Duration::from_std(self.settings.lease_ttl)
                        .unwrap_or_else(|_| chrono::Duration::hours(1)),
            });
            let version = match self.commit(job_id, version, &state, &mut conflicts).await? {
                Committed::Version(v) => v,
                Committed::Conflict => continue,
            };

            self.emit(JobEvent::Invoking {
                job_id: job_id.to_string(),
                unit: unit.clone(),
            });
            let (outcome, retry_after) = self.invoke(&mut state, &unit).await;

            state.lease = None;
            let transition = StateMachine::advance(&mut state, outcome, &self.settings.retry);
            if let Committed::Conflict = self.commit(job_id, version, &state, &mut conflicts).await? {
                // Cancelled or taken over while the agent ran; the result is dropped.
                continue;
            }

            if let Transition::Retry { attempt, .. } = &transition {
                let backoff = self
                    .gateway
                    .limiter()
                    .backoff_delay(attempt.saturating_sub(1));
                let delay = backoff.max(retry_after.unwrap_or_default());
                self.report_transition(job_id, transition.clone());
                debug!(job_id, delay_ms = delay.as_millis() as u64, "backing off");
                sleep(delay).await;
            } else {
                self.report_transition(job_id, transition);
            }
        }
    }

    /// Invokes the unit's agent and folds its result into `state`. Returns the
    /// outcome for the state machine and any retry-after hint from a provider.
    async fn invoke(
        &self,
        state: &mut WorkflowState,
        unit: &WorkUnit,
    ) -> (UnitOutcome, Option<Duration>) {
        let stage = unit.stage();
        let result = match (Agent::for_stage(stage), stage_input(state, unit)) {
            (Some(agent), Ok(input)) => {
                let mut ctx = AgentContext::new(&self.gateway, state.job.id.clone());
                let limit = self.settings.stage_timeout;
                let result = timeout(limit, agent.execute(&mut ctx, input))
                    .await
                    .unwrap_or(Err(AgentError::Timeout(limit)));

                state.usage.add(ctx.usage());
                for routing in ctx.degraded() {
                    state.degraded_routings += 1;
                    self.emit(JobEvent::Degraded {
                        job_id: state.job.id.clone(),
                        routing: routing.clone(),
                    });
                }
                result
            }
            (None, _) => Err(AgentError::InvalidInput(format!("no agent for stage {stage}"))),
            (_, Err(e)) => Err(e),
        };

        match result {
            Ok(output) => {
                apply_output(state, output);
                let stage_complete = state.next_unit(self.settings.engagement_min_score).is_none()
                    && self.reviews_to_request(state).is_empty()
                    && state.pending_reviews().is_empty();
                (UnitOutcome::Success { stage_complete }, None)
            }
            Err(err) => {
                let retry_after = match &err {
                    AgentError::Provider(e) => e.retry_after(),
                    _ => None,
                };
                warn!(
                    job_id = %state.job.id,
                    stage = %stage,
                    kind = %err.kind(),
                    error = %err,
                    "agent invocation failed"
                );
                (
                    UnitOutcome::Failure {
                        kind: err.kind(),
                        message: err.to_string(),
                    },
                    retry_after,
                )
            }
        }
    }

    /// Engagement candidates in the review band that nobody was asked about yet.
    fn reviews_to_request(&self, state: &WorkflowState) -> Vec<String> {
        match self.settings.review_min_score {
            Some(floor) if state.stage == Stage::Engagement => {
                state.unreviewed_between(floor, self.settings.engagement_min_score)
            }
            _ => Vec::new(),
        }
    }

    async fn commit(
        &self,
        job_id: &str,
        version: u64,
        state: &WorkflowState,
        conflicts: &mut u32,
    ) -> Result<Committed, OrchestratorError> {
        match self.store.commit(job_id, version, state).await {
            Ok(version) => Ok(Committed::Version(version)),
            Err(StoreError::Conflict { found, .. }) => {
                *conflicts += 1;
                debug!(job_id, expected = version, found, "version conflict, reloading");
                if *conflicts > self.settings.max_conflicts {
                    return Err(OrchestratorError::ConflictLimitExceeded(job_id.to_string()));
                }
                Ok(Committed::Conflict)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn report_transition(&self, job_id: &str, transition: Transition) {
        match &transition {
            Transition::Advance { from, to } => info!(job_id, %from, %to, "stage advanced"),
            Transition::Continue(stage) => debug!(job_id, %stage, "unit committed"),
            Transition::Retry { stage, attempt } => {
                warn!(job_id, %stage, attempt, "retrying stage")
            }
            Transition::Fail(failure) => error!(
                job_id,
                stage = %failure.stage,
                kind = %failure.kind,
                error = %failure.message,
                "workflow failed"
            ),
            Transition::Halted(_) => {}
        }
        self.emit(JobEvent::Transitioned {
            job_id: job_id.to_string(),
            transition,
        });
    }

    fn emit(&self, event: JobEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }
}

fn stage_input(state: &WorkflowState, unit: &WorkUnit) -> Result<StageInput, AgentError> {
    let job = state.job.clone();
    let candidate = |id: &str| -> Result<Candidate, AgentError> {
        state
            .candidate(id)
            .cloned()
            .ok_or_else(|| AgentError::InvalidInput(format!("unknown candidate {id}")))
    };
    Ok(match unit {
        WorkUnit::Source => StageInput::Sourcing { job },
        WorkUnit::Screen(id) => StageInput::Screening {
            job,
            candidate: candidate(id)?,
        },
        WorkUnit::Assess(id) => StageInput::Assessment {
            job,
            candidate: candidate(id)?,
        },
        WorkUnit::Engage(id) => {
            let snapshot = state
                .latest_snapshot(id)
                .cloned()
                .ok_or_else(|| AgentError::InvalidInput(format!("candidate {id} has no score")))?;
            StageInput::Engagement {
                job,
                candidate: candidate(id)?,
                snapshot,
            }
        }
    })
}

fn apply_output(state: &mut WorkflowState, output: StageOutput) {
    match output {
        StageOutput::Sourced { references } => {
            let candidates = references.iter().map(Candidate::from_reference).collect();
            state.record_sourced(candidates);
        }
        StageOutput::Screened {
            candidate_id,
            attributes,
            qualifies,
        } => state.record_screening(&candidate_id, attributes, qualifies),
        StageOutput::Assessed { snapshot } => state.record_snapshot(snapshot),
        StageOutput::Drafted { draft } => state.record_draft(draft),
    }
}
