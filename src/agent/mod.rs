//! Stage agents.
//!
//! One [`Agent`] variant per pipeline stage, all behind the same
//! `execute(ctx, input)` contract. Agents hold no state: the job, candidate
//! and snapshot they work on arrive in the [`StageInput`], and model access
//! goes through the [`AgentContext`].

mod assessment;
mod engagement;
mod screening;
mod sourcing;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::AgentError;
use crate::gateway::ModelGateway;
use crate::provider::{CompletionRequest, FinishReason, PromptPayload, Usage};
use crate::router::DegradedRouting;
use crate::workflow::{
    Candidate, CandidateAttributes, CandidateReference, Job, OutreachDraft, ScoreSnapshot, Stage,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Agent {
    Sourcing,
    Screening,
    Assessment,
    Engagement,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageInput {
    Sourcing {
        job: Job,
    },
    Screening {
        job: Job,
        candidate: Candidate,
    },
    Assessment {
        job: Job,
        candidate: Candidate,
    },
    Engagement {
        job: Job,
        candidate: Candidate,
        snapshot: ScoreSnapshot,
    },
}

impl StageInput {
    pub fn stage(&self) -> Stage {
        match self {
            StageInput::Sourcing { .. } => Stage::Sourcing,
            StageInput::Screening { .. } => Stage::Screening,
            StageInput::Assessment { .. } => Stage::Assessment,
            StageInput::Engagement { .. } => Stage::Engagement,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageOutput {
    Sourced {
        references: Vec<CandidateReference>,
    },
    Screened {
        candidate_id: String,
        attributes: CandidateAttributes,
        qualifies: bool,
    },
    Assessed {
        snapshot: ScoreSnapshot,
    },
    Drafted {
        draft: OutreachDraft,
    },
}

/// Per-invocation access to the model gateway. Collects token usage and
/// degraded-routing signals for the caller to fold into the workflow state.
pub struct AgentContext<'a> {
    gateway: &'a ModelGateway,
    job_id: String,
    usage: Usage,
    degraded: Vec<DegradedRouting>,
}

impl<'a> AgentContext<'a> {
    pub fn new(gateway: &'a ModelGateway, job_id: impl Into<String>) -> Self {
        Self {
            gateway,
            job_id: job_id.into(),
            usage: Usage::default(),
            degraded: Vec::new(),
        }
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn degraded(&self) -> &[DegradedRouting] {
        &self.degraded
    }

    /// Sends one model request for `stage` and parses the JSON reply.
    async fn ask<T: DeserializeOwned>(
        &mut self,
        stage: Stage,
        instructions: &str,
        context: serde_json::Value,
        params: ModelParams,
    ) -> Result<T, AgentError> {
        let task_class = stage
            .task_class()
            .ok_or_else(|| AgentError::InvalidInput(format!("no agent work in stage {stage}")))?;
        let request = CompletionRequest {
            task_class,
            prompt_payload: PromptPayload {
                job_id: self.job_id.clone(),
                stage,
                instructions: instructions.to_string(),
                context,
            },
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };

        let reply = self.gateway.complete(&request).await?;
        self.usage.add(reply.response.usage);
        if let Some(degraded) = reply.degraded {
            self.degraded.push(degraded);
        }
        debug!(
            job_id = %self.job_id,
            stage = %stage,
            provider = %reply.handle,
            output_tokens = reply.response.usage.output_tokens,
            "model replied"
        );

        match reply.response.finish_reason {
            FinishReason::ContentFilter => Err(AgentError::PolicyRejection(format!(
                "{} declined the {stage} request",
                reply.handle
            ))),
            _ => parse_reply(&reply.response.content),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ModelParams {
    max_tokens: u32,
    temperature: f32,
}

/// Models sometimes wrap JSON in a markdown fence.
fn json_body(text: &str) -> &str {
    let text = text.trim();
    let text = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    text.strip_suffix("```").unwrap_or(text).trim()
}

fn parse_reply<T: DeserializeOwned>(content: &str) -> Result<T, AgentError> {
    serde_json::from_str(json_body(content))
        .map_err(|e| AgentError::MalformedOutput(format!("{e}")))
}

impl Agent {
    /// The agent responsible for a stage; `None` for terminal stages.
    pub fn for_stage(stage: Stage) -> Option<Agent> {
        match stage {
            Stage::Sourcing => Some(Agent::Sourcing),
            Stage::Screening => Some(Agent::Screening),
            Stage::Assessment => Some(Agent::Assessment),
            Stage::Engagement => Some(Agent::Engagement),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn stage(self) -> Stage {
        match self {
            Agent::Sourcing => Stage::Sourcing,
            Agent::Screening => Stage::Screening,
            Agent::Assessment => Stage::Assessment,
            Agent::Engagement => Stage::Engagement,
        }
    }

    pub async fn execute(
        &self,
        ctx: &mut AgentContext<'_>,
        input: StageInput,
    ) -> Result<StageOutput, AgentError> {
        match (self, input) {
            (Agent::Sourcing, StageInput::Sourcing { job }) => sourcing::run(ctx, &job).await,
            (Agent::Screening, StageInput::Screening { job, candidate }) => {
                screening::run(ctx, &job, &candidate).await
            }
            (Agent::Assessment, StageInput::Assessment { job, candidate }) => {
                assessment::run(ctx, &job, &candidate).await
            }
            (
                Agent::Engagement,
                StageInput::Engagement {
                    job,
                    candidate,
                    snapshot,
                },
            ) => engagement::run(ctx, &job, &candidate, &snapshot).await,
            (agent, input) => Err(AgentError::InvalidInput(format!(
                "{agent} agent cannot take {} input",
                input.stage()
            ))),
        }
    }
}

impl fmt::Display for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Agent::Sourcing => write!(f, "sourcing"),
            Agent::Screening => write!(f, "screening"),
            Agent::Assessment => write!(f, "assessment"),
            Agent::Engagement => write!(f, "engagement"),
        }
    }
}
