use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{AgentContext, ModelParams, StageOutput};
use crate::error::AgentError;
use crate::workflow::{Candidate, Job, ScoreSnapshot, Stage};

const INSTRUCTIONS: &str = "Score how well the candidate fits the job from 0 to 100 and list \
the reasons for the score, strongest first. Respond with ONLY valid JSON, no other text.\n\
Format: {\"score\": <0-100>, \"reasons\": [\"<reason>\"]}";

const PARAMS: ModelParams = ModelParams {
    max_tokens: 1024,
    temperature: 0.0,
};

#[derive(Deserialize)]
struct AssessmentReply {
    score: f64,
    #[serde(default)]
    reasons: Vec<String>,
}

pub(super) async fn run(
    ctx: &mut AgentContext<'_>,
    job: &Job,
    candidate: &Candidate,
) -> Result<StageOutput, AgentError> {
    let Some(attributes) = &candidate.attributes else {
        return Err(AgentError::InvalidInput(format!(
            "candidate {} has not been screened",
            candidate.id
        )));
    };

    let context = json!({
        "job": {
            "title": job.title,
            "requirements": job.requirements,
            "nice_to_have": job.nice_to_have,
            "location": job.location,
        },
        "candidate": {
            "name": candidate.name(),
            "attributes": attributes,
            "profile_text": candidate.raw_text,
        },
    });
    let reply: AssessmentReply = ctx.ask(Stage::Assessment, INSTRUCTIONS, context, PARAMS).await?;

    if !(0.0..=100.0).contains(&reply.score) {
        return Err(AgentError::MalformedOutput(format!(
            "score {} is outside 0..=100",
            reply.score
        )));
    }

    Ok(StageOutput::Assessed {
        snapshot: ScoreSnapshot {
            candidate_id: candidate.id.clone(),
            job_id: job.id.clone(),
            score: reply.score,
            reasons: reply.reasons,
            stage: Stage::Assessment,
            created_at: Utc::now(),
        },
    })
}
