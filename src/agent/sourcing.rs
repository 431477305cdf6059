use serde::Deserialize;
use serde_json::json;

use super::{AgentContext, ModelParams, StageOutput};
use crate::error::AgentError;
use crate::workflow::{CandidateReference, Job, Stage};

const INSTRUCTIONS: &str = "Find prospective candidates for the job described in the context. \
Respond with ONLY valid JSON, no other text.\n\
Format: {\"candidates\": [{\"source_platform\": \"<platform>\", \"listing_id\": \"<id>\", \
\"display_name\": \"<name>\", \"profile_text\": \"<profile summary>\", \"contact\": \"<email or null>\"}]}";

const PARAMS: ModelParams = ModelParams {
    max_tokens: 4096,
    temperature: 0.7,
};

#[derive(Deserialize)]
struct SourcingReply {
    candidates: Vec<CandidateReference>,
}

pub(super) async fn run(ctx: &mut AgentContext<'_>, job: &Job) -> Result<StageOutput, AgentError> {
    if job.requirements.iter().all(|r| r.trim().is_empty()) {
        return Err(AgentError::InvalidInput(format!(
            "job {} has no requirements to source against",
            job.id
        )));
    }

    let context = json!({
        "title": job.title,
        "requirements": job.requirements,
        "nice_to_have": job.nice_to_have,
        "location": job.location,
    });
    let reply: SourcingReply = ctx.ask(Stage::Sourcing, INSTRUCTIONS, context, PARAMS).await?;

    if let Some(bad) = reply
        .candidates
        .iter()
        .find(|c| c.listing_id.trim().is_empty() || c.profile_text.trim().is_empty())
    {
        return Err(AgentError::MalformedOutput(format!(
            "candidate reference from {} is missing a listing id or profile text",
            bad.source_platform
        )));
    }

    Ok(StageOutput::Sourced {
        references: reply.candidates,
    })
}
