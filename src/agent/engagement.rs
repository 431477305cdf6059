use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use super::{AgentContext, ModelParams, StageOutput};
use crate::error::AgentError;
use crate::workflow::{Candidate, Job, OutreachDraft, ScoreSnapshot, Stage};

const INSTRUCTIONS: &str = "Write a short, personal outreach message inviting the candidate to \
discuss the job. Mention why their background fits. Respond with ONLY valid JSON, no other \
text.\nFormat: {\"subject\": \"<subject line>\", \"body\": \"<message body>\"}";

const PARAMS: ModelParams = ModelParams {
    max_tokens: 1024,
    temperature: 0.7,
};

#[derive(Deserialize)]
struct EngagementReply {
    subject: String,
    body: String,
}

pub(super) async fn run(
    ctx: &mut AgentContext<'_>,
    job: &Job,
    candidate: &Candidate,
    snapshot: &ScoreSnapshot,
) -> Result<StageOutput, AgentError> {
    let Some(recipient) = candidate.contact() else {
        return Err(AgentError::InvalidInput(format!(
            "candidate {} has no contact",
            candidate.id
        )));
    };
    if snapshot.candidate_id != candidate.id {
        return Err(AgentError::InvalidInput(format!(
            "snapshot belongs to candidate {}, not {}",
            snapshot.candidate_id, candidate.id
        )));
    }

    let context = json!({
        "candidate_name": candidate.name(),
        "job_title": job.title,
        "location": job.location,
        "score": snapshot.score,
        "reasons": snapshot.reasons,
    });
    let reply: EngagementReply = ctx.ask(Stage::Engagement, INSTRUCTIONS, context, PARAMS).await?;

    if reply.body.trim().is_empty() {
        return Err(AgentError::MalformedOutput("outreach body is empty".into()));
    }

    Ok(StageOutput::Drafted {
        draft: OutreachDraft {
            candidate_id: candidate.id.clone(),
            job_id: job.id.clone(),
            recipient: recipient.to_string(),
            subject: reply.subject.trim().to_string(),
            body: reply.body,
            created_at: Utc::now(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, StageInput};
    use crate::provider::ScriptedBackend;
    use crate::testing::{scripted_gateway, test_candidate, test_job};

    fn snapshot_for(candidate: &Candidate) -> ScoreSnapshot {
        ScoreSnapshot {
            candidate_id: candidate.id.clone(),
            job_id: "J1".into(),
            score: 88.0,
            reasons: vec!["matches: Python".into()],
            stage: Stage::Assessment,
            created_at: Utc::now(),
        }
    }

    async fn engage(
        backend: ScriptedBackend,
        candidate: Candidate,
        snapshot: ScoreSnapshot,
    ) -> Result<StageOutput, AgentError> {
        let gateway = scripted_gateway(backend);
        let mut ctx = AgentContext::new(&gateway, "J1");
        Agent::Engagement
            .execute(
                &mut ctx,
                StageInput::Engagement {
                    job: test_job(),
                    candidate,
                    snapshot,
                },
            )
            .await
    }

    #[tokio::test]
    async fn drafts_outreach_to_contact() {
        let candidate = test_candidate("profile");
        let snapshot = snapshot_for(&candidate);
        let output = engage(ScriptedBackend::demo(), candidate.clone(), snapshot)
            .await
            .unwrap();
        let StageOutput::Drafted { draft } = output else {
            panic!("expected drafted output");
        };
        assert_eq!(draft.candidate_id, candidate.id);
        assert_eq!(draft.recipient, "test@example.com");
        assert_eq!(draft.subject, "Opportunity: Backend Engineer");
        assert!(draft.body.contains("Test Candidate"));
    }

    #[tokio::test]
    async fn candidate_without_contact_is_invalid() {
        let mut candidate = test_candidate("profile");
        candidate.contact = None;
        let snapshot = snapshot_for(&candidate);
        let err = engage(ScriptedBackend::demo(), candidate, snapshot)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn empty_body_is_malformed() {
        let candidate = test_candidate("profile");
        let snapshot = snapshot_for(&candidate);
        let err = engage(
            ScriptedBackend::fixed(r#"{"subject":"hi","body":"  "}"#),
            candidate,
            snapshot,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }
}
