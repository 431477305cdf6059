use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::json;

use super::{AgentContext, ModelParams, StageOutput};
use crate::error::AgentError;
use crate::workflow::{Candidate, CandidateAttributes, Job, Stage};

const INSTRUCTIONS: &str = "Extract the candidate's details from the profile text and decide \
whether they meet the job requirements. Respond with ONLY valid JSON, no other text.\n\
Format: {\"name\": \"<name>\", \"years_experience\": <integer>, \"skills\": [\"<skill>\"], \
\"qualifies\": <true|false>}";

const PARAMS: ModelParams = ModelParams {
    max_tokens: 1024,
    temperature: 0.0,
};

#[derive(Deserialize)]
struct ScreeningReply {
    #[serde(default)]
    name: String,
    years_experience: u32,
    #[serde(default)]
    skills: Vec<String>,
    qualifies: bool,
}

pub(super) async fn run(
    ctx: &mut AgentContext<'_>,
    job: &Job,
    candidate: &Candidate,
) -> Result<StageOutput, AgentError> {
    if candidate.raw_text.trim().is_empty() {
        return Err(AgentError::InvalidInput(format!(
            "candidate {} has no profile text",
            candidate.id
        )));
    }

    let context = json!({
        "raw_text": candidate.raw_text,
        "requirements": job.requirements,
        "nice_to_have": job.nice_to_have,
    });
    let reply: ScreeningReply = ctx.ask(Stage::Screening, INSTRUCTIONS, context, PARAMS).await?;

    let name = match reply.name.trim() {
        "" => candidate.name().to_string(),
        name => name.to_string(),
    };
    let skills: BTreeSet<String> = reply
        .skills
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    Ok(StageOutput::Screened {
        candidate_id: candidate.id.clone(),
        attributes: CandidateAttributes {
            name,
            years_experience: reply.years_experience,
            skills,
        },
        qualifies: reply.qualifies,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, StageInput};
    use crate::provider::ScriptedBackend;
    use crate::testing::{scripted_gateway, test_candidate, test_job};

    #[tokio::test]
    async fn extracts_attributes_and_verdict() {
        let gateway = scripted_gateway(ScriptedBackend::demo());
        let mut ctx = AgentContext::new(&gateway, "J1");
        let candidate = test_candidate("Ada Park. 7 years experience. Skills: Python, SQL");
        let output = Agent::Screening
            .execute(
                &mut ctx,
                StageInput::Screening {
                    job: test_job(),
                    candidate: candidate.clone(),
                },
            )
            .await
            .unwrap();

        let StageOutput::Screened {
            candidate_id,
            attributes,
            qualifies,
        } = output
        else {
            panic!("expected screened output");
        };
        assert_eq!(candidate_id, candidate.id);
        assert_eq!(attributes.name, "Ada Park");
        assert_eq!(attributes.years_experience, 7);
        assert!(attributes.skills.contains("Python"));
        assert!(qualifies);
    }

    #[tokio::test]
    async fn missing_name_falls_back_to_listing_name() {
        let gateway = scripted_gateway(ScriptedBackend::fixed(
            r#"{"years_experience": 2, "skills": [" Go ", ""], "qualifies": false}"#,
        ));
        let mut ctx = AgentContext::new(&gateway, "J1");
        let candidate = test_candidate("profile");
        let output = Agent::Screening
            .execute(
                &mut ctx,
                StageInput::Screening {
                    job: test_job(),
                    candidate,
                },
            )
            .await
            .unwrap();
        let StageOutput::Screened { attributes, .. } = output else {
            panic!("expected screened output");
        };
        assert_eq!(attributes.name, "Test Candidate");
        assert_eq!(attributes.skills, BTreeSet::from(["Go".to_string()]));
    }

    #[tokio::test]
    async fn empty_profile_is_invalid() {
        let gateway = scripted_gateway(ScriptedBackend::demo());
        let mut ctx = AgentContext::new(&gateway, "J1");
        let err = Agent::Screening
            .execute(
                &mut ctx,
                StageInput::Screening {
                    job: test_job(),
                    candidate: test_candidate(""),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn missing_verdict_is_malformed() {
        let gateway = scripted_gateway(ScriptedBackend::fixed(r#"{"name":"X","years_experience":1}"#));
        let mut ctx = AgentContext::new(&gateway, "J1");
        let err = Agent::Screening
            .execute(
                &mut ctx,
                StageInput::Screening {
                    job: test_job(),
                    candidate: test_candidate("X"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::MalformedOutput(_)));
    }
}
