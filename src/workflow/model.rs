use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::Stage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compensation {
    pub min: u64,
    pub max: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// A position to fill. Frozen into the workflow state once sourcing starts;
/// edits go through [`Job::revise`], which creates a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(default = "new_id")]
    pub id: String,
    #[serde(default = "first_version")]
    pub version: u32,
    #[serde(default)]
    pub supersedes: Option<String>,
    pub title: String,
    pub requirements: Vec<String>,
    #[serde(default)]
    pub nice_to_have: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub compensation: Option<Compensation>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn first_version() -> u32 {
    1
}

impl Job {
    pub fn new(title: impl Into<String>, requirements: Vec<String>) -> Self {
        Self {
            id: new_id(),
            version: 1,
            supersedes: None,
            title: title.into(),
            requirements,
            nice_to_have: Vec::new(),
            location: None,
            compensation: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Rejects jobs the pipeline cannot work on.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("job id must not be empty".into());
        }
        if self.requirements.iter().all(|r| r.trim().is_empty()) {
            return Err("job must list at least one requirement".into());
        }
        if let Some(comp) = &self.compensation
            && comp.min > comp.max
        {
            return Err(format!(
                "compensation minimum {} exceeds maximum {}",
                comp.min, comp.max
            ));
        }
        Ok(())
    }

    /// Returns an edited copy as a new version with its own id.
    pub fn revise(&self, edit: impl FnOnce(&mut Job)) -> Job {
        let mut next = self.clone();
        edit(&mut next);
        next.id = new_id();
        next.version = self.version + 1;
        next.supersedes = Some(self.id.clone());
        next.created_at = Utc::now();
        next
    }
}

/// Sourcing output: where a prospective candidate was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReference {
    pub source_platform: String,
    pub listing_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub profile_text: String,
    #[serde(default)]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateAttributes {
    pub name: String,
    pub years_experience: u32,
    pub skills: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    /// `platform:listing_id` of the profile this candidate was sourced from.
    pub profile_ref: String,
    pub display_name: Option<String>,
    pub raw_text: String,
    pub contact: Option<String>,
    pub attributes: Option<CandidateAttributes>,
    pub sourced_at: DateTime<Utc>,
}

impl Candidate {
    pub fn from_reference(reference: &CandidateReference) -> Self {
        Self {
            id: new_id(),
            profile_ref: format!("{}:{}", reference.source_platform, reference.listing_id),
            display_name: reference.display_name.clone(),
            raw_text: reference.profile_text.clone(),
            contact: reference
                .contact
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            attributes: None,
            sourced_at: Utc::now(),
        }
    }

    /// Usable contact address. Blank strings count as no contact.
    pub fn contact(&self) -> Option<&str> {
        self.contact
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Best known name: screened attributes first, then the listing's.
    pub fn name(&self) -> &str {
        self.attributes
            .as_ref()
            .map(|a| a.name.as_str())
            .or(self.display_name.as_deref())
            .unwrap_or("candidate")
    }
}

/// Immutable scored result for one job/candidate pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSnapshot {
    pub candidate_id: String,
    pub job_id: String,
    pub score: f64,
    pub reasons: Vec<String>,
    pub stage: Stage,
    pub created_at: DateTime<Utc>,
}

/// Engagement output. Drafted only; sending belongs to an outside mailer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutreachDraft {
    pub candidate_id: String,
    pub job_id: String,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_defaults_and_validation() {
        let job = Job::new("Backend Engineer", vec!["5+ years Python".into()]);
        assert_eq!(job.version, 1);
        assert!(job.supersedes.is_none());
        assert!(job.validate().is_ok());

        let empty = Job::new("Nothing", vec!["  ".into()]);
        assert!(empty.validate().is_err());

        let mut inverted = Job::new("Pay", vec!["Rust".into()]);
        inverted.compensation = Some(Compensation {
            min: 200,
            max: 100,
            currency: "USD".into(),
        });
        assert!(inverted.validate().unwrap_err().contains("exceeds"));
    }

    #[test]
    fn revise_creates_new_version() {
        let job = Job::new("Backend Engineer", vec!["Python".into()]).with_id("J1");
        let next = job.revise(|j| j.requirements.push("Kubernetes".into()));

        assert_ne!(next.id, "J1");
        assert_eq!(next.version, 2);
        assert_eq!(next.supersedes.as_deref(), Some("J1"));
        assert_eq!(next.requirements.len(), 2);
        assert_eq!(job.requirements.len(), 1);
    }

    #[test]
    fn job_deserializes_from_minimal_toml() {
        let job: Job = toml::from_str(
            r#"
            title = "Data Engineer"
            requirements = ["5+ years Python", "Airflow"]
            location = "Remote"

            [compensation]
            min = 120000
            max = 150000
            "#,
        )
        .unwrap();
        assert_eq!(job.version, 1);
        assert!(!job.id.is_empty());
        assert_eq!(job.compensation.unwrap().currency, "USD");
    }

    #[test]
    fn candidate_from_reference_keeps_provenance() {
        let reference = CandidateReference {
            source_platform: "linkedin".into(),
            listing_id: "li-1001".into(),
            display_name: Some("Ada Park".into()),
            profile_text: "Ada Park. 7 years Python".into(),
            contact: Some("ada@example.com".into()),
        };
        let candidate = Candidate::from_reference(&reference);
        assert_eq!(candidate.profile_ref, "linkedin:li-1001");
        assert_eq!(candidate.name(), "Ada Park");
        assert!(candidate.attributes.is_none());
    }

    #[test]
    fn blank_contact_is_treated_as_missing() {
        let mut reference = CandidateReference {
            source_platform: "web".into(),
            listing_id: "w-1".into(),
            display_name: None,
            profile_text: "Bo".into(),
            contact: Some("   ".into()),
        };
        assert_eq!(Candidate::from_reference(&reference).contact, None);

        reference.contact = Some("  bo@example.com ".into());
        let candidate = Candidate::from_reference(&reference);
        assert_eq!(candidate.contact(), Some("bo@example.com"));

        // Older state documents may still carry an empty string.
        let legacy = Candidate {
            contact: Some(String::new()),
            ..candidate
        };
        assert_eq!(legacy.contact(), None);
    }
}
