use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{Candidate, CandidateAttributes, Job, OutreachDraft, ScoreSnapshot};
use super::stage::Stage;
use crate::error::FailureKind;
use crate::provider::Usage;

/// Error recorded on the workflow for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl StageFailure {
    pub fn new(stage: Stage, kind: FailureKind, message: String) -> Self {
        Self {
            stage,
            kind,
            message,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEntry {
    pub stage: Stage,
    pub entered_at: DateTime<Utc>,
}

/// Claim on a job's next agent invocation. Committed before the invocation
/// starts so that two workers cannot run the same job at once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub holder: String,
    pub unit: WorkUnit,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Reviewer decision for a candidate scored below the engagement bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Review {
    Pending,
    Approved,
    Rejected,
}

/// One agent invocation's worth of work within a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "candidate_id", rename_all = "snake_case")]
pub enum WorkUnit {
    Source,
    Screen(String),
    Assess(String),
    Engage(String),
}

impl WorkUnit {
    pub fn stage(&self) -> Stage {
        match self {
            WorkUnit::Source => Stage::Sourcing,
            WorkUnit::Screen(_) => Stage::Screening,
            WorkUnit::Assess(_) => Stage::Assessment,
            WorkUnit::Engage(_) => Stage::Engagement,
        }
    }

    pub fn candidate_id(&self) -> Option<&str> {
        match self {
            WorkUnit::Source => None,
            WorkUnit::Screen(id) | WorkUnit::Assess(id) | WorkUnit::Engage(id) => Some(id),
        }
    }
}

/// Durable progress of one job through the pipeline. Owned by the
/// orchestrator and only changed through [`StateMachine`](super::StateMachine)
/// transitions and the `record_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub job: Job,
    pub stage: Stage,
    #[serde(default)]
    pub attempts: BTreeMap<Stage, u32>,
    #[serde(default)]
    pub last_error: Option<StageFailure>,
    #[serde(default)]
    pub history: Vec<StageEntry>,
    #[serde(default)]
    pub sourced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    /// Screening verdicts by candidate id.
    #[serde(default)]
    pub verdicts: BTreeMap<String, bool>,
    /// Append-only; a re-assessment adds a snapshot, it never replaces one.
    #[serde(default)]
    pub snapshots: Vec<ScoreSnapshot>,
    #[serde(default)]
    pub drafts: Vec<OutreachDraft>,
    /// Manual review status by candidate id. Engagement waits while any
    /// entry is `Pending`.
    #[serde(default)]
    pub reviews: BTreeMap<String, Review>,
    #[serde(default)]
    pub lease: Option<Lease>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub degraded_routings: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(job: Job) -> Self {
        let now = Utc::now();
        Self {
            job,
            stage: Stage::Sourcing,
            attempts: BTreeMap::new(),
            last_error: None,
            history: vec![StageEntry {
                stage: Stage::Sourcing,
                entered_at: now,
            }],
            sourced_at: None,
            candidates: Vec::new(),
            verdicts: BTreeMap::new(),
            snapshots: Vec::new(),
            drafts: Vec::new(),
            reviews: BTreeMap::new(),
            lease: None,
            usage: Usage::default(),
            degraded_routings: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(super) fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.history.push(StageEntry {
            stage,
            entered_at: Utc::now(),
        });
    }

    pub fn attempts_in(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    /// Stages in the order they were entered.
    pub fn stage_log(&self) -> Vec<Stage> {
        self.history.iter().map(|e| e.stage).collect()
    }

    pub fn candidate(&self, id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == id)
    }

    /// Most recent snapshot for a candidate.
    pub fn latest_snapshot(&self, candidate_id: &str) -> Option<&ScoreSnapshot> {
        self.snapshots
            .iter()
            .rev()
            .find(|s| s.candidate_id == candidate_id && s.job_id == self.job.id)
    }

    /// The next unit of work in the current stage, or `None` when the stage
    /// has nothing left to do.
    pub fn next_unit(&self, min_engagement_score: f64) -> Option<WorkUnit> {
        match self.stage {
            Stage::Sourcing => self.sourced_at.is_none().then_some(WorkUnit::Source),
            Stage::Screening => self
                .candidates
                .iter()
                .find(|c| !self.verdicts.contains_key(&c.id))
                .map(|c| WorkUnit::Screen(c.id.clone())),
            Stage::Assessment => self
                .candidates
                .iter()
                .filter(|c| self.verdicts.get(&c.id).copied().unwrap_or(false))
                .find(|c| self.latest_snapshot(&c.id).is_none())
                .map(|c| WorkUnit::Assess(c.id.clone())),
            Stage::Engagement => self
                .candidates
                .iter()
                .filter(|c| c.contact().is_some())
                .filter(|c| !self.drafts.iter().any(|d| d.candidate_id == c.id))
                .find(|c| {
                    self.reviews.get(&c.id) == Some(&Review::Approved)
                        || self
                            .latest_snapshot(&c.id)
                            .is_some_and(|s| s.score >= min_engagement_score)
                })
                .map(|c| WorkUnit::Engage(c.id.clone())),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn record_sourced(&mut self, candidates: Vec<Candidate>) {
        self.candidates.extend(candidates);
        self.sourced_at = Some(Utc::now());
    }

    pub fn record_screening(
        &mut self,
        candidate_id: &str,
        attributes: CandidateAttributes,
        qualifies: bool,
    ) {
        if let Some(candidate) = self.candidates.iter_mut().find(|c| c.id == candidate_id) {
            candidate.attributes = Some(attributes);
        }
        self.verdicts.insert(candidate_id.to_string(), qualifies);
    }

    pub fn record_snapshot(&mut self, snapshot: ScoreSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn record_draft(&mut self, draft: OutreachDraft) {
        self.drafts.push(draft);
    }

    /// Contactable candidates without a draft or review whose latest score
    /// lies in `[review_min_score, min_engagement_score)`.
    pub fn unreviewed_between(
        &self,
        review_min_score: f64,
        min_engagement_score: f64,
    ) -> Vec<String> {
        self.candidates
            .iter()
            .filter(|c| c.contact().is_some())
            .filter(|c| !self.reviews.contains_key(&c.id))
            .filter(|c| !self.drafts.iter().any(|d| d.candidate_id == c.id))
            .filter(|c| {
                self.latest_snapshot(&c.id).is_some_and(|s| {
                    s.score >= review_min_score && s.score < min_engagement_score
                })
            })
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn request_reviews(&mut self, candidate_ids: &[String]) {
        for id in candidate_ids {
            self.reviews.insert(id.clone(), Review::Pending);
        }
    }

    pub fn pending_reviews(&self) -> Vec<String> {
        self.reviews
            .iter()
            .filter(|(_, review)| **review == Review::Pending)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn record_review(&mut self, candidate_id: &str, approved: bool) {
        let review = if approved {
            Review::Approved
        } else {
            Review::Rejected
        };
        self.reviews.insert(candidate_id.to_string(), review);
    }
}

/// Operator-facing view of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub title: String,
    pub stage: Stage,
    pub sourced: usize,
    pub qualified: usize,
    pub assessed: usize,
    pub drafted: usize,
    pub attempts: u32,
    pub last_error: Option<StageFailure>,
    /// Latest snapshot per candidate, best score first.
    pub ranked: Vec<RankedCandidate>,
    pub usage: Usage,
    pub degraded_routings: u32,
    pub stage_log: Vec<Stage>,
    /// Candidates waiting for a reviewer's decision.
    #[serde(default)]
    pub awaiting_review: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub candidate_id: String,
    pub name: String,
    pub score: f64,
    pub reasons: Vec<String>,
}

impl JobSummary {
    pub fn from_state(state: &WorkflowState) -> Self {
        let mut latest: HashMap<&str, &ScoreSnapshot> = HashMap::new();
        for snapshot in state.snapshots.iter().filter(|s| s.job_id == state.job.id) {
            latest.insert(snapshot.candidate_id.as_str(), snapshot);
        }

        let mut ranked: Vec<RankedCandidate> = latest
            .values()
            .map(|s| RankedCandidate {
                candidate_id: s.candidate_id.clone(),
                name: state
                    .candidate(&s.candidate_id)
                    .map(|c| c.name().to_string())
                    .unwrap_or_default(),
                score: s.score,
                reasons: s.reasons.clone(),
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate_id.cmp(&b.candidate_id))
        });

        let attempts_stage = state
            .last_error
            .as_ref()
            .map(|e| e.stage)
            .filter(|_| state.stage == Stage::Failed)
            .unwrap_or(state.stage);

        Self {
            job_id: state.job.id.clone(),
            title: state.job.title.clone(),
            stage: state.stage,
            sourced: state.candidates.len(),
            qualified: state.verdicts.values().filter(|q| **q).count(),
            assessed: latest.len(),
            drafted: state.drafts.len(),
            attempts: state.attempts_in(attempts_stage),
            last_error: state.last_error.clone(),
            ranked,
            usage: state.usage,
            degraded_routings: state.degraded_routings,
            stage_log: state.stage_log(),
            awaiting_review: state.pending_reviews(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::workflow::CandidateReference;

    fn candidate(listing: &str, contact: Option<&str>) -> Candidate {
        Candidate::from_reference(&CandidateReference {
            source_platform: "linkedin".into(),
            listing_id: listing.into(),
            display_name: Some(listing.to_uppercase()),
            profile_text: format!("{listing} profile"),
            contact: contact.map(str::to_string),
        })
    }

    fn attrs(name: &str) -> CandidateAttributes {
        CandidateAttributes {
            name: name.into(),
            years_experience: 6,
            skills: BTreeSet::from(["Python".to_string()]),
        }
    }

    fn snapshot(state: &WorkflowState, candidate_id: &str, score: f64) -> ScoreSnapshot {
        ScoreSnapshot {
            candidate_id: candidate_id.into(),
            job_id: state.job.id.clone(),
            score,
            reasons: vec!["fit".into()],
            stage: Stage::Assessment,
            created_at: Utc::now(),
        }
    }

    fn new_state() -> WorkflowState {
        WorkflowState::new(Job::new("Engineer", vec!["Python".into()]).with_id("J1"))
    }

    #[test]
    fn new_state_starts_in_sourcing() {
        let state = new_state();
        assert_eq!(state.stage, Stage::Sourcing);
        assert_eq!(state.stage_log(), vec![Stage::Sourcing]);
        assert_eq!(state.next_unit(70.0), Some(WorkUnit::Source));
    }

    #[test]
    fn units_follow_stage_progress() {
        let mut state = new_state();
        let a = candidate("a", Some("a@example.com"));
        let b = candidate("b", None);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        state.record_sourced(vec![a, b]);
        assert_eq!(state.next_unit(70.0), None);

        state.enter(Stage::Screening);
        assert_eq!(state.next_unit(70.0), Some(WorkUnit::Screen(a_id.clone())));
        state.record_screening(&a_id, attrs("Ada"), true);
        assert_eq!(state.next_unit(70.0), Some(WorkUnit::Screen(b_id.clone())));
        state.record_screening(&b_id, attrs("Bo"), true);
        assert_eq!(state.next_unit(70.0), None);
        assert_eq!(state.candidate(&a_id).unwrap().name(), "Ada");

        state.enter(Stage::Assessment);
        assert_eq!(state.next_unit(70.0), Some(WorkUnit::Assess(a_id.clone())));
        let snap = snapshot(&state, &a_id, 85.0);
        state.record_snapshot(snap);
        let snap = snapshot(&state, &b_id, 90.0);
        state.record_snapshot(snap);
        assert_eq!(state.next_unit(70.0), None);

        // b has no contact, so only a gets outreach.
        state.enter(Stage::Engagement);
        assert_eq!(state.next_unit(70.0), Some(WorkUnit::Engage(a_id.clone())));
        state.record_draft(OutreachDraft {
            candidate_id: a_id.clone(),
            job_id: "J1".into(),
            recipient: "a@example.com".into(),
            subject: "s".into(),
            body: "b".into(),
            created_at: Utc::now(),
        });
        assert_eq!(state.next_unit(70.0), None);
    }

    #[test]
    fn engagement_respects_minimum_score() {
        let mut state = new_state();
        let a = candidate("a", Some("a@example.com"));
        let a_id = a.id.clone();
        state.record_sourced(vec![a]);
        state.record_screening(&a_id, attrs("Ada"), true);
        let snap = snapshot(&state, &a_id, 55.0);
        state.record_snapshot(snap);
        state.enter(Stage::Engagement);

        assert_eq!(state.next_unit(70.0), None);
        assert_eq!(state.next_unit(50.0), Some(WorkUnit::Engage(a_id)));
    }

    #[test]
    fn review_band_gates_engagement() {
        let mut state = new_state();
        let a = candidate("a", Some("a@example.com"));
        let b = candidate("b", Some("b@example.com"));
        let c = candidate("c", Some("  "));
        let (a_id, b_id, c_id) = (a.id.clone(), b.id.clone(), c.id.clone());
        state.record_sourced(vec![a, b, c]);
        for (id, score) in [(&a_id, 60.0), (&b_id, 30.0), (&c_id, 65.0)] {
            state.record_screening(id, attrs("N"), true);
            let snap = snapshot(&state, id, score);
            state.record_snapshot(snap);
        }
        state.enter(Stage::Engagement);

        // b is below the band and c has no usable contact.
        assert_eq!(state.unreviewed_between(50.0, 70.0), vec![a_id.clone()]);
        state.request_reviews(&[a_id.clone()]);
        assert_eq!(state.pending_reviews(), vec![a_id.clone()]);
        assert!(state.unreviewed_between(50.0, 70.0).is_empty());
        assert_eq!(state.next_unit(70.0), None);
        assert_eq!(
            JobSummary::from_state(&state).awaiting_review,
            vec![a_id.clone()]
        );

        state.record_review(&a_id, true);
        assert!(state.pending_reviews().is_empty());
        assert_eq!(state.next_unit(70.0), Some(WorkUnit::Engage(a_id.clone())));

        state.record_review(&a_id, false);
        assert_eq!(state.next_unit(70.0), None);
    }

    #[test]
    fn summary_ranks_latest_snapshots() {
        let mut state = new_state();
        let a = candidate("a", None);
        let b = candidate("b", None);
        let (a_id, b_id) = (a.id.clone(), b.id.clone());
        state.record_sourced(vec![a, b]);
        state.record_screening(&a_id, attrs("Ada"), true);
        state.record_screening(&b_id, attrs("Bo"), false);
        let s1 = snapshot(&state, &a_id, 40.0);
        let s2 = snapshot(&state, &b_id, 60.0);
        let s3 = snapshot(&state, &a_id, 95.0);
        state.record_snapshot(s1);
        state.record_snapshot(s2);
        state.record_snapshot(s3);

        let summary = JobSummary::from_state(&state);
        assert_eq!(summary.sourced, 2);
        assert_eq!(summary.qualified, 1);
        assert_eq!(summary.assessed, 2);
        assert_eq!(state.snapshots.len(), 3);
        assert_eq!(summary.ranked[0].candidate_id, a_id);
        assert_eq!(summary.ranked[0].score, 95.0);
        assert_eq!(summary.ranked[1].name, "Bo");
    }

    #[test]
    fn state_serialization_roundtrip() {
        let mut state = new_state();
        state.attempts.insert(Stage::Screening, 2);
        state.lease = Some(Lease {
            holder: "worker-1".into(),
            unit: WorkUnit::Screen("c1".into()),
            acquired_at: Utc::now(),
            expires_at: Utc::now(),
        });
        let json = serde_json::to_string(&state).unwrap();
        let parsed: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
