mod model;
mod stage;
mod state;

pub use model::{
    Candidate, CandidateAttributes, CandidateReference, Compensation, Job, OutreachDraft,
    ScoreSnapshot,
};
pub use stage::{RetryPolicy, Stage, StateMachine, Transition, UnitOutcome};
pub use state::{
    JobSummary, Lease, RankedCandidate, Review, StageEntry, StageFailure, WorkUnit,
    WorkflowState,
};
