use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::state::{StageFailure, WorkflowState};
use crate::error::FailureKind;
use crate::provider::TaskClass;

/// Pipeline stages of a recruitment workflow.
///
/// SOURCING → SCREENING → ASSESSMENT → ENGAGEMENT → COMPLETED, with FAILED
/// reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Sourcing,
    Screening,
    Assessment,
    Engagement,
    Completed,
    Failed,
}

impl Stage {
    pub const PIPELINE: [Stage; 4] = [
        Stage::Sourcing,
        Stage::Screening,
        Stage::Assessment,
        Stage::Engagement,
    ];

    /// Successor on success. `Completed` only follows `Engagement`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Sourcing => Some(Stage::Screening),
            Stage::Screening => Some(Stage::Assessment),
            Stage::Assessment => Some(Stage::Engagement),
            Stage::Engagement => Some(Stage::Completed),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed)
    }

    pub fn task_class(self) -> Option<TaskClass> {
        match self {
            Stage::Sourcing | Stage::Screening => Some(TaskClass::BulkClassification),
            Stage::Assessment => Some(TaskClass::ComplexReasoning),
            Stage::Engagement => Some(TaskClass::SafetySensitive),
            Stage::Completed | Stage::Failed => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Sourcing => write!(f, "SOURCING"),
            Stage::Screening => write!(f, "SCREENING"),
            Stage::Assessment => write!(f, "ASSESSMENT"),
            Stage::Engagement => write!(f, "ENGAGEMENT"),
            Stage::Completed => write!(f, "COMPLETED"),
            Stage::Failed => write!(f, "FAILED"),
        }
    }
}

/// Result of one unit of stage work, as seen by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    /// The unit succeeded; `stage_complete` when no work remains in the stage.
    Success { stage_complete: bool },
    Failure { kind: FailureKind, message: String },
}

/// The result of evaluating a state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Move to the next stage.
    Advance { from: Stage, to: Stage },
    /// The unit succeeded but the stage has more work.
    Continue(Stage),
    /// Run the current stage again after backing off.
    Retry { stage: Stage, attempt: u32 },
    /// The workflow is now `Failed`.
    Fail(StageFailure),
    /// The workflow was already terminal; nothing changed.
    Halted(Stage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts allowed per unit of stage work before the job fails.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// Applies outcomes to a [`WorkflowState`].
pub struct StateMachine;

impl StateMachine {
    /// Compute and apply the transition for `outcome` in the current stage.
    ///
    /// - Success resets the stage's attempt count; if the stage is complete the
    ///   workflow advances to the next stage.
    /// - A retryable failure increments the attempt count and retries until the
    ///   count reaches `max_attempts`, then fails the workflow.
    /// - Terminal and cancellation failures fail the workflow immediately.
    pub fn advance(
        state: &mut WorkflowState,
        outcome: UnitOutcome,
        policy: &RetryPolicy,
    ) -> Transition {
        let stage = state.stage;
        if stage.is_terminal() {
            return Transition::Halted(stage);
        }

        let transition = match outcome {
            UnitOutcome::Success { stage_complete } => {
                state.attempts.insert(stage, 0);
                match (stage_complete, stage.next()) {
                    (true, Some(to)) => {
                        state.enter(to);
                        Transition::Advance { from: stage, to }
                    }
                    _ => Transition::Continue(stage),
                }
            }
            UnitOutcome::Failure { kind, message } => {
                let attempt = state.attempts.entry(stage).or_insert(0);
                *attempt += 1;
                let attempt = *attempt;
                match kind {
                    FailureKind::Retryable if attempt < policy.max_attempts => {
                        state.last_error = Some(StageFailure::new(stage, kind, message));
                        Transition::Retry { stage, attempt }
                    }
                    _ => Transition::Fail(Self::fail(state, kind, message)),
                }
            }
        };

        state.updated_at = Utc::now();
        transition
    }

    /// Moves the workflow to `Failed`, recording the error and the stage it
    /// failed in.
    pub fn fail(state: &mut WorkflowState, kind: FailureKind, message: String) -> StageFailure {
        let failure = StageFailure::new(state.stage, kind, message);
        state.last_error = Some(failure.clone());
        state.enter(Stage::Failed);
        state.lease = None;
        state.updated_at = Utc::now();
        failure
    }
}
