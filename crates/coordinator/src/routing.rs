//! Stage outcomes and the routing table.

use scanue_common::{CapabilityError, HumanDecision, Stage, WorkflowState};
use serde::{Deserialize, Serialize};

/// What a stage reported back to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Delegated {
        subtask_count: usize,
    },

    /// Every configured specialist has a result or a placeholder
    FanoutComplete {
        available: usize,
        unavailable: usize,
    },

    Integrated {
        confidence: f32,
        conflict_detected: bool,
    },

    /// The checkpoint is open and no response has been applied yet
    AwaitingHuman,

    HumanResolved(HumanDecision),

    /// Permanent failure, retries already exhausted
    Failed(CapabilityError),
}

/// When an integrated result needs a human look before it is final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPolicy {
    /// Disable to never pause for review
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Results below this confidence are reviewed
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    #[serde(default = "default_true")]
    pub review_on_conflict: bool,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f32 {
    0.7
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            confidence_threshold: default_confidence_threshold(),
            review_on_conflict: true,
        }
    }
}

impl ReviewPolicy {
    /// Never pause for review.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn requires_review(&self, confidence: f32, conflict_detected: bool) -> bool {
        self.enabled
            && (confidence < self.confidence_threshold
                || (self.review_on_conflict && conflict_detected))
    }
}

/// Maps the active stage and its outcome to the next stage.
///
/// Pure: no I/O and no state mutation. A permanent failure always routes to
/// [`Stage::Failed`]; so does any outcome the active stage cannot produce.
#[derive(Debug, Clone, Default)]
pub struct Router {
    review: ReviewPolicy,
}

impl Router {
    pub fn new(review: ReviewPolicy) -> Self {
        Self { review }
    }

    pub fn review_policy(&self) -> &ReviewPolicy {
        &self.review
    }

    pub fn next_stage(&self, state: &WorkflowState, outcome: &StageOutcome) -> Stage {
        use StageOutcome::*;

        match (state.current_stage, outcome) {
            (_, Failed(_)) => Stage::Failed,
            (Stage::Delegation, Delegated { subtask_count }) if *subtask_count > 0 => {
                Stage::SpecialistFanout
            }
            (Stage::Delegation, Delegated { .. }) => Stage::Integration,
            (Stage::SpecialistFanout, FanoutComplete { .. }) => Stage::Integration,
            (
                Stage::Integration,
                Integrated {
                    confidence,
                    conflict_detected,
                },
            ) => {
                if self.review.requires_review(*confidence, *conflict_detected) {
                    Stage::HumanCheckpoint
                } else {
                    Stage::Done
                }
            }
            (Stage::HumanCheckpoint, AwaitingHuman) => Stage::HumanCheckpoint,
            (Stage::HumanCheckpoint, HumanResolved(HumanDecision::Approve)) => Stage::Done,
            (
                Stage::HumanCheckpoint,
                HumanResolved(HumanDecision::Modify | HumanDecision::Reject),
            ) => Stage::Delegation,
            _ => Stage::Failed,
        }
    }
}
