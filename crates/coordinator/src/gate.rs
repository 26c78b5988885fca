//! Human checkpoint gate.
//!
//! The gate keeps nothing of its own: an open checkpoint lives in
//! `WorkflowState::pending_checkpoint` and a resolved one in the feedback
//! history, so a persisted snapshot is enough to rebuild it after a restart.

use scanue_common::{
    CheckpointRequest, FeedbackEntry, HumanDecision, HumanResponse, ResponseSource, Result,
    RunStatus, ScanueError, Stage, WorkflowState,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointPolicy {
    /// How long a checkpoint waits for a human, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Applied when the deadline passes without a response
    #[serde(default = "default_response")]
    pub default_response: HumanDecision,

    #[serde(default = "default_allowed")]
    pub allowed_responses: Vec<HumanDecision>,
}

fn default_timeout_ms() -> u64 {
    3_600_000
}

fn default_response() -> HumanDecision {
    HumanDecision::Approve
}

fn default_allowed() -> Vec<HumanDecision> {
    HumanDecision::ALL.to_vec()
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            default_response: default_response(),
            allowed_responses: default_allowed(),
        }
    }
}

/// Where a run's checkpoint stands for the current iteration.
#[derive(Debug, Clone, PartialEq)]
pub enum GateState {
    Idle,
    /// Open; may already be past its deadline
    Pending(CheckpointRequest),
    Resolved(FeedbackEntry),
    /// Closed by the default response
    Expired(FeedbackEntry),
}

impl GateState {
    pub fn of(state: &WorkflowState) -> Self {
        if let Some(ref request) = state.pending_checkpoint {
            return Self::Pending(request.clone());
        }
        match state.latest_feedback() {
            Some(entry) if entry.iteration == state.iteration => match entry.source {
                ResponseSource::Human => Self::Resolved(entry.clone()),
                ResponseSource::DeadlineDefault => Self::Expired(entry.clone()),
            },
            _ => Self::Idle,
        }
    }
}

/// The decision a closed checkpoint produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub decision: HumanDecision,
    pub source: ResponseSource,
}

#[derive(Debug, Clone, Default)]
pub struct HumanCheckpointGate {
    policy: CheckpointPolicy,
}

impl HumanCheckpointGate {
    pub fn new(policy: CheckpointPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &CheckpointPolicy {
        &self.policy
    }

    /// Idle → pending. Suspends the run at the checkpoint.
    pub fn open(&self, state: &mut WorkflowState, now: u64) -> CheckpointRequest {
        let request = CheckpointRequest {
            prompt: review_prompt(state),
            allowed_responses: self.policy.allowed_responses.clone(),
            default_response: self.policy.default_response,
            iteration: state.iteration,
            opened_at: now,
            deadline: now.saturating_add(self.policy.timeout_ms),
        };

        state.pending_checkpoint = Some(request.clone());
        state.current_stage = Stage::HumanCheckpoint;
        state.status = RunStatus::AwaitingHuman;

        info!(
            run_id = %state.run_id,
            iteration = state.iteration,
            deadline = request.deadline,
            "Human checkpoint opened"
        );
        request
    }

    /// Pending → resolved, or → expired when the deadline has already passed.
    ///
    /// A response outside the allowed set fails with `InvalidResponse` and
    /// leaves the checkpoint open. A late response is discarded in favour
    /// of the default.
    pub fn resolve(
        &self,
        state: &mut WorkflowState,
        response: &HumanResponse,
        now: u64,
    ) -> Result<Resolution> {
        let request = pending_request(state)?;

        if request.is_expired(now) {
            warn!(
                run_id = %state.run_id,
                response = %response.decision,
                "Response arrived after the checkpoint deadline, applying default"
            );
            return Ok(self.close(
                state,
                request.default_response,
                None,
                ResponseSource::DeadlineDefault,
                now,
            ));
        }

        let decision = HumanDecision::parse(&response.decision)
            .filter(|d| request.allows(*d))
            .ok_or_else(|| ScanueError::InvalidResponse {
                response: response.decision.clone(),
                allowed: request
                    .allowed_responses
                    .iter()
                    .map(|d| d.as_str().to_string())
                    .collect(),
            })?;

        Ok(self.close(
            state,
            decision,
            response.comment.clone(),
            ResponseSource::Human,
            now,
        ))
    }

    /// Pending → expired if the deadline has passed; `None` otherwise.
    pub fn expire_if_due(&self, state: &mut WorkflowState, now: u64) -> Option<Resolution> {
        let request = state.pending_checkpoint.clone()?;
        if state.status != RunStatus::AwaitingHuman || !request.is_expired(now) {
            return None;
        }

        warn!(
            run_id = %state.run_id,
            iteration = request.iteration,
            default = %request.default_response,
            "Human checkpoint expired, applying default response"
        );
        Some(self.close(
            state,
            request.default_response,
            None,
            ResponseSource::DeadlineDefault,
            now,
        ))
    }

    fn close(
        &self,
        state: &mut WorkflowState,
        decision: HumanDecision,
        comment: Option<String>,
        source: ResponseSource,
        now: u64,
    ) -> Resolution {
        state.append_feedback(FeedbackEntry {
            iteration: state.iteration,
            decision,
            comment,
            source,
            reviewed_response: state.integrated_result.as_ref().map(|r| r.content.clone()),
            recorded_at: now,
        });
        state.pending_checkpoint = None;
        state.status = RunStatus::Running;

        info!(
            run_id = %state.run_id,
            decision = %decision,
            source = ?source,
            "Human checkpoint closed"
        );
        Resolution { decision, source }
    }
}

fn pending_request(state: &WorkflowState) -> Result<CheckpointRequest> {
    match (&state.status, &state.pending_checkpoint) {
        (RunStatus::AwaitingHuman, Some(request)) => Ok(request.clone()),
        _ => Err(ScanueError::NotFound(state.run_id.clone())),
    }
}

fn review_prompt(state: &WorkflowState) -> String {
    let mut prompt = format!("Review the response to: {}\n\n", state.task);
    match state.integrated_result {
        Some(ref result) => {
            prompt.push_str(&result.content);
            prompt.push_str(&format!(
                "\n\nConfidence: {:.2}{}",
                result.confidence,
                if result.conflict_detected {
                    " (specialists disagree)"
                } else {
                    ""
                }
            ));
            if result.is_degraded() {
                prompt.push_str(&format!(
                    "\nUnavailable specialists: {}",
                    result.unavailable_specialists.join(", ")
                ));
            }
        }
        None => prompt.push_str("(no integrated response)"),
    }
    prompt
}
