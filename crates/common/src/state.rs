//! The workflow state threaded through every stage of a run.
//!
//! A [`WorkflowState`] is the single source of truth for a run: the engine
//! persists it at every transition and a suspended run is reconstructed from
//! it alone.

use crate::error::CapabilityError;
use crate::subtask::Subtask;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Current Unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Stage identifiers. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Delegation,
    SpecialistFanout,
    Integration,
    HumanCheckpoint,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Delegation => "delegation",
            Stage::SpecialistFanout => "specialist_fanout",
            Stage::Integration => "integration",
            Stage::HumanCheckpoint => "human_checkpoint",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingHuman,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// A decision a human reviewer can make at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HumanDecision {
    Approve,
    Modify,
    Reject,
}

impl HumanDecision {
    pub const ALL: [HumanDecision; 3] = [
        HumanDecision::Approve,
        HumanDecision::Modify,
        HumanDecision::Reject,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HumanDecision::Approve => "approve",
            HumanDecision::Modify => "modify",
            HumanDecision::Reject => "reject",
        }
    }

    /// Case-insensitive parse; surrounding whitespace is ignored.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "approve" => Some(HumanDecision::Approve),
            "modify" => Some(HumanDecision::Modify),
            "reject" => Some(HumanDecision::Reject),
            _ => None,
        }
    }
}

impl fmt::Display for HumanDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw response supplied by an external actor, validated by the checkpoint gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumanResponse {
    pub decision: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl HumanResponse {
    pub fn new(decision: impl Into<String>) -> Self {
        Self {
            decision: decision.into(),
            comment: None,
        }
    }

    pub fn approve() -> Self {
        Self::new("approve")
    }

    pub fn modify(comment: impl Into<String>) -> Self {
        Self::new("modify").with_comment(comment)
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self::new("reject").with_comment(comment)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

/// Who produced a feedback entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Human,
    DeadlineDefault,
}

/// One resolved human checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Iteration whose integrated result was reviewed
    pub iteration: u32,

    pub decision: HumanDecision,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    pub source: ResponseSource,

    /// Integrated response the reviewer was shown
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_response: Option<String>,

    pub recorded_at: u64,
}

/// Latest output of one specialist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SpecialistResult {
    Available { content: String, iteration: u32 },
    /// Placeholder written when the specialist could not contribute.
    Unavailable { reason: String, iteration: u32 },
}

impl SpecialistResult {
    pub fn iteration(&self) -> u32 {
        match self {
            SpecialistResult::Available { iteration, .. }
            | SpecialistResult::Unavailable { iteration, .. } => *iteration,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, SpecialistResult::Available { .. })
    }

    pub fn content(&self) -> Option<&str> {
        match self {
            SpecialistResult::Available { content, .. } => Some(content),
            SpecialistResult::Unavailable { .. } => None,
        }
    }
}

/// Merged output of one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegratedResult {
    pub content: String,

    /// Integrator's confidence in the merged answer, 0.0 - 1.0
    pub confidence: f32,

    pub conflict_detected: bool,

    /// Specialists that contributed a placeholder instead of a result
    #[serde(default)]
    pub unavailable_specialists: Vec<String>,

    pub iteration: u32,
}

impl IntegratedResult {
    pub fn is_degraded(&self) -> bool {
        !self.unavailable_specialists.is_empty()
    }
}

/// Decision request exposed while a run awaits human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub prompt: String,
    pub allowed_responses: Vec<HumanDecision>,
    /// Applied when the deadline elapses without a response
    pub default_response: HumanDecision,
    pub iteration: u32,
    pub opened_at: u64,
    pub deadline: u64,
}

impl CheckpointRequest {
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.deadline
    }

    pub fn allows(&self, decision: HumanDecision) -> bool {
        self.allowed_responses.contains(&decision)
    }
}

/// Structured cause of a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: Stage,
    pub error: CapabilityError,
    pub occurred_at: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,

    /// Original user task, never modified
    pub task: String,

    /// Delegator output for the current iteration
    #[serde(default)]
    pub subtasks: Vec<Subtask>,

    /// Latest result per specialist id; entries are overwritten, never removed
    #[serde(default)]
    pub specialist_results: BTreeMap<String, SpecialistResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrated_result: Option<IntegratedResult>,

    /// Append-only
    #[serde(default)]
    pub feedback_history: Vec<FeedbackEntry>,

    pub current_stage: Stage,

    pub iteration: u32,

    pub status: RunStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_checkpoint: Option<CheckpointRequest>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,

    pub created_at: u64,

    pub updated_at: u64,
}

impl WorkflowState {
    pub fn new(task: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            run_id: format!("run_{}", uuid::Uuid::new_v4()),
            task: task.into(),
            subtasks: Vec::new(),
            specialist_results: BTreeMap::new(),
            integrated_result: None,
            feedback_history: Vec::new(),
            current_stage: Stage::Delegation,
            iteration: 0,
            status: RunStatus::Running,
            pending_checkpoint: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Start the next pass through the delegator.
    pub fn begin_iteration(&mut self) {
        self.iteration += 1;
        self.subtasks.clear();
        self.current_stage = Stage::Delegation;
    }

    pub fn record_specialist_result(&mut self, specialist: impl Into<String>, result: SpecialistResult) {
        self.specialist_results.insert(specialist.into(), result);
    }

    /// Results produced during the current iteration.
    pub fn current_results(&self) -> impl Iterator<Item = (&String, &SpecialistResult)> {
        let iteration = self.iteration;
        self.specialist_results
            .iter()
            .filter(move |(_, result)| result.iteration() == iteration)
    }

    pub fn current_result(&self, specialist: &str) -> Option<&SpecialistResult> {
        self.specialist_results
            .get(specialist)
            .filter(|result| result.iteration() == self.iteration)
    }

    /// Configured specialists with no result for the current iteration.
    pub fn missing_specialists(&self, configured: &[String]) -> Vec<String> {
        configured
            .iter()
            .filter(|id| self.current_result(id).is_none())
            .cloned()
            .collect()
    }

    /// True when every configured specialist has reported (placeholders count).
    pub fn fanin_complete(&self, configured: &[String]) -> bool {
        self.missing_specialists(configured).is_empty()
    }

    /// Drop results for specialists that are no longer configured.
    pub fn retain_specialists(&mut self, configured: &[String]) {
        self.specialist_results
            .retain(|id, _| configured.iter().any(|c| c == id));
    }

    pub fn append_feedback(&mut self, entry: FeedbackEntry) {
        self.feedback_history.push(entry);
    }

    pub fn latest_feedback(&self) -> Option<&FeedbackEntry> {
        self.feedback_history.last()
    }

    /// Checks that `status` and `current_stage` agree.
    pub fn is_consistent(&self) -> bool {
        match self.status {
            RunStatus::AwaitingHuman => {
                self.current_stage == Stage::HumanCheckpoint && self.pending_checkpoint.is_some()
            }
            RunStatus::Completed => self.current_stage == Stage::Done,
            RunStatus::Failed => self.current_stage == Stage::Failed && self.failure.is_some(),
            RunStatus::Running => !self.current_stage.is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Vec<String> {
        vec!["emotional_regulation".into(), "reward_processing".into()]
    }

    #[test]
    fn test_new_state_defaults() {
        let state = WorkflowState::new("plan a budget");

        assert!(state.run_id.starts_with("run_"));
        assert_eq!(state.task, "plan a budget");
        assert_eq!(state.current_stage, Stage::Delegation);
        assert_eq!(state.status, RunStatus::Running);
        assert_eq!(state.iteration, 0);
        assert!(state.feedback_history.is_empty());
        assert!(state.is_consistent());
    }

    #[test]
    fn test_unique_run_ids() {
        assert_ne!(WorkflowState::new("a").run_id, WorkflowState::new("a").run_id);
    }

    #[test]
    fn test_begin_iteration_clears_subtasks_keeps_results() {
        let mut state = WorkflowState::new("task");
        state.subtasks.push(Subtask::new("one"));
        state.record_specialist_result(
            "reward_processing",
            SpecialistResult::Available {
                content: "cheap".into(),
                iteration: 0,
            },
        );
        state.current_stage = Stage::HumanCheckpoint;

        state.begin_iteration();

        assert_eq!(state.iteration, 1);
        assert!(state.subtasks.is_empty());
        assert_eq!(state.current_stage, Stage::Delegation);
        assert_eq!(state.specialist_results.len(), 1);
        assert!(state.current_result("reward_processing").is_none());
    }

    #[test]
    fn test_fanin_counts_placeholders() {
        let mut state = WorkflowState::new("task");
        state.record_specialist_result(
            "emotional_regulation",
            SpecialistResult::Available {
                content: "calm".into(),
                iteration: 0,
            },
        );
        assert_eq!(state.missing_specialists(&configured()), vec!["reward_processing"]);
        assert!(!state.fanin_complete(&configured()));

        state.record_specialist_result(
            "reward_processing",
            SpecialistResult::Unavailable {
                reason: "timed out".into(),
                iteration: 0,
            },
        );
        assert!(state.fanin_complete(&configured()));
        assert_eq!(state.current_results().count(), 2);
    }

    #[test]
    fn test_retain_specialists_drops_unknown_keys() {
        let mut state = WorkflowState::new("task");
        state.record_specialist_result(
            "retired_specialist",
            SpecialistResult::Available {
                content: "old".into(),
                iteration: 0,
            },
        );
        state.retain_specialists(&configured());
        assert!(state.specialist_results.is_empty());
    }

    #[test]
    fn test_awaiting_requires_checkpoint_stage() {
        let mut state = WorkflowState::new("task");
        state.status = RunStatus::AwaitingHuman;
        assert!(!state.is_consistent());

        state.current_stage = Stage::HumanCheckpoint;
        state.pending_checkpoint = Some(CheckpointRequest {
            prompt: "review".into(),
            allowed_responses: HumanDecision::ALL.to_vec(),
            default_response: HumanDecision::Approve,
            iteration: 0,
            opened_at: 0,
            deadline: 10,
        });
        assert!(state.is_consistent());
    }

    #[test]
    fn test_human_decision_parse() {
        assert_eq!(HumanDecision::parse(" Approve "), Some(HumanDecision::Approve));
        assert_eq!(HumanDecision::parse("MODIFY"), Some(HumanDecision::Modify));
        assert_eq!(HumanDecision::parse("maybe"), None);
    }

    #[test]
    fn test_checkpoint_deadline() {
        let request = CheckpointRequest {
            prompt: "review".into(),
            allowed_responses: vec![HumanDecision::Approve],
            default_response: HumanDecision::Approve,
            iteration: 0,
            opened_at: 100,
            deadline: 200,
        };
        assert!(!request.is_expired(199));
        assert!(request.is_expired(200));
        assert!(request.allows(HumanDecision::Approve));
        assert!(!request.allows(HumanDecision::Reject));
    }

    #[test]
    fn test_specialist_result_tagging() {
        let json = serde_json::to_value(SpecialistResult::Unavailable {
            reason: "timed out".into(),
            iteration: 2,
        })
        .unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["iteration"], 2);
    }
}
