//! Specialist agents.
//!
//! Every specialist runs the same code; the [`Specialty`] decides its id,
//! its label and what it is asked to focus on.

use crate::backend::complete_text;
use crate::prompt::{format_subtasks, task_context};
use async_trait::async_trait;
use scanue_common::{
    Agent, AgentConfig, AgentOutput, AgentRole, CapabilityResult, WorkflowState,
};
use scanue_llm::LlmClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    /// VMPFC: emotional and risk components
    EmotionalRegulation,
    /// OFC: rewards, costs and outcomes
    RewardProcessing,
    /// ACC: conflicts between options
    ConflictDetection,
    /// MPFC: goals, values and the final recommendation
    ValueAssessment,
}

impl Specialty {
    pub const ALL: [Specialty; 4] = [
        Specialty::EmotionalRegulation,
        Specialty::RewardProcessing,
        Specialty::ConflictDetection,
        Specialty::ValueAssessment,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::EmotionalRegulation => "emotional_regulation",
            Self::RewardProcessing => "reward_processing",
            Self::ConflictDetection => "conflict_detection",
            Self::ValueAssessment => "value_assessment",
        }
    }

    /// Short label the delegator uses when assigning work.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EmotionalRegulation => "VMPFC",
            Self::RewardProcessing => "OFC",
            Self::ConflictDetection => "ACC",
            Self::ValueAssessment => "MPFC",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::EmotionalRegulation => "Emotional Regulation Specialist",
            Self::RewardProcessing => "Reward Processing Specialist",
            Self::ConflictDetection => "Conflict Detection Specialist",
            Self::ValueAssessment => "Value Assessment Specialist",
        }
    }

    /// Environment variable naming the model for this specialist.
    pub fn model_env(&self) -> String {
        format!("{}_MODEL", self.label())
    }

    pub fn focus(&self) -> &'static str {
        match self {
            Self::EmotionalRegulation => {
                "Analyze the emotional and risk components of the task."
            }
            Self::RewardProcessing => "Evaluate potential rewards, costs and outcomes.",
            Self::ConflictDetection => {
                "Identify potential conflicts between options and propose resolutions."
            }
            Self::ValueAssessment => {
                "Assess alignment with goals and values, and make a final recommendation."
            }
        }
    }

    /// Look up by id (`reward_processing`) or label (`OFC`), case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL.into_iter().find(|s| {
            s.id().eq_ignore_ascii_case(value) || s.label().eq_ignore_ascii_case(value)
        })
    }

    fn default_system_prompt(&self) -> String {
        format!(
            "You are the {} agent ({}), one of several specialists analysing the same task \
             from different perspectives.\n\n{}\n\nBe concrete and concise. Address the \
             subtasks assigned to you and take any reviewer feedback into account.",
            self.label(),
            self.display_name(),
            self.focus()
        )
    }
}

/// Analyses the task from one [`Specialty`]'s perspective.
pub struct SpecialistAgent {
    specialty: Specialty,
    config: AgentConfig,
    system_prompt: String,
    llm: Arc<dyn LlmClient>,
}

impl SpecialistAgent {
    pub fn new(specialty: Specialty, config: AgentConfig, llm: Arc<dyn LlmClient>) -> Self {
        let system_prompt = config
            .system_prompt
            .clone()
            .unwrap_or_else(|| specialty.default_system_prompt());
        Self {
            specialty,
            config,
            system_prompt,
            llm,
        }
    }

    pub fn with_default_config(specialty: Specialty, llm: Arc<dyn LlmClient>) -> Self {
        Self::new(
            specialty,
            AgentConfig::new(specialty.id(), specialty.display_name()),
            llm,
        )
    }

    pub fn specialty(&self) -> Specialty {
        self.specialty
    }

    fn build_prompt(&self, state: &WorkflowState) -> String {
        // Specialists with nothing assigned still see the whole breakdown.
        let assigned = if state.subtasks.iter().any(|s| s.is_assigned_to(self.id())) {
            format_subtasks(&state.subtasks, Some(self.id()))
        } else {
            format_subtasks(&state.subtasks, None)
        };

        format!(
            "{}\n\nSubtasks for you:\n{}\n\n{}",
            task_context(state),
            assigned,
            self.specialty.focus()
        )
    }
}

#[async_trait]
impl Agent for SpecialistAgent {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn role(&self) -> AgentRole {
        AgentRole::Specialist
    }

    async fn process(&self, state: &WorkflowState) -> CapabilityResult<AgentOutput> {
        info!(
            agent = %self.id(),
            run_id = %state.run_id,
            iteration = state.iteration,
            "Specialist analysing task"
        );

        let content = complete_text(
            self.llm.as_ref(),
            &self.config,
            &self.system_prompt,
            self.build_prompt(state),
        )
        .await?;

        Ok(AgentOutput::Analysis { content })
    }

    fn system_prompt(&self) -> &str {
        &self.system_prompt
    }
}
