//! Core agent traits.
//!
//! These traits are defined in `scanue-common` so that both the coordinator
//! and agent crates can reference them without circular dependencies.

use crate::error::CapabilityResult;
use crate::state::WorkflowState;
use crate::subtask::Subtask;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The part an agent plays in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Decomposes the task into subtasks
    Delegator,
    /// Analyses the task from one perspective
    Specialist,
    /// Merges specialist output into one answer
    Integrator,
}

/// Integrator output before it is written into the state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationOutput {
    pub content: String,
    pub confidence: f32,
    pub conflict_detected: bool,
}

/// Typed output of one capability call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutput {
    Subtasks { subtasks: Vec<Subtask> },
    Analysis { content: String },
    Integration(IntegrationOutput),
}

/// A stateless unit of work. All memory lives in the [`WorkflowState`].
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier; specialists are keyed by it in the state.
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    fn role(&self) -> AgentRole;

    /// Read-only view of the state in, typed partial result out.
    async fn process(&self, state: &WorkflowState) -> CapabilityResult<AgentOutput>;

    fn system_prompt(&self) -> &str;
}

/// Configuration for agent creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,

    pub name: String,

    /// Custom system prompt (optional, uses default if not set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            system_prompt: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// The agents one engine drives: a delegator, the specialist set, an integrator.
#[derive(Clone)]
pub struct AgentSet {
    pub delegator: Arc<dyn Agent>,
    pub specialists: Vec<Arc<dyn Agent>>,
    pub integrator: Arc<dyn Agent>,
}

impl AgentSet {
    pub fn new(
        delegator: Arc<dyn Agent>,
        specialists: Vec<Arc<dyn Agent>>,
        integrator: Arc<dyn Agent>,
    ) -> Self {
        Self {
            delegator,
            specialists,
            integrator,
        }
    }

    /// Ids of the configured specialist set, in dispatch order.
    pub fn specialist_ids(&self) -> Vec<String> {
        self.specialists.iter().map(|s| s.id().to_string()).collect()
    }
}
