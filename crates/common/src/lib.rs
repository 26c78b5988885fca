//! Common types and traits shared across scanue crates.
//!
//! This crate provides the workflow state that flows between stages, the
//! agent capability trait every delegator, specialist and integrator
//! implements, and the error taxonomy used by the engine.

pub mod error;
pub mod state;
pub mod subtask;
pub mod traits;

pub use error::{CapabilityError, CapabilityResult, Result, ScanueError};
pub use state::{
    now_millis, CheckpointRequest, FeedbackEntry, HumanDecision, HumanResponse, IntegratedResult,
    ResponseSource, RunFailure, RunStatus, SpecialistResult, Stage, WorkflowState,
};
pub use subtask::{Subtask, SubtaskCategory};
pub use traits::{Agent, AgentConfig, AgentOutput, AgentRole, AgentSet, IntegrationOutput};
