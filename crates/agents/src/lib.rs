//! Delegator, specialist and integrator agents.
//!
//! Every agent implements [`scanue_common::Agent`]: it reads the workflow
//! state, asks its backend for a completion and returns a typed output.
//! Agents keep no memory between calls.
//!
//! ```text
//!                       ┌────────────┐
//!            task ────▶ │ Delegator  │  subtasks
//!                       └─────┬──────┘
//!          ┌─────────────┬────┴────────┬─────────────┐
//!          ▼             ▼             ▼             ▼
//!     ┌─────────┐   ┌─────────┐   ┌─────────┐   ┌─────────┐
//!     │  VMPFC  │   │   OFC   │   │   ACC   │   │  MPFC   │
//!     │emotional│   │ reward  │   │conflict │   │  value  │
//!     └────┬────┘   └────┬────┘   └────┬────┘   └────┬────┘
//!          └─────────────┴──────┬──────┴─────────────┘
//!                               ▼
//!                       ┌────────────┐
//!                       │ Integrator │  summary + confidence
//!                       └────────────┘
//! ```

pub mod backend;
pub mod delegator;
pub mod integrator;
pub mod prompt;
pub mod roster;
pub mod specialist;

pub use backend::to_capability_error;
pub use delegator::{match_specialist, parse_subtasks, DelegatorAgent, DEFAULT_ASSIGNEE};
pub use integrator::{parse_integration, IntegratorAgent};
pub use prompt::{format_feedback_history, format_subtasks, task_context};
pub use roster::{build_roster, RosterConfig};
pub use specialist::{SpecialistAgent, Specialty};

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use scanue_common::{Result, ScanueError};
    use scanue_llm::{LlmClient, LlmRequest, LlmResponse};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned completions and remembers the last request.
    pub struct ScriptedLlm {
        responses: Mutex<VecDeque<Result<String>>>,
        last: Mutex<Option<LlmRequest>>,
    }

    impl ScriptedLlm {
        pub fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                last: Mutex::new(None),
            }
        }

        pub fn last_request(&self) -> Option<LlmRequest> {
            self.last.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
            *self.last.lock().unwrap() = Some(request);
            let next = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ScanueError::llm(Some(500), "script exhausted")));
            next.map(|content| LlmResponse {
                content,
                model: "scripted".to_string(),
                usage: None,
                finish_reason: Some("stop".to_string()),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
