//! Bridge between agents and the generative backend.

use scanue_common::{AgentConfig, CapabilityError, CapabilityResult, ScanueError};
use scanue_llm::{is_transient, LlmClient, LlmRequest};
use tracing::{debug, warn};

/// Classify a backend failure for the engine's retry logic.
pub fn to_capability_error(error: ScanueError) -> CapabilityError {
    match error {
        ScanueError::Capability(inner) => inner,
        other if is_transient(&other) => CapabilityError::transient(other.to_string()),
        other => CapabilityError::permanent(other.to_string()),
    }
}

/// One single-turn completion using the agent's sampling settings.
///
/// An empty completion is treated as transient: the same prompt usually
/// succeeds on a second try.
pub(crate) async fn complete_text(
    llm: &dyn LlmClient,
    config: &AgentConfig,
    system_prompt: &str,
    user_prompt: String,
) -> CapabilityResult<String> {
    let request = LlmRequest::single_turn(system_prompt, user_prompt)
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    debug!(agent = %config.id, model = %llm.model_name(), "Requesting completion");

    match llm.complete(request).await {
        Ok(response) if response.content.trim().is_empty() => {
            warn!(agent = %config.id, "Backend returned an empty completion");
            Err(CapabilityError::transient(format!(
                "{} received an empty completion",
                config.id
            )))
        }
        Ok(response) => Ok(response.content),
        Err(e) => {
            let error = to_capability_error(e);
            warn!(
                agent = %config.id,
                transient = error.is_transient(),
                error = %error,
                "Completion failed"
            );
            Err(error)
        }
    }
}
