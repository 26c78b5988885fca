//! Integrator agent: merges specialist analyses into one answer.

use crate::backend::complete_text;
use crate::prompt::task_context;
use async_trait::async_trait;
use scanue_common::{
    Agent, AgentConfig, AgentOutput, AgentRole, CapabilityResult, IntegrationOutput,
    SpecialistResult, WorkflowState,
};
use scanue_llm::LlmClient;
use std::fmt::Write;
use std::sync::Arc;
use tracing::{info, warn};

const INTEGRATOR_SYSTEM_PROMPT: &str = r#"You integrate analyses from several specialists into one response.

Combine their findings into a single coherent recommendation. Note where
specialists disagree and how much the available evidence supports the answer.
Some specialists may be unavailable; work with what you have.

Respond with a JSON object:
{"summary": "<integrated response>", "confidence": <0.0 to 1.0>, "conflict": <true if specialists disagree>}
"#;

pub struct IntegratorAgent {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
}

impl IntegratorAgent {
    pub fn new(config: AgentConfig, llm: Arc<dyn LlmClient>) -> Self {
        Self { config, llm }
    }

    pub fn with_default_config(llm: Arc<dyn LlmClient>) -> Self {
        Self::new(AgentConfig::new("integrator", "Integrator"), llm)
    }

    fn build_prompt(&self, state: &WorkflowState) -> String {
        let mut analyses = String::new();
        for (id, result) in state.current_results() {
            match result {
                SpecialistResult::Available { content, .. } => {
                    let _ = writeln!(analyses, "## {id}\n{content}\n");
                }
                SpecialistResult::Unavailable { reason, .. } => {
                    let _ = writeln!(analyses, "## {id}\n[unavailable: {reason}]\n");
                }
            }
        }
        if analyses.is_empty() {
            analyses.push_str("(no specialist analyses)\n");
        }

        format!(
            "{}\n\nSpecialist analyses:\n{}",
            task_context(state),
            analyses.trim_end()
        )
    }
}

#[async_trait]
impl Agent for IntegratorAgent {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn role(&self) -> AgentRole {
        AgentRole::Integrator
    }

    async fn process(&self, state: &WorkflowState) -> CapabilityResult<AgentOutput> {
        info!(
            agent = %self.id(),
            run_id = %state.run_id,
            iteration = state.iteration,
            "Integrating specialist analyses"
        );

        let response = complete_text(
            self.llm.as_ref(),
            &self.config,
            self.system_prompt(),
            self.build_prompt(state),
        )
        .await?;

        Ok(AgentOutput::Integration(parse_integration(&response)))
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(INTEGRATOR_SYSTEM_PROMPT)
    }
}

/// Read the integrator's JSON answer.
///
/// Anything unparsable becomes the raw text with zero confidence, which
/// sends the answer to human review instead of failing the run.
pub fn parse_integration(response: &str) -> IntegrationOutput {
    let parsed = extract_json_object(response)
        .and_then(|json| serde_json::from_str::<serde_json::Value>(json).ok());

    let Some(parsed) = parsed else {
        warn!("Integrator response had no JSON object, using raw text");
        return raw_fallback(response);
    };

    let Some(summary) = parsed
        .get("summary")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
    else {
        warn!("Integrator JSON had no summary, using raw text");
        return raw_fallback(response);
    };

    let confidence = parsed
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(clamp_confidence)
        .unwrap_or(0.0) as f32;

    let conflict_detected = match parsed.get("conflict") {
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => {
            matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes")
        }
        _ => false,
    };

    IntegrationOutput {
        content: summary.trim().to_string(),
        confidence,
        conflict_detected,
    }
}

fn raw_fallback(response: &str) -> IntegrationOutput {
    IntegrationOutput {
        content: response.trim().to_string(),
        confidence: 0.0,
        conflict_detected: false,
    }
}

/// NaN counts as no confidence at all.
fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// First balanced `{...}` in `s`, skipping braces inside string literals.
fn extract_json_object(s: &str) -> Option<&str> {
    let start = s.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedLlm;

    #[test]
    fn parses_json_answer() {
        let output = parse_integration(
            r#"{"summary": "Take the offer", "confidence": 0.85, "conflict": false}"#,
        );
        assert_eq!(output.content, "Take the offer");
        assert!((output.confidence - 0.85).abs() < 1e-6);
        assert!(!output.conflict_detected);
    }

    #[test]
    fn json_surrounded_by_prose() {
        let output = parse_integration(
            "Here is my answer:\n```json\n{\"summary\": \"Wait {a bit}\", \"confidence\": 0.6, \"conflict\": \"yes\"}\n```",
        );
        assert_eq!(output.content, "Wait {a bit}");
        assert!(output.conflict_detected);
    }

    #[test]
    fn confidence_is_clamped() {
        let high = parse_integration(r#"{"summary": "x", "confidence": 1.7}"#);
        assert_eq!(high.confidence, 1.0);
        let low = parse_integration(r#"{"summary": "x", "confidence": -3}"#);
        assert_eq!(low.confidence, 0.0);
    }

    #[test]
    fn missing_confidence_is_zero() {
        assert_eq!(parse_integration(r#"{"summary": "x"}"#).confidence, 0.0);
    }

    #[test]
    fn prose_falls_back_to_raw_text() {
        let output = parse_integration("  Just move. It is worth it.  ");
        assert_eq!(output.content, "Just move. It is worth it.");
        assert_eq!(output.confidence, 0.0);
        assert!(!output.conflict_detected);
    }

    #[test]
    fn unbalanced_json_falls_back() {
        let output = parse_integration(r#"{"summary": "cut off"#);
        assert_eq!(output.confidence, 0.0);
        assert!(output.content.contains("cut off"));
    }

    #[tokio::test]
    async fn prompt_lists_available_and_unavailable_specialists() {
        let llm = Arc::new(ScriptedLlm::new(vec![Ok(
            r#"{"summary": "ok", "confidence": 0.9, "conflict": false}"#.into(),
        )]));
        let agent = IntegratorAgent::with_default_config(llm.clone());

        let mut state = WorkflowState::new("pick a job");
        state.iteration = 1;
        state.record_specialist_result(
            "reward_processing",
            SpecialistResult::Available {
                content: "offer B pays more".into(),
                iteration: 1,
            },
        );
        state.record_specialist_result(
            "emotional_regulation",
            SpecialistResult::Unavailable {
                reason: "timed out".into(),
                iteration: 1,
            },
        );
        // stale result from an earlier iteration is not shown
        state.record_specialist_result(
            "conflict_detection",
            SpecialistResult::Available {
                content: "stale analysis".into(),
                iteration: 0,
            },
        );

        let output = agent.process(&state).await.unwrap();
        assert!(matches!(output, AgentOutput::Integration(ref o) if o.content == "ok"));

        let prompt = &llm.last_request().unwrap().messages[0].content;
        assert!(prompt.contains("offer B pays more"));
        assert!(prompt.contains("[unavailable: timed out]"));
        assert!(!prompt.contains("stale analysis"));
    }
}
