//! Delegator agent: breaks the task into subtasks and assigns them.

use crate::backend::complete_text;
use crate::prompt::task_context;
use crate::specialist::Specialty;
use async_trait::async_trait;
use scanue_common::{
    Agent, AgentConfig, AgentOutput, AgentRole, CapabilityResult, Subtask, SubtaskCategory,
    WorkflowState,
};
use scanue_llm::LlmClient;
use std::sync::Arc;
use tracing::{debug, info};

/// Specialist that receives subtasks the model did not assign.
pub const DEFAULT_ASSIGNEE: &str = "value_assessment";

const DELEGATOR_SYSTEM_PROMPT: &str = r#"You are the delegator (DLPFC) agent. Your role is to:

1. Analyze the task requirements and complexity
2. Break the task into concrete subtasks
3. Assign each subtask to the specialist best suited for it

Answer with a bulleted or numbered list under a **SUBTASKS:** header.
Write each item as "<subtask> - Assign to <SPECIALIST>".
Only use specialists from the list you are given.
"#;

pub struct DelegatorAgent {
    config: AgentConfig,
    llm: Arc<dyn LlmClient>,
    specialists: Vec<String>,
}

impl DelegatorAgent {
    /// `specialists` is the configured set subtasks may be assigned to.
    pub fn new(config: AgentConfig, llm: Arc<dyn LlmClient>, specialists: Vec<String>) -> Self {
        Self {
            config,
            llm,
            specialists,
        }
    }

    pub fn with_default_config(llm: Arc<dyn LlmClient>, specialists: Vec<String>) -> Self {
        Self::new(AgentConfig::new("delegator", "Delegator"), llm, specialists)
    }

    fn build_prompt(&self, state: &WorkflowState) -> String {
        let roster = self
            .specialists
            .iter()
            .map(|id| match Specialty::parse(id) {
                Some(s) => format!("- {} ({}): {}", s.label(), id, s.focus()),
                None => format!("- {id}"),
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{}\n\nAvailable specialists:\n{}\n\nBreak the task into subtasks.",
            task_context(state),
            roster
        )
    }
}

#[async_trait]
impl Agent for DelegatorAgent {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn role(&self) -> AgentRole {
        AgentRole::Delegator
    }

    async fn process(&self, state: &WorkflowState) -> CapabilityResult<AgentOutput> {
        info!(
            agent = %self.id(),
            run_id = %state.run_id,
            iteration = state.iteration,
            "Delegating task"
        );

        let response = complete_text(
            self.llm.as_ref(),
            &self.config,
            self.system_prompt(),
            self.build_prompt(state),
        )
        .await?;

        let subtasks = parse_subtasks(&response, &self.specialists);
        debug!(agent = %self.id(), subtasks = subtasks.len(), "Parsed delegation");

        Ok(AgentOutput::Subtasks { subtasks })
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(DELEGATOR_SYSTEM_PROMPT)
    }
}

/// Parse a model's subtask breakdown.
///
/// Headers switch the current category, list items become subtasks, and
/// assignments are only honoured for specialists in `specialists`.
pub fn parse_subtasks(response: &str, specialists: &[String]) -> Vec<Subtask> {
    let mut subtasks: Vec<Subtask> = Vec::new();
    let mut category = SubtaskCategory::General;

    for raw in response.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('#') || line.starts_with("**") {
            let lower = line.to_lowercase();
            if lower.contains("subtask") {
                category = SubtaskCategory::Subtask;
            } else if lower.contains("integration") {
                category = SubtaskCategory::Integration;
            }
            continue;
        }

        if is_list_item(line) {
            let text = strip_emphasis(strip_list_marker(line));
            let (text, assignee) = split_assignment(&text, specialists);
            let text = text.trim();
            if !text.is_empty() {
                let mut subtask = Subtask::new(text).with_category(category);
                subtask.assignee = assignee;
                subtasks.push(subtask);
            }
            continue;
        }

        // "Agent: OFC" on its own line assigns the item above it.
        if let Some(name) = follow_up_assignment(line) {
            if let Some(last) = subtasks.last_mut() {
                if let Some(id) = match_specialist(name, specialists) {
                    last.assignee = Some(id);
                }
            }
        }
    }

    let fallback = specialists
        .iter()
        .find(|id| id.as_str() == DEFAULT_ASSIGNEE)
        .cloned();

    subtasks
        .into_iter()
        .filter(|s| !is_meta_item(&s.description))
        .map(|mut s| {
            if s.assignee.is_none() {
                s.assignee = fallback.clone();
            }
            s
        })
        .collect()
}

fn is_list_item(line: &str) -> bool {
    line.starts_with(['-', '*', '•'])
        || line
            .split_once(['.', ')'])
            .is_some_and(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Drops one bullet or `N.` / `N)` marker and the whitespace after it.
fn strip_list_marker(line: &str) -> &str {
    let rest = match line.strip_prefix(['-', '*', '•']) {
        Some(rest) => rest,
        None => {
            let digits = line.len() - line.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            match line[digits..].strip_prefix(['.', ')']) {
                Some(rest) if digits > 0 => rest,
                _ => line,
            }
        }
    };
    rest.trim_start()
}

fn strip_emphasis(text: &str) -> String {
    text.replace("**", "").replace('*', "").replace('`', "")
}

fn split_assignment(text: &str, specialists: &[String]) -> (String, Option<String>) {
    let lower = text.to_ascii_lowercase();
    if let Some(pos) = lower.find("- assign to ") {
        let (head, tail) = text.split_at(pos);
        let name = &tail["- assign to ".len()..];
        return (head.to_string(), match_specialist(name, specialists));
    }

    if let Some((head, rest)) = text.split_once(':') {
        if let Some(id) = match_specialist(head, specialists) {
            return (rest.to_string(), Some(id));
        }
    }

    (text.to_string(), None)
}

fn follow_up_assignment(line: &str) -> Option<&str> {
    let lower = line.to_ascii_lowercase();
    ["agent:", "assign to "]
        .iter()
        .find_map(|marker| lower.find(marker).map(|pos| &line[pos + marker.len()..]))
}

/// Resolve a free-form agent name to a configured specialist id.
///
/// Labels are matched as whole words so that `VMPFC` never matches `MPFC`.
pub fn match_specialist(name: &str, specialists: &[String]) -> Option<String> {
    let normalized = name.trim().to_lowercase().replace([' ', '-'], "_");
    let words: Vec<String> = name
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .collect();

    specialists
        .iter()
        .find(|id| {
            normalized.contains(id.to_lowercase().as_str())
                || Specialty::parse(id).is_some_and(|s| words.iter().any(|w| w == s.label()))
        })
        .cloned()
}

fn is_meta_item(description: &str) -> bool {
    let lower = description.trim().to_lowercase();
    if ["list", "agent", "integration"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
    {
        return true;
    }
    // "- VMPFC Agent: YES - reason" style delegation flags
    let first = lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find(|w| !w.is_empty());
    matches!(first, Some("yes") | Some("no"))
}
