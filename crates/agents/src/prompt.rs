//! Prompt context shared by every agent.
//!
//! Agents are stateless, so each prompt restates what the run knows so far:
//! the task, the previous integrated answer and the human feedback trail.

use scanue_common::{FeedbackEntry, ResponseSource, Subtask, WorkflowState};
use std::fmt::Write;

const NO_FEEDBACK: &str = "No previous feedback";

/// Render the feedback trail, oldest first.
pub fn format_feedback_history(history: &[FeedbackEntry]) -> String {
    if history.is_empty() {
        return NO_FEEDBACK.to_string();
    }

    let mut out = String::new();
    for entry in history {
        let source = match entry.source {
            ResponseSource::Human => "human",
            ResponseSource::DeadlineDefault => "deadline_default",
        };
        let _ = writeln!(out, "Iteration {} [{}/{}]:", entry.iteration, entry.decision, source);
        if let Some(ref reviewed) = entry.reviewed_response {
            let _ = writeln!(out, "  Reviewed: {}", reviewed);
        }
        let _ = writeln!(
            out,
            "  Feedback: {}",
            entry.comment.as_deref().unwrap_or("(no comment)")
        );
    }
    out.trim_end().to_string()
}

/// Task, iteration, previous answer and feedback as one block of text.
pub fn task_context(state: &WorkflowState) -> String {
    let previous = state
        .integrated_result
        .as_ref()
        .map(|r| r.content.as_str())
        .unwrap_or("No previous response");
    let latest = state
        .latest_feedback()
        .and_then(|f| f.comment.as_deref())
        .unwrap_or("No feedback provided");

    format!(
        "Task: {}\nIteration: {}\n\nPrevious Response: {}\nFeedback: {}\n\nFeedback History:\n{}",
        state.task,
        state.iteration,
        previous,
        latest,
        format_feedback_history(&state.feedback_history)
    )
}

/// Numbered list of subtasks, optionally only those assigned to `specialist`.
pub fn format_subtasks(subtasks: &[Subtask], specialist: Option<&str>) -> String {
    let selected: Vec<&Subtask> = subtasks
        .iter()
        .filter(|s| specialist.map_or(true, |id| s.is_assigned_to(id)))
        .collect();

    if selected.is_empty() {
        return "(none)".to_string();
    }

    selected
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {}", i + 1, s.description))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanue_common::{HumanDecision, IntegratedResult};

    fn entry(iteration: u32, decision: HumanDecision, comment: Option<&str>) -> FeedbackEntry {
        FeedbackEntry {
            iteration,
            decision,
            comment: comment.map(str::to_string),
            source: ResponseSource::Human,
            reviewed_response: Some(format!("answer {iteration}")),
            recorded_at: 0,
        }
    }

    #[test]
    fn empty_history_has_placeholder() {
        assert_eq!(format_feedback_history(&[]), NO_FEEDBACK);
    }

    #[test]
    fn history_lists_every_entry_in_order() {
        let history = vec![
            entry(1, HumanDecision::Modify, Some("more detail on costs")),
            entry(2, HumanDecision::Reject, None),
        ];
        let text = format_feedback_history(&history);

        let first = text.find("Iteration 1 [modify/human]:").unwrap();
        let second = text.find("Iteration 2 [reject/human]:").unwrap();
        assert!(first < second);
        assert!(text.contains("Feedback: more detail on costs"));
        assert!(text.contains("Feedback: (no comment)"));
        assert!(text.contains("Reviewed: answer 1"));
    }

    #[test]
    fn deadline_default_is_labelled() {
        let mut e = entry(1, HumanDecision::Approve, None);
        e.source = ResponseSource::DeadlineDefault;
        assert!(format_feedback_history(&[e]).contains("[approve/deadline_default]"));
    }

    #[test]
    fn context_includes_previous_answer_and_latest_comment() {
        let mut state = WorkflowState::new("choose a job offer");
        state.iteration = 2;
        state.integrated_result = Some(IntegratedResult {
            content: "take offer A".into(),
            confidence: 0.4,
            conflict_detected: false,
            unavailable_specialists: vec![],
            iteration: 1,
        });
        state.append_feedback(entry(1, HumanDecision::Modify, Some("consider commute")));

        let context = task_context(&state);
        assert!(context.starts_with("Task: choose a job offer"));
        assert!(context.contains("Iteration: 2"));
        assert!(context.contains("Previous Response: take offer A"));
        assert!(context.contains("Feedback: consider commute"));
    }

    #[test]
    fn first_iteration_context_has_placeholders() {
        let context = task_context(&WorkflowState::new("t"));
        assert!(context.contains("No previous response"));
        assert!(context.contains("No feedback provided"));
    }

    #[test]
    fn subtasks_filter_by_assignee() {
        let subtasks = vec![
            Subtask::new("weigh the risks").assigned_to("emotional_regulation"),
            Subtask::new("list the costs").assigned_to("reward_processing"),
        ];
        assert_eq!(
            format_subtasks(&subtasks, Some("reward_processing")),
            "1. list the costs"
        );
        assert_eq!(format_subtasks(&subtasks, Some("conflict_detection")), "(none)");
        assert!(format_subtasks(&subtasks, None).contains("2. list the costs"));
    }
}
