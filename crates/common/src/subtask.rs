//! Subtask descriptors produced by the delegator.

use serde::{Deserialize, Serialize};

/// Section of the delegator's breakdown a subtask was listed under.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskCategory {
    #[default]
    General,
    Subtask,
    Integration,
}

/// One unit of work carved out of the user task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// What needs to be done
    pub description: String,

    /// Section this subtask came from
    #[serde(default)]
    pub category: SubtaskCategory,

    /// Specialist id the delegator assigned, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
}

impl Subtask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            category: SubtaskCategory::General,
            assignee: None,
        }
    }

    pub fn with_category(mut self, category: SubtaskCategory) -> Self {
        self.category = category;
        self
    }

    pub fn assigned_to(mut self, specialist: impl Into<String>) -> Self {
        self.assignee = Some(specialist.into());
        self
    }

    pub fn is_assigned_to(&self, specialist: &str) -> bool {
        self.assignee.as_deref() == Some(specialist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtask_creation() {
        let subtask = Subtask::new("Estimate monthly costs");

        assert_eq!(subtask.description, "Estimate monthly costs");
        assert_eq!(subtask.category, SubtaskCategory::General);
        assert!(subtask.assignee.is_none());
    }

    #[test]
    fn test_subtask_builder_methods() {
        let subtask = Subtask::new("Weigh savings against lifestyle")
            .with_category(SubtaskCategory::Subtask)
            .assigned_to("reward_processing");

        assert_eq!(subtask.category, SubtaskCategory::Subtask);
        assert!(subtask.is_assigned_to("reward_processing"));
        assert!(!subtask.is_assigned_to("conflict_detection"));
    }

    #[test]
    fn test_subtask_omits_missing_assignee() {
        let json = serde_json::to_value(Subtask::new("x")).unwrap();
        assert!(json.get("assignee").is_none());
        assert_eq!(json["category"], "general");
    }
}
