//! Error types for scanue.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure reported by an agent capability.
///
/// Transient failures are retried by the stage executor; permanent failures
/// are never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum CapabilityError {
    #[error("transient capability error: {0}")]
    Transient(String),

    #[error("permanent capability error: {0}")]
    Permanent(String),
}

impl CapabilityError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Transient(msg) | Self::Permanent(msg) => msg,
        }
    }
}

pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;

#[derive(Error, Debug)]
pub enum ScanueError {
    #[error("Capability error: {0}")]
    Capability(#[from] CapabilityError),

    #[error("Run not found or not awaiting human input: {0}")]
    NotFound(String),

    #[error("Invalid response '{response}': expected one of {allowed:?}")]
    InvalidResponse {
        response: String,
        allowed: Vec<String>,
    },

    #[error("LLM error: {message}")]
    Llm {
        /// HTTP status when the backend answered, `None` for transport failures.
        status: Option<u16>,
        message: String,
    },

    #[error("Checkpoint store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ScanueError {
    pub fn llm(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Llm {
            status,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_error_kind() {
        assert!(CapabilityError::transient("rate limited").is_transient());
        assert!(!CapabilityError::permanent("bad request").is_transient());
        assert_eq!(CapabilityError::permanent("bad request").message(), "bad request");
    }

    #[test]
    fn capability_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(CapabilityError::transient("timeout")).unwrap();
        assert_eq!(json["kind"], "transient");
        assert_eq!(json["message"], "timeout");
    }

    #[test]
    fn invalid_response_message_lists_allowed() {
        let err = ScanueError::InvalidResponse {
            response: "maybe".into(),
            allowed: vec!["approve".into(), "reject".into()],
        };
        let text = err.to_string();
        assert!(text.contains("maybe"));
        assert!(text.contains("approve"));
    }
}
