//! Generative backend access for scanue agents.
//!
//! The engine never talks to a model directly: agents wrap an [`LlmClient`]
//! and translate its failures into transient or permanent capability errors
//! with [`is_transient`].

pub mod client;
pub mod config;
pub mod openai;

pub use client::{is_transient, ChatMessage, LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};
pub use config::{build_llm_client, LlmConfig, SemaphoredClient};
pub use openai::OpenAiClient;
