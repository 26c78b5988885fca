use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use scanue_common::{Result, ScanueError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse};
use crate::openai::OpenAiClient;

/// Backend settings for one agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Only "openai" (any OpenAI-compatible endpoint) is supported
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Environment variable whose value, when set, overrides `model`
    /// (e.g. `DLPFC_MODEL`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_env: Option<String>,

    /// Falls back to `OPENAI_API_KEY` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    /// HTTP request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o-mini".into()
}

fn default_max_concurrent() -> usize {
    4
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            model_env: None,
            api_key: None,
            api_url: None,
            temperature: None,
            max_tokens: None,
            max_concurrent_requests: default_max_concurrent(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl LlmConfig {
    /// Same settings, model taken from `env_var` when it is set.
    pub fn with_model_env(mut self, env_var: impl Into<String>) -> Self {
        self.model_env = Some(env_var.into());
        self
    }

    /// Resolve the model name.
    ///
    /// Priority:
    /// 1. Non-empty value of the `model_env` environment variable
    /// 2. `model`
    pub fn resolve_model(&self) -> String {
        self.model_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.model.clone())
    }

    /// Resolve the API key from config or the `OPENAI_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var("OPENAI_API_KEY").ok()
    }
}

/// Caps in-flight requests to one backend.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    semaphore: Arc<tokio::sync::Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent.max(1))),
        }
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| ScanueError::llm(None, format!("Semaphore acquire failed: {e}")))?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let base_client: Arc<dyn LlmClient> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAiClient::new(
            config.api_url.clone(),
            config.resolve_model(),
            config.resolve_api_key(),
            Duration::from_millis(config.timeout_ms),
        )?),
        other => {
            return Err(ScanueError::Config(format!(
                "Unknown LLM provider: {other}"
            )));
        }
    };

    debug!(
        provider = %config.provider,
        model = %base_client.model_name(),
        max_concurrent = config.max_concurrent_requests,
        "Built LLM client"
    );

    Ok(Arc::new(SemaphoredClient::new(
        base_client,
        config.max_concurrent_requests,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML_CONFIG: &str = r#"
provider = "openai"
model = "llama3"
api_url = "http://localhost:11434"
max_concurrent_requests = 8
timeout_ms = 5000
"#;

    #[test]
    fn deserialize_config_from_toml() {
        let config: LlmConfig = toml::from_str(TOML_CONFIG).unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.api_url.as_deref(), Some("http://localhost:11434"));
        assert!(config.api_key.is_none());
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn deserialize_config_defaults() {
        let config: LlmConfig = toml::from_str("").unwrap();
        assert_eq!(config.provider, "openai");
        assert_eq!(config.max_concurrent_requests, 4);
        assert_eq!(config.timeout_ms, 30_000);
        assert!(config.model_env.is_none());
    }

    #[test]
    fn model_env_overrides_model() {
        let config = LlmConfig::default().with_model_env("SCANUE_TEST_MODEL_OVERRIDE");
        std::env::set_var("SCANUE_TEST_MODEL_OVERRIDE", "gpt-4o");
        assert_eq!(config.resolve_model(), "gpt-4o");
        std::env::remove_var("SCANUE_TEST_MODEL_OVERRIDE");
        assert_eq!(config.resolve_model(), "gpt-4o-mini");
    }

    #[test]
    fn explicit_api_key_wins() {
        let config = LlmConfig {
            api_key: Some("sk-config".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-config"));
    }

    #[test]
    fn build_openai_client() {
        let config = LlmConfig {
            model: "llama3".to_string(),
            api_url: Some("http://localhost:11434".into()),
            ..Default::default()
        };
        let client = build_llm_client(&config).unwrap();
        assert_eq!(client.model_name(), "llama3");
    }

    #[test]
    fn build_unknown_provider_fails() {
        let config = LlmConfig {
            provider: "gemini".to_string(),
            ..Default::default()
        };
        assert!(build_llm_client(&config).is_err());
    }

    #[tokio::test]
    async fn semaphored_client_limits_concurrency() {
        use std::sync::atomic::{AtomicU32, Ordering};

        struct CountingClient {
            concurrent: Arc<AtomicU32>,
            max_seen: Arc<AtomicU32>,
        }

        #[async_trait]
        impl LlmClient for CountingClient {
            async fn complete(&self, _request: LlmRequest) -> Result<LlmResponse> {
                let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_seen.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                self.concurrent.fetch_sub(1, Ordering::SeqCst);
                Ok(LlmResponse {
                    content: "ok".to_string(),
                    model: "test".to_string(),
                    usage: None,
                    finish_reason: None,
                })
            }
            fn model_name(&self) -> &str {
                "test"
            }
        }

        let max_seen = Arc::new(AtomicU32::new(0));
        let inner = Arc::new(CountingClient {
            concurrent: Arc::new(AtomicU32::new(0)),
            max_seen: max_seen.clone(),
        });
        let semaphored = Arc::new(SemaphoredClient::new(inner, 2));

        let mut handles = vec![];
        for _ in 0..6 {
            let client = semaphored.clone();
            handles.push(tokio::spawn(async move {
                client.complete(LlmRequest::default()).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
