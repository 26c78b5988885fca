//! Configuration for the workflow engine.
//!
//! Every section is optional; `validate` rejects values the engine cannot
//! run with. Files loaded through [`CoordinatorConfig::from_file`] also get
//! Unix mode checks once their contents are known.

use crate::gate::CheckpointPolicy;
use crate::retry::RetryPolicy;
use crate::routing::ReviewPolicy;
use crate::store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
use scanue_agents::{RosterConfig, Specialty};
use scanue_common::{Result, ScanueError};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Main engine configuration. Every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub review: ReviewPolicy,

    #[serde(default)]
    pub checkpoint: CheckpointPolicy,

    #[serde(default)]
    pub store: StoreConfig,

    /// Backends for the delegator, specialists and integrator
    #[serde(default)]
    pub agents: RosterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Specialist ids to dispatch, in order
    #[serde(default = "default_specialists")]
    pub specialists: Vec<String>,

    /// How often overdue checkpoints are swept, in milliseconds
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_specialists() -> Vec<String> {
    Specialty::ALL.iter().map(|s| s.id().to_string()).collect()
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            specialists: default_specialists(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Snapshot directory for the file backend
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/checkpoints")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    pub async fn build(&self) -> Result<Arc<dyn CheckpointStore>> {
        Ok(match self.backend {
            StoreBackend::Memory => Arc::new(InMemoryCheckpointStore::new()),
            StoreBackend::File => Arc::new(FileCheckpointStore::open(&self.path).await?),
        })
    }
}

impl CoordinatorConfig {
    /// Load configuration from a TOML file.
    ///
    /// On Unix the file must be a regular file that only its owner can
    /// write. If it carries an API key it must not be world-readable.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        let config = Self::from_toml(&content)?;
        let holds_secret = config.agents.has_inline_api_key();

        #[cfg(unix)]
        check_file_mode(path, holds_secret)?;

        if holds_secret {
            warn!(
                path = %path.display(),
                "Config file stores an API key; prefer the OPENAI_API_KEY environment variable"
            );
        }

        Ok(config)
    }

    /// Load configuration from a TOML file without permission checks.
    ///
    /// Use this only for testing or when you've already validated the file.
    pub fn from_file_unchecked(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.engine.specialists.is_empty() {
            return Err(ScanueError::Config(
                "engine.specialists must name at least one specialist".into(),
            ));
        }
        for id in &self.engine.specialists {
            if Specialty::parse(id).map(|s| s.id()) != Some(id.as_str()) {
                return Err(ScanueError::Config(format!("Unknown specialist: {id}")));
            }
        }

        if self.engine.sweep_interval_ms == 0 {
            return Err(ScanueError::Config(
                "engine.sweep_interval_ms must be greater than zero".into(),
            ));
        }

        let threshold = self.review.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ScanueError::Config(format!(
                "review.confidence_threshold must be within [0, 1], got {threshold}"
            )));
        }

        if self.checkpoint.allowed_responses.is_empty() {
            return Err(ScanueError::Config(
                "checkpoint.allowed_responses must not be empty".into(),
            ));
        }
        if !self
            .checkpoint
            .allowed_responses
            .contains(&self.checkpoint.default_response)
        {
            return Err(ScanueError::Config(format!(
                "checkpoint.default_response '{}' is not an allowed response",
                self.checkpoint.default_response
            )));
        }

        if self.retry.max_attempts == 0 {
            return Err(ScanueError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ScanueError::Config(
                "retry.backoff_multiplier must be at least 1.0".into(),
            ));
        }

        Ok(())
    }
}

/// Mode checks for a config file, run after it parsed.
#[cfg(unix)]
fn check_file_mode(path: &Path, holds_secret: bool) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = std::fs::symlink_metadata(path)
        .with_context(|| format!("cannot stat config {}", path.display()))?;
    anyhow::ensure!(
        metadata.file_type().is_file(),
        "config {} must be a regular file, not a symlink or directory",
        path.display()
    );

    let mode = metadata.permissions().mode() & 0o777;
    anyhow::ensure!(
        mode & 0o002 == 0,
        "config {} is writable by everyone (mode {mode:04o}); run `chmod o-w` on it",
        path.display()
    );

    if holds_secret {
        anyhow::ensure!(
            mode & 0o004 == 0,
            "config {} holds an API key but is readable by everyone (mode {mode:04o}); \
             run `chmod 600` on it",
            path.display()
        );
        if mode & 0o040 != 0 {
            warn!(
                path = %path.display(),
                mode = %format!("{mode:04o}"),
                "Config file holding an API key is group-readable"
            );
        }
    }

    Ok(())
}
