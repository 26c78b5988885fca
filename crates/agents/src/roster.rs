//! Build the agent set from configuration.

use crate::delegator::DelegatorAgent;
use crate::integrator::IntegratorAgent;
use crate::specialist::{Specialty, SpecialistAgent};
use scanue_common::{Agent, AgentConfig, AgentSet, Result, ScanueError};
use scanue_llm::{build_llm_client, LlmConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// `[agents]` section: a shared backend plus optional per-agent overrides.
///
/// ```toml
/// [agents.llm]
/// model = "gpt-4o-mini"
///
/// [agents.delegator]
/// model = "gpt-4o"
///
/// [agents.specialists.reward_processing]
/// model = "llama3"
/// api_url = "http://localhost:11434"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegator: Option<LlmConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrator: Option<LlmConfig>,

    /// Keyed by specialist id
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub specialists: BTreeMap<String, LlmConfig>,
}

impl RosterConfig {
    /// Settings for one agent; `model_env` defaults to the agent's own variable.
    pub fn llm_for(&self, agent: &str, default_env: &str) -> LlmConfig {
        let explicit = match agent {
            "delegator" => self.delegator.as_ref(),
            "integrator" => self.integrator.as_ref(),
            id => self.specialists.get(id),
        };
        let config = explicit.unwrap_or(&self.llm).clone();
        if config.model_env.is_some() {
            config
        } else {
            config.with_model_env(default_env)
        }
    }

    /// True when any configured backend carries an API key.
    pub fn has_inline_api_key(&self) -> bool {
        std::iter::once(&self.llm)
            .chain(self.delegator.iter())
            .chain(self.integrator.iter())
            .chain(self.specialists.values())
            .any(|c| c.api_key.as_deref().is_some_and(|k| !k.is_empty()))
    }
}

fn agent_config(id: &str, name: &str, llm: &LlmConfig) -> AgentConfig {
    let mut config = AgentConfig::new(id, name);
    if let Some(t) = llm.temperature {
        config.temperature = t;
    }
    if let Some(m) = llm.max_tokens {
        config.max_tokens = m;
    }
    config
}

/// Construct the delegator, the listed specialists and the integrator.
///
/// Every specialist id must name a known [`Specialty`].
pub fn build_roster(config: &RosterConfig, specialist_ids: &[String]) -> Result<AgentSet> {
    if specialist_ids.is_empty() {
        return Err(ScanueError::Config(
            "at least one specialist must be configured".into(),
        ));
    }

    let mut specialists: Vec<Arc<dyn Agent>> = Vec::with_capacity(specialist_ids.len());
    for id in specialist_ids {
        let specialty = Specialty::parse(id)
            .filter(|s| s.id() == id)
            .ok_or_else(|| ScanueError::Config(format!("Unknown specialist: {id}")))?;
        if specialists.iter().any(|s| s.id() == id) {
            return Err(ScanueError::Config(format!("Duplicate specialist: {id}")));
        }

        let llm_config = config.llm_for(id, &specialty.model_env());
        let llm = build_llm_client(&llm_config)?;
        specialists.push(Arc::new(SpecialistAgent::new(
            specialty,
            agent_config(id, specialty.display_name(), &llm_config),
            llm,
        )));
    }

    let delegator_config = config.llm_for("delegator", "DLPFC_MODEL");
    let delegator = DelegatorAgent::new(
        agent_config("delegator", "Delegator", &delegator_config),
        build_llm_client(&delegator_config)?,
        specialist_ids.to_vec(),
    );

    let integrator_config = config.llm_for("integrator", "INTEGRATOR_MODEL");
    let integrator = IntegratorAgent::new(
        agent_config("integrator", "Integrator", &integrator_config),
        build_llm_client(&integrator_config)?,
    );

    info!(specialists = ?specialist_ids, "Built agent roster");

    Ok(AgentSet::new(
        Arc::new(delegator),
        specialists,
        Arc::new(integrator),
    ))
}
