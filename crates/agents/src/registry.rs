//! Process-wide `agent_id → factory` map, populated once at startup.

use crate::agent::{
    Agent, AgentConfig, ClarifyingAgent, CodeAgent, DepsAgent, DocAgent, DuplicateAgent, GitAgent,
    PlanningAgent, ReactCodeAgent, VerificationAgent,
};
use crate::{AgentError, Result};
use once_cell::sync::Lazy;
use std::collections::BTreeMap;

pub type AgentFactory = fn(&AgentConfig) -> Agent;

pub const BUILTIN_AGENT_IDS: [&str; 9] = [
    "doc",
    "code",
    "react_code",
    "git",
    "deps",
    "clarifying",
    "planning",
    "duplicate",
    "verification",
];

static GLOBAL: Lazy<AgentRegistry> = Lazy::new(AgentRegistry::builtin);

#[derive(Clone, Default)]
pub struct AgentRegistry {
    factories: BTreeMap<&'static str, AgentFactory>,
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}

impl AgentRegistry {
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every built-in agent.
    #[must_use]
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("doc", |cfg| Agent::Doc(DocAgent::new(cfg)));
        registry.register("code", |cfg| Agent::Code(CodeAgent::new(cfg)));
        registry.register("react_code", |cfg| Agent::ReactCode(ReactCodeAgent::new(cfg)));
        registry.register("git", |cfg| Agent::Git(GitAgent::new(cfg)));
        registry.register("deps", |cfg| Agent::Deps(DepsAgent::new(cfg)));
        registry.register("clarifying", |cfg| {
            Agent::Clarifying(ClarifyingAgent::new(cfg))
        });
        registry.register("planning", |cfg| Agent::Planning(PlanningAgent::new(cfg)));
        registry.register("duplicate", |cfg| Agent::Duplicate(DuplicateAgent::new(cfg)));
        registry.register("verification", |cfg| {
            Agent::Verification(VerificationAgent::new(cfg))
        });
        registry
    }

    /// Adds or replaces a factory.
    pub fn register(&mut self, id: &'static str, factory: AgentFactory) {
        self.factories.insert(id, factory);
    }

    pub fn create(&self, id: &str, config: &AgentConfig) -> Result<Agent> {
        let factory = self
            .factories
            .get(id.trim())
            .ok_or_else(|| AgentError::UnknownAgent(id.to_string()))?;
        Ok(factory(config))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }
}

#[must_use]
pub fn global() -> &'static AgentRegistry {
    &GLOBAL
}

/// Creates a built-in agent from the global registry.
pub fn create(id: &str, config: &AgentConfig) -> Result<Agent> {
    global().create(id, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskwing_protocol::{ErrorCode, HasErrorCode};

    #[test]
    fn every_builtin_id_creates_its_agent() {
        let config = AgentConfig::default();
        for id in BUILTIN_AGENT_IDS {
            let agent = create(id, &config).expect("builtin agent");
            assert_eq!(agent.name(), id);
            assert!(!agent.description().is_empty());
        }
        assert_eq!(global().ids().len(), BUILTIN_AGENT_IDS.len());
    }

    #[test]
    fn unknown_id_is_rejected() {
        let err = create("summarizer", &AgentConfig::default()).expect_err("unknown");
        assert_eq!(err.code(), ErrorCode::UnknownAgent);
        assert!(err.to_string().contains("summarizer"));
    }

    #[test]
    fn custom_registry_only_knows_registered_ids() {
        let mut registry = AgentRegistry::empty();
        registry.register("docs_only", |cfg| Agent::Doc(DocAgent::new(cfg)));
        assert!(registry.contains("docs_only"));
        assert!(registry.create("code", &AgentConfig::default()).is_err());
        let agent = registry
            .create("docs_only", &AgentConfig::default())
            .expect("registered");
        assert_eq!(agent.name(), "doc");
    }
}
