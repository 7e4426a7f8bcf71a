//! Layered configuration: built-in defaults, then `.taskwing/config.toml`, then `TASKWING_*`
//! environment overrides.

use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use taskwing_agents::agent::MAX_REACT_ITERATIONS;
use taskwing_agents::{AgentConfig, SharedModel, StreamBus};
use taskwing_protocol::fsio::state_dir;
use taskwing_protocol::redacted;
use taskwing_watcher::{Classifier, ClassifierConfig, DebounceDelays};

pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_DEBUG: &str = "TASKWING_DEBUG";
pub const ENV_DEBUG_STDERR: &str = "TASKWING_DEBUG_STDERR";
pub const ENV_LOG_RETENTION: &str = "TASKWING_LOG_RETENTION";
pub const ENV_ACTIVITY_CAP: &str = "TASKWING_ACTIVITY_CAP";
pub const ENV_NOTIFY_TIMEOUT_MS: &str = "TASKWING_NOTIFY_TIMEOUT_MS";
pub const ENV_REACT_MAX_ITERS: &str = "TASKWING_REACT_MAX_ITERS";
pub const ENV_STREAM_CAPACITY: &str = "TASKWING_STREAM_CAPACITY";
pub const ENV_MODEL: &str = "TASKWING_MODEL";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project: ProjectConfig,
    pub watch: WatchConfig,
    pub agents: AgentsConfig,
    pub stream: StreamConfig,
    pub activity: ActivityConfig,
    pub notifier: NotifierConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub deps_debounce_ms: Option<u64>,
    pub docs_debounce_ms: Option<u64>,
    pub other_debounce_ms: Option<u64>,
    pub extra_ignored_dirs: Vec<String>,
    pub hidden_allowlist: Vec<String>,
}

impl WatchConfig {
    #[must_use]
    pub fn delays(&self) -> DebounceDelays {
        let defaults = DebounceDelays::default();
        DebounceDelays {
            deps: self.deps_debounce_ms.map_or(defaults.deps, Duration::from_millis),
            docs: self.docs_debounce_ms.map_or(defaults.docs, Duration::from_millis),
            other: self
                .other_debounce_ms
                .map_or(defaults.other, Duration::from_millis),
        }
    }

    /// Built-in ignore set and allow-list, extended by the configured entries.
    #[must_use]
    pub fn classifier(&self) -> Classifier {
        let mut config = ClassifierConfig::default();
        for dir in &self.extra_ignored_dirs {
            if !config.ignored_dirs.contains(dir) {
                config.ignored_dirs.push(dir.clone());
            }
        }
        for name in &self.hidden_allowlist {
            if !config.hidden_allowlist.contains(name) {
                config.hidden_allowlist.push(name.clone());
            }
        }
        Classifier::new(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub model: Option<String>,
    /// Provider credential; never served unredacted.
    pub api_key: Option<String>,
    /// Response-length hint handed to every model call.
    pub output_limit: Option<u32>,
    pub react_max_iters: usize,
    pub timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub verbose: bool,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            model: None,
            api_key: None,
            output_limit: None,
            react_max_iters: taskwing_agents::agent::DEFAULT_REACT_ITERATIONS,
            timeout_secs: taskwing_agents::agent::DEFAULT_MODEL_TIMEOUT.as_secs(),
            command_timeout_secs: 30,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            capacity: taskwing_agents::stream::DEFAULT_STREAM_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    pub cap: usize,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            cap: crate::activity::DEFAULT_ACTIVITY_CAP,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    pub timeout_ms: u64,
    pub replay_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: crate::notifier::DEFAULT_SUBSCRIBER_TIMEOUT.as_millis() as u64,
            replay_capacity: crate::notifier::DEFAULT_REPLAY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub stderr: bool,
    pub retention: usize,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stderr: false,
            retention: crate::debug_log::DEFAULT_RETENTION,
        }
    }
}

impl Config {
    #[must_use]
    pub fn path_for_root(root: &Path) -> PathBuf {
        state_dir(root).join(CONFIG_FILE_NAME)
    }

    /// Loads the project file (if any) and applies the process environment.
    pub fn load(root: &Path) -> Result<Self> {
        let mut config = Self::load_file(root)?;
        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_file(root: &Path) -> Result<Self> {
        let path = Self::path_for_root(root);
        match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Applies `TASKWING_*` overrides from `lookup`; unparsable values are ignored with a warning.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(value) = lookup(ENV_DEBUG) {
            self.debug.enabled = parse_flag(&value);
        }
        if let Some(value) = lookup(ENV_DEBUG_STDERR) {
            self.debug.stderr = parse_flag(&value);
        }
        override_number(&lookup, ENV_LOG_RETENTION, &mut self.debug.retention);
        override_number(&lookup, ENV_ACTIVITY_CAP, &mut self.activity.cap);
        override_number(&lookup, ENV_NOTIFY_TIMEOUT_MS, &mut self.notifier.timeout_ms);
        override_number(&lookup, ENV_REACT_MAX_ITERS, &mut self.agents.react_max_iters);
        override_number(&lookup, ENV_STREAM_CAPACITY, &mut self.stream.capacity);
        if let Some(model) = lookup(ENV_MODEL).filter(|value| !value.trim().is_empty()) {
            self.agents.model = Some(model.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.activity.cap == 0 {
            return Err(EngineError::InvalidConfig("activity.cap must be > 0".into()));
        }
        if self.stream.capacity == 0 {
            return Err(EngineError::InvalidConfig("stream.capacity must be > 0".into()));
        }
        if self.debug.retention == 0 {
            return Err(EngineError::InvalidConfig("debug.retention must be > 0".into()));
        }
        Ok(())
    }

    /// React iteration bound after the hard cap.
    #[must_use]
    pub fn react_max_iters(&self) -> usize {
        self.agents.react_max_iters.clamp(1, MAX_REACT_ITERATIONS)
    }

    #[must_use]
    pub fn notifier_timeout(&self) -> Duration {
        Duration::from_millis(self.notifier.timeout_ms.max(1))
    }

    #[must_use]
    pub fn agent_config(&self, model: Option<SharedModel>, stream: Option<StreamBus>) -> AgentConfig {
        AgentConfig {
            model,
            stream,
            max_iterations: self.react_max_iters(),
            model_timeout: Duration::from_secs(self.agents.timeout_secs.max(1)),
            command_timeout: Duration::from_secs(self.agents.command_timeout_secs.max(1)),
        }
    }

    /// The configuration as served to clients: secrets replaced, clamps applied.
    #[must_use]
    pub fn effective_json(&self) -> Value {
        let mut effective = self.clone();
        effective.agents.react_max_iters = self.react_max_iters();
        let value = serde_json::to_value(&effective).unwrap_or(Value::Null);
        redacted(value)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn override_number<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => log::warn!("ignoring {name}={raw}: not a number"),
    }
}
