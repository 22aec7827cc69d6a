//! Engine configuration and learner identity.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::duration_secs;
use crate::graders::QueueContext;
use crate::script::ScriptCache;

/// Errors that can occur when loading engine configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// External grader queue settings known to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Minimum time between queued submissions, in seconds.
    #[serde(default = "default_waittime", with = "duration_secs")]
    pub waittime: Duration,

    /// URL the queue calls back with results.
    #[serde(default)]
    pub callback_url: String,

    /// Queue used by graders that don't name one.
    #[serde(default)]
    pub default_queue_name: Option<String>,
}

fn default_waittime() -> Duration {
    Duration::from_secs(5)
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            waittime: default_waittime(),
            callback_url: String::new(),
            default_queue_name: None,
        }
    }
}

/// Sizing for the script context cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptCacheSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,

    /// Time-to-live of a cached context, in seconds.
    #[serde(default = "default_ttl", with = "duration_secs")]
    pub ttl: Duration,
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

impl Default for ScriptCacheSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl: default_ttl(),
        }
    }
}

impl ScriptCacheSettings {
    pub fn build(&self) -> ScriptCache {
        ScriptCache::new(self.max_entries, self.ttl)
    }
}

/// Engine-wide configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub queue: QueueSettings,

    /// Show grader error detail to staff.
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub script_cache: ScriptCacheSettings,
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.script_cache.max_entries == 0 {
            return Err(ConfigError::Invalid(
                "script_cache.max_entries must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Queue routing for one learner.
    pub fn queue_context(&self, learner: &LearnerContext) -> QueueContext {
        QueueContext {
            callback_url: self.queue.callback_url.clone(),
            default_queue_name: self.queue.default_queue_name.clone(),
            anonymous_id: learner.anonymous_id.clone(),
        }
    }
}

/// Who is looking at the problem.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LearnerContext {
    /// Stable learner id; per-learner seeds fall back to `"0"` without it.
    #[serde(default)]
    pub learner_id: Option<String>,

    /// Anonymized id sent to external graders.
    #[serde(default)]
    pub anonymous_id: String,

    #[serde(default)]
    pub is_staff: bool,
}

impl LearnerContext {
    pub fn new(learner_id: impl Into<String>, anonymous_id: impl Into<String>) -> Self {
        Self {
            learner_id: Some(learner_id.into()),
            anonymous_id: anonymous_id.into(),
            is_staff: false,
        }
    }

    pub fn staff(mut self) -> Self {
        self.is_staff = true;
        self
    }
}
