//! Runtime configuration: queue endpoint, credentials, and logging.
//!
//! ## Configuration Format
//! ```yaml
//! xqueue:
//!   url: "https://xqueue.example.com"
//!   username: lms
//!   password: "..."          # Optional, falls back to XQUEUE_PASSWORD env
//!   connect_timeout: 3050ms
//!   read_timeout: 10s
//! logging:
//!   filter: "info,assay_core=debug"
//!   format: json
//! ```

use assay_core::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Environment variable consulted when the config carries no username.
pub const XQUEUE_USERNAME_ENV: &str = "XQUEUE_USERNAME";

/// Environment variable consulted when the config carries no password.
pub const XQUEUE_PASSWORD_ENV: &str = "XQUEUE_PASSWORD";

/// Durations written as humantime strings (`"3050ms"`, `"10s"`).
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// Connection settings for the external grading queue.
#[derive(Debug, Deserialize)]
pub struct XQueueConfig {
    /// Base URL; `/xqueue/submit/` and `/xqueue/login/` are appended.
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default, deserialize_with = "deserialize_secret")]
    pub password: Option<SecretString>,

    #[serde(default = "default_connect_timeout", with = "humantime_duration")]
    pub connect_timeout: Duration,

    #[serde(default = "default_read_timeout", with = "humantime_duration")]
    pub read_timeout: Duration,
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(3050)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(10)
}

impl XQueueConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            password: None,
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
        }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::from(password.into()));
        self
    }

    /// Fill missing credentials from `lookup`, keyed by environment variable
    /// name. Values already present in the config win.
    pub fn fill_credentials(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.username.is_none() {
            self.username = lookup(XQUEUE_USERNAME_ENV);
        }
        if self.password.is_none() {
            self.password = lookup(XQUEUE_PASSWORD_ENV).map(SecretString::from);
        }
    }

    /// Whether both a username and a non-empty password are known.
    pub fn has_credentials(&self) -> bool {
        self.username.is_some()
            && self
                .password
                .as_ref()
                .is_some_and(|p| !p.expose_secret().is_empty())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "xqueue.url must start with http:// or https://".to_string(),
            ));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "xqueue timeouts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive string.
    #[serde(default = "default_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            format: LogFormat::default(),
        }
    }
}

/// Everything the runtime needs to start.
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    pub xqueue: XQueueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Parse YAML, filling credentials from the process environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.finish(|name| std::env::var(name).ok())
    }

    /// Parse JSON, filling credentials from the process environment.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.finish(|name| std::env::var(name).ok())
    }

    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
        .with_context(|| format!("parsing runtime config {}", path.display()))?;
        Ok(config)
    }

    fn finish(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        self.xqueue.fill_credentials(lookup);
        self.xqueue.validate()?;
        Ok(self)
    }
}
