use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::events::EventOptions;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub syntax: SyntaxConfig,
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntaxConfig {
    pub tokenizer: TokenizerConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenizerConfig {
    pub context: ContextConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Parser deadline in milliseconds.
    pub deadline: u64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { deadline: 5000 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub server: ServerConfig,
    pub std: StdConfig,
    pub events: EventsConfig,
    pub interpreter: InterpreterConfig,
}

/// Carried for the host server; the interpreter never reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub max_concurrency: usize,
    pub max_upload_size_byte: u64,
    /// MiB
    pub max_upload_file_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ":3000".into(),
            max_concurrency: 10,
            max_upload_size_byte: 1_000_000,
            max_upload_file_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StdConfig {
    /// `:all` or comma separated package names.
    pub allow: String,
    /// `-` or comma separated package names.
    pub disallow: String,
}

impl Default for StdConfig {
    fn default() -> Self {
        Self {
            allow: ":all".into(),
            disallow: "-".into(),
        }
    }
}

impl StdConfig {
    /// Whether `@std/<name>` may be imported.
    pub fn allows(&self, name: &str) -> bool {
        let listed = |list: &str| list.split(',').map(str::trim).any(|item| item == name);
        let allowed = self.allow.trim() == ":all" || listed(&self.allow);
        let denied = self.disallow.trim() != "-" && listed(&self.disallow);
        allowed && !denied
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    pub max_workers_per_topic: usize,
    pub channel_buffer_size: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        let options = EventOptions::default();
        Self {
            enabled: false,
            max_workers_per_topic: options.max_workers_per_topic,
            channel_buffer_size: options.channel_buffer_size,
        }
    }
}

impl EventsConfig {
    pub fn options(&self) -> EventOptions {
        EventOptions {
            max_workers_per_topic: self.max_workers_per_topic,
            channel_buffer_size: self.channel_buffer_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    pub import: ImportConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Path aliases; `{current_dir}` expands to the working directory.
    pub prefix: BTreeMap<String, String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            prefix: BTreeMap::from([("~".to_string(), "{current_dir}".to_string())]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn parse_deadline(&self) -> Duration {
        Duration::from_millis(self.syntax.tokenizer.context.deadline)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            "runtime:\n  events:\n    enabled: true\n    channel_buffer_size: 16\nunknown: 1\n",
        )
        .unwrap();
        assert!(config.runtime.events.enabled);
        assert_eq!(config.runtime.events.channel_buffer_size, 16);
        assert_eq!(config.runtime.events.max_workers_per_topic, 10);
        assert_eq!(config.syntax.tokenizer.context.deadline, 5000);
        assert_eq!(config.runtime.server.address, ":3000");
        assert_eq!(
            config.runtime.interpreter.import.prefix.get("~").map(String::as_str),
            Some("{current_dir}")
        );
    }

    #[test]
    fn test_yaml_round_trip() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(Config::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn test_std_gating() {
        let mut std = StdConfig::default();
        assert!(std.allows("math"));
        std.disallow = "process, os".into();
        assert!(!std.allows("os"));
        std.allow = "math,time".into();
        assert!(std.allows("time"));
        assert!(!std.allows("json"));
    }
}
