//! Load and validate the switchboard YAML configuration.
//!
//! One file describes the whole deployment: the provider table (with
//! per-provider circuit-breaker and fallback settings), subagent routing
//! rules, storage paths, and the server section. Everything is validated
//! up front: an undefined upstream reference or a fallback cycle is a
//! startup failure, never a request-time surprise.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub subagents: SubagentsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Per-request deadline propagated to the upstream round trip.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8082,
            request_timeout_secs: 300,
        }
    }
}

/// Wire format a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFormat {
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub format: ProviderFormat,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub fallback_provider: Option<String>,
}

fn default_max_retries() -> u32 {
    2
}

/// Breaker parameters. `timeout` is whole seconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub max_failures: u32,
    pub timeout: u64,
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            timeout: 30,
            enabled: true,
        }
    }
}

/// Subagent routing rules. `mappings` targets have the shape
/// `upstream:model` (split on the first colon; the model part may contain
/// further colons). `prompts` holds each subagent's canonical prompt text,
/// which the router fingerprints at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubagentsConfig {
    pub enable: bool,
    pub mappings: BTreeMap<String, String>,
    pub prompts: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite catalogue file.
    pub catalog_path: PathBuf,
    /// Root of the conversation log tree.
    pub conversations_root: PathBuf,
    /// Optional JSONL transaction log; absent means no archival.
    pub archive_path: Option<PathBuf>,
    /// Truncation limit for full-text-indexed message text.
    pub max_fts_text: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("catalog.db"),
            conversations_root: PathBuf::from("~/.claude/projects"),
            archive_path: None,
            max_fts_text: 5000,
        }
    }
}

/// Expands a leading `~/` using `$HOME`. Paths without it pass through.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    /// The provider serving unrouted requests: the anthropic-format entry
    /// whose base URL names the canonical vendor host, else the first
    /// anthropic-format entry. Validation guarantees one exists.
    pub fn default_provider(&self) -> Option<&str> {
        let anthropic =
            |(_, p): &(&String, &ProviderConfig)| p.format == ProviderFormat::Anthropic;
        self.providers
            .iter()
            .filter(|entry| anthropic(entry))
            .find(|(_, p)| p.base_url.contains("api.anthropic.com"))
            .or_else(|| self.providers.iter().find(anthropic))
            .map(|(name, _)| name.as_str())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(invalid("at least one provider must be configured"));
        }

        for (name, provider) in &self.providers {
            if provider.base_url.trim().is_empty() {
                return Err(invalid(format!("provider '{name}': base_url is empty")));
            }
            if !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                return Err(invalid(format!(
                    "provider '{name}': base_url must be http(s), got '{}'",
                    provider.base_url
                )));
            }
            let breaker = &provider.circuit_breaker;
            if breaker.enabled {
                if breaker.max_failures == 0 {
                    return Err(invalid(format!(
                        "provider '{name}': circuit_breaker.max_failures must be at least 1"
                    )));
                }
                if breaker.timeout == 0 {
                    return Err(invalid(format!(
                        "provider '{name}': circuit_breaker.timeout must be positive"
                    )));
                }
            }
        }

        if self
            .providers
            .values()
            .all(|p| p.format != ProviderFormat::Anthropic)
        {
            return Err(invalid(
                "no anthropic-format provider configured; one is required as the default route",
            ));
        }

        self.validate_fallbacks()?;
        self.validate_subagents()?;
        Ok(())
    }

    /// Every fallback chain must reference defined providers and terminate;
    /// each node has at most one outgoing edge, so a repeated visit on the
    /// walk from any start is a cycle.
    fn validate_fallbacks(&self) -> Result<(), ConfigError> {
        for start in self.providers.keys() {
            let mut seen = vec![start.as_str()];
            let mut current = start.as_str();
            while let Some(next) = self
                .providers
                .get(current)
                .and_then(|p| p.fallback_provider.as_deref())
            {
                if !self.providers.contains_key(next) {
                    return Err(invalid(format!(
                        "provider '{current}': fallback_provider '{next}' is not defined"
                    )));
                }
                if seen.contains(&next) {
                    return Err(invalid(format!(
                        "fallback cycle detected: {} -> {next}",
                        seen.join(" -> ")
                    )));
                }
                seen.push(next);
                current = next;
            }
        }
        Ok(())
    }

    fn validate_subagents(&self) -> Result<(), ConfigError> {
        if !self.subagents.enable {
            return Ok(());
        }
        for (label, target) in &self.subagents.mappings {
            let Some((upstream, model)) = target.split_once(':') else {
                return Err(invalid(format!(
                    "subagent '{label}': mapping '{target}' must have the shape 'upstream:model'"
                )));
            };
            if upstream.is_empty() || model.is_empty() {
                return Err(invalid(format!(
                    "subagent '{label}': mapping '{target}' must have the shape 'upstream:model'"
                )));
            }
            if !self.providers.contains_key(upstream) {
                return Err(invalid(format!(
                    "subagent '{label}': upstream '{upstream}' is not defined"
                )));
            }
            match self.subagents.prompts.get(label) {
                Some(prompt) if !prompt.trim().is_empty() => {}
                _ => {
                    return Err(invalid(format!(
                        "subagent '{label}': no prompt configured (needed to fingerprint)"
                    )))
                }
            }
        }
        Ok(())
    }
}
