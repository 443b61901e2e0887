//! Configuration loading, validation, and credential resolution for LeadScout.
//!
//! Loads configuration from `~/.leadscout/config.toml` with environment
//! variable overrides. Validates all settings at startup. API keys resolve
//! through the primary config first, then a provider-specific fallback file;
//! a key missing from every source is fatal before any run begins.

use leadscout_core::error::CredentialsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.leadscout/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the upstream provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Upstream provider name (used for credential lookup and logging)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Preferred model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Ordered fallback chain tried when the preferred model is blocked
    #[serde(default = "default_fallback_models")]
    pub fallback_models: Vec<String>,

    /// Default temperature
    #[serde(default)]
    pub temperature: f32,

    /// Default max tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Rate/model governor settings
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Think-loop settings
    #[serde(default)]
    pub agent: AgentConfig,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_model() -> String {
    "deepseek/deepseek-chat".into()
}
fn default_fallback_models() -> Vec<String> {
    vec![
        "anthropic/claude-3-haiku".into(),
        "meta-llama/llama-3-8b-instruct".into(),
    ]
}
fn default_max_tokens() -> u32 {
    2048
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("base_url", &self.base_url)
            .field("default_model", &self.default_model)
            .field("fallback_models", &self.fallback_models)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("governor", &self.governor)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Settings for the rate/model governor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Base cooldown applied on the first endpoint-unsupported failure
    #[serde(default = "default_cooldown_base_ms")]
    pub cooldown_base_ms: u64,

    /// Cooldown ceiling
    #[serde(default = "default_cooldown_cap_ms")]
    pub cooldown_cap_ms: u64,

    /// Initial minimum spacing between requests to one model
    #[serde(default)]
    pub min_spacing_ms: u64,

    /// Spacing ceiling
    #[serde(default = "default_max_spacing_ms")]
    pub max_spacing_ms: u64,

    /// Multiplier applied to spacing on a provider rate-limit signal
    #[serde(default = "default_spacing_backoff")]
    pub spacing_backoff: f64,

    /// Multiplier applied to spacing on each success (slow decay)
    #[serde(default = "default_spacing_decay")]
    pub spacing_decay: f64,
}

fn default_cooldown_base_ms() -> u64 {
    1_000
}
fn default_cooldown_cap_ms() -> u64 {
    60_000
}
fn default_max_spacing_ms() -> u64 {
    30_000
}
fn default_spacing_backoff() -> f64 {
    2.0
}
fn default_spacing_decay() -> f64 {
    0.9
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            cooldown_base_ms: default_cooldown_base_ms(),
            cooldown_cap_ms: default_cooldown_cap_ms(),
            min_spacing_ms: 0,
            max_spacing_ms: default_max_spacing_ms(),
            spacing_backoff: default_spacing_backoff(),
            spacing_decay: default_spacing_decay(),
        }
    }
}

/// Settings for the step scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Deadline for one decision cycle's upstream call
    #[serde(default = "default_decide_timeout_secs")]
    pub decide_timeout_secs: u64,

    /// Maximum decision cycles per run
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,

    /// Consecutive identical action failures before the run is failed
    #[serde(default = "default_repeated_failure_limit")]
    pub repeated_failure_limit: u32,
}

fn default_decide_timeout_secs() -> u64 {
    30
}
fn default_max_steps() -> u32 {
    20
}
fn default_repeated_failure_limit() -> u32 {
    3
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            decide_timeout_secs: default_decide_timeout_secs(),
            max_steps: default_max_steps(),
            repeated_failure_limit: default_repeated_failure_limit(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.leadscout/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `LEADSCOUT_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        // Environment variable overrides (highest priority)
        if config.api_key.is_none() {
            config.api_key = std::env::var("LEADSCOUT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("LEADSCOUT_MODEL") {
            config.default_model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".leadscout")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.governor.cooldown_base_ms == 0 {
            return Err(ConfigError::ValidationError(
                "governor.cooldown_base_ms must be > 0".into(),
            ));
        }

        if self.governor.spacing_backoff < 1.0 {
            return Err(ConfigError::ValidationError(
                "governor.spacing_backoff must be >= 1.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be > 0".into(),
            ));
        }

        if self.agent.repeated_failure_limit == 0 {
            return Err(ConfigError::ValidationError(
                "agent.repeated_failure_limit must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve the API key: config/env first, then the provider-specific
    /// fallback credentials file under the config directory.
    ///
    /// Call this at construction time — a missing key must surface before
    /// any run begins, never in the middle of one.
    pub fn resolve_api_key(&self) -> Result<String, CredentialsError> {
        self.resolve_api_key_in(&Self::config_dir())
    }

    /// Resolve the API key using `config_dir` for the fallback file.
    /// Split out so tests can point at a temp directory.
    pub fn resolve_api_key_in(&self, config_dir: &Path) -> Result<String, CredentialsError> {
        if let Some(key) = &self.api_key {
            if !key.is_empty() {
                return Ok(key.clone());
            }
        }

        let fallback_path = config_dir.join("credentials.toml");
        if let Ok(content) = std::fs::read_to_string(&fallback_path) {
            if let Ok(creds) = toml::from_str::<CredentialsFile>(&content) {
                if let Some(key) = creds.key_for(&self.provider) {
                    return Ok(key);
                }
            }
        }

        Err(CredentialsError::Missing {
            provider: self.provider.clone(),
            fallback_path: fallback_path.display().to_string(),
        })
    }

    /// Generate a default config TOML string (for `config-init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: default_base_url(),
            default_model: default_model(),
            fallback_models: default_fallback_models(),
            temperature: 0.0,
            max_tokens: default_max_tokens(),
            governor: GovernorConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

/// Shape of the fallback credentials file:
///
/// ```toml
/// [openrouter]
/// api_key = "sk-or-..."
/// ```
#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(flatten)]
    providers: std::collections::HashMap<String, ProviderCredentials>,
}

#[derive(Debug, Deserialize)]
struct ProviderCredentials {
    api_key: Option<String>,
}

impl CredentialsFile {
    fn key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .filter(|k| !k.is_empty())
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
