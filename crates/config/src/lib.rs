//! Configuration loading, validation, and management for sleuth.
//!
//! Loads configuration from `~/.sleuth/config.toml` with environment
//! variable overrides. Validates all settings at startup.
//!
//! Every numeric policy knob of the agent (budget ratios, summarization
//! threshold, retry ceiling, backoff cap) lives here rather than in code,
//! since good values depend on the model in use.

use serde::{Deserialize, Serialize};
use sleuth_core::ModelProfile;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.sleuth/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Backend name ("openai", "openrouter", "ollama", ...)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override for the backend's base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Model driving the agent loop
    #[serde(default)]
    pub model: ModelConfig,

    /// Model used for summarization and seed evaluation; defaults to `model`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary_model: Option<ModelConfig>,

    /// Request gateway settings
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Agent loop policy
    #[serde(default)]
    pub agent: AgentConfig,

    /// Project being searched
    #[serde(default)]
    pub project: ProjectConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_temperature() -> f32 {
    0.0
}
fn default_true() -> bool {
    true
}

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
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("model", &self.model)
            .field("summary_model", &self.summary_model)
            .field("gateway", &self.gateway)
            .field("agent", &self.agent)
            .field("project", &self.project)
            .finish()
    }
}

/// A model and what it supports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub name: String,

    /// Backend implements function calling; otherwise tool calls are emulated via JSON
    #[serde(default = "default_true")]
    pub native_tools: bool,

    #[serde(default = "default_true")]
    pub parallel_tool_calls: bool,
}

fn default_model() -> String {
    "gpt-4o".into()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            native_tools: true,
            parallel_tool_calls: true,
        }
    }
}

impl ModelConfig {
    pub fn profile(&self) -> ModelProfile {
        ModelProfile {
            name: self.name.clone(),
            native_tools: self.native_tools,
            parallel_tool_calls: self.parallel_tool_calls,
        }
    }
}

/// Request gateway: retries, backoff and the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Upper bound on a single backoff sleep
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Granularity at which backoff sleeps check for cancellation
    #[serde(default = "default_backoff_tick_ms")]
    pub backoff_tick_ms: u64,

    /// Write every request and response to an append-only log
    #[serde(default = "default_true")]
    pub audit: bool,

    /// Audit log location; defaults to `~/.sleuth/history/llm-<date>.log`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_log: Option<PathBuf>,
}

fn default_max_attempts() -> u32 {
    8
}
fn default_backoff_cap_secs() -> u64 {
    16
}
fn default_backoff_tick_ms() -> u64 {
    100
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_cap_secs: default_backoff_cap_secs(),
            backoff_tick_ms: default_backoff_tick_ms(),
            audit: true,
            audit_log: None,
        }
    }
}

impl GatewayConfig {
    /// The audit log path to use, or `None` when auditing is off.
    pub fn audit_path(&self) -> Option<PathBuf> {
        if !self.audit {
            return None;
        }
        Some(self.audit_log.clone().unwrap_or_else(|| {
            let date = chrono::Local::now().format("%Y-%m-%d");
            AppConfig::config_dir()
                .join("history")
                .join(format!("llm-{date}.log"))
        }))
    }
}

/// Agent loop policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Soft ceiling on the approximate size of the action history
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    /// Fraction of the budget after which only finalize tools are offered
    #[serde(default = "default_beast_mode_ratio")]
    pub beast_mode_ratio: f64,

    /// Fraction of the budget at which the session stops
    #[serde(default = "default_stop_ratio")]
    pub stop_ratio: f64,

    /// Results larger than this (approximate tokens) are summarized
    #[serde(default = "default_summarize_threshold")]
    pub summarize_threshold_tokens: usize,

    /// Tools whose large results are summarized
    #[serde(default = "default_summarizable_tools")]
    pub summarizable_tools: Vec<String>,
}

fn default_token_budget() -> usize {
    64_000
}
fn default_beast_mode_ratio() -> f64 {
    0.8
}
fn default_stop_ratio() -> f64 {
    0.95
}
fn default_summarize_threshold() -> usize {
    1000
}
fn default_summarizable_tools() -> Vec<String> {
    [
        "searchSymbols",
        "getUsages",
        "getClassSources",
        "searchSubstrings",
        "searchFilenames",
        "getFileContents",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            beast_mode_ratio: default_beast_mode_ratio(),
            stop_ratio: default_stop_ratio(),
            summarize_threshold_tokens: default_summarize_threshold(),
            summarizable_tools: default_summarizable_tools(),
        }
    }
}

/// The codebase the agent searches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.sleuth/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `SLEUTH_API_KEY`, then `OPENAI_API_KEY`, then `OPENROUTER_API_KEY` (only if no key is configured)
    /// - `SLEUTH_PROVIDER`, `SLEUTH_BASE_URL`
    /// - `SLEUTH_MODEL`, `SLEUTH_SUMMARY_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
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

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = env("SLEUTH_API_KEY")
                .or_else(|| env("OPENAI_API_KEY"))
                .or_else(|| env("OPENROUTER_API_KEY"));
        }
        if let Some(provider) = env("SLEUTH_PROVIDER") {
            self.provider = provider;
        }
        if let Some(url) = env("SLEUTH_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(model) = env("SLEUTH_MODEL") {
            self.model.name = model;
        }
        if let Some(model) = env("SLEUTH_SUMMARY_MODEL") {
            let mut summary = self.summary_model.clone().unwrap_or_else(|| self.model.clone());
            summary.name = model;
            self.summary_model = Some(summary);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sleuth")
    }

    /// Model used for summarization and seed evaluation.
    pub fn summary_profile(&self) -> ModelProfile {
        self.summary_model.as_ref().unwrap_or(&self.model).profile()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.gateway.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.max_attempts must be at least 1".into(),
            ));
        }

        if self.gateway.backoff_tick_ms == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.backoff_tick_ms must be at least 1".into(),
            ));
        }

        if self.agent.token_budget == 0 {
            return Err(ConfigError::ValidationError(
                "agent.token_budget must be > 0".into(),
            ));
        }

        let agent = &self.agent;
        if !(agent.beast_mode_ratio > 0.0
            && agent.beast_mode_ratio < agent.stop_ratio
            && agent.stop_ratio <= 1.0)
        {
            return Err(ConfigError::ValidationError(
                "agent ratios must satisfy 0 < beast_mode_ratio < stop_ratio <= 1".into(),
            ));
        }

        if self.model.name.trim().is_empty() {
            return Err(ConfigError::ValidationError("model.name is empty".into()));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: None,
            temperature: default_temperature(),
            max_tokens: None,
            model: ModelConfig::default(),
            summary_model: None,
            gateway: GatewayConfig::default(),
            agent: AgentConfig::default(),
            project: ProjectConfig::default(),
        }
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
