//! Configuration management
//!
//! Loads, validates, and persists the engine configuration. Configuration
//! is stored in TOML format at `~/.archon/config.toml` and created with
//! defaults on first run.
//!
//! # Configuration Sections
//!
//! - **core**: data directory, database path, log level
//! - **governor**: policy mode and risk thresholds
//! - **llm**: provider endpoints, models, API-key env vars, routing rules
//! - **api**: REST bind address and optional API key
//! - **cron**: scheduler tick interval
//!
//! API keys never live in the config file itself; each provider section
//! names the environment variable that holds its key, so a config file can
//! be committed or shared without leaking credentials.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Governor policy settings
    #[serde(default)]
    pub governor: GovernorConfig,

    /// Model provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// REST API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Cron scheduler settings
    #[serde(default)]
    pub cron: CronConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Data directory (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Database file name inside the data directory
    #[serde(default = "default_db_file")]
    pub db_file: String,

    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
            log_level: default_log_level(),
        }
    }
}

/// Governor policy mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GovernorMode {
    /// Approve everything; decisions are still audited
    Off,
    /// Score and log, never block
    AuditOnly,
    /// Block at threshold, caller may override explicitly
    SoftBlock,
    /// Block at threshold, no override path
    HardBlock,
}

impl GovernorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GovernorMode::Off => "off",
            GovernorMode::AuditOnly => "audit_only",
            GovernorMode::SoftBlock => "soft_block",
            GovernorMode::HardBlock => "hard_block",
        }
    }
}

/// Governor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Policy mode
    #[serde(default = "default_governor_mode")]
    pub mode: GovernorMode,

    /// Score at or above which an action is flagged
    #[serde(default = "default_warn_threshold")]
    pub warn_threshold: u8,

    /// Score at or above which an action is blocked
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u8,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            mode: default_governor_mode(),
            warn_threshold: default_warn_threshold(),
            block_threshold: default_block_threshold(),
        }
    }
}

/// Model provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Default provider priority order, first is most preferred
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,

    /// Per-attempt provider timeout in seconds
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,

    /// Routing rules consulted before the default priority order
    #[serde(default)]
    pub routing: Vec<RoutingRule>,

    /// OpenAI-compatible provider settings
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Anthropic provider settings
    #[serde(default)]
    pub anthropic: AnthropicConfig,

    /// Ollama local provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            timeout_secs: default_provider_timeout(),
            routing: Vec::new(),
            openai: OpenAiConfig::default(),
            anthropic: AnthropicConfig::default(),
            ollama: OllamaConfig::default(),
        }
    }
}

/// A routing rule ranks providers for a given task type and budget.
///
/// Empty `task_type` or `budget` matches anything, so a rule can key on
/// either dimension alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    #[serde(default)]
    pub task_type: String,

    #[serde(default)]
    pub budget: String,

    /// Provider names in preference order
    pub providers: Vec<String>,
}

/// OpenAI-compatible provider configuration
///
/// Also covers Groq, Mistral, and any other endpoint speaking the chat
/// completions wire format; point `base_url` at the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// Estimated cost per 1K tokens in USD, used for budget bias
    #[serde(default = "default_openai_cost")]
    pub cost_per_1k: f64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_key_env(),
            cost_per_1k: default_openai_cost(),
        }
    }
}

/// Anthropic provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,

    #[serde(default = "default_anthropic_model")]
    pub model: String,

    #[serde(default = "default_anthropic_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_anthropic_cost")]
    pub cost_per_1k: f64,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            base_url: default_anthropic_base_url(),
            model: default_anthropic_model(),
            api_key_env: default_anthropic_key_env(),
            cost_per_1k: default_anthropic_cost(),
        }
    }
}

/// Ollama local provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama is opt-in; no key required once enabled
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    #[serde(default = "default_ollama_model")]
    pub model: String,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

/// REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address for the REST server
    #[serde(default = "default_bind")]
    pub bind: String,

    /// API key required on /v1/* routes; empty disables auth
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            api_key: String::new(),
        }
    }
}

/// Cron scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Seconds between scheduler ticks
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
        }
    }
}

// Default value functions

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.archon")
}

fn default_db_file() -> String {
    "archon.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_governor_mode() -> GovernorMode {
    GovernorMode::SoftBlock
}

fn default_warn_threshold() -> u8 {
    70
}

fn default_block_threshold() -> u8 {
    90
}

fn default_priority() -> Vec<String> {
    vec![
        "anthropic".to_string(),
        "openai".to_string(),
        "ollama".to_string(),
    ]
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_openai_cost() -> f64 {
    0.002
}

fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}

fn default_anthropic_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_cost() -> f64 {
    0.004
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8700".to_string()
}

fn default_tick_seconds() -> u64 {
    15
}

impl Default for Config {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            governor: GovernorConfig::default(),
            llm: LlmConfig::default(),
            api: ApiConfig::default(),
            cron: CronConfig::default(),
        }
    }
}

impl Config {
    /// Default configuration file path (`~/.archon/config.toml`)
    pub fn default_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("could not determine home directory".into()))?;
        Ok(home.join(".archon").join("config.toml"))
    }

    /// Load configuration from the default location, creating it with
    /// defaults on first run.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let path = Self::default_path()?;
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            let config = Config::default();
            config.save(&path)?;
            tracing::info!("Created default configuration at {}", path.display());
            Ok(config)
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|e| EngineError::Config(format!("failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write configuration to the given path, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| EngineError::Config(format!("failed to create config dir: {}", e)))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Config(format!("failed to serialize config: {}", e)))?;
        fs::write(path, contents)
            .map_err(|e| EngineError::Config(format!("failed to write config: {}", e)))?;
        Ok(())
    }

    /// Validate threshold ordering and routing-rule targets.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.governor.warn_threshold > self.governor.block_threshold {
            return Err(EngineError::Config(format!(
                "governor warn threshold ({}) exceeds block threshold ({})",
                self.governor.warn_threshold, self.governor.block_threshold
            )));
        }
        for rule in &self.llm.routing {
            if rule.providers.is_empty() {
                return Err(EngineError::Config(format!(
                    "routing rule for task_type='{}' budget='{}' lists no providers",
                    rule.task_type, rule.budget
                )));
            }
        }
        Ok(())
    }

    /// Resolved database path (data_dir + db_file, with ~ expansion).
    pub fn db_path(&self) -> PathBuf {
        expand_home(&self.core.data_dir).join(&self.core.db_file)
    }
}

/// Expand a leading ~ to the user's home directory.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.governor.mode, GovernorMode::SoftBlock);
        assert_eq!(config.governor.block_threshold, 90);
        assert_eq!(config.llm.priority[0], "anthropic");
    }

    #[test]
    fn test_threshold_ordering_rejected() {
        let mut config = Config::default();
        config.governor.warn_threshold = 95;
        config.governor.block_threshold = 90;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_routing_rule_rejected() {
        let mut config = Config::default();
        config.llm.routing.push(RoutingRule {
            task_type: "code".into(),
            budget: String::new(),
            providers: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = Config::default();
        let s = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&s).unwrap();
        assert_eq!(parsed.governor.mode, config.governor.mode);
        assert_eq!(parsed.llm.openai.base_url, config.llm.openai.base_url);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Config = toml::from_str(
            r#"
            [governor]
            mode = "hard_block"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.governor.mode, GovernorMode::HardBlock);
        assert_eq!(parsed.governor.block_threshold, 90);
        assert_eq!(parsed.api.bind, "127.0.0.1:8700");
    }

    #[test]
    fn test_governor_mode_as_str() {
        assert_eq!(GovernorMode::Off.as_str(), "off");
        assert_eq!(GovernorMode::AuditOnly.as_str(), "audit_only");
        assert_eq!(GovernorMode::SoftBlock.as_str(), "soft_block");
        assert_eq!(GovernorMode::HardBlock.as_str(), "hard_block");
    }
}
