//! Configuration management
//!
//! This module handles loading, validation, and management of the Parley configuration.
//! Configuration is stored in TOML format at ~/.parley/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **llm**: Model provider selection and per-provider settings
//! - **agent**: Recursion guard and tool timeouts
//! - **retrieval**: Retrieval sources and pipeline limits
//! - **threads**: Default per-thread tool category settings
//! - **extensions**: Which extension modules are discovered and what they may do
//!
//! # Examples
//!
//! ```no_run
//! use parley_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Recursion limit: {}", config.agent.recursion_limit);
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    pub core: CoreConfig,

    /// LLM provider configuration
    pub llm: LLMConfig,

    /// State machine limits
    #[serde(default)]
    pub agent: AgentConfig,

    /// Retrieval pipeline settings
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Defaults for newly created threads
    #[serde(default)]
    pub threads: ThreadDefaults,

    /// Extension module discovery
    #[serde(default)]
    pub extensions: ExtensionsConfig,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Provider used for every model call (ollama, openai)
    pub provider: String,

    /// Timeout for a single model call in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,

    /// OpenAI provider settings
    #[serde(default)]
    pub openai: OpenAIConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

/// OpenAI provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIConfig {
    /// Base URL for OpenAI-compatible API
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_openai_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_openai_api_key_env")]
    pub api_key_env: String,
}

/// Routing state machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum PLAN→DISPATCH transitions per turn
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,

    /// Timeout for a single external tool execution in seconds
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,
}

/// A retrieval source the pipeline may select
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceConfig {
    /// Unique source name (e.g. "DOCS")
    pub name: String,

    /// What the source contains; matched against the query during selection
    pub description: String,

    /// Embedding configuration the source was indexed with
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Passages fetched per selected source
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Maximum number of sources selected per retrieval
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Rephrasing only happens when the thread holds more prior messages than this
    #[serde(default = "default_rephrase_min_history")]
    pub rephrase_min_history: usize,

    /// Known retrieval sources
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Settings applied to threads created without explicit settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadDefaults {
    #[serde(default = "default_true")]
    pub retrieval_enabled: bool,

    #[serde(default = "default_true")]
    pub external_tools_enabled: bool,

    /// Embedding configuration new threads are bound to
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

/// Extension discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    /// Extension modules to discover (the built-in `core` module is always discovered)
    #[serde(default = "default_enabled_modules")]
    pub enabled: Vec<String>,

    /// Grant the `proxy:spawn` scope to extension modules
    #[serde(default)]
    pub allow_proxy: bool,

    /// Subprocess query proxy settings
    #[serde(default)]
    pub query_proxy: Option<QueryProxyConfig>,
}

/// Subprocess query proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryProxyConfig {
    /// Executable serving the proxy tools
    pub command: String,

    /// Extra arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.parley/data")
}

fn default_true() -> bool {
    true
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_recursion_limit() -> usize {
    50
}

fn default_tool_timeout() -> u64 {
    60
}

fn default_embedding_model() -> String {
    "default".to_string()
}

fn default_top_k() -> usize {
    4
}

fn default_max_sources() -> usize {
    2
}

fn default_rephrase_min_history() -> usize {
    2
}

fn default_enabled_modules() -> Vec<String> {
    vec!["session-notes".to_string(), "query-proxy".to_string()]
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            api_key_env: default_openai_api_key_env(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            recursion_limit: default_recursion_limit(),
            tool_timeout_secs: default_tool_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_sources: default_max_sources(),
            rephrase_min_history: default_rephrase_min_history(),
            sources: Vec::new(),
        }
    }
}

impl Default for ThreadDefaults {
    fn default() -> Self {
        Self {
            retrieval_enabled: true,
            external_tools_enabled: true,
            embedding_model: default_embedding_model(),
        }
    }
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_modules(),
            allow_proxy: false,
            query_proxy: None,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.parley/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();

        // Serialize before path expansion so the file keeps the portable `~` form
        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.parley/config.toml)
    fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".parley").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig {
                log_level: default_log_level(),
                data_dir: default_data_dir(),
            },
            llm: LLMConfig {
                provider: "ollama".to_string(),
                timeout_secs: default_llm_timeout(),
                ollama: OllamaConfig::default(),
                openai: OpenAIConfig::default(),
            },
            agent: AgentConfig::default(),
            retrieval: RetrievalConfig::default(),
            threads: ThreadDefaults::default(),
            extensions: ExtensionsConfig::default(),
        }
    }

    /// Path of the SQLite database inside the data directory
    pub fn database_path(&self) -> PathBuf {
        self.core.data_dir.join("parley.db")
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates log level and provider names
    /// - Validates numeric limits
    /// - Rejects duplicate retrieval source names
    /// - Expands ~ in the data directory
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        let valid_providers = ["ollama", "openai"];
        if !valid_providers.contains(&self.llm.provider.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid provider '{}'. Must be one of: {}",
                self.llm.provider,
                valid_providers.join(", ")
            )));
        }

        if self.agent.recursion_limit == 0 {
            return Err(EngineError::Config(
                "recursion_limit must be at least 1".to_string(),
            ));
        }
        if self.retrieval.top_k == 0 {
            return Err(EngineError::Config("top_k must be at least 1".to_string()));
        }
        if self.retrieval.max_sources == 0 {
            return Err(EngineError::Config(
                "max_sources must be at least 1".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.retrieval.sources {
            if !seen.insert(source.name.as_str()) {
                return Err(EngineError::Config(format!(
                    "Duplicate retrieval source '{}'",
                    source.name
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_creation() {
        let config = Config::default_config();

        assert_eq!(config.core.log_level, "info");
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.agent.recursion_limit, 50);
        assert_eq!(config.retrieval.rephrase_min_history, 2);
        assert!(config.threads.retrieval_enabled);
        assert!(!config.extensions.allow_proxy);
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let path = PathBuf::from("~/test");
        let expanded = expand_path(&path).unwrap();

        let home = dirs::home_dir().unwrap();
        assert_eq!(expanded, home.join("test"));
    }

    #[test]
    fn test_expand_path_without_tilde() {
        let path = PathBuf::from("/absolute/path");
        let expanded = expand_path(&path).unwrap();

        assert_eq!(expanded, path);
    }

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config = Config::from_toml_str(
            r#"
[core]
data_dir = "/tmp/parley-test"

[llm]
provider = "ollama"
"#,
        )
        .unwrap();

        assert_eq!(config.agent.recursion_limit, 50);
        assert_eq!(config.retrieval.top_k, 4);
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.extensions.enabled.len(), 2);
    }

    #[test]
    fn test_rejects_zero_recursion_limit() {
        let err = Config::from_toml_str(
            r#"
[core]
[llm]
provider = "ollama"
[agent]
recursion_limit = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("recursion_limit"));
    }

    #[test]
    fn test_rejects_duplicate_sources() {
        let err = Config::from_toml_str(
            r#"
[core]
[llm]
provider = "ollama"

[[retrieval.sources]]
name = "DOCS"
description = "Product documentation"

[[retrieval.sources]]
name = "DOCS"
description = "Again"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate retrieval source"));
    }

    #[test]
    fn test_rejects_unknown_provider() {
        let err = Config::from_toml_str("[core]\n[llm]\nprovider = \"gemini\"\n").unwrap_err();
        assert!(err.to_string().contains("Invalid provider"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default_config();
        let toml_string = toml::to_string(&config).unwrap();

        let deserialized: Config = toml::from_str(&toml_string).unwrap();
        assert_eq!(config.core.log_level, deserialized.core.log_level);
        assert_eq!(config.llm.provider, deserialized.llm.provider);
        assert_eq!(
            config.agent.recursion_limit,
            deserialized.agent.recursion_limit
        );
    }
}
