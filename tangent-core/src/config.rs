//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/tangent/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/tangent/` (~/.config/tangent/)
//! - Data: `$XDG_DATA_HOME/tangent/` (~/.local/share/tangent/)
//! - State/Logs: `$XDG_STATE_HOME/tangent/` (~/.local/state/tangent/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Embedding service
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Text generation service used for topic labels
    #[serde(default)]
    pub generation: GenerationConfig,

    /// 2-D projection parameters
    #[serde(default)]
    pub projection: ProjectionConfig,

    /// Density clustering parameters
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Where snapshots are written
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Supported model providers
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    Ollama,
    Claude,
    OpenAI,
}

impl LlmProvider {
    /// Returns the default endpoint for this provider
    pub fn default_endpoint(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "http://localhost:11434",
            LlmProvider::Claude => "https://api.anthropic.com",
            LlmProvider::OpenAI => "https://api.openai.com",
        }
    }

    /// Environment variable consulted when no api_key is configured
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            LlmProvider::Ollama => None,
            LlmProvider::Claude => Some("ANTHROPIC_API_KEY"),
            LlmProvider::OpenAI => Some("OPENAI_API_KEY"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LlmProvider::Ollama => "ollama",
            LlmProvider::Claude => "claude",
            LlmProvider::OpenAI => "openai",
        }
    }
}

/// Resolves the key from config first, then the provider's env var.
fn resolve_api_key(provider: LlmProvider, configured: &Option<String>) -> Option<String> {
    configured
        .clone()
        .filter(|k| !k.trim().is_empty())
        .or_else(|| {
            provider
                .api_key_env()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.trim().is_empty())
        })
}

/// Embedding service configuration
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_ollama")]
    pub provider: LlmProvider,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            model: default_embedding_model(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.provider.default_endpoint().to_string())
    }

    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(self.provider, &self.api_key)
    }
}

/// Text generation configuration
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_ollama")]
    pub provider: LlmProvider,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// API endpoint (optional, uses default for provider)
    pub endpoint: Option<String>,
    /// API key (can also use env var)
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Sampling temperature for topic labels
    #[serde(default = "default_topic_temperature")]
    pub topic_temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_ollama(),
            model: default_generation_model(),
            endpoint: None,
            api_key: None,
            timeout_secs: default_timeout_secs(),
            topic_temperature: default_topic_temperature(),
        }
    }
}

impl GenerationConfig {
    pub fn endpoint(&self) -> String {
        self.endpoint
            .clone()
            .unwrap_or_else(|| self.provider.default_endpoint().to_string())
    }

    pub fn api_key(&self) -> Option<String> {
        resolve_api_key(self.provider, &self.api_key)
    }
}

fn default_ollama() -> LlmProvider {
    LlmProvider::Ollama
}

fn default_embedding_model() -> String {
    "all-minilm".to_string()
}

fn default_generation_model() -> String {
    "qwen2.5-coder:7b".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_topic_temperature() -> f32 {
    0.2
}

/// Projection parameters
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ProjectionConfig {
    #[serde(default = "default_n_neighbors")]
    pub n_neighbors: usize,
    #[serde(default = "default_min_dist")]
    pub min_dist: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Optimisation epochs (500 when unset)
    #[serde(default)]
    pub n_epochs: Option<usize>,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            n_neighbors: default_n_neighbors(),
            min_dist: default_min_dist(),
            seed: default_seed(),
            n_epochs: None,
        }
    }
}

fn default_n_neighbors() -> usize {
    15
}

fn default_min_dist() -> f64 {
    0.1
}

fn default_seed() -> u64 {
    42
}

/// Clustering parameters
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ClusteringConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Clusters born below this distance are merged upward
    #[serde(default = "default_selection_epsilon")]
    pub selection_epsilon: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            selection_epsilon: default_selection_epsilon(),
        }
    }
}

fn default_min_samples() -> usize {
    1
}

fn default_selection_epsilon() -> f64 {
    0.3
}

/// Storage configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Root for per-chat-type output directories
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Configured data dir, or `$XDG_DATA_HOME/tangent/processed_data`
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("processed_data"))
    }
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.embedding.provider == LlmProvider::Claude {
            return Err(Error::Config(
                "embedding.provider must be ollama or openai".to_string(),
            ));
        }
        if self.embedding.timeout_secs == 0 || self.generation.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        for (section, provider, key) in [
            ("embedding", self.embedding.provider, self.embedding.api_key()),
            ("generation", self.generation.provider, self.generation.api_key()),
        ] {
            if let Some(var) = provider.api_key_env() {
                if key.is_none() {
                    return Err(Error::Config(format!(
                        "{}.api_key (or {}) is required for provider {}",
                        section,
                        var,
                        provider.as_str()
                    )));
                }
            }
        }
        if self.projection.n_neighbors < 2 {
            return Err(Error::Config(
                "projection.n_neighbors must be at least 2".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.projection.min_dist) {
            return Err(Error::Config(
                "projection.min_dist must be in [0, 1)".to_string(),
            ));
        }
        if self.projection.n_epochs == Some(0) {
            return Err(Error::Config(
                "projection.n_epochs must be positive".to_string(),
            ));
        }
        if self.clustering.min_samples == 0 {
            return Err(Error::Config(
                "clustering.min_samples must be at least 1".to_string(),
            ));
        }
        if self.clustering.selection_epsilon < 0.0 {
            return Err(Error::Config(
                "clustering.selection_epsilon must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/tangent/config.toml` (~/.config/tangent/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("tangent").join("config.toml")
    }

    /// Returns the data directory path
    ///
    /// `$XDG_DATA_HOME/tangent/` (~/.local/share/tangent/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("tangent")
    }

    /// Returns the state directory path (for logs and the writer lock)
    ///
    /// `$XDG_STATE_HOME/tangent/` (~/.local/state/tangent/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("tangent")
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/tangent/tangent.log` (~/.local/state/tangent/tangent.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("tangent.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
