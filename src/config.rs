//! Configuration management for mathchat
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{MathchatError, Result};
use crate::storage::{SessionStore, DEFAULT_STORAGE_KEY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Proxy variables consulted when no proxy is configured explicitly,
/// first set wins
const PROXY_ENV_VARS: [&str; 6] = [
    "HTTPS_PROXY",
    "https_proxy",
    "HTTP_PROXY",
    "http_proxy",
    "ALL_PROXY",
    "all_proxy",
];

/// Main configuration structure for mathchat
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Completion service and retry settings
    #[serde(default)]
    pub completion: CompletionConfig,
    /// Where the session history lives
    #[serde(default)]
    pub storage: StorageConfig,
    /// Cross-view change detection
    #[serde(default)]
    pub sync: SyncConfig,
    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Interactive chat settings
    #[serde(default)]
    pub chat: ChatConfig,
    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Completion service configuration
///
/// Every attempt uses the same endpoint, credentials, proxy and deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Chat completions URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model identifier sent with each request
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token; usually supplied through the environment
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// HTTP(S) proxy applied to every attempt
    #[serde(default)]
    pub proxy: Option<String>,

    /// Language the tutor answers in
    #[serde(default = "default_language")]
    pub language: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus sampling cutoff
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Reply length cap
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Attempts per question, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Deadline for each attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,

    /// Fixed wait between attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_endpoint() -> String {
    "https://api.deepseek.com/chat/completions".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_language() -> String {
    "Chinese".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_attempt_timeout_secs() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key: None,
            proxy: None,
            language: default_language(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            max_attempts: default_max_attempts(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Session history location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the history file; the platform data directory when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Key the history is stored under
    #[serde(default = "default_storage_key")]
    pub key: String,
}

fn default_storage_key() -> String {
    DEFAULT_STORAGE_KEY.to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            key: default_storage_key(),
        }
    }
}

impl StorageConfig {
    /// Configured directory, else the platform default
    pub fn resolved_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => SessionStore::default_data_dir(),
        }
    }

    /// Open the file-backed store this configuration points at
    pub fn open_store(&self) -> Result<SessionStore> {
        SessionStore::open_dir(self.resolved_data_dir()?, self.key.clone())
    }
}

/// How the watcher decides the persisted collection changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareStrategy {
    /// Byte-exact comparison of the serialized collection
    #[default]
    Serialized,
    /// Compare parsed sessions; formatting-only rewrites are ignored
    Parsed,
}

impl FromStr for CompareStrategy {
    type Err = MathchatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "serialized" => Ok(Self::Serialized),
            "parsed" => Ok(Self::Parsed),
            other => Err(MathchatError::Config(format!(
                "Invalid compare strategy: {}. Must be one of: serialized, parsed",
                other
            ))),
        }
    }
}

/// Sync watcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between polls of the persisted collection
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Subscribe to backend change notifications in addition to polling
    #[serde(default = "default_use_notifications")]
    pub use_notifications: bool,

    /// Change detection strategy
    #[serde(default)]
    pub compare: CompareStrategy,
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_use_notifications() -> bool {
    true
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            use_notifications: default_use_notifications(),
            compare: CompareStrategy::default(),
        }
    }
}

impl SyncConfig {
    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Socket address to listen on
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Interactive chat configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Assistant message seeded into every new session
    #[serde(default)]
    pub greeting: Option<String>,
}

/// Log output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json_format: bool,

    /// Also append log lines to this file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "mathchat=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

/// Reads `name` and parses it, warning about and ignoring invalid values
fn parse_env<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Invalid {}: {}", name, raw);
            None
        }
    }
}

/// First non-empty value among `names`
fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MathchatError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| MathchatError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        // Completion overrides
        if let Ok(endpoint) = std::env::var("MATHCHAT_ENDPOINT") {
            self.completion.endpoint = endpoint;
        }

        if let Ok(model) = std::env::var("MATHCHAT_MODEL") {
            self.completion.model = model;
        }

        if let Some(key) = first_env(&["MATHCHAT_API_KEY", "DEEPSEEK_API_KEY"]) {
            self.completion.api_key = Some(key);
        }

        if let Some(proxy) = first_env(&["MATHCHAT_PROXY"]) {
            self.completion.proxy = Some(proxy);
        } else if self.completion.proxy.is_none() {
            self.completion.proxy = first_env(&PROXY_ENV_VARS);
        }

        if let Ok(language) = std::env::var("MATHCHAT_LANGUAGE") {
            self.completion.language = language;
        }

        if let Some(value) = parse_env("MATHCHAT_MAX_ATTEMPTS") {
            self.completion.max_attempts = value;
        }

        if let Some(value) = parse_env("MATHCHAT_TIMEOUT_SECONDS") {
            self.completion.attempt_timeout_secs = value;
        }

        // Storage and sync overrides
        if let Some(dir) = first_env(&["MATHCHAT_DATA_DIR"]) {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }

        if let Some(value) = parse_env("MATHCHAT_POLL_INTERVAL_MS") {
            self.sync.poll_interval_ms = value;
        }

        if let Ok(strategy) = std::env::var("MATHCHAT_SYNC_COMPARE") {
            match strategy.parse() {
                Ok(value) => self.sync.compare = value,
                Err(e) => tracing::warn!("{}, using {:?}", e, self.sync.compare),
            }
        }

        // Server and logging overrides
        if let Ok(bind) = std::env::var("MATHCHAT_BIND") {
            self.server.bind = bind;
        }

        if let Ok(file) = std::env::var("MATHCHAT_LOG_FILE") {
            self.logging.file_path = Some(PathBuf::from(file));
        }

        if let Ok(json) = std::env::var("MATHCHAT_LOG_JSON") {
            self.logging.json_format = matches!(json.to_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(dir) = &cli.data_dir {
            self.storage.data_dir = Some(dir.clone());
        }

        if let crate::cli::Commands::Serve {
            bind: Some(bind), ..
        } = &cli.command
        {
            self.server.bind = bind.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `MathchatError::Config` naming the first offending field
    pub fn validate(&self) -> Result<()> {
        let completion = &self.completion;

        if completion.endpoint.trim().is_empty() {
            return Err(
                MathchatError::Config("completion.endpoint cannot be empty".to_string()).into(),
            );
        }

        url::Url::parse(&completion.endpoint).map_err(|e| {
            MathchatError::Config(format!(
                "Invalid completion.endpoint {}: {}",
                completion.endpoint, e
            ))
        })?;

        if completion.model.trim().is_empty() {
            return Err(
                MathchatError::Config("completion.model cannot be empty".to_string()).into(),
            );
        }

        if let Some(proxy) = &completion.proxy {
            url::Url::parse(proxy).map_err(|e| {
                MathchatError::Config(format!("Invalid completion.proxy {}: {}", proxy, e))
            })?;
        }

        if completion.max_attempts == 0 {
            return Err(MathchatError::Config(
                "completion.max_attempts must be greater than 0".to_string(),
            )
            .into());
        }

        if completion.attempt_timeout_secs == 0 {
            return Err(MathchatError::Config(
                "completion.attempt_timeout_secs must be greater than 0".to_string(),
            )
            .into());
        }

        if !(0.0..=2.0).contains(&completion.temperature) {
            return Err(MathchatError::Config(
                "completion.temperature must be between 0.0 and 2.0".to_string(),
            )
            .into());
        }

        if completion.top_p <= 0.0 || completion.top_p > 1.0 {
            return Err(MathchatError::Config(
                "completion.top_p must be greater than 0.0 and at most 1.0".to_string(),
            )
            .into());
        }

        if self.storage.key.trim().is_empty() {
            return Err(MathchatError::Config("storage.key cannot be empty".to_string()).into());
        }

        if self.sync.poll_interval_ms == 0 {
            return Err(MathchatError::Config(
                "sync.poll_interval_ms must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_VARS: [&str; 13] = [
        "MATHCHAT_API_KEY",
        "DEEPSEEK_API_KEY",
        "MATHCHAT_PROXY",
        "HTTPS_PROXY",
        "https_proxy",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
        "MATHCHAT_DATA_DIR",
        "MATHCHAT_BIND",
        "MATHCHAT_MAX_ATTEMPTS",
        "MATHCHAT_SYNC_COMPARE",
    ];

    fn clear_env() {
        for name in ENV_VARS {
            std::env::remove_var(name);
        }
    }

    fn cli(args: &[&str]) -> crate::cli::Cli {
        use clap::Parser;
        crate::cli::Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.completion.model, "deepseek-chat");
        assert_eq!(config.completion.max_attempts, 3);
        assert_eq!(config.completion.attempt_timeout_secs, 30);
        assert_eq!(config.completion.retry_backoff_ms, 1000);
        assert_eq!(config.storage.key, "chatSessions");
        assert_eq!(config.sync.poll_interval_ms, 1000);
        assert_eq!(config.sync.compare, CompareStrategy::Serialized);
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert!(config.chat.greeting.is_none());
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_empty_endpoint() {
        let mut config = Config::default();
        config.completion.endpoint = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_unparsable_endpoint() {
        let mut config = Config::default();
        config.completion.endpoint = "deepseek chat completions".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_bad_proxy() {
        let mut config = Config::default();
        config.completion.proxy = Some("::not-a-proxy".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_attempts() {
        let mut config = Config::default();
        config.completion.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.completion.attempt_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_sampling_ranges() {
        let mut config = Config::default();
        config.completion.temperature = 2.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.completion.top_p = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.completion.top_p = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_zero_poll_interval() {
        let mut config = Config::default();
        config.sync.poll_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_empty_storage_key() {
        let mut config = Config::default();
        config.storage.key = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = r#"
completion:
  model: deepseek-reasoner
  language: English
  max_attempts: 5
sync:
  poll_interval_ms: 250
  compare: parsed
chat:
  greeting: "Hi! Ask me anything about calculus."
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.completion.model, "deepseek-reasoner");
        assert_eq!(config.completion.language, "English");
        assert_eq!(config.completion.max_attempts, 5);
        assert_eq!(config.completion.max_tokens, 1024);
        assert_eq!(config.sync.poll_interval_ms, 250);
        assert_eq!(config.sync.compare, CompareStrategy::Parsed);
        assert!(config.sync.use_notifications);
        assert_eq!(
            config.chat.greeting.as_deref(),
            Some("Hi! Ask me anything about calculus.")
        );
    }

    #[test]
    fn test_api_key_is_never_serialized() {
        let mut config = Config::default();
        config.completion.api_key = Some("sk-secret".to_string());
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(!yaml.contains("sk-secret"));
    }

    #[test]
    fn test_compare_strategy_from_str() {
        assert_eq!(
            "Parsed".parse::<CompareStrategy>().unwrap(),
            CompareStrategy::Parsed
        );
        assert!("fuzzy".parse::<CompareStrategy>().is_err());
    }

    #[test]
    #[serial]
    fn test_load_nonexistent_file_uses_defaults() {
        clear_env();
        let config = Config::load("nonexistent.yaml", &cli(&["mathchat", "history", "list"]))
            .unwrap();
        assert_eq!(config.completion.model, "deepseek-chat");
        assert!(config.completion.proxy.is_none());
    }

    #[test]
    #[serial]
    fn test_load_reads_yaml_file() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  bind: 0.0.0.0:9000\n").unwrap();

        let config = Config::load(
            path.to_str().unwrap(),
            &cli(&["mathchat", "history", "list"]),
        )
        .unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:9000");
    }

    #[test]
    #[serial]
    fn test_load_rejects_malformed_yaml() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "completion: [unterminated").unwrap();

        assert!(Config::load(path.to_str().unwrap(), &cli(&["mathchat", "history", "list"])).is_err());
    }

    #[test]
    #[serial]
    fn test_api_key_env_precedence() {
        clear_env();
        std::env::set_var("DEEPSEEK_API_KEY", "sk-deepseek");
        let mut config = Config::default();
        config.apply_env_vars();
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-deepseek"));

        std::env::set_var("MATHCHAT_API_KEY", "sk-mathchat");
        let mut config = Config::default();
        config.apply_env_vars();
        assert_eq!(config.completion.api_key.as_deref(), Some("sk-mathchat"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_proxy_env_order() {
        clear_env();
        std::env::set_var("ALL_PROXY", "socks5://127.0.0.1:1080");
        std::env::set_var("HTTP_PROXY", "http://127.0.0.1:8080");
        let mut config = Config::default();
        config.apply_env_vars();
        assert_eq!(
            config.completion.proxy.as_deref(),
            Some("http://127.0.0.1:8080")
        );

        std::env::set_var("HTTPS_PROXY", "http://127.0.0.1:7890");
        let mut config = Config::default();
        config.apply_env_vars();
        assert_eq!(
            config.completion.proxy.as_deref(),
            Some("http://127.0.0.1:7890")
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_configured_proxy_beats_standard_variables() {
        clear_env();
        std::env::set_var("HTTPS_PROXY", "http://127.0.0.1:7890");
        let mut config = Config::default();
        config.completion.proxy = Some("http://proxy.internal:3128".to_string());
        config.apply_env_vars();
        assert_eq!(
            config.completion.proxy.as_deref(),
            Some("http://proxy.internal:3128")
        );

        std::env::set_var("MATHCHAT_PROXY", "http://override:1");
        config.apply_env_vars();
        assert_eq!(config.completion.proxy.as_deref(), Some("http://override:1"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_empty_proxy_variable_is_ignored() {
        clear_env();
        std::env::set_var("HTTPS_PROXY", "");
        let mut config = Config::default();
        config.apply_env_vars();
        assert!(config.completion.proxy.is_none());
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_numeric_env_is_ignored() {
        clear_env();
        std::env::set_var("MATHCHAT_MAX_ATTEMPTS", "many");
        let mut config = Config::default();
        config.apply_env_vars();
        assert_eq!(config.completion.max_attempts, 3);

        std::env::set_var("MATHCHAT_MAX_ATTEMPTS", "5");
        config.apply_env_vars();
        assert_eq!(config.completion.max_attempts, 5);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_cli_overrides_bind_and_data_dir() {
        clear_env();
        std::env::set_var("MATHCHAT_BIND", "127.0.0.1:4000");
        let config = Config::load(
            "nonexistent.yaml",
            &cli(&[
                "mathchat",
                "--data-dir",
                "/tmp/mathchat-test",
                "serve",
                "--bind",
                "127.0.0.1:5000",
            ]),
        )
        .unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:5000");
        assert_eq!(
            config.storage.data_dir,
            Some(PathBuf::from("/tmp/mathchat-test"))
        );
        clear_env();
    }
}
