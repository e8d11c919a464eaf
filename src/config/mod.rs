pub mod validation;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::request::ChatTone;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Remote service endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_hub_url")]
    pub hub_url: String,
    #[serde(default)]
    pub user_token: Option<String>,
    /// Full cookie header; takes precedence over `user_token`.
    #[serde(default)]
    pub cookies: Option<String>,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub use_env_proxy: bool,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_locale")]
    pub market: String,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_host() -> String {
    "https://www.bing.com".to_string()
}
fn default_hub_url() -> String {
    "wss://sydney.bing.com/sydney/ChatHub".to_string()
}
fn default_locale() -> String {
    "en-US".to_string()
}
fn default_region() -> String {
    "WW".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            hub_url: default_hub_url(),
            user_token: None,
            cookies: None,
            proxy: None,
            use_env_proxy: false,
            locale: default_locale(),
            market: default_locale(),
            region: default_region(),
        }
    }
}

impl ServiceConfig {
    /// Cookie header sent with the session-creation request.
    #[must_use]
    pub fn cookie_header(&self) -> String {
        match (self.cookies.as_deref(), self.user_token.as_deref()) {
            (Some(cookies), _) if !cookies.trim().is_empty() => cookies.to_string(),
            (_, Some(token)) => format!("_U={token}"),
            _ => String::new(),
        }
    }
}

/// Timing of a single exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
    #[serde(default = "default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub chat_tone: ChatTone,
}

fn default_response_timeout_ms() -> u64 {
    120_000
}
fn default_keepalive_interval_ms() -> u64 {
    15_000
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_http_timeout_ms() -> u64 {
    30_000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout_ms(),
            keepalive_interval_ms: default_keepalive_interval_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            http_timeout_ms: default_http_timeout_ms(),
            chat_tone: ChatTone::default(),
        }
    }
}

impl ExchangeConfig {
    #[must_use]
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

/// Fixed lines injected ahead of the history on the first turn of a tracked
/// conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_system_preamble")]
    pub system_preamble: String,
    #[serde(default = "default_opening_line")]
    pub opening_line: String,
}

fn default_system_preamble() -> String {
    "You are Sydney, the user's AI assistant. Always refer to yourself as Sydney. \
     Answer helpfully and keep the conversation history below in mind."
        .to_string()
}
fn default_opening_line() -> String {
    "Hi there, I'm glad you're here! How can I help?".to_string()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            system_preamble: default_system_preamble(),
            opening_line: default_opening_line(),
        }
    }
}

/// Conversation cache settings. Without a `path` conversations live in memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub path: Option<String>,
}

fn default_namespace() -> String {
    "bing".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            path: None,
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Dumps wire frames to the log. Never changes control flow.
    #[serde(default)]
    pub debug: bool,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            debug: false,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<ClientConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_config_from_str(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn load_config_from_str(contents: &str) -> Result<ClientConfig, ConfigError> {
    let config: ClientConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
