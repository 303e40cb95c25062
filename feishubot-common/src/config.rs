//! Configuration management for feishubot.
//!
//! The bot reads a single JSON file at `~/.feishubot/config.json` (or the path in
//! `FEISHUBOT_CONFIG`). A missing file is not an error: defaults are used and the
//! environment fills in the rest.
//!
//! # Configuration Priority
//!
//! 1. Environment variables
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! The platform-style keys are kept so existing deployments keep working.
//!
//! ## Feishu
//! - `FeishuAppID` → feishu.app_id
//! - `FeishuAppSecret` → feishu.app_secret
//! - `FeishuVerificationToken` → feishu.verification_token
//! - `FeishuEventEncryptKey` → feishu.encrypt_key
//! - `FeishuBotName` → feishu.bot_name
//!
//! ## Upstream
//! - `ChatGPTHost` → upstream.host
//!
//! ## Sessions
//! - `ConversationExpireSeconds` → session.expire_seconds
//!
//! ## Replies and filters
//! - `FilterPlugins` → filter.plugins (comma separated)
//! - `ProhibitedWords` → filter.prohibited_words (comma separated)
//! - `FilterReplaceText` → filter.replace_text
//! - `ShowSource` → reply.show_source (`yes` or `true`)
//! - `CustomErrorMessage` → reply.custom_error_message
//! - `RetryTime` → reply.retry_time
//!
//! ## Service
//! - `FEISHUBOT_BIND` → server.bind
//! - `FEISHUBOT_PORT` → server.port
//! - `FEISHUBOT_LOG_LEVEL` → observability.log_level
//! - `FEISHUBOT_LOG_FORMAT` → observability.log_format

use crate::error::{Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable holding an explicit config file path.
pub const CONFIG_PATH_ENV: &str = "FEISHUBOT_CONFIG";

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".feishubot"),
        |dirs| dirs.home_dir().join(".feishubot"),
    )
}

/// Get the configuration file path.
///
/// `FEISHUBOT_CONFIG` wins over the default location; `~` is expanded.
pub fn config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            PathBuf::from(shellexpand::tilde(path.trim()).into_owned())
        }
        _ => config_dir().join("config.json"),
    }
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP listener for the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
            port: default_port(),
        }
    }
}

// ============================================================================
// Feishu Configuration
// ============================================================================

/// Feishu/Lark application credentials and bot identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    #[serde(default)]
    pub app_id: String,
    #[serde(default)]
    pub app_secret: String,
    /// Token carried by every event callback; events with another token are rejected.
    #[serde(default)]
    pub verification_token: String,
    /// Key for AES-encrypted event callbacks
    #[serde(default)]
    pub encrypt_key: Option<String>,
    /// Display name of the bot, matched against mentions in group chats
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// Use the international Lark API instead of Feishu
    #[serde(default)]
    pub use_lark: bool,
}

impl Default for FeishuConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            app_secret: String::new(),
            verification_token: String::new(),
            encrypt_key: None,
            bot_name: default_bot_name(),
            use_lark: false,
        }
    }
}

// ============================================================================
// Upstream Configuration
// ============================================================================

/// The stateful conversational API replies are fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Host (optionally with port and scheme) of the conversation service
    #[serde(default = "default_upstream_host")]
    pub host: String,

    /// Connect timeout in seconds. Requests themselves are not bounded.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: default_upstream_host(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl UpstreamConfig {
    /// Base URL of the upstream service, `http://` is assumed when no scheme is given.
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}")
        }
    }
}

// ============================================================================
// Session Configuration
// ============================================================================

/// Per-conversation session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Idle time after which a conversation is closed
    #[serde(default = "default_expire_seconds")]
    pub expire_seconds: u64,

    /// Messages buffered per session before the webhook waits
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Minimum spacing between two upstream calls of one session
    #[serde(default = "default_rate_limit_secs")]
    pub rate_limit_secs: u64,

    /// How often expired sessions are swept
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            expire_seconds: default_expire_seconds(),
            mailbox_capacity: default_mailbox_capacity(),
            rate_limit_secs: default_rate_limit_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

// ============================================================================
// Filter Configuration
// ============================================================================

/// Reply filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Enabled filter names, applied in this order
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Words that trigger the `keywords` filter
    #[serde(default)]
    pub prohibited_words: Vec<String>,

    /// Text that replaces a filtered reply
    #[serde(default = "default_replace_text")]
    pub replace_text: String,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            plugins: Vec::new(),
            prohibited_words: Vec::new(),
            replace_text: default_replace_text(),
        }
    }
}

// ============================================================================
// Reply Configuration
// ============================================================================

/// Outbound reply formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyConfig {
    /// Append a line naming the backend that produced the reply
    #[serde(default)]
    pub show_source: bool,

    /// Sent instead of a reply when the upstream call fails
    #[serde(default = "default_error_message")]
    pub custom_error_message: String,

    /// Number of upstream retries.
    ///
    /// Accepted for compatibility; no call is retried yet.
    #[serde(default)]
    pub retry_time: u32,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            show_source: false,
            custom_error_message: default_error_message(),
            retry_time: 0,
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub feishu: FeishuConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub filter: FilterConfig,

    #[serde(default)]
    pub reply: ReplyConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Environment overrides that could not be parsed; reported by `validate`
    #[serde(skip)]
    pub invalid_overrides: Vec<InvalidOverride>,
}

/// An environment value that was present but unusable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidOverride {
    pub key: String,
    pub value: String,
    pub expected: &'static str,
}

impl Config {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .context(format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset. Unparsable numbers keep the previous
    /// value and are recorded in `invalid_overrides`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut invalid = Vec::new();
        let mut reject = |key: &str, value: String, expected: &'static str| {
            invalid.push(InvalidOverride {
                key: key.to_string(),
                value,
                expected,
            });
        };

        // Feishu
        if let Some(v) = get("FeishuAppID") {
            self.feishu.app_id = v;
        }
        if let Some(v) = get("FeishuAppSecret") {
            self.feishu.app_secret = v;
        }
        if let Some(v) = get("FeishuVerificationToken") {
            self.feishu.verification_token = v;
        }
        if let Some(v) = get("FeishuEventEncryptKey") {
            self.feishu.encrypt_key = Some(v);
        }
        if let Some(v) = get("FeishuBotName") {
            self.feishu.bot_name = v;
        }

        // Upstream
        if let Some(v) = get("ChatGPTHost") {
            self.upstream.host = v;
        }

        // Sessions
        if let Some(v) = get("ConversationExpireSeconds") {
            match v.trim().parse() {
                Ok(secs) => self.session.expire_seconds = secs,
                Err(_) => reject("ConversationExpireSeconds", v, "a number of seconds"),
            }
        }

        // Filters
        if let Some(v) = get("FilterPlugins") {
            self.filter.plugins = split_list(&v);
        }
        if let Some(v) = get("ProhibitedWords") {
            self.filter.prohibited_words = split_list(&v);
        }
        if let Some(v) = get("FilterReplaceText") {
            self.filter.replace_text = v;
        }

        // Replies
        if let Some(v) = get("ShowSource") {
            self.reply.show_source = parse_flag(&v);
        }
        if let Some(v) = get("CustomErrorMessage") {
            self.reply.custom_error_message = v;
        }
        if let Some(v) = get("RetryTime") {
            match v.trim().parse() {
                Ok(n) => self.reply.retry_time = n,
                Err(_) => reject("RetryTime", v, "a non-negative integer"),
            }
        }

        // Service
        if let Some(v) = get("FEISHUBOT_BIND") {
            self.server.bind = v;
        }
        if let Some(v) = get("FEISHUBOT_PORT") {
            match v.trim().parse() {
                Ok(port) => self.server.port = port,
                Err(_) => reject("FEISHUBOT_PORT", v, "a port number"),
            }
        }
        if let Some(v) = get("FEISHUBOT_LOG_LEVEL") {
            self.observability.log_level = v;
        }
        if let Some(v) = get("FEISHUBOT_LOG_FORMAT") {
            self.observability.log_format = v;
        }

        self.invalid_overrides.extend(invalid);
    }

    /// Socket address string for the webhook listener.
    pub fn listen_address(&self) -> String {
        let bind = self.server.bind.trim();
        if bind.contains(':') && !bind.starts_with('[') {
            format!("[{}]:{}", bind, self.server.port)
        } else {
            format!("{}:{}", bind, self.server.port)
        }
    }
}

/// Split a comma separated list, dropping blanks.
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "yes" | "true" | "1")
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_bot_name() -> String {
    "chatgpt-bot".into()
}
fn default_upstream_host() -> String {
    "chatgpt-api".into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_expire_seconds() -> u64 {
    300
}
fn default_mailbox_capacity() -> usize {
    100
}
fn default_rate_limit_secs() -> u64 {
    6
}
fn default_sweep_interval_secs() -> u64 {
    5
}
fn default_replace_text() -> String {
    "...".into()
}
fn default_error_message() -> String {
    "Sorry, I can't deal with you question".into()
}
fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
