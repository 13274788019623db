//! Client configuration
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `CHAT__SECTION__KEY` environment variables, then the well-known variables
//! read by each section's `from_env`.

use crate::context::ModelProfile;
use crate::error::{ChatError, Result};
use crate::session::PartialReplyPolicy;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load from an optional file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("CHAT")
                .prefix_separator("__")
                .separator("__"),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ChatError::Configuration(e.to_string()))?;

        Ok(config.from_env())
    }

    /// Apply well-known environment variables
    pub fn from_env(mut self) -> Self {
        self.api = self.api.from_env();
        self
    }

    /// Token profile for the configured model, with session overrides applied
    pub fn model_profile(&self, model: &str) -> Result<ModelProfile> {
        ModelProfile::for_model(model)
            .with_overrides(self.session.max_tokens, self.session.truncate_limit)
    }
}

/// Completion API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Server root, e.g. `https://example.com`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path between the root and the endpoints
    #[serde(default = "default_api_path")]
    pub api_path: String,

    /// Bearer token (read from env OPENAI_API_KEY if not set)
    #[serde(default)]
    pub api_key: Option<SecretString>,

    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub model: String,

    /// Model forced onto every request (env MODEL_NAME)
    #[serde(default)]
    pub model_override: Option<String>,

    /// Bound on the wait for response headers, in seconds
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// How long a fetched model list is reused, in seconds
    #[serde(default = "default_models_cache_ttl")]
    pub models_cache_ttl_secs: u64,
}

fn default_base_url() -> String { "http://localhost:8080".to_string() }
fn default_api_path() -> String { "/api/v1".to_string() }
fn default_model() -> String { "gpt-3.5-turbo".to_string() }
fn default_models_cache_ttl() -> u64 { 300 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_path: default_api_path(),
            api_key: None,
            model: default_model(),
            model_override: None,
            request_timeout_secs: None,
            models_cache_ttl_secs: default_models_cache_ttl(),
        }
    }
}

impl ApiConfig {
    /// Override with environment variables if present
    pub fn from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("OPENAI_API_KEY") {
            self.api_key = Some(SecretString::new(val));
        }

        if let Ok(val) = std::env::var("OPENAI_BASE_URL") {
            self.base_url = val;
        }

        if let Ok(val) = std::env::var("MODEL_NAME") {
            if !val.is_empty() {
                self.model_override = Some(val);
            }
        }

        if let Ok(val) = std::env::var("CHAT_REQUEST_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                self.request_timeout_secs = Some(secs);
            }
        }

        self
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}{}/{}",
            self.base_url.trim_end_matches('/'),
            self.api_path.trim_end_matches('/'),
            name
        )
    }

    pub fn chat_url(&self) -> String {
        self.endpoint("chat/completions")
    }

    pub fn models_url(&self) -> String {
        self.endpoint("models")
    }

    pub fn images_url(&self) -> String {
        self.endpoint("images/generations")
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Get model list cache TTL as Duration
    pub fn models_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.models_cache_ttl_secs)
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    /// Number of choices requested (`n`)
    #[serde(default = "default_reply_count")]
    pub reply_count: u32,
    /// Cap on the reply size; the model window caps it otherwise
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

fn default_temperature() -> f32 { 0.5 }
fn default_top_p() -> f32 { 1.0 }
fn default_reply_count() -> u32 { 1 }

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            reply_count: default_reply_count(),
            max_tokens: None,
        }
    }
}

/// Conversation defaults
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub truncate_limit: Option<usize>,
    #[serde(default)]
    pub partial_reply: PartialReplyPolicy,
}

pub fn default_system_prompt() -> String {
    "You are ChatGPT, a large language model trained by OpenAI. Respond conversationally and use markdown formatting.".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tokens: None,
            truncate_limit: None,
            partial_reply: PartialReplyPolicy::default(),
        }
    }
}

/// Saved-session storage
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_dir")]
    pub dir: String,
    /// Bounded wait for a storage load, in milliseconds
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
}

fn default_storage_dir() -> String { "~/.chat-session".to_string() }
fn default_load_timeout_ms() -> u64 { 500 }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
            load_timeout_ms: default_load_timeout_ms(),
        }
    }
}

impl StorageConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    /// Storage directory with `~` expanded
    pub fn resolved_dir(&self) -> Result<PathBuf> {
        expand_tilde(&self.dir)
    }
}

/// Expand ~ to home directory
fn expand_tilde(path: &str) -> Result<PathBuf> {
    let home = || {
        std::env::var("HOME")
            .map_err(|_| ChatError::Configuration("HOME environment variable not set".to_string()))
    };

    if let Some(rest) = path.strip_prefix("~/") {
        Ok(PathBuf::from(home()?).join(rest))
    } else if path == "~" {
        Ok(PathBuf::from(home()?))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Log output
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}
