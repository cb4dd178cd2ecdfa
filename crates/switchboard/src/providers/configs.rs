use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

use crate::errors::{GatewayError, GatewayResult};

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o";

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;

/// Connect and read timeouts for one upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    pub connect: Duration,
    /// Bound on a blocking request, and on each chunk read while streaming
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
        }
    }
}

impl Timeouts {
    pub fn from_secs(connect: u64, read: u64) -> Self {
        Self {
            connect: Duration::from_secs(connect),
            read: Duration::from_secs(read),
        }
    }
}

// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    OpenAi(OpenAiProviderConfig),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl AnthropicProviderConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            host: get_env("ANTHROPIC_HOST")?.unwrap_or_else(|| ANTHROPIC_HOST.to_string()),
            api_key: require_env("ANTHROPIC_API_KEY")?,
            model: get_env("ANTHROPIC_MODEL")?.unwrap_or_else(|| ANTHROPIC_MODEL.to_string()),
            temperature: None,
            max_tokens: None,
            timeouts: Timeouts::default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl OpenAiProviderConfig {
    pub fn from_env() -> GatewayResult<Self> {
        Ok(Self {
            host: get_env("OPENAI_HOST")?.unwrap_or_else(|| OPENAI_HOST.to_string()),
            api_key: require_env("OPENAI_API_KEY")?,
            model: get_env("OPENAI_MODEL")?.unwrap_or_else(|| OPENAI_MODEL.to_string()),
            temperature: None,
            max_tokens: None,
            timeouts: Timeouts::default(),
        })
    }
}

/// Reject configs that cannot possibly authenticate or pick a model
pub(crate) fn ensure_present(provider: &str, field: &str, value: &str) -> GatewayResult<()> {
    if value.trim().is_empty() {
        return Err(GatewayError::Configuration(format!(
            "{} provider requires a non-empty {}",
            provider, field
        )));
    }
    Ok(())
}

fn get_env(key: &str) -> GatewayResult<Option<String>> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Ok(Some(value)),
        Ok(_) | Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(GatewayError::Configuration(format!(
            "{} is not valid unicode",
            key
        ))),
    }
}

fn require_env(key: &str) -> GatewayResult<String> {
    get_env(key)?.ok_or_else(|| GatewayError::Configuration(format!("{} must be set", key)))
}
