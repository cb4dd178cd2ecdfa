use crate::error::{to_env_var, ConfigError, ENV_PREFIX};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use switchboard::{
    models::tool::Tool,
    orchestrator::{OrchestratorSettings, DEFAULT_MAX_TOOL_ROUNDS, DEFAULT_SYSTEM_PROMPT},
    providers::{
        configs::{
            AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig, Timeouts,
            ANTHROPIC_HOST, ANTHROPIC_MODEL, DEFAULT_CONNECT_TIMEOUT_SECS,
            DEFAULT_READ_TIMEOUT_SECS, OPENAI_HOST, OPENAI_MODEL,
        },
        factory::ProviderType,
    },
};

pub const CONFIG_FILE_VAR: &str = "SWITCHBOARD_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "switchboard.toml";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server address: {}", e)))
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_rounds: default_max_tool_rounds(),
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn into_settings(self) -> OrchestratorSettings {
        OrchestratorSettings {
            system_prompt: self.system_prompt,
            max_tool_rounds: self.max_tool_rounds,
            default_temperature: self.temperature,
            default_max_output_tokens: self.max_output_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: u64,
        #[serde(default = "default_read_timeout")]
        read_timeout_secs: u64,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<u32>,
        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: u64,
        #[serde(default = "default_read_timeout")]
        read_timeout_secs: u64,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::Anthropic { .. } => ProviderType::Anthropic,
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                connect_timeout_secs,
                read_timeout_secs,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                timeouts: Timeouts::from_secs(connect_timeout_secs, read_timeout_secs),
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                connect_timeout_secs,
                read_timeout_secs,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                timeouts: Timeouts::from_secs(connect_timeout_secs, read_timeout_secs),
            }),
        }
    }
}

/// A remote tool served over HTTP
#[derive(Debug, Deserialize)]
pub struct ToolSettings {
    pub url: String,
    #[serde(default)]
    pub description: String,
    /// JSON schema of the arguments, as a JSON string
    #[serde(default)]
    pub parameters: Option<String>,
}

impl ToolSettings {
    pub fn to_tool(&self, name: &str) -> Result<Tool, ConfigError> {
        let schema: Value = match &self.parameters {
            Some(raw) => serde_json::from_str(raw).map_err(|e| {
                ConfigError::Invalid(format!("tools.{}.parameters is not JSON: {}", name, e))
            })?,
            None => json!({"type": "object", "properties": {}}),
        };
        Ok(Tool::new(name, self.description.clone(), schema))
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub default_provider: Option<String>,
    /// Registered in name order
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default)]
    pub tools: BTreeMap<String, ToolSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config_file =
            env::var(CONFIG_FILE_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Optional file, then the environment on top
            .add_source(File::new(&config_file, FileFormat::Toml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => {
                settings.validate()?;
                Ok(settings)
            }
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field_path(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = &self.default_provider {
            if !self.providers.contains_key(name) {
                return Err(ConfigError::Invalid(format!(
                    "default_provider '{}' is not a configured provider",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Extract the dotted path from messages like
/// "missing field `api_key` for key `providers.openai`"
fn missing_field_path(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest.split_once("for key `") {
        Some((_, key)) => {
            let key = key.split('`').next().unwrap_or_default();
            Some(format!("{}.{}", key, field))
        }
        None => Some(field.to_string()),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_max_tool_rounds() -> usize {
    DEFAULT_MAX_TOOL_ROUNDS
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_anthropic_model() -> String {
    ANTHROPIC_MODEL.to_string()
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_MODEL.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_read_timeout() -> u64 {
    DEFAULT_READ_TIMEOUT_SECS
}
