use std::sync::Arc;

use strum_macros::{Display, EnumIter, EnumString};

use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig,
    openai::OpenAiProvider,
};
use crate::errors::GatewayResult;

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAi,
}

impl ProviderType {
    pub fn of(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Anthropic(_) => ProviderType::Anthropic,
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> GatewayResult<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
    }
}
