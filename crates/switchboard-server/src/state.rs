use std::sync::Arc;
use switchboard::{
    history::{HistoryStore, InMemoryHistoryStore},
    orchestrator::Orchestrator,
    providers::{configs::Timeouts, registry::ProviderRegistry},
    tools::{HttpToolProvider, ToolDispatch},
};
use tracing::{info, warn};

use crate::configuration::Settings;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Build the registry, tool bindings and store described by the settings
    pub fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        let mut registry = ProviderRegistry::new();
        for (name, provider) in settings.providers {
            let is_default = settings.default_provider.as_deref() == Some(name.as_str());
            let provider_type = provider.provider_type();
            match registry.register_config(&name, provider.into_config(), is_default) {
                Ok(_) => info!(provider = %name, %provider_type, is_default, "provider ready"),
                Err(err) => warn!(provider = %name, error = %err, "skipping provider"),
            }
        }
        if registry.is_empty() {
            warn!("no providers configured; every turn will fail until one is added");
        }

        let mut tools = ToolDispatch::new();
        if !settings.tools.is_empty() {
            let mut remote = HttpToolProvider::new("http", Timeouts::default())?;
            for (name, tool) in &settings.tools {
                remote.add_tool(tool.to_tool(name)?, &tool.url)?;
            }
            tools.bind(Arc::new(remote))?;
            info!(count = settings.tools.len(), "remote tools bound");
        }

        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Arc::new(tools),
            history,
            settings.orchestrator.into_settings(),
        );
        Ok(Self::new(orchestrator))
    }
}
