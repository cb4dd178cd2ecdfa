use std::sync::Arc;

use tracing::{debug, warn};

use super::base::Provider;
use super::configs::ProviderConfig;
use super::factory::get_provider;
use crate::errors::{GatewayError, GatewayResult};

/// Name-keyed set of adapters plus the default-provider pointer.
///
/// Built mutably at start-up, then shared read-only (typically behind an
/// `Arc`) by every turn.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<(String, Arc<dyn Provider>)>,
    default: Option<usize>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under `name`.
    ///
    /// The first registration becomes the default unless a later one passes
    /// `is_default`. A name that is already taken keeps its first adapter and
    /// the call returns `false`.
    pub fn register(&mut self, name: &str, provider: Arc<dyn Provider>, is_default: bool) -> bool {
        if self.position(name).is_some() {
            warn!(provider = name, "provider already registered, keeping the first one");
            return false;
        }

        self.providers.push((name.to_string(), provider));
        if is_default || self.default.is_none() {
            self.default = Some(self.providers.len() - 1);
        }
        debug!(provider = name, is_default, "registered provider");
        true
    }

    /// Build an adapter from config and register it. A config that fails to
    /// build registers nothing.
    pub fn register_config(
        &mut self,
        name: &str,
        config: ProviderConfig,
        is_default: bool,
    ) -> GatewayResult<bool> {
        let provider = get_provider(config)?;
        Ok(self.register(name, provider, is_default))
    }

    pub fn resolve(&self, name: &str) -> GatewayResult<Arc<dyn Provider>> {
        self.position(name)
            .map(|index| Arc::clone(&self.providers[index].1))
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))
    }

    pub fn resolve_default(&self) -> GatewayResult<Arc<dyn Provider>> {
        self.default
            .map(|index| Arc::clone(&self.providers[index].1))
            .ok_or(GatewayError::NoProvider)
    }

    /// Explicit name when given, the default otherwise
    pub fn resolve_or_default(&self, name: Option<&str>) -> GatewayResult<(String, Arc<dyn Provider>)> {
        match name {
            Some(name) => Ok((name.to_string(), self.resolve(name)?)),
            None => {
                let name = self.default_name().ok_or(GatewayError::NoProvider)?;
                Ok((name.to_string(), self.resolve_default()?))
            }
        }
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default.map(|index| self.providers[index].0.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.providers.iter().position(|(n, _)| n == name)
    }
}
