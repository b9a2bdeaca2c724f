use std::sync::Arc;

use tracing::debug;

use super::{PluginDescriptor, PluginLoader, PluginSummary};
use crate::config::Settings;
use crate::error::{MigrateError, Result};
use crate::handler::MigrationHandler;
use crate::model::MigrationRequest;

/// Hands out handlers for requests, honoring `plugins.strict`.
pub struct PluginService {
    loader: PluginLoader,
    strict: bool,
}

impl PluginService {
    /// Build and initialize a loader from settings.
    pub fn new(settings: Arc<Settings>) -> Self {
        let strict = settings.plugins.strict;
        Self::from_loader(PluginLoader::new(settings), strict)
    }

    pub fn from_loader(mut loader: PluginLoader, strict: bool) -> Self {
        loader.initialize();
        Self { loader, strict }
    }

    pub fn plugins(&self) -> &[PluginDescriptor] {
        self.loader.plugins()
    }

    pub fn summaries(&self) -> Vec<PluginSummary> {
        self.plugins().iter().map(PluginSummary::from).collect()
    }

    /// Resolve the plugin serving `request.connection.provider`.
    pub fn plugin_for(&self, request: &MigrationRequest) -> Result<&PluginDescriptor> {
        let provider = request.connection.provider.as_str();
        let plugin = if self.strict {
            self.loader.require_plugin(provider)?
        } else {
            self.loader
                .get_plugin(provider)
                .ok_or_else(|| MigrateError::NoHandler(provider.to_string()))?
        };
        debug!("Provider '{}' served by plugin '{}'", provider, plugin.name);
        Ok(plugin)
    }

    pub fn handler_for(&self, request: &MigrationRequest) -> Result<Arc<dyn MigrationHandler>> {
        Ok(self.plugin_for(request)?.handler.clone())
    }
}
