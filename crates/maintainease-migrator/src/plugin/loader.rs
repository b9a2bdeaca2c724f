use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{builtin_handler, PluginDescriptor, PluginManifest, ALL_CAPABILITIES};
use crate::config::Settings;
use crate::error::{MigrateError, Result};
use crate::provider::Provider;

/// Lifecycle of a [`PluginLoader`]. `Initialized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// Registry of migration handlers, keyed by provider type.
pub struct PluginLoader {
    settings: Arc<Settings>,
    plugins_dir: Option<PathBuf>,
    state: LoaderState,
    plugins: Vec<PluginDescriptor>,
}

impl PluginLoader {
    /// Create an empty loader. Nothing is registered until [`initialize`](Self::initialize).
    pub fn new(settings: Arc<Settings>) -> Self {
        let plugins_dir = Some(settings.paths.plugins.clone());
        Self {
            settings,
            plugins_dir,
            state: LoaderState::Uninitialized,
            plugins: Vec::new(),
        }
    }

    /// Scan `dir` for manifests instead of `paths.plugins`; `None` disables scanning.
    pub fn with_plugins_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.plugins_dir = dir;
        self
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// Register a plugin. Registration order decides the default: a plugin
    /// flagged default after another one already is loses the flag.
    pub fn register(&mut self, mut plugin: PluginDescriptor) {
        if plugin.is_default {
            if let Some(current) = self.plugins.iter().find(|p| p.is_default) {
                warn!(
                    "Plugin '{}' is also flagged default, keeping '{}' as the default",
                    plugin.name, current.name
                );
                plugin.is_default = false;
            }
        }
        debug!(
            "Registered plugin '{}' for {} (v{})",
            plugin.name, plugin.provider_type, plugin.version
        );
        self.plugins.push(plugin);
    }

    /// Register the compiled-in providers.
    pub fn register_builtins(&mut self) {
        for provider in Provider::ALL {
            self.register(PluginDescriptor::builtin(self.settings.clone(), provider));
        }
    }

    /// Run discovery once: built-ins, then manifests, then fallbacks if
    /// nothing was found. Later calls do nothing.
    pub fn initialize(&mut self) {
        if self.state != LoaderState::Uninitialized {
            debug!("Plugin loader already {:?}", self.state);
            return;
        }
        self.state = LoaderState::Initializing;

        if self.settings.plugins.builtins {
            self.register_builtins();
        }
        if let Some(dir) = self.plugins_dir.clone() {
            self.load_manifests(&dir);
        }
        if self.plugins.is_empty() {
            warn!("No migration plugins found, registering fallback handlers");
            for provider in Provider::ALL {
                self.register(PluginDescriptor::fallback(
                    provider,
                    provider == Provider::SqlServer,
                ));
            }
        }

        self.state = LoaderState::Initialized;
        info!("Plugin loader initialized with {} plugin(s)", self.plugins.len());
    }

    fn load_manifests(&mut self, dir: &Path) {
        if !dir.is_dir() {
            debug!("Plugins directory {:?} not found, skipping", dir);
            return;
        }
        let mut manifests: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
                .collect(),
            Err(e) => {
                warn!("Cannot read plugins directory {:?}: {}", dir, e);
                return;
            }
        };
        manifests.sort();

        for path in manifests {
            match self.load_manifest(&path) {
                Ok(plugin) => {
                    info!("Loaded plugin manifest {:?}", path);
                    if let Some(existing) = self.find(&plugin.provider_type) {
                        warn!(
                            "Plugin manifest {:?} for {} is shadowed by '{}' and will not be used",
                            path, plugin.provider_type, existing.name
                        );
                    }
                    self.register(plugin);
                }
                Err(e) => warn!("Skipping plugin manifest {:?}: {}", path, e),
            }
        }
    }

    fn load_manifest(&self, path: &Path) -> Result<PluginDescriptor> {
        let content = std::fs::read_to_string(path)?;
        let manifest: PluginManifest = serde_json::from_str(&content)?;
        let provider = Provider::from_name(&manifest.provider)?;

        let capabilities = if manifest.capabilities.is_empty() {
            ALL_CAPABILITIES.iter().map(|c| c.to_string()).collect()
        } else {
            manifest.capabilities
        };
        Ok(PluginDescriptor {
            name: manifest.name,
            provider_type: provider.name().to_string(),
            version: manifest.version,
            capabilities,
            is_default: manifest.is_default,
            is_fallback: false,
            handler: builtin_handler(self.settings.clone(), provider),
        })
    }

    /// All registered plugins, in registration order.
    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// The plugin flagged default, else the first plugin.
    pub fn default_plugin(&self) -> Option<&PluginDescriptor> {
        self.plugins
            .iter()
            .find(|p| p.is_default)
            .or_else(|| self.plugins.first())
    }

    /// Plugin for `provider`, or the default plugin with a warning.
    ///
    /// Returns `None` only when nothing is registered.
    pub fn get_plugin(&self, provider: &str) -> Option<&PluginDescriptor> {
        if let Some(plugin) = self.find(provider) {
            return Some(plugin);
        }
        let fallback = self.default_plugin();
        if let Some(plugin) = fallback {
            warn!(
                "No plugin registered for provider '{}', using default plugin '{}'",
                provider, plugin.name
            );
        }
        fallback
    }

    /// Plugin for `provider` backed by a real handler, or `NoHandler`.
    pub fn require_plugin(&self, provider: &str) -> Result<&PluginDescriptor> {
        self.plugins
            .iter()
            .find(|p| !p.is_fallback && p.serves(provider))
            .ok_or_else(|| MigrateError::NoHandler(provider.to_string()))
    }

    fn find(&self, provider: &str) -> Option<&PluginDescriptor> {
        self.plugins.iter().find(|p| p.serves(provider))
    }
}
