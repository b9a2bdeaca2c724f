//! Plugin registry for migration handlers.
//!
//! Plugins are registered explicitly: the compiled-in providers first, then
//! JSON manifests found in the plugins directory. A manifest cannot load
//! code. It binds a name, version and capability list to one of the
//! compiled-in handler kinds.
//!
//! ```json
//! { "name": "Tenant Postgres", "provider": "postgres", "version": "2.1.0",
//!   "capabilities": ["status", "apply"], "is_default": true }
//! ```

mod loader;
mod service;

pub use loader::{LoaderState, PluginLoader};
pub use service::PluginService;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::handler::{
    EfCoreHandler, FallbackHandler, MigrationHandler, PostgresTooling, SqlServerTooling,
};
use crate::provider::Provider;

/// Capabilities of a full handler.
pub const ALL_CAPABILITIES: &[&str] = &[
    "create",
    "apply",
    "status",
    "script",
    "backup",
    "test-connection",
];

/// A registered handler and its metadata.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub name: String,
    pub provider_type: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub is_default: bool,
    pub is_fallback: bool,
    pub handler: Arc<dyn MigrationHandler>,
}

impl PluginDescriptor {
    /// Descriptor for a compiled-in provider.
    pub fn builtin(settings: Arc<Settings>, provider: Provider) -> Self {
        Self {
            name: format!("{} (built-in)", provider),
            provider_type: provider.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: ALL_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            is_default: false,
            is_fallback: false,
            handler: builtin_handler(settings, provider),
        }
    }

    /// Descriptor for the no-op stand-in of `provider`.
    pub fn fallback(provider: Provider, is_default: bool) -> Self {
        Self {
            name: format!("{} (fallback)", provider),
            provider_type: provider.name().to_string(),
            version: "0.0.0".to_string(),
            capabilities: ALL_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            is_default,
            is_fallback: true,
            handler: Arc::new(FallbackHandler::new(provider)),
        }
    }

    /// Case-insensitive match on provider type, resolving provider aliases.
    pub fn serves(&self, provider: &str) -> bool {
        let wanted = Provider::from_name(provider)
            .map(|p| p.name().to_string())
            .unwrap_or_else(|_| provider.trim().to_string());
        self.provider_type.eq_ignore_ascii_case(&wanted)
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("provider_type", &self.provider_type)
            .field("version", &self.version)
            .field("capabilities", &self.capabilities)
            .field("is_default", &self.is_default)
            .field("is_fallback", &self.is_fallback)
            .finish_non_exhaustive()
    }
}

/// Serializable summary of a plugin, for listings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginSummary {
    pub name: String,
    pub provider_type: String,
    pub version: String,
    pub capabilities: Vec<String>,
    pub is_default: bool,
    pub is_fallback: bool,
}

impl From<&PluginDescriptor> for PluginSummary {
    fn from(d: &PluginDescriptor) -> Self {
        Self {
            name: d.name.clone(),
            provider_type: d.provider_type.clone(),
            version: d.version.clone(),
            capabilities: d.capabilities.clone(),
            is_default: d.is_default,
            is_fallback: d.is_fallback,
        }
    }
}

/// On-disk plugin manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct PluginManifest {
    pub name: String,

    /// Provider name or alias (e.g. "postgres", "mssql").
    pub provider: String,

    #[serde(default = "default_manifest_version")]
    pub version: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub is_default: bool,
}

fn default_manifest_version() -> String {
    "1.0.0".to_string()
}

/// Construct the compiled-in handler for `provider`.
pub fn builtin_handler(settings: Arc<Settings>, provider: Provider) -> Arc<dyn MigrationHandler> {
    match provider {
        Provider::SqlServer => Arc::new(EfCoreHandler::new(settings, SqlServerTooling)),
        Provider::PostgreSql => Arc::new(EfCoreHandler::new(settings, PostgresTooling)),
    }
}
