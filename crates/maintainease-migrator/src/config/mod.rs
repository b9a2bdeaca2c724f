//! Settings loading, validation and persistence.

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::connection::ConnectionConfig;
use crate::error::{MigrateError, Result};

impl Settings {
    /// Load settings from a JSON file, or YAML when the extension says so.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        if is_yaml(path) {
            Self::from_yaml(&content)
        } else {
            Self::from_json(&content)
        }
    }

    /// Parse settings from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Write settings back, in the format implied by the extension.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Pick the connection string: tenant first, then environment, then default.
    pub fn connection_string_for(
        &self,
        tenant: Option<&str>,
        environment: Option<&str>,
    ) -> Option<&str> {
        let tenant = tenant.and_then(|t| self.database.tenants.get(t));
        let environment = environment.and_then(|e| {
            self.database
                .environments
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(e))
                .map(|(_, cs)| cs)
        });
        tenant
            .or(environment)
            .or(self.database.connection_string.as_ref())
            .map(String::as_str)
    }

    /// Build the connection configuration for one invocation.
    pub fn connection_config(
        &self,
        tenant: Option<&str>,
        environment: Option<&str>,
    ) -> Result<ConnectionConfig> {
        let connection_string = self
            .connection_string_for(tenant, environment)
            .ok_or_else(|| {
                MigrateError::Config(
                    "no connection string configured (set database.connection_string or pass --connection-string)"
                        .into(),
                )
            })?;

        Ok(ConnectionConfig {
            connection_string: connection_string.to_string(),
            provider: self.database.provider.clone(),
            timeout_secs: self.database.timeout_secs,
            use_transaction: self.database.use_transaction,
        })
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}
