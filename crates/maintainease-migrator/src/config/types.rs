//! Settings type definitions.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::connection::mask_connection_string;

/// Root settings document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Application identity.
    pub application: ApplicationSettings,

    /// Database provider and connection strings.
    pub database: DatabaseSettings,

    /// Output and plugin locations.
    pub paths: PathsSettings,

    /// Where to find the data-access project.
    pub project: ProjectSettings,

    /// External tool invocation.
    pub execution: ExecutionSettings,

    /// Interactive behavior and logging defaults.
    pub preferences: PreferencesSettings,

    /// Retry policy for `test-connection`.
    pub connection_retry: ConnectionRetrySettings,

    /// Plugin resolution policy.
    pub plugins: PluginSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub name: String,

    /// Environment name forwarded to the tool as `DOTNET_ENVIRONMENT`.
    pub environment: String,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: "MaintainEase DB Migrator".to_string(),
            environment: "Development".to_string(),
        }
    }
}

/// Database settings. Connection strings contain secrets, so `Debug` masks them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Provider name (default: "SqlServer").
    pub provider: String,

    /// Default connection string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_string: Option<String>,

    /// Connection timeout in seconds (default: 30).
    pub timeout_secs: u64,

    /// Run migrations in a transaction (default: true).
    pub use_transaction: bool,

    /// Per-tenant connection strings.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tenants: BTreeMap<String, String>,

    /// Per-environment connection strings.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environments: BTreeMap<String, String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            provider: "SqlServer".to_string(),
            connection_string: None,
            timeout_secs: 30,
            use_transaction: true,
            tenants: BTreeMap::new(),
            environments: BTreeMap::new(),
        }
    }
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask_map = |map: &BTreeMap<String, String>| -> BTreeMap<String, String> {
            map.iter()
                .map(|(k, v)| (k.clone(), mask_connection_string(v)))
                .collect()
        };
        f.debug_struct("DatabaseSettings")
            .field("provider", &self.provider)
            .field(
                "connection_string",
                &self.connection_string.as_deref().map(mask_connection_string),
            )
            .field("timeout_secs", &self.timeout_secs)
            .field("use_transaction", &self.use_transaction)
            .field("tenants", &mask_map(&self.tenants))
            .field("environments", &mask_map(&self.environments))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsSettings {
    /// Root for `Migrations/`, `Scripts/` and `Backups/` (default: ".").
    pub root: PathBuf,

    /// Directory scanned for plugin manifests (default: "plugins").
    pub plugins: PathBuf,
}

impl Default for PathsSettings {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            plugins: PathBuf::from("plugins"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    /// Solution root. Discovered from the current directory if not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Data-access project file or directory, probed directly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_project: Option<PathBuf>,

    /// Fragments matched against `*.csproj` names when no direct path is set.
    pub data_project_patterns: Vec<String>,

    /// DbContext to use when the request does not name one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,

    /// Target framework of the generated proxy project (default: "net8.0").
    pub target_framework: String,

    /// EF Core package version for the proxy project (default: "8.0.*").
    pub ef_version: String,
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            root: None,
            data_project: None,
            data_project_patterns: vec![
                "Data".to_string(),
                "Infrastructure".to_string(),
                "Persistence".to_string(),
            ],
            context: None,
            target_framework: "net8.0".to_string(),
            ef_version: "8.0.*".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Explicit `dotnet` executable. Looked up on PATH if not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dotnet_path: Option<PathBuf>,

    /// Explicit `sqlcmd` executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlcmd_path: Option<PathBuf>,

    /// Explicit `pg_dump` executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pg_dump_path: Option<PathBuf>,

    /// Explicit `psql` executable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub psql_path: Option<PathBuf>,

    /// Upper bound on any single subprocess (default: 300).
    pub command_timeout_secs: u64,

    /// Write placeholder artifacts when a tool succeeds without producing
    /// the expected files (default: true).
    pub placeholders_on_missing: bool,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            dotnet_path: None,
            sqlcmd_path: None,
            pg_dump_path: None,
            psql_path: None,
            command_timeout_secs: 300,
            placeholders_on_missing: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferencesSettings {
    /// Ask before applying migrations (default: true).
    pub confirm_destructive: bool,

    /// Log format: text or json.
    pub log_format: String,

    /// Log verbosity: debug, info, warn, error.
    pub verbosity: String,
}

impl Default for PreferencesSettings {
    fn default() -> Self {
        Self {
            confirm_destructive: true,
            log_format: "text".to_string(),
            verbosity: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionRetrySettings {
    /// Attempts before giving up (default: 3).
    pub max_attempts: u32,

    /// Delay between attempts in seconds (default: 2).
    pub delay_secs: u64,
}

impl Default for ConnectionRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginSettings {
    /// Register the compiled-in providers (default: true).
    pub builtins: bool,

    /// Fail instead of falling back when no real handler matches (default: false).
    pub strict: bool,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            builtins: true,
            strict: false,
        }
    }
}
