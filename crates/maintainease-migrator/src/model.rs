//! Request, result and status types exchanged with migration handlers.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::ConnectionConfig;
use crate::error::MigrateError;

/// Input to a single handler call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRequest {
    /// Name of the migration to create, or the target of an update/script.
    #[serde(default)]
    pub migration_name: Option<String>,

    pub connection: ConnectionConfig,

    /// Overrides the computed `Migrations/<Provider>/<Tenant>` directory.
    #[serde(default)]
    pub output_directory: Option<PathBuf>,

    #[serde(default)]
    pub tenant_id: Option<String>,

    /// Back up the database before applying migrations.
    #[serde(default)]
    pub create_backup: bool,

    /// Requested DbContext name.
    #[serde(default)]
    pub context_name: Option<String>,

    /// Free-form options (`from`, `to`, `environment`, ...).
    #[serde(default)]
    pub additional_info: BTreeMap<String, String>,
}

impl MigrationRequest {
    pub fn new(connection: ConnectionConfig) -> Self {
        Self {
            migration_name: None,
            connection,
            output_directory: None,
            tenant_id: None,
            create_backup: false,
            context_name: None,
            additional_info: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.migration_name = Some(name.into());
        self
    }

    pub fn with_tenant(mut self, tenant: Option<String>) -> Self {
        self.tenant_id = tenant.filter(|t| !t.trim().is_empty());
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context_name = context;
        self
    }

    pub fn with_backup(mut self, create_backup: bool) -> Self {
        self.create_backup = create_backup;
        self
    }

    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_info.insert(key.into(), value.into());
        self
    }

    pub fn info(&self, key: &str) -> Option<&str> {
        self.additional_info.get(key).map(String::as_str)
    }
}

/// Whether a result came from a real handler or the fallback stub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    #[default]
    Real,
    Fallback,
}

/// Outcome of one handler operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub applied_migrations: Vec<MigrationInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub scripts_path: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,

    /// Artifacts fabricated because the tool produced none.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<PathBuf>,

    pub handler_kind: HandlerKind,

    pub additional_info: BTreeMap<String, String>,
}

impl MigrationResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Convert a handler-internal outcome into a result. Errors never escape.
    pub fn from_outcome(outcome: crate::error::Result<MigrationResult>) -> Self {
        outcome.unwrap_or_else(|e| Self::from_error(&e))
    }

    pub fn from_error(error: &MigrateError) -> Self {
        let mut result = Self::failed(error.to_string());
        result
            .additional_info
            .insert("exit_code".to_string(), error.exit_code().to_string());
        result
    }

    pub fn to_json(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Applied/pending picture for one database.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationStatus {
    pub has_pending_migrations: bool,
    pub pending_migrations_count: usize,
    pub applied_migrations: Vec<MigrationInfo>,
    pub pending_migrations: Vec<MigrationInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_migration_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_migration_name: Option<String>,

    pub provider_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    pub handler_kind: HandlerKind,
}

impl MigrationStatus {
    /// Build a status from parsed migrations; pending count and "last" fields
    /// are derived, never set independently.
    pub fn from_migrations(
        provider_name: impl Into<String>,
        mut applied: Vec<MigrationInfo>,
        mut pending: Vec<MigrationInfo>,
    ) -> Self {
        applied.sort();
        pending.sort();
        let last = applied.last();
        Self {
            has_pending_migrations: !pending.is_empty(),
            pending_migrations_count: pending.len(),
            last_migration_date: last.and_then(|m| m.created),
            last_migration_name: last.map(|m| m.name.clone()),
            applied_migrations: applied,
            pending_migrations: pending,
            provider_name: provider_name.into(),
            ..Default::default()
        }
    }

    pub fn failed(provider_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider_name: provider_name.into(),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_message.is_none()
    }
}

/// One migration, identified by its `<timestamp>_<name>` id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationInfo {
    pub id: String,
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_on: Option<DateTime<Utc>>,

    /// Path of the generated script or migration file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<PathBuf>,
}

impl MigrationInfo {
    /// Build from an id such as `20240105093000_AddUsers`.
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        let (created, name) = match id.split_once('_') {
            Some((stamp, name)) => (parse_timestamp(stamp), name.to_string()),
            None => (None, id.clone()),
        };
        Self {
            id,
            name,
            created,
            applied_on: None,
            script: None,
        }
    }

    pub fn with_script(mut self, script: PathBuf) -> Self {
        self.script = Some(script);
        self
    }
}

impl Ord for MigrationInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl PartialOrd for MigrationInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Current time as a migration id prefix (`yyyyMMddHHmmss`).
pub fn migration_timestamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d%H%M%S").to_string()
}

fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A discovered DbContext type. Rebuilt on every analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbContextInfo {
    pub name: String,
    pub full_name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assembly: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<PathBuf>,
}

impl DbContextInfo {
    pub fn new(full_name: impl Into<String>) -> Self {
        let full_name = full_name.into();
        let (namespace, name) = match full_name.rsplit_once('.') {
            Some((ns, name)) => (Some(ns.to_string()), name.to_string()),
            None => (None, full_name.clone()),
        };
        Self {
            name,
            full_name,
            namespace,
            assembly: None,
            source_file: None,
        }
    }
}
