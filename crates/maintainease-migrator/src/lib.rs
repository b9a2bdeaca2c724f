//! # maintainease-migrator
//!
//! Entity Framework Core migration orchestration for SQL Server and PostgreSQL.
//!
//! This library wraps `dotnet ef` behind provider handlers with support for:
//!
//! - **Isolated execution** through a throwaway proxy startup project
//! - **Secret hygiene**: connection strings travel via the environment and
//!   are masked in every log line
//! - **Multi-tenant layouts** for migrations, scripts and backups
//! - **Native backups** with `sqlcmd` and `pg_dump`
//! - **Plugin registry** with explicit fallback reporting
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use maintainease_migrator::{MigrationRequest, PluginService, Settings};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> maintainease_migrator::Result<()> {
//!     let settings = Arc::new(Settings::load("migrator.settings.json")?);
//!     let request = MigrationRequest::new(settings.connection_config(None, None)?);
//!     let handler = PluginService::new(settings).handler_for(&request)?;
//!     let status = handler.get_status(&request, &CancellationToken::new()).await;
//!     println!("{} pending migration(s)", status.pending_migrations_count);
//!     Ok(())
//! }
//! ```

pub mod backup;
pub mod config;
pub mod connection;
pub mod error;
pub mod executor;
pub mod handler;
pub mod layout;
pub mod lock;
pub mod model;
pub mod plugin;
pub mod project;
pub mod provider;

// Re-exports for convenient access
pub use config::Settings;
pub use connection::{mask_connection_string, ConnectionConfig};
pub use error::{MigrateError, Result};
pub use handler::{MigrationHandler, PostgreSqlMigrationHandler, SqlServerMigrationHandler};
pub use model::{
    DbContextInfo, HandlerKind, MigrationInfo, MigrationRequest, MigrationResult, MigrationStatus,
};
pub use plugin::{PluginDescriptor, PluginLoader, PluginService, PluginSummary};
pub use provider::Provider;
