//! Provider-specific migration handlers.
//!
//! The [`MigrationHandler`] trait is the seam the plugin registry hands out.
//! Both built-in providers share one orchestration template,
//! [`EfCoreHandler`], and differ only in their [`NativeTooling`]: the
//! command-line clients used for connection tests, version queries and
//! backups.
//!
//! Every public verb returns a result object. Errors are converted at the
//! handler boundary and never propagate to the caller.

mod efcore;
mod fallback;
pub mod postgres;
pub mod sqlserver;

pub use efcore::EfCoreHandler;
pub use fallback::FallbackHandler;
pub use postgres::{PostgreSqlMigrationHandler, PostgresTooling};
pub use sqlserver::{SqlServerMigrationHandler, SqlServerTooling};

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ExecutionSettings;
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::model::{HandlerKind, MigrationRequest, MigrationResult, MigrationStatus};
use crate::provider::Provider;

/// Migration verbs for one provider.
///
/// Implementations must be `Send + Sync`; the registry shares them as
/// `Arc<dyn MigrationHandler>`.
#[async_trait]
pub trait MigrationHandler: Send + Sync {
    /// Provider this handler serves.
    fn provider(&self) -> Provider;

    /// Whether this handler does real work.
    fn kind(&self) -> HandlerKind {
        HandlerKind::Real
    }

    /// Scaffold a new migration named `request.migration_name`.
    async fn create_migration(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult;

    /// Apply pending migrations, up to `request.migration_name` if set.
    async fn apply_migrations(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult;

    /// Report applied and pending migrations.
    async fn get_status(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationStatus;

    /// Generate a SQL script (`from`/`to` in `additional_info`).
    async fn generate_script(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult;

    /// Back up the target database.
    async fn create_backup(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult;

    /// Check that the database accepts connections.
    async fn test_connection(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult;
}

/// Provider-native command-line clients.
pub trait NativeTooling: Send + Sync + 'static {
    fn provider(&self) -> Provider;

    /// File extension of backup artifacts.
    fn backup_extension(&self) -> &'static str;

    /// Command that writes a backup of the database to `target`.
    fn backup_command(
        &self,
        connection: &ConnectionConfig,
        target: &Path,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec>;

    /// Command that succeeds when the database accepts connections.
    fn test_command(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec>;

    /// Command printing the server version on stdout.
    fn version_command(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec>;
}
