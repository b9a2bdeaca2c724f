//! Provider-native database backups.
//!
//! A failed backup command is an error. A command that succeeds without a
//! local file appearing (SQL Server writes backups on the server's own disk)
//! gets a text placeholder when placeholders are enabled, so callers that
//! expect a backup path always find one.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::config::ExecutionSettings;
use crate::connection::ConnectionConfig;
use crate::error::{MigrateError, Result};
use crate::executor::{CommandRunner, OUTPUT_TAIL_LINES};
use crate::handler::NativeTooling;
use crate::layout::OutputLayout;
use crate::model::migration_timestamp;

/// Where a backup ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupOutcome {
    pub path: PathBuf,

    /// The file is a placeholder, not a real backup.
    pub placeholder: bool,
}

/// Run a backup into `Backups/<Provider>/<tenant>/`.
pub async fn run_backup(
    tooling: &dyn NativeTooling,
    connection: &ConnectionConfig,
    tenant: Option<&str>,
    layout: &OutputLayout,
    execution: &ExecutionSettings,
    runner: &CommandRunner,
) -> Result<BackupOutcome> {
    let fields = connection.fields();
    let database = fields.require_database()?.to_string();

    let dir = OutputLayout::ensure(layout.backups_dir(tooling.provider(), tenant))?;
    let dir = dir.canonicalize().unwrap_or(dir);
    let target = dir.join(format!(
        "{}_{}.{}",
        file_safe(&database),
        migration_timestamp(Utc::now()),
        tooling.backup_extension()
    ));

    let spec = tooling.backup_command(connection, &target, execution)?;
    info!(
        "Backing up {} database '{}' to {:?}",
        tooling.provider(),
        database,
        target
    );

    let output = runner.run(&spec).await?;
    if !output.success() {
        return Err(MigrateError::Backup(format!(
            "`{}` exited with {}:\n{}",
            spec.display(),
            output.exit_code,
            output.tail(OUTPUT_TAIL_LINES)
        )));
    }

    if target.exists() {
        return Ok(BackupOutcome {
            path: target,
            placeholder: false,
        });
    }

    if !execution.placeholders_on_missing {
        return Err(MigrateError::Backup(format!(
            "backup command succeeded but {:?} was not created",
            target
        )));
    }

    let placeholder = target.with_extension(format!("{}.txt", tooling.backup_extension()));
    write_backup_placeholder(&placeholder, &database, &target)?;
    warn!(
        "Backup file {:?} not found after a successful backup; wrote placeholder {:?}",
        target, placeholder
    );
    Ok(BackupOutcome {
        path: placeholder,
        placeholder: true,
    })
}

fn write_backup_placeholder(path: &Path, database: &str, expected: &Path) -> Result<()> {
    let content = format!(
        "Backup placeholder\n\
         database: {}\n\
         expected_file: {}\n\
         created_at: {}\n\
         The backup tool reported success but the file is not visible on this machine.\n\
         For SQL Server the file is written on the database server's filesystem.\n",
        database,
        expected.display(),
        Utc::now().to_rfc3339()
    );
    std::fs::write(path, content)?;
    Ok(())
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::CommandSpec;
    use crate::provider::Provider;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    /// Tooling backed by `/bin/sh` snippets. `$1` is the backup target.
    struct ShellTooling {
        script: &'static str,
    }

    impl NativeTooling for ShellTooling {
        fn provider(&self) -> Provider {
            Provider::PostgreSql
        }

        fn backup_extension(&self) -> &'static str {
            "dump"
        }

        fn backup_command(
            &self,
            _connection: &ConnectionConfig,
            target: &Path,
            _execution: &ExecutionSettings,
        ) -> Result<CommandSpec> {
            Ok(CommandSpec::new("/bin/sh")
                .args(["-c", self.script, "backup"])
                .arg(target.display().to_string()))
        }

        fn test_command(
            &self,
            _connection: &ConnectionConfig,
            _execution: &ExecutionSettings,
        ) -> Result<CommandSpec> {
            Ok(CommandSpec::new("/bin/true"))
        }

        fn version_command(
            &self,
            _connection: &ConnectionConfig,
            _execution: &ExecutionSettings,
        ) -> Result<CommandSpec> {
            Ok(CommandSpec::new("/bin/true"))
        }
    }

    fn runner() -> CommandRunner {
        CommandRunner::new(Duration::from_secs(10), CancellationToken::new())
    }

    fn connection() -> ConnectionConfig {
        ConnectionConfig::new("Host=h;Database=Orders;Password=x", "PostgreSql")
    }

    #[tokio::test]
    async fn test_real_backup_file() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        let tooling = ShellTooling {
            script: "echo data > \"$1\"",
        };

        let outcome = run_backup(
            &tooling,
            &connection(),
            Some("acme"),
            &layout,
            &ExecutionSettings::default(),
            &runner(),
        )
        .await
        .unwrap();

        assert!(!outcome.placeholder);
        assert!(outcome.path.exists());
        assert!(outcome.path.to_string_lossy().contains("Backups/PostgreSql/acme/Orders_"));
    }

    #[tokio::test]
    async fn test_missing_file_gets_placeholder() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        let tooling = ShellTooling { script: "exit 0" };

        let outcome = run_backup(
            &tooling,
            &connection(),
            None,
            &layout,
            &ExecutionSettings::default(),
            &runner(),
        )
        .await
        .unwrap();

        assert!(outcome.placeholder);
        let content = std::fs::read_to_string(&outcome.path).unwrap();
        assert!(content.contains("database: Orders"));
    }

    #[tokio::test]
    async fn test_missing_file_without_placeholders_fails() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        let tooling = ShellTooling { script: "exit 0" };
        let execution = ExecutionSettings {
            placeholders_on_missing: false,
            ..Default::default()
        };

        let err = run_backup(&tooling, &connection(), None, &layout, &execution, &runner())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Backup(_)));
    }

    #[tokio::test]
    async fn test_failed_command_surfaces_error() {
        let dir = TempDir::new().unwrap();
        let layout = OutputLayout::new(dir.path());
        let tooling = ShellTooling {
            script: "echo 'permission denied' >&2; exit 2",
        };

        let err = run_backup(
            &tooling,
            &connection(),
            None,
            &layout,
            &ExecutionSettings::default(),
            &runner(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }
}
