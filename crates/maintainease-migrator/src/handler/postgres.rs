//! PostgreSQL tooling (`psql`, `pg_dump`).

use std::path::{Path, PathBuf};

use super::{EfCoreHandler, NativeTooling};
use crate::config::ExecutionSettings;
use crate::connection::ConnectionConfig;
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::project::find_executable;
use crate::provider::Provider;

/// PostgreSQL migration handler.
pub type PostgreSqlMigrationHandler = EfCoreHandler<PostgresTooling>;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTooling;

impl PostgresTooling {
    /// Client command with libpq connection flags; password via `PGPASSWORD`.
    fn client(
        &self,
        program: PathBuf,
        connection: &ConnectionConfig,
    ) -> Result<CommandSpec> {
        let fields = connection.fields();
        let host = fields.require_server()?;
        let database = fields.require_database()?;
        let port = fields.port.unwrap_or(Provider::PostgreSql.default_port());

        let mut spec = CommandSpec::new(program)
            .args(["--host", host])
            .args(["--port".to_string(), port.to_string()])
            .args(["--dbname", database])
            .arg("--no-password")
            .env("PGCONNECT_TIMEOUT", connection.timeout_secs.to_string());
        if let Some(ref user) = fields.user {
            spec = spec.args(["--username", user.as_str()]);
        }
        if let Some(ref password) = fields.password {
            spec = spec.env("PGPASSWORD", password.clone());
        }
        Ok(spec)
    }

    fn psql(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        let program = find_executable("psql", execution.psql_path.as_deref())?;
        self.client(program, connection)
    }
}

impl NativeTooling for PostgresTooling {
    fn provider(&self) -> Provider {
        Provider::PostgreSql
    }

    fn backup_extension(&self) -> &'static str {
        "dump"
    }

    fn backup_command(
        &self,
        connection: &ConnectionConfig,
        target: &Path,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        let program = find_executable("pg_dump", execution.pg_dump_path.as_deref())?;
        Ok(self
            .client(program, connection)?
            .arg("--format=custom")
            .arg("--file")
            .arg(target.display().to_string()))
    }

    fn test_command(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        Ok(self
            .psql(connection, execution)?
            .args(["--command", "SELECT 1"]))
    }

    fn version_command(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        Ok(self
            .psql(connection, execution)?
            .args(["--tuples-only", "--no-align", "--command", "SHOW server_version"]))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_tool(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_backup_command_uses_custom_format() {
        let dir = TempDir::new().unwrap();
        let execution = ExecutionSettings {
            pg_dump_path: Some(fake_tool(&dir, "pg_dump")),
            ..Default::default()
        };
        let connection = ConnectionConfig::new(
            "Host=pg.local;Database=tenants;Username=postgres;Password=pw",
            "PostgreSql",
        );

        let spec = PostgresTooling
            .backup_command(&connection, Path::new("/b/tenants.dump"), &execution)
            .unwrap();

        assert!(spec.args.contains(&"--format=custom".to_string()));
        assert!(spec.args.contains(&"5432".to_string()));
        assert_eq!(spec.args.last().map(String::as_str), Some("/b/tenants.dump"));
        assert!(spec.env_keys().any(|k| k == "PGPASSWORD"));
        assert!(!spec.args.iter().any(|a| a == "pw"));
    }

    #[test]
    fn test_test_command_without_password() {
        let dir = TempDir::new().unwrap();
        let execution = ExecutionSettings {
            psql_path: Some(fake_tool(&dir, "psql")),
            ..Default::default()
        };
        let connection = ConnectionConfig::new("Host=pg;Port=6543;Database=d", "PostgreSql");

        let spec = PostgresTooling.test_command(&connection, &execution).unwrap();
        assert!(spec.args.contains(&"6543".to_string()));
        assert!(!spec.env_keys().any(|k| k == "PGPASSWORD"));
    }
}
