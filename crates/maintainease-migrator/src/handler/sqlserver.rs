//! SQL Server tooling (`sqlcmd`).

use std::path::Path;

use super::{EfCoreHandler, NativeTooling};
use crate::config::ExecutionSettings;
use crate::connection::{ConnectionConfig, ConnectionFields};
use crate::error::Result;
use crate::executor::CommandSpec;
use crate::project::find_executable;
use crate::provider::Provider;

/// SQL Server migration handler.
pub type SqlServerMigrationHandler = EfCoreHandler<SqlServerTooling>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerTooling;

impl SqlServerTooling {
    /// `sqlcmd` with server, database and credentials; password via `SQLCMDPASSWORD`.
    fn sqlcmd(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        let program = find_executable("sqlcmd", execution.sqlcmd_path.as_deref())?;
        let fields = connection.fields();
        let server = fields.require_server()?;
        let database = fields.require_database()?;

        let server = match fields.port {
            Some(port) => format!("{},{}", server, port),
            None => server.to_string(),
        };
        let mut spec = CommandSpec::new(program)
            .args(["-S", server.as_str(), "-d", database])
            .args(["-l".to_string(), connection.timeout_secs.to_string()])
            .arg("-b");
        spec = with_credentials(spec, &fields);
        Ok(spec)
    }
}

fn with_credentials(spec: CommandSpec, fields: &ConnectionFields) -> CommandSpec {
    match (&fields.user, fields.integrated_security) {
        (Some(user), false) => {
            let spec = spec.args(["-U", user.as_str()]);
            match fields.password {
                Some(ref password) => spec.env("SQLCMDPASSWORD", password.clone()),
                None => spec,
            }
        }
        _ => spec.arg("-E"),
    }
}

/// Quote an identifier for T-SQL: `[name]` with `]` doubled.
fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// Quote a string literal for T-SQL: `N'...'` with `'` doubled.
fn quote_literal(value: &str) -> String {
    format!("N'{}'", value.replace('\'', "''"))
}

impl NativeTooling for SqlServerTooling {
    fn provider(&self) -> Provider {
        Provider::SqlServer
    }

    fn backup_extension(&self) -> &'static str {
        "bak"
    }

    fn backup_command(
        &self,
        connection: &ConnectionConfig,
        target: &Path,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        let fields = connection.fields();
        let database = fields.require_database()?;
        let statement = format!(
            "BACKUP DATABASE {} TO DISK = {} WITH INIT, COPY_ONLY",
            quote_ident(database),
            quote_literal(&target.display().to_string())
        );
        Ok(self.sqlcmd(connection, execution)?.arg("-Q").arg(statement))
    }

    fn test_command(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        Ok(self
            .sqlcmd(connection, execution)?
            .args(["-Q", "SELECT 1"]))
    }

    fn version_command(
        &self,
        connection: &ConnectionConfig,
        execution: &ExecutionSettings,
    ) -> Result<CommandSpec> {
        Ok(self.sqlcmd(connection, execution)?.args([
            "-h",
            "-1",
            "-W",
            "-Q",
            "SET NOCOUNT ON; SELECT CAST(SERVERPROPERTY('ProductVersion') AS nvarchar(128))",
        ]))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_sqlcmd(dir: &TempDir) -> ExecutionSettings {
        let path = dir.path().join("sqlcmd");
        std::fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        ExecutionSettings {
            sqlcmd_path: Some(path),
            ..Default::default()
        }
    }

    #[test]
    fn test_backup_command_quotes_and_hides_password() {
        let dir = TempDir::new().unwrap();
        let execution = fake_sqlcmd(&dir);
        let connection =
            ConnectionConfig::new("Server=db1,1444;Database=Ord]ers;User Id=sa;Password=Secret1", "SqlServer");

        let spec = SqlServerTooling
            .backup_command(&connection, Path::new("/backups/o'k.bak"), &execution)
            .unwrap();

        assert!(spec.args.contains(&"db1,1444".to_string()));
        let statement = spec.args.last().unwrap();
        assert!(statement.contains("[Ord]]ers]"));
        assert!(statement.contains("N'/backups/o''k.bak'"));
        assert!(!spec.display().contains("Secret1"));
        assert!(spec.env_keys().any(|k| k == "SQLCMDPASSWORD"));
    }

    #[test]
    fn test_integrated_security_uses_trusted_connection() {
        let dir = TempDir::new().unwrap();
        let execution = fake_sqlcmd(&dir);
        let connection =
            ConnectionConfig::new("Server=.;Database=app;Integrated Security=true", "SqlServer");

        let spec = SqlServerTooling.test_command(&connection, &execution).unwrap();
        assert!(spec.args.contains(&"-E".to_string()));
        assert!(!spec.args.contains(&"-U".to_string()));
    }

    #[test]
    fn test_missing_database_is_config_error() {
        let dir = TempDir::new().unwrap();
        let execution = fake_sqlcmd(&dir);
        let connection = ConnectionConfig::new("Server=db1", "SqlServer");
        assert!(SqlServerTooling.test_command(&connection, &execution).is_err());
    }
}
