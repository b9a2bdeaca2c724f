//! Interactive wizard for creating/editing settings files.

use dialoguer::{Confirm, Input, Password, Select};
use maintainease_migrator::connection::{quote_value, ConnectionFields};
use maintainease_migrator::{
    mask_connection_string, ConnectionConfig, MigrationRequest, PluginService, Provider, Settings,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result type for wizard operations.
pub type WizardResult<T> = Result<T, WizardError>;

/// Errors that can occur during wizard execution.
#[derive(Debug)]
pub enum WizardError {
    /// User cancelled the wizard.
    Cancelled,
    /// IO error (file read/write, terminal).
    Io(std::io::Error),
    /// Settings could not be written.
    Settings(String),
    /// Validation error.
    Validation(String),
}

impl std::fmt::Display for WizardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cancelled => write!(f, "Configuration cancelled"),
            Self::Io(e) => write!(f, "IO error: {}", e),
            Self::Settings(msg) => write!(f, "Settings error: {}", msg),
            Self::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for WizardError {}

impl From<std::io::Error> for WizardError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<dialoguer::Error> for WizardError {
    fn from(e: dialoguer::Error) -> Self {
        Self::Io(std::io::Error::other(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ExistingFileAction {
    Edit,
    Overwrite,
    Abort,
}

/// Run the settings wizard.
pub async fn run_wizard(output: &Path, force: bool) -> WizardResult<()> {
    println!();
    println!("MaintainEase DB Migrator - Settings Wizard");
    println!("==========================================");
    println!();

    let existing = if output.exists() && !force {
        match prompt_existing_file_action(output)? {
            ExistingFileAction::Edit => {
                println!("Loading existing settings...");
                match Settings::load(output) {
                    Ok(settings) => Some(settings),
                    Err(e) => {
                        println!("Warning: Could not parse existing file: {}", e);
                        println!("Starting with fresh settings.\n");
                        None
                    }
                }
            }
            ExistingFileAction::Overwrite => {
                println!("Starting with fresh settings.\n");
                None
            }
            ExistingFileAction::Abort => return Err(WizardError::Cancelled),
        }
    } else {
        None
    };

    let mut settings = existing.unwrap_or_default();
    prompt_application(&mut settings)?;
    prompt_database(&mut settings)?;
    prompt_project(&mut settings)?;
    prompt_execution(&mut settings)?;

    settings
        .validate()
        .map_err(|e| WizardError::Validation(e.to_string()))?;

    print_summary(&settings);

    if prompt_confirm("Test the database connection?", false)? {
        test_connection(&settings).await;
    }

    if !prompt_confirm(&format!("Save to {}?", output.display()), true)? {
        return Err(WizardError::Cancelled);
    }
    settings
        .save(output)
        .map_err(|e| WizardError::Settings(e.to_string()))?;

    println!("\nSettings saved to {}", output.display());
    println!("Run 'maintainease-migrator status' to inspect the database.");
    Ok(())
}

fn prompt_existing_file_action(path: &Path) -> WizardResult<ExistingFileAction> {
    println!("File already exists: {}\n", path.display());

    let options = &["Edit existing settings", "Overwrite with new", "Abort"];
    let selection = Select::new()
        .with_prompt("What would you like to do?")
        .items(options)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => ExistingFileAction::Edit,
        1 => ExistingFileAction::Overwrite,
        _ => ExistingFileAction::Abort,
    })
}

fn prompt_application(settings: &mut Settings) -> WizardResult<()> {
    println!("Application");
    println!("-----------");

    settings.application.name = Input::new()
        .with_prompt("  Name")
        .default(settings.application.name.clone())
        .allow_empty(true)
        .interact_text()?;

    settings.application.environment = Input::new()
        .with_prompt("  Environment")
        .default(settings.application.environment.clone())
        .interact_text()?;

    println!();
    Ok(())
}

fn prompt_database(settings: &mut Settings) -> WizardResult<()> {
    println!("Database");
    println!("--------");

    let current = Provider::from_name(&settings.database.provider).unwrap_or(Provider::SqlServer);
    let names: Vec<&str> = Provider::ALL.iter().map(|p| p.name()).collect();
    let provider_idx = Select::new()
        .with_prompt("  Provider")
        .items(&names)
        .default(Provider::ALL.iter().position(|p| *p == current).unwrap_or(0))
        .interact()?;
    let provider = Provider::ALL[provider_idx];
    settings.database.provider = provider.name().to_string();

    let existing = settings
        .database
        .connection_string
        .as_deref()
        .map(ConnectionFields::parse);
    let existing = existing.as_ref();

    let server: String = Input::new()
        .with_prompt("  Server")
        .default(
            existing
                .and_then(|f| f.server.clone())
                .unwrap_or_else(|| "localhost".to_string()),
        )
        .interact_text()?;

    let port: u16 = Input::new()
        .with_prompt("  Port")
        .default(
            existing
                .and_then(|f| f.port)
                .unwrap_or(provider.default_port()),
        )
        .interact_text()?;

    let database: String = Input::new()
        .with_prompt("  Database")
        .default(existing.and_then(|f| f.database.clone()).unwrap_or_default())
        .interact_text()?;

    let integrated = provider == Provider::SqlServer
        && Confirm::new()
            .with_prompt("  Use integrated security")
            .default(existing.map(|f| f.integrated_security).unwrap_or(false))
            .interact()?;

    let credentials = if integrated {
        None
    } else {
        let user: String = Input::new()
            .with_prompt("  User")
            .default(existing.and_then(|f| f.user.clone()).unwrap_or_default())
            .interact_text()?;
        let password = prompt_password("  Password", existing.is_some())?;
        let password = if password.is_empty() {
            existing.and_then(|f| f.password.clone()).unwrap_or(password)
        } else {
            password
        };
        Some((user, password))
    };

    settings.database.connection_string = Some(build_connection_string(
        provider,
        &server,
        port,
        &database,
        credentials.as_ref().map(|(u, p)| (u.as_str(), p.as_str())),
    ));

    settings.database.timeout_secs = Input::new()
        .with_prompt("  Connection timeout (seconds)")
        .default(settings.database.timeout_secs)
        .interact_text()?;

    println!();
    Ok(())
}

fn prompt_project(settings: &mut Settings) -> WizardResult<()> {
    println!("Project");
    println!("-------");

    settings.project.root = prompt_optional_path(
        "  Solution root (blank to discover)",
        settings.project.root.as_deref(),
    )?;
    settings.project.data_project = prompt_optional_path(
        "  Data project (blank to search by name)",
        settings.project.data_project.as_deref(),
    )?;

    let context: String = Input::new()
        .with_prompt("  DbContext (blank for automatic)")
        .default(settings.project.context.clone().unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    settings.project.context = Some(context.trim().to_string()).filter(|c| !c.is_empty());

    settings.project.target_framework = Input::new()
        .with_prompt("  Proxy target framework")
        .default(settings.project.target_framework.clone())
        .interact_text()?;

    println!();
    Ok(())
}

fn prompt_execution(settings: &mut Settings) -> WizardResult<()> {
    println!("Execution");
    println!("---------");

    settings.paths.root = PathBuf::from(
        Input::<String>::new()
            .with_prompt("  Output root for Migrations/Scripts/Backups")
            .default(settings.paths.root.display().to_string())
            .interact_text()?,
    );

    settings.execution.command_timeout_secs = Input::new()
        .with_prompt("  Command timeout (seconds)")
        .default(settings.execution.command_timeout_secs)
        .interact_text()?;

    settings.preferences.confirm_destructive = Confirm::new()
        .with_prompt("  Confirm before applying migrations")
        .default(settings.preferences.confirm_destructive)
        .interact()?;

    settings.execution.placeholders_on_missing = Confirm::new()
        .with_prompt("  Write placeholder files when a tool produces no output")
        .default(settings.execution.placeholders_on_missing)
        .interact()?;

    println!();
    Ok(())
}

fn prompt_password(prompt: &str, has_existing: bool) -> WizardResult<String> {
    if has_existing {
        let input: String = Password::new()
            .with_prompt(format!("{} (blank to keep existing)", prompt))
            .allow_empty_password(true)
            .interact()?;
        Ok(input)
    } else {
        let input: String = Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()?;
        Ok(input)
    }
}

fn prompt_optional_path(prompt: &str, existing: Option<&Path>) -> WizardResult<Option<PathBuf>> {
    let input: String = Input::new()
        .with_prompt(prompt)
        .default(existing.map(|p| p.display().to_string()).unwrap_or_default())
        .allow_empty(true)
        .interact_text()?;
    let trimmed = input.trim();
    Ok((!trimmed.is_empty()).then(|| PathBuf::from(trimmed)))
}

fn prompt_confirm(prompt: &str, default: bool) -> WizardResult<bool> {
    Ok(Confirm::new()
        .with_prompt(prompt)
        .default(default)
        .interact()?)
}

fn build_connection_string(
    provider: Provider,
    server: &str,
    port: u16,
    database: &str,
    credentials: Option<(&str, &str)>,
) -> String {
    match provider {
        Provider::SqlServer => {
            let server = if port == provider.default_port() {
                server.to_string()
            } else {
                format!("{},{}", server, port)
            };
            let auth = match credentials {
                Some((user, password)) => format!(
                    "User Id={};Password={};",
                    quote_value(user),
                    quote_value(password)
                ),
                None => "Integrated Security=true;".to_string(),
            };
            format!(
                "Server={};Database={};{}TrustServerCertificate=True;",
                server, database, auth
            )
        }
        Provider::PostgreSql => {
            let auth = match credentials {
                Some((user, password)) => format!(
                    "Username={};Password={};",
                    quote_value(user),
                    quote_value(password)
                ),
                None => String::new(),
            };
            format!("Host={};Port={};Database={};{}", server, port, database, auth)
        }
    }
}

fn print_summary(settings: &Settings) {
    println!("Settings Summary");
    println!("----------------");
    println!(
        "  Application: {} ({})",
        settings.application.name, settings.application.environment
    );
    println!("  Provider: {}", settings.database.provider);
    if let Some(ref cs) = settings.database.connection_string {
        println!("  Connection: {}", mask_connection_string(cs));
    }
    match settings.project.root {
        Some(ref root) => println!("  Solution root: {}", root.display()),
        None => println!("  Solution root: discovered"),
    }
    if let Some(ref context) = settings.project.context {
        println!("  DbContext: {}", context);
    }
    println!("  Output root: {}", settings.paths.root.display());
    println!(
        "  Command timeout: {}s",
        settings.execution.command_timeout_secs
    );
    println!();
}

async fn test_connection(settings: &Settings) {
    println!("\nTesting connection...");

    let connection: ConnectionConfig = match settings.connection_config(None, None) {
        Ok(connection) => connection,
        Err(e) => {
            println!("  {}", e);
            println!();
            return;
        }
    };
    let request = MigrationRequest::new(connection);

    // Single attempt with a short timeout; the wizard should not hang
    let mut probe = settings.clone();
    probe.connection_retry.max_attempts = 1;
    probe.execution.command_timeout_secs = 30;
    let service = PluginService::new(Arc::new(probe));

    let handler = match service.handler_for(&request) {
        Ok(handler) => handler,
        Err(e) => {
            println!("  {}", e);
            println!();
            return;
        }
    };

    let started = std::time::Instant::now();
    let result = handler
        .test_connection(&request, &CancellationToken::new())
        .await;
    let elapsed: Duration = started.elapsed();

    if result.success {
        println!("  Connection: OK ({}ms)", elapsed.as_millis());
    } else {
        println!(
            "  Connection: FAILED ({})",
            result.error_message.as_deref().unwrap_or("unknown error")
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlserver_connection_string() {
        let cs = build_connection_string(
            Provider::SqlServer,
            "db1",
            1444,
            "Orders",
            Some(("sa", "Secret1")),
        );
        assert_eq!(
            cs,
            "Server=db1,1444;Database=Orders;User Id=sa;Password=Secret1;TrustServerCertificate=True;"
        );
        let fields = ConnectionFields::parse(&cs);
        assert_eq!(fields.port, Some(1444));
        assert_eq!(fields.password.as_deref(), Some("Secret1"));
    }

    #[test]
    fn test_sqlserver_integrated_security() {
        let cs = build_connection_string(Provider::SqlServer, "db1", 1433, "Orders", None);
        assert_eq!(
            cs,
            "Server=db1;Database=Orders;Integrated Security=true;TrustServerCertificate=True;"
        );
        assert!(ConnectionFields::parse(&cs).integrated_security);
    }

    #[test]
    fn test_postgres_connection_string() {
        let cs = build_connection_string(
            Provider::PostgreSql,
            "pg",
            5432,
            "tenants",
            Some(("postgres", "pw")),
        );
        assert_eq!(
            cs,
            "Host=pg;Port=5432;Database=tenants;Username=postgres;Password=pw;"
        );
        assert!(mask_connection_string(&cs).contains("Password=********"));
    }

    #[test]
    fn test_password_with_separators_survives_parsing() {
        let cs = build_connection_string(
            Provider::SqlServer,
            "db1",
            1433,
            "Orders",
            Some(("sa", "p;w=\"Tail")),
        );
        assert_eq!(
            cs,
            "Server=db1;Database=Orders;User Id=sa;Password=\"p;w=\"\"Tail\";TrustServerCertificate=True;"
        );
        let fields = ConnectionFields::parse(&cs);
        assert_eq!(fields.password.as_deref(), Some("p;w=\"Tail"));
        assert_eq!(fields.database.as_deref(), Some("Orders"));

        let masked = mask_connection_string(&cs);
        assert!(!masked.contains("Tail"));
        assert!(masked.contains("TrustServerCertificate=True"));
    }

    #[test]
    fn test_postgres_password_with_semicolon() {
        let cs = build_connection_string(
            Provider::PostgreSql,
            "pg",
            5432,
            "tenants",
            Some(("postgres", "p;wTail")),
        );
        let fields = ConnectionFields::parse(&cs);
        assert_eq!(fields.user.as_deref(), Some("postgres"));
        assert_eq!(fields.password.as_deref(), Some("p;wTail"));
        assert_eq!(
            mask_connection_string(&cs),
            "Host=pg;Port=5432;Database=tenants;Username=postgres;Password=********;"
        );
    }
}
