//! maintainease-migrator CLI - EF Core migrations for SQL Server and PostgreSQL.

mod wizard;

use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use maintainease_migrator::config::PreferencesSettings;
use maintainease_migrator::error::EXIT_COMMAND_FAILED;
use maintainease_migrator::{
    ConnectionConfig, MigrateError, MigrationRequest, MigrationResult, MigrationStatus,
    PluginService, Settings,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

const DEFAULT_SETTINGS: &str = "migrator.settings.json";

#[derive(Parser)]
#[command(name = "maintainease-migrator")]
#[command(about = "EF Core database migrations for SQL Server and PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to the settings file (JSON, or YAML by extension)
    #[arg(short, long, default_value = DEFAULT_SETTINGS)]
    settings: PathBuf,

    /// Tenant whose connection string and output folders are used
    #[arg(short, long)]
    tenant: Option<String>,

    /// Environment name (selects database.environments, sets DOTNET_ENVIRONMENT)
    #[arg(short, long)]
    environment: Option<String>,

    /// Connection string, overriding the settings file
    #[arg(long)]
    connection_string: Option<String>,

    /// Database provider: SqlServer or PostgreSql
    #[arg(long)]
    provider: Option<String>,

    /// Log verbosity: debug, info, warn, error [default: preferences.verbosity]
    #[arg(long)]
    verbosity: Option<String>,

    /// Log format: text or json [default: preferences.log_format]
    #[arg(long)]
    log_format: Option<String>,

    /// Skip confirmation prompts
    #[arg(long)]
    no_prompt: bool,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Subprocess timeout in seconds, overriding the settings file
    #[arg(long)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Migrate up to this migration instead of the latest
        #[arg(long)]
        target: Option<String>,

        /// Back up the database before applying
        #[arg(long)]
        backup: bool,
    },

    /// Show applied and pending migrations
    Status,

    /// Scaffold a new migration
    Create {
        /// Migration name (letters, digits, underscores)
        name: String,

        /// DbContext to use when the project has several
        #[arg(long)]
        context: Option<String>,

        /// Write migration files here instead of Migrations/<Provider>/<tenant>
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// Generate a SQL script for a migration range
    Script {
        /// Start after this migration (default: empty database)
        #[arg(long)]
        from: Option<String>,

        /// End at this migration (default: latest)
        #[arg(long)]
        to: Option<String>,

        /// Emit a plain script instead of an idempotent one
        #[arg(long)]
        no_idempotent: bool,
    },

    /// Back up the database with the provider's native tool
    Backup,

    /// Check that the database accepts connections
    TestConnection,

    /// List registered migration plugins
    Plugins,

    /// Create or edit a settings file interactively
    Init {
        /// Output path for the settings file [default: migrator.settings.json]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Force overwrite existing file without confirmation
        #[arg(long, short)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    // Handle init command separately (doesn't need existing settings)
    if let Commands::Init { output, force } = cli.command {
        // No logging setup for wizard - keeps terminal clean for interactive prompts
        let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS));
        wizard::run_wizard(&output_path, force)
            .await
            .map_err(|e| match e {
                wizard::WizardError::Cancelled => MigrateError::Cancelled,
                other => MigrateError::Config(other.to_string()),
            })?;
        return Ok(ExitCode::SUCCESS);
    }

    let loaded = load_settings(&cli);
    let (verbosity, log_format) = logging_options(&cli, loaded.as_ref().ok());
    setup_logging(&verbosity, &log_format);

    let settings = Arc::new(loaded?);
    if cli.settings.exists() {
        info!("Loaded settings from {:?}", cli.settings);
    } else {
        info!("Settings file {:?} not found, using defaults", cli.settings);
    }
    let plugins = PluginService::new(settings.clone());

    if let Commands::Plugins = cli.command {
        print_plugins(&plugins, cli.output_json)?;
        return Ok(ExitCode::SUCCESS);
    }

    let connection = connection_config(&cli, &settings)?;
    info!(
        "Using {} connection {}",
        connection.provider,
        connection.masked()
    );

    let mut request = MigrationRequest::new(connection)
        .with_tenant(cli.tenant.clone())
        .with_info("environment", settings.application.environment.clone());
    if verbosity.eq_ignore_ascii_case("debug") {
        request = request.with_info("verbose", "true");
    }
    let handler = plugins.handler_for(&request)?;

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler().await?;

    let result = match cli.command {
        Commands::Init { .. } | Commands::Plugins => unreachable!(), // Handled above
        Commands::Migrate { target, backup } => {
            let request = request.with_backup(backup);
            let request = match target {
                Some(target) => request.with_name(target),
                None => request,
            };
            if !cli.no_prompt
                && settings.preferences.confirm_destructive
                && !confirm_migrate(&request)?
            {
                eprintln!("Migration aborted.");
                return Err(MigrateError::Cancelled);
            }
            handler.apply_migrations(&request, &cancel_token).await
        }
        Commands::Status => {
            let status = handler.get_status(&request, &cancel_token).await;
            return report_status(&status, cli.output_json);
        }
        Commands::Create {
            name,
            context,
            output_dir,
        } => {
            let mut request = request
                .with_name(name)
                .with_context(context.or_else(|| settings.project.context.clone()));
            request.output_directory = output_dir;
            handler.create_migration(&request, &cancel_token).await
        }
        Commands::Script {
            from,
            to,
            no_idempotent,
        } => {
            let mut request = request.with_info("idempotent", (!no_idempotent).to_string());
            if let Some(from) = from {
                request = request.with_info("from", from);
            }
            if let Some(to) = to {
                request = request.with_info("to", to);
            }
            handler.generate_script(&request, &cancel_token).await
        }
        Commands::Backup => handler.create_backup(&request, &cancel_token).await,
        Commands::TestConnection => handler.test_connection(&request, &cancel_token).await,
    };

    report_result(&result, cli.output_json)
}

/// Load the settings file and apply command-line overrides.
///
/// Without a settings file, defaults are used when the command does not need
/// a database or `--connection-string` supplies one.
fn load_settings(cli: &Cli) -> Result<Settings, MigrateError> {
    let needs_file =
        cli.connection_string.is_none() && !matches!(cli.command, Commands::Plugins);
    let mut settings = if cli.settings.exists() || needs_file {
        Settings::load(&cli.settings)?
    } else {
        Settings::default()
    };

    if let Some(ref provider) = cli.provider {
        settings.database.provider = provider.clone();
    }
    if let Some(ref environment) = cli.environment {
        settings.application.environment = environment.clone();
    }
    if let Some(timeout) = cli.timeout {
        settings.execution.command_timeout_secs = timeout;
    }
    if let Some(ref cs) = cli.connection_string {
        settings.database.connection_string = Some(cs.clone());
    }
    settings.validate()?;
    Ok(settings)
}

/// Command-line flags win over the settings file's preferences.
fn logging_options(cli: &Cli, settings: Option<&Settings>) -> (String, String) {
    let defaults = PreferencesSettings::default();
    let preferences = settings.map_or(&defaults, |s| &s.preferences);
    let verbosity = cli
        .verbosity
        .clone()
        .unwrap_or_else(|| preferences.verbosity.clone());
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| preferences.log_format.clone());
    (verbosity, log_format)
}

/// `--connection-string` wins over tenant and environment entries.
fn connection_config(cli: &Cli, settings: &Settings) -> Result<ConnectionConfig, MigrateError> {
    match cli.connection_string {
        Some(ref cs) => Ok(ConnectionConfig {
            connection_string: cs.clone(),
            provider: settings.database.provider.clone(),
            timeout_secs: settings.database.timeout_secs,
            use_transaction: settings.database.use_transaction,
        }),
        None => settings.connection_config(cli.tenant.as_deref(), cli.environment.as_deref()),
    }
}

fn confirm_migrate(request: &MigrationRequest) -> Result<bool, MigrateError> {
    let target = request.migration_name.as_deref().unwrap_or("latest");
    Confirm::new()
        .with_prompt(format!(
            "Apply migrations up to '{}' on {}?",
            target,
            request.connection.masked()
        ))
        .default(false)
        .interact()
        .map_err(|e| MigrateError::Io(std::io::Error::other(e.to_string())))
}

fn report_result(result: &MigrationResult, json: bool) -> Result<ExitCode, MigrateError> {
    if json {
        println!("{}", result.to_json()?);
    } else if result.success {
        println!("\nOperation completed!");
        if result.handler_kind == maintainease_migrator::HandlerKind::Fallback {
            println!("  Handler: fallback (no work was performed)");
        }
        for migration in &result.applied_migrations {
            println!("  Migration: {}", migration.id);
        }
        if let Some(ref path) = result.scripts_path {
            println!("  Scripts: {}", path.display());
        }
        if let Some(ref path) = result.backup_path {
            println!("  Backup: {}", path.display());
        }
        for path in &result.placeholders {
            println!("  Placeholder: {}", path.display());
        }
    }

    if result.success {
        return Ok(ExitCode::SUCCESS);
    }
    if !json {
        eprintln!(
            "Error: {}",
            result.error_message.as_deref().unwrap_or("operation failed")
        );
    }
    let code = result
        .additional_info
        .get("exit_code")
        .and_then(|c| c.parse::<u8>().ok())
        .unwrap_or(EXIT_COMMAND_FAILED);
    Ok(ExitCode::from(code))
}

fn report_status(status: &MigrationStatus, json: bool) -> Result<ExitCode, MigrateError> {
    if json {
        println!("{}", serde_json::to_string_pretty(status)?);
    } else if let Some(ref err) = status.error_message {
        eprintln!("Error: {}", err);
    } else {
        println!("Migration Status ({})", status.provider_name);
        if let Some(ref db) = status.database_name {
            println!("  Database: {}", db);
        }
        if let Some(ref version) = status.database_version {
            println!("  Server version: {}", version);
        }
        println!("  Applied: {}", status.applied_migrations.len());
        for m in &status.applied_migrations {
            println!("    ✓ {}", m.id);
        }
        println!("  Pending: {}", status.pending_migrations_count);
        for m in &status.pending_migrations {
            println!("    • {}", m.id);
        }
        if let Some(ref last) = status.last_migration_name {
            println!("  Last applied: {}", last);
        }
    }

    Ok(if status.is_ok() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_COMMAND_FAILED)
    })
}

fn print_plugins(plugins: &PluginService, json: bool) -> Result<(), MigrateError> {
    if json {
        println!("{}", serde_json::to_string_pretty(&plugins.summaries())?);
        return Ok(());
    }

    println!("Registered plugins:");
    for plugin in plugins.plugins() {
        let mut flags = Vec::new();
        if plugin.is_default {
            flags.push("default");
        }
        if plugin.is_fallback {
            flags.push("fallback");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "  {} - {} v{}{}",
            plugin.name, plugin.provider_type, plugin.version, flags
        );
        println!("    capabilities: {}", plugin.capabilities.join(", "));
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_env("MAINTAINEASE_LOG")
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    // stderr keeps stdout clean for --output-json
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format.eq_ignore_ascii_case("json") {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM. Running subprocesses are killed
/// when the returned token is cancelled.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Cancelling..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Cancelling..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
