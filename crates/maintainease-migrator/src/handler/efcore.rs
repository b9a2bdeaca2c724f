//! Shared EF Core orchestration for all providers.
//!
//! Every verb that talks to `dotnet ef` runs the same sequence:
//!
//! 1. resolve the working directory and the data project
//! 2. discover DbContext types and pick one
//! 3. generate a proxy startup project in a fresh temp directory
//! 4. run the `dotnet ef` verb with the connection string in the environment
//! 5. verify outputs, fabricating placeholders when enabled
//! 6. remove the proxy, whatever the outcome

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{MigrationHandler, NativeTooling};
use crate::backup::run_backup;
use crate::config::Settings;
use crate::error::{MigrateError, Result};
use crate::executor::parse::{parse_applied_during_update, parse_migration_list};
use crate::executor::{CommandRunner, CommandSpec, EfCommand, EfVerb};
use crate::layout::OutputLayout;
use crate::lock::MigrationLock;
use crate::model::{
    migration_timestamp, DbContextInfo, MigrationInfo, MigrationRequest, MigrationResult,
    MigrationStatus,
};
use crate::project::{match_context, ProjectAnalyzer, ProxyProject, ProxyProjectGenerator};
use crate::provider::Provider;

static MIGRATION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid name regex"));

/// Everything resolved before a `dotnet ef` verb can run.
struct Workspace {
    dotnet: PathBuf,
    root: PathBuf,
    data_project: PathBuf,
    context: DbContextInfo,
    proxy: ProxyProject,
}

impl Workspace {
    /// Remove the proxy. Failures are logged; the operation outcome stands.
    fn finish(self) {
        if let Err(e) = self.proxy.close() {
            warn!("Failed to remove proxy project: {}", e);
        }
    }
}

/// EF Core handler parameterized by the provider's native tooling.
pub struct EfCoreHandler<T: NativeTooling> {
    settings: Arc<Settings>,
    tooling: T,
    analyzer: ProjectAnalyzer,
    generator: ProxyProjectGenerator,
    layout: OutputLayout,
}

impl<T: NativeTooling> EfCoreHandler<T> {
    pub fn new(settings: Arc<Settings>, tooling: T) -> Self {
        let analyzer =
            ProjectAnalyzer::new(settings.project.clone(), settings.execution.clone());
        let generator = ProxyProjectGenerator::new(&settings.project);
        let layout = OutputLayout::new(settings.paths.root.clone());
        Self {
            settings,
            tooling,
            analyzer,
            generator,
            layout,
        }
    }

    /// Place proxy projects under `dir` instead of the system temp directory.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.generator = self.generator.with_temp_root(dir);
        self
    }

    fn runner(&self, cancel: &CancellationToken) -> CommandRunner {
        CommandRunner::new(
            Duration::from_secs(self.settings.execution.command_timeout_secs),
            cancel.clone(),
        )
    }

    fn span(&self, verb: &str, request: &MigrationRequest, operation_id: &str) -> tracing::Span {
        info_span!(
            "migration",
            op = operation_id,
            verb,
            provider = self.tooling.provider().name(),
            tenant = request.tenant_id.as_deref().unwrap_or("default"),
        )
    }

    /// Run one verb inside its span and tag the result with the operation id.
    async fn traced(
        &self,
        verb: &str,
        request: &MigrationRequest,
        operation: impl Future<Output = Result<MigrationResult>>,
    ) -> MigrationResult {
        let operation_id = Uuid::new_v4().to_string();
        let span = self.span(verb, request, &operation_id);
        let mut result = MigrationResult::from_outcome(operation.instrument(span).await);
        result
            .additional_info
            .insert("operation_id".into(), operation_id);
        result
    }

    fn environment<'a>(&'a self, request: &'a MigrationRequest) -> &'a str {
        request
            .info("environment")
            .unwrap_or(self.settings.application.environment.as_str())
    }

    async fn prepare(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<Workspace> {
        let dotnet = self.analyzer.locate_dotnet()?;
        let root = self.analyzer.working_dir()?;
        let data_project = self.analyzer.data_project(&root)?;
        debug!("Working directory {:?}, data project {:?}", root, data_project);

        let contexts = self
            .analyzer
            .discover_contexts(runner, &dotnet, &data_project)
            .await?;
        let requested = request
            .context_name
            .as_deref()
            .or(self.settings.project.context.as_deref());
        let context = match_context(&contexts, requested).cloned().ok_or_else(|| {
            MigrateError::ContextNotFound(format!("no DbContext types found in {:?}", data_project))
        })?;
        info!("Using DbContext {}", context.full_name);

        let proxy = self
            .generator
            .generate(self.tooling.provider(), &data_project, &context)?;

        Ok(Workspace {
            dotnet,
            root,
            data_project,
            context,
            proxy,
        })
    }

    fn ef_spec(&self, ws: &Workspace, verb: EfVerb, request: &MigrationRequest) -> CommandSpec {
        EfCommand::new(verb, &ws.data_project)
            .startup_project(ws.proxy.project_file())
            .context(ws.context.full_name.clone())
            .connection_string(request.connection.connection_string.clone())
            .environment(self.environment(request))
            .verbose(request.info("verbose") == Some("true"))
            .to_spec(&ws.dotnet, &ws.root)
    }

    fn placeholders_enabled(&self) -> bool {
        self.settings.execution.placeholders_on_missing
    }

    async fn try_create(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<MigrationResult> {
        let name = request
            .migration_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| MigrateError::Config("a migration name is required".into()))?;
        if !MIGRATION_NAME.is_match(name) {
            return Err(MigrateError::Config(format!(
                "invalid migration name '{}': use letters, digits and underscores",
                name
            )));
        }

        let output_dir = OutputLayout::ensure(match request.output_directory {
            Some(ref dir) => dir.clone(),
            None => self
                .layout
                .migrations_dir(self.tooling.provider(), request.tenant_id.as_deref()),
        })?;
        let output_dir = output_dir.canonicalize().unwrap_or(output_dir);
        let before = migration_files(&output_dir, name)?;

        let ws = self.prepare(request, runner).await?;
        let verb = EfVerb::MigrationsAdd {
            name: name.to_string(),
            output_dir: output_dir.clone(),
        };
        let outcome = runner.run_checked(&self.ef_spec(&ws, verb, request)).await;
        ws.finish();
        outcome?;

        let created: Vec<PathBuf> = migration_files(&output_dir, name)?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();

        let mut result = MigrationResult::succeeded();
        result.scripts_path = Some(output_dir.clone());
        if created.is_empty() {
            if !self.placeholders_enabled() {
                return Err(MigrateError::command_failed(
                    "dotnet ef migrations add",
                    0,
                    format!(
                        "tool reported success but no migration file for '{}' appeared in {:?}",
                        name, output_dir
                    ),
                ));
            }
            let path = write_placeholder_migration(&output_dir, name)?;
            warn!(
                "No migration file for '{}' found after a successful run; wrote placeholder {:?}",
                name, path
            );
            result.applied_migrations.push(migration_from_file(&path));
            result.placeholders.push(path);
        } else {
            result
                .applied_migrations
                .extend(created.iter().map(|p| migration_from_file(p)));
        }

        info!("Created migration '{}' in {:?}", name, output_dir);
        Ok(result)
    }

    async fn try_apply(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<MigrationResult> {
        let fields = request.connection.fields();
        let lock_key = format!(
            "{}-{}-{}",
            self.tooling.provider(),
            fields.server.as_deref().unwrap_or("local"),
            fields.require_database()?
        );
        let _lock = MigrationLock::acquire(self.layout.root(), &lock_key)?;

        let ws = self.prepare(request, runner).await?;
        let mut result = MigrationResult::succeeded();

        if request.create_backup {
            match self.backup(request, runner).await {
                Ok(backup) => {
                    result.backup_path = Some(backup.path.clone());
                    if backup.placeholder {
                        result.placeholders.push(backup.path);
                    }
                }
                Err(e) => {
                    ws.finish();
                    return Err(e);
                }
            }
        }

        let target = request
            .migration_name
            .clone()
            .or_else(|| request.info("target").map(str::to_string));
        let verb = EfVerb::DatabaseUpdate { target };
        let outcome = runner.run_checked(&self.ef_spec(&ws, verb, request)).await;
        ws.finish();
        let output = outcome?;

        let now = Utc::now();
        result.applied_migrations = parse_applied_during_update(&output.stdout)
            .into_iter()
            .map(|mut m| {
                m.applied_on = Some(now);
                m
            })
            .collect();
        result.additional_info.insert(
            "applied_count".into(),
            result.applied_migrations.len().to_string(),
        );
        info!("Applied {} migration(s)", result.applied_migrations.len());
        Ok(result)
    }

    async fn try_status(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<MigrationStatus> {
        let ws = self.prepare(request, runner).await?;
        let outcome = runner
            .run_checked(&self.ef_spec(&ws, EfVerb::MigrationsList, request))
            .await;
        ws.finish();
        let output = outcome?;

        let list = parse_migration_list(&output.stdout);
        let provider = self.tooling.provider().name();
        let mut status = MigrationStatus::from_migrations(provider, list.applied, list.pending);
        status.database_name = request.connection.fields().database;
        status.database_version = self.database_version(request, runner).await;
        Ok(status)
    }

    /// Best effort: `None` when the native client is missing or fails.
    async fn database_version(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Option<String> {
        let spec = match self
            .tooling
            .version_command(&request.connection, &self.settings.execution)
        {
            Ok(spec) => spec,
            Err(e) => {
                debug!("Skipping database version query: {}", e);
                return None;
            }
        };
        match runner.run(&spec).await {
            Ok(output) if output.success() => output
                .stdout
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .map(str::to_string),
            Ok(output) => {
                debug!("Version query exited with {}", output.exit_code);
                None
            }
            Err(e) => {
                debug!("Version query failed: {}", e);
                None
            }
        }
    }

    async fn try_script(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<MigrationResult> {
        let from = request.info("from").map(str::to_string);
        let to = request
            .info("to")
            .map(str::to_string)
            .or_else(|| request.migration_name.clone());

        let dir = OutputLayout::ensure(match request.output_directory {
            Some(ref dir) => dir.clone(),
            None => self
                .layout
                .scripts_dir(self.tooling.provider(), request.tenant_id.as_deref()),
        })?;
        let dir = dir.canonicalize().unwrap_or(dir);
        let label = match (&from, &to) {
            (Some(from), Some(to)) => format!("{}_to_{}", from, to),
            (Some(from), None) => format!("{}_to_latest", from),
            (None, Some(to)) => format!("to_{}", to),
            (None, None) => "all".to_string(),
        };
        let output = dir.join(format!("{}_{}.sql", migration_timestamp(Utc::now()), label));

        let ws = self.prepare(request, runner).await?;
        let verb = EfVerb::MigrationsScript {
            from,
            to,
            output: output.clone(),
            idempotent: request.info("idempotent") != Some("false"),
        };
        let outcome = runner.run_checked(&self.ef_spec(&ws, verb, request)).await;
        ws.finish();
        outcome?;

        let mut result = MigrationResult::succeeded();
        if !output.exists() {
            if !self.placeholders_enabled() {
                return Err(MigrateError::command_failed(
                    "dotnet ef migrations script",
                    0,
                    format!("tool reported success but {:?} was not created", output),
                ));
            }
            std::fs::write(
                &output,
                format!(
                    "-- Placeholder script generated {}\n-- dotnet ef reported success but wrote no script.\n",
                    Utc::now().to_rfc3339()
                ),
            )?;
            warn!("Script {:?} missing after a successful run; wrote placeholder", output);
            result.placeholders.push(output.clone());
        }
        info!("Script written to {:?}", output);
        result.scripts_path = Some(output);
        Ok(result)
    }

    async fn backup(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<crate::backup::BackupOutcome> {
        run_backup(
            &self.tooling,
            &request.connection,
            request.tenant_id.as_deref(),
            &self.layout,
            &self.settings.execution,
            runner,
        )
        .await
    }

    async fn try_backup(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<MigrationResult> {
        let backup = self.backup(request, runner).await?;
        let mut result = MigrationResult::succeeded();
        result.backup_path = Some(backup.path.clone());
        if backup.placeholder {
            result.placeholders.push(backup.path);
        }
        Ok(result)
    }

    async fn try_test_connection(
        &self,
        request: &MigrationRequest,
        runner: &CommandRunner,
    ) -> Result<MigrationResult> {
        let spec = self
            .tooling
            .test_command(&request.connection, &self.settings.execution)?;
        let retry = &self.settings.connection_retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match runner.run_checked(&spec).await {
                Ok(_) => {
                    info!(
                        "Connection to {} succeeded (attempt {}/{})",
                        request.connection.masked(),
                        attempt,
                        attempts
                    );
                    let mut result = MigrationResult::succeeded();
                    result
                        .additional_info
                        .insert("attempts".into(), attempt.to_string());
                    return Ok(result);
                }
                Err(e @ (MigrateError::Cancelled | MigrateError::ToolNotFound(_))) => {
                    return Err(e)
                }
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(retry.delay_secs)) => {}
                    _ = runner.cancel_token().cancelled() => return Err(MigrateError::Cancelled),
                }
            }
        }

        Err(last_error.unwrap_or(MigrateError::Cancelled))
    }
}

#[async_trait]
impl<T: NativeTooling> MigrationHandler for EfCoreHandler<T> {
    fn provider(&self) -> Provider {
        self.tooling.provider()
    }

    async fn create_migration(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult {
        let runner = self.runner(cancel);
        self.traced("create", request, self.try_create(request, &runner))
            .await
    }

    async fn apply_migrations(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult {
        let runner = self.runner(cancel);
        self.traced("apply", request, self.try_apply(request, &runner))
            .await
    }

    async fn get_status(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationStatus {
        let runner = self.runner(cancel);
        let span = self.span("status", request, &Uuid::new_v4().to_string());
        self.try_status(request, &runner)
            .instrument(span)
            .await
            .unwrap_or_else(|e| {
                MigrationStatus::failed(self.tooling.provider().name(), e.to_string())
            })
    }

    async fn generate_script(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult {
        let runner = self.runner(cancel);
        self.traced("script", request, self.try_script(request, &runner))
            .await
    }

    async fn create_backup(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult {
        let runner = self.runner(cancel);
        self.traced("backup", request, self.try_backup(request, &runner))
            .await
    }

    async fn test_connection(
        &self,
        request: &MigrationRequest,
        cancel: &CancellationToken,
    ) -> MigrationResult {
        let runner = self.runner(cancel);
        self.traced("test-connection", request, self.try_test_connection(request, &runner))
            .await
    }
}

/// Files in `dir` named `<14 digits>_<name>.cs|.sql`, designer files excluded.
fn migration_files(dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
    let pattern = Regex::new(&format!(r"^\d{{14}}_{}\.(cs|sql)$", regex::escape(name)))
        .map_err(|e| MigrateError::Config(format!("invalid migration name: {}", e)))?;
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| pattern.is_match(n))
        })
        .collect();
    files.sort();
    Ok(files)
}

fn migration_from_file(path: &Path) -> MigrationInfo {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    MigrationInfo::from_id(stem).with_script(path.to_path_buf())
}

/// Write `<timestamp>_<name>.sql` marking a migration the tool did not emit.
fn write_placeholder_migration(dir: &Path, name: &str) -> Result<PathBuf> {
    let now = Utc::now();
    let path = dir.join(format!("{}_{}.sql", migration_timestamp(now), name));
    std::fs::write(
        &path,
        format!(
            "-- Placeholder for migration '{}'\n\
             -- Generated {}\n\
             -- dotnet ef reported success but produced no migration files in this directory.\n",
            name,
            now.to_rfc3339()
        ),
    )?;
    Ok(path)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::connection::ConnectionConfig;
    use crate::handler::{PostgresTooling, SqlServerTooling};
    use crate::model::HandlerKind;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// A solution with one data project, a fake `dotnet` and scratch dirs.
    struct Fixture {
        dir: TempDir,
    }

    impl Fixture {
        /// `ef_body` handles every `dotnet ef` call except `dbcontext list`.
        fn new(ef_body: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().join("solution");
            std::fs::create_dir_all(root.join("src/Acme.Data")).unwrap();
            std::fs::write(root.join("Acme.sln"), "").unwrap();
            std::fs::write(root.join("src/Acme.Data/Acme.Data.csproj"), "<Project/>").unwrap();

            let dotnet = dir.path().join("dotnet");
            let script = format!(
                r#"#!/bin/sh
echo "$@" >> "{log}"
if [ "$1" = "build" ]; then exit 0; fi
if [ "$2" = "dbcontext" ]; then
  echo 'data:    [{{ "fullName": "Acme.Data.AppDbContext", "assemblyQualifiedName": "Acme.Data.AppDbContext, Acme.Data" }}]'
  exit 0
fi
{body}
"#,
                log = dir.path().join("calls.log").display(),
                body = ef_body
            );
            std::fs::write(&dotnet, script).unwrap();
            std::fs::set_permissions(&dotnet, std::fs::Permissions::from_mode(0o755)).unwrap();
            std::fs::create_dir_all(dir.path().join("proxies")).unwrap();

            Self { dir }
        }

        fn settings(&self) -> Settings {
            let mut settings = Settings::default();
            settings.project.root = Some(self.dir.path().join("solution"));
            settings.execution.dotnet_path = Some(self.dir.path().join("dotnet"));
            settings.execution.command_timeout_secs = 20;
            settings.paths.root = self.dir.path().join("out");
            settings
        }

        fn handler(&self, settings: Settings) -> EfCoreHandler<SqlServerTooling> {
            EfCoreHandler::new(Arc::new(settings), SqlServerTooling)
                .with_temp_root(self.proxies())
        }

        fn proxies(&self) -> PathBuf {
            self.dir.path().join("proxies")
        }

        fn proxy_count(&self) -> usize {
            std::fs::read_dir(self.proxies()).unwrap().count()
        }

        fn calls(&self) -> String {
            std::fs::read_to_string(self.dir.path().join("calls.log")).unwrap_or_default()
        }
    }

    fn request() -> MigrationRequest {
        MigrationRequest::new(ConnectionConfig::new(
            "Server=db1;Database=Orders;User Id=sa;Password=Secret1;",
            "SqlServer",
        ))
    }

    #[tokio::test]
    async fn test_create_without_output_fabricates_placeholder() {
        let fixture = Fixture::new("exit 0");
        let handler = fixture.handler(fixture.settings());

        let result = handler
            .create_migration(&request().with_name("AddUsers"), &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.applied_migrations.len(), 1);
        let script = result.applied_migrations[0].script.as_ref().unwrap();
        assert!(script.to_string_lossy().ends_with("AddUsers.sql"));
        assert!(script.exists());
        assert_eq!(result.placeholders.len(), 1);
        assert_eq!(result.handler_kind, HandlerKind::Real);
        assert_eq!(fixture.proxy_count(), 0);
        assert!(script
            .to_string_lossy()
            .contains("Migrations/SqlServer/default"));
    }

    #[tokio::test]
    async fn test_create_reports_generated_files() {
        // `--output-dir` is the 6th argument of `ef migrations add <name> --output-dir <dir>`
        let fixture = Fixture::new(
            r#"touch "$6/20240105093000_AddUsers.cs" "$6/20240105093000_AddUsers.Designer.cs"; exit 0"#,
        );
        let handler = fixture.handler(fixture.settings());

        let result = handler
            .create_migration(&request().with_name("AddUsers"), &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error_message);
        assert!(result.placeholders.is_empty());
        assert_eq!(result.applied_migrations.len(), 1);
        assert_eq!(result.applied_migrations[0].id, "20240105093000_AddUsers");
    }

    #[tokio::test]
    async fn test_create_without_placeholders_fails() {
        let fixture = Fixture::new("exit 0");
        let mut settings = fixture.settings();
        settings.execution.placeholders_on_missing = false;
        let handler = fixture.handler(settings);

        let result = handler
            .create_migration(&request().with_name("AddUsers"), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(fixture.proxy_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_command_cleans_up_and_reports_output() {
        let fixture = Fixture::new("echo 'Build failed: CS1002' >&2; exit 1");
        let handler = fixture.handler(fixture.settings());

        let result = handler
            .create_migration(&request().with_name("AddUsers"), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("CS1002"));
        assert_eq!(fixture.proxy_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_name_is_rejected_before_running() {
        let fixture = Fixture::new("exit 0");
        let handler = fixture.handler(fixture.settings());

        let result = handler
            .create_migration(&request().with_name("Add Users; rm"), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(fixture.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_counts_applied_and_pending() {
        let fixture = Fixture::new(
            r#"echo "20230101000000_Initial (Applied)"
echo "20240105093000_AddUsers (Pending)"
echo "20240106093000_AddRoles (Pending)"
exit 0"#,
        );
        let handler = fixture.handler(fixture.settings());

        let status = handler.get_status(&request(), &CancellationToken::new()).await;

        assert!(status.is_ok(), "{:?}", status.error_message);
        assert_eq!(status.applied_migrations.len(), 1);
        assert_eq!(status.pending_migrations_count, 2);
        assert!(status.has_pending_migrations);
        assert_eq!(status.database_name.as_deref(), Some("Orders"));
        assert_eq!(status.provider_name, "SqlServer");
        assert_eq!(fixture.proxy_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_string_is_not_on_command_line() {
        let fixture = Fixture::new("exit 0");
        let handler = fixture.handler(fixture.settings());
        handler.get_status(&request(), &CancellationToken::new()).await;

        let calls = fixture.calls();
        assert!(calls.contains("migrations list"));
        assert!(!calls.contains("Secret1"));
    }

    #[tokio::test]
    async fn test_apply_parses_applied_migrations_and_releases_lock() {
        let fixture = Fixture::new(
            r#"echo "Applying migration '20240105093000_AddUsers'."
exit 0"#,
        );
        let settings = fixture.settings();
        let out = settings.paths.root.clone();
        let handler = fixture.handler(settings);

        let result = handler
            .apply_migrations(&request(), &CancellationToken::new())
            .await;

        assert!(result.success, "{:?}", result.error_message);
        assert_eq!(result.applied_migrations.len(), 1);
        assert!(result.applied_migrations[0].applied_on.is_some());
        let leftover_locks = std::fs::read_dir(&out)
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".migrate.lock"))
            .count();
        assert_eq!(leftover_locks, 0);
    }

    #[tokio::test]
    async fn test_apply_refuses_when_locked() {
        let fixture = Fixture::new("exit 0");
        let settings = fixture.settings();
        let _held = MigrationLock::acquire(&settings.paths.root, "SqlServer-db1-Orders").unwrap();
        let handler = fixture.handler(settings);

        let result = handler
            .apply_migrations(&request(), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("lock"));
    }

    #[tokio::test]
    async fn test_script_writes_requested_range() {
        let fixture = Fixture::new(
            r#"for a in "$@"; do
  if [ "$prev" = "--output" ]; then echo "-- script" > "$a"; fi
  prev="$a"
done
exit 0"#,
        );
        let handler = fixture.handler(fixture.settings());
        let req = request().with_info("from", "Initial").with_info("to", "AddUsers");

        let result = handler.generate_script(&req, &CancellationToken::new()).await;

        assert!(result.success, "{:?}", result.error_message);
        let path = result.scripts_path.unwrap();
        assert!(path.to_string_lossy().ends_with("Initial_to_AddUsers.sql"));
        assert!(result.placeholders.is_empty());
        assert!(fixture.calls().contains("Initial AddUsers --idempotent"));
    }

    #[tokio::test]
    async fn test_missing_dotnet_is_reported_not_thrown() {
        let fixture = Fixture::new("exit 0");
        let mut settings = fixture.settings();
        settings.execution.dotnet_path = Some(fixture.dir.path().join("missing-dotnet"));
        let handler = EfCoreHandler::new(Arc::new(settings), PostgresTooling);

        let status = handler.get_status(&request(), &CancellationToken::new()).await;
        assert!(!status.is_ok());
        assert!(status.error_message.unwrap().contains("Tool not found"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let fixture = Fixture::new("sleep 5; exit 0");
        let handler = fixture.handler(fixture.settings());
        let token = CancellationToken::new();
        token.cancel();

        let result = handler
            .create_migration(&request().with_name("AddUsers"), &token)
            .await;
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Operation cancelled"));
        assert_eq!(fixture.proxy_count(), 0);
    }

    fn lock_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().ends_with(".migrate.lock"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_cancel_while_running_removes_proxy_and_lock() {
        let fixture = Fixture::new("exec sleep 30");
        let settings = fixture.settings();
        let out = settings.paths.root.clone();
        let handler = fixture.handler(settings);
        let token = CancellationToken::new();

        let calls = fixture.dir.path().join("calls.log");
        let proxies = fixture.proxies();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                let mut proxies_seen = 0;
                for _ in 0..200 {
                    let log = std::fs::read_to_string(&calls).unwrap_or_default();
                    if log.contains("database update") {
                        proxies_seen = std::fs::read_dir(&proxies).unwrap().count();
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                token.cancel();
                proxies_seen
            })
        };

        let result = handler.apply_migrations(&request(), &token).await;
        let proxies_seen = canceller.await.unwrap();

        assert_eq!(proxies_seen, 1, "proxy should exist while ef runs");
        assert!(!result.success);
        assert_eq!(result.error_message.as_deref(), Some("Operation cancelled"));
        assert_eq!(fixture.proxy_count(), 0);
        assert_eq!(lock_files(&out), 0);
    }

    #[tokio::test]
    async fn test_timeout_while_running_removes_proxy_and_lock() {
        let fixture = Fixture::new("exec sleep 30");
        let mut settings = fixture.settings();
        settings.execution.command_timeout_secs = 1;
        let out = settings.paths.root.clone();
        let handler = fixture.handler(settings);

        let result = handler
            .apply_migrations(&request(), &CancellationToken::new())
            .await;

        assert!(!result.success);
        assert!(result.error_message.unwrap().contains("timed out after 1s"));
        assert_eq!(fixture.proxy_count(), 0);
        assert_eq!(lock_files(&out), 0);
    }

    #[test]
    fn test_migration_files_filters_names() {
        let dir = TempDir::new().unwrap();
        for name in [
            "20240105093000_AddUsers.cs",
            "20240105093000_AddUsers.Designer.cs",
            "20240105093000_AddUsersIndex.cs",
            "AppDbContextModelSnapshot.cs",
        ] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        let files = migration_files(dir.path(), "AddUsers").unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("20240105093000_AddUsers.cs"));
    }
}
