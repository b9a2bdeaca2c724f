//! `dotnet ef` command composition.

use std::path::{Path, PathBuf};

use super::CommandSpec;

/// Environment variable the proxy's design-time factory reads.
pub const CONNECTION_ENV_VAR: &str = "MAINTAINEASE_CONNECTION_STRING";

/// The `dotnet ef` verbs this crate drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EfVerb {
    MigrationsAdd {
        name: String,
        output_dir: PathBuf,
    },
    MigrationsList,
    MigrationsScript {
        from: Option<String>,
        to: Option<String>,
        output: PathBuf,
        idempotent: bool,
    },
    DatabaseUpdate {
        target: Option<String>,
    },
    DbContextList,
}

impl EfVerb {
    fn words(&self) -> [&'static str; 2] {
        match self {
            EfVerb::MigrationsAdd { .. } => ["migrations", "add"],
            EfVerb::MigrationsList => ["migrations", "list"],
            EfVerb::MigrationsScript { .. } => ["migrations", "script"],
            EfVerb::DatabaseUpdate { .. } => ["database", "update"],
            EfVerb::DbContextList => ["dbcontext", "list"],
        }
    }

    /// Whether the verb supports `--json` output.
    fn supports_json(&self) -> bool {
        matches!(self, EfVerb::MigrationsList | EfVerb::DbContextList)
    }
}

/// Builder for one `dotnet ef` invocation.
#[derive(Debug, Clone)]
pub struct EfCommand {
    verb: EfVerb,
    project: PathBuf,
    startup_project: Option<PathBuf>,
    context: Option<String>,
    connection_string: Option<String>,
    environment: Option<String>,
    no_build: bool,
    verbose: bool,
}

impl EfCommand {
    pub fn new(verb: EfVerb, project: impl Into<PathBuf>) -> Self {
        Self {
            verb,
            project: project.into(),
            startup_project: None,
            context: None,
            connection_string: None,
            environment: None,
            no_build: false,
            verbose: false,
        }
    }

    pub fn startup_project(mut self, path: impl Into<PathBuf>) -> Self {
        self.startup_project = Some(path.into());
        self
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Connection string, injected through [`CONNECTION_ENV_VAR`].
    pub fn connection_string(mut self, connection_string: impl Into<String>) -> Self {
        self.connection_string = Some(connection_string.into());
        self
    }

    pub fn environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn no_build(mut self, no_build: bool) -> Self {
        self.no_build = no_build;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn verb(&self) -> &EfVerb {
        &self.verb
    }

    /// Argument vector after `dotnet`.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["ef".to_string()];
        args.extend(self.verb.words().iter().map(|w| w.to_string()));

        match &self.verb {
            EfVerb::MigrationsAdd { name, output_dir } => {
                args.push(name.clone());
                args.push("--output-dir".into());
                args.push(path_arg(output_dir));
            }
            EfVerb::MigrationsScript {
                from,
                to,
                output,
                idempotent,
            } => {
                // `to` is positional after `from`; an absent `from` means "0"
                match (from, to) {
                    (Some(from), Some(to)) => {
                        args.push(from.clone());
                        args.push(to.clone());
                    }
                    (Some(from), None) => args.push(from.clone()),
                    (None, Some(to)) => {
                        args.push("0".into());
                        args.push(to.clone());
                    }
                    (None, None) => {}
                }
                if *idempotent {
                    args.push("--idempotent".into());
                }
                args.push("--output".into());
                args.push(path_arg(output));
            }
            EfVerb::DatabaseUpdate { target: Some(target) } => args.push(target.clone()),
            EfVerb::DatabaseUpdate { target: None }
            | EfVerb::MigrationsList
            | EfVerb::DbContextList => {}
        }

        args.push("--project".into());
        args.push(path_arg(&self.project));
        if let Some(ref startup) = self.startup_project {
            args.push("--startup-project".into());
            args.push(path_arg(startup));
        }
        if let Some(ref context) = self.context {
            args.push("--context".into());
            args.push(context.clone());
        }
        if self.verb.supports_json() {
            args.push("--json".into());
            args.push("--prefix-output".into());
        }
        if self.no_build {
            args.push("--no-build".into());
        }
        if self.verbose {
            args.push("--verbose".into());
        }

        args
    }

    /// Full subprocess description for the given `dotnet` executable.
    pub fn to_spec(&self, dotnet: &Path, working_dir: &Path) -> CommandSpec {
        let mut spec = CommandSpec::new(dotnet)
            .args(self.to_args())
            .current_dir(working_dir)
            .env("DOTNET_CLI_TELEMETRY_OPTOUT", "1")
            .env("DOTNET_NOLOGO", "1");
        if let Some(ref cs) = self.connection_string {
            spec = spec.env(CONNECTION_ENV_VAR, cs.clone());
        }
        if let Some(ref environment) = self.environment {
            spec = spec.env("DOTNET_ENVIRONMENT", environment.clone());
        }
        spec
    }
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_add_args() {
        let args = EfCommand::new(
            EfVerb::MigrationsAdd {
                name: "AddUsers".into(),
                output_dir: PathBuf::from("/out/Migrations"),
            },
            "/src/Data/Data.csproj",
        )
        .startup_project("/tmp/proxy/Proxy.csproj")
        .context("AppDbContext")
        .to_args();

        assert_eq!(
            args,
            [
                "ef",
                "migrations",
                "add",
                "AddUsers",
                "--output-dir",
                "/out/Migrations",
                "--project",
                "/src/Data/Data.csproj",
                "--startup-project",
                "/tmp/proxy/Proxy.csproj",
                "--context",
                "AppDbContext",
            ]
        );
    }

    #[test]
    fn test_list_requests_json() {
        let args = EfCommand::new(EfVerb::MigrationsList, "p.csproj")
            .no_build(true)
            .to_args();
        assert!(args.contains(&"--json".to_string()));
        assert!(args.contains(&"--prefix-output".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--no-build"));
    }

    #[test]
    fn test_script_with_only_target_starts_from_zero() {
        let args = EfCommand::new(
            EfVerb::MigrationsScript {
                from: None,
                to: Some("AddUsers".into()),
                output: PathBuf::from("out.sql"),
                idempotent: true,
            },
            "p.csproj",
        )
        .to_args();
        assert_eq!(&args[3..6], ["0", "AddUsers", "--idempotent"]);
    }

    #[test]
    fn test_connection_string_goes_to_env_only() {
        let spec = EfCommand::new(EfVerb::DatabaseUpdate { target: None }, "p.csproj")
            .connection_string("Server=a;Password=secret")
            .to_spec(Path::new("/usr/bin/dotnet"), Path::new("/work"));

        assert!(spec.args.iter().all(|a| !a.contains("secret")));
        assert!(!spec.display().contains("secret"));
        assert!(spec.env_keys().any(|k| k == CONNECTION_ENV_VAR));
    }
}
