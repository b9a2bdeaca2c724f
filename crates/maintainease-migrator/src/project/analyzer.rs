//! Toolchain lookup, project resolution and DbContext discovery.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{ExecutionSettings, ProjectSettings};
use crate::error::{MigrateError, Result};
use crate::executor::parse::parse_context_list;
use crate::executor::{CommandRunner, CommandSpec, EfCommand, EfVerb, OUTPUT_TAIL_LINES};
use crate::model::DbContextInfo;

/// Context name used when the requested one is not found.
pub const CONVENTIONAL_CONTEXT: &str = "AppDbContext";

const SKIPPED_DIRS: &[&str] = &["bin", "obj", "node_modules", "packages", "TestResults"];
const PROJECT_SEARCH_DEPTH: usize = 6;

static CLASS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^([ \t\w]*?)\bclass\s+([A-Za-z_]\w*)\s*(?:<[^>{]*>)?\s*:\s*([^{\r\n]+)")
        .expect("Invalid class regex")
});

static NAMESPACE_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*namespace\s+([A-Za-z_][\w.]*)").expect("Invalid namespace regex")
});

/// Resolves the build environment for migration commands.
#[derive(Debug, Clone)]
pub struct ProjectAnalyzer {
    project: ProjectSettings,
    execution: ExecutionSettings,
}

impl ProjectAnalyzer {
    pub fn new(project: ProjectSettings, execution: ExecutionSettings) -> Self {
        Self { project, execution }
    }

    /// Locate the `dotnet` executable.
    pub fn locate_dotnet(&self) -> Result<PathBuf> {
        find_executable("dotnet", self.execution.dotnet_path.as_deref())
    }

    /// Configured root, else the nearest solution root, else the current directory.
    pub fn working_dir(&self) -> Result<PathBuf> {
        if let Some(ref root) = self.project.root {
            if !root.is_dir() {
                return Err(MigrateError::ProjectNotFound(format!(
                    "configured project root {:?} is not a directory",
                    root
                )));
            }
            return Ok(root.clone());
        }

        let cwd = std::env::current_dir()?;
        match find_solution_root(&cwd) {
            Some(root) => Ok(root),
            None => {
                debug!("No solution file above {:?}, using it as working directory", cwd);
                Ok(cwd)
            }
        }
    }

    /// Resolve the data-access project file under `root`.
    pub fn data_project(&self, root: &Path) -> Result<PathBuf> {
        find_data_project(
            root,
            self.project.data_project.as_deref(),
            &self.project.data_project_patterns,
        )
    }

    /// Discover DbContext types.
    ///
    /// Asks the tool against the compiled project first, builds once and asks
    /// again, and finally scans the sources.
    pub async fn discover_contexts(
        &self,
        runner: &CommandRunner,
        dotnet: &Path,
        data_project: &Path,
    ) -> Result<Vec<DbContextInfo>> {
        let project_dir = data_project.parent().unwrap_or(Path::new("."));

        let contexts = self.list_compiled_contexts(runner, dotnet, data_project).await?;
        if !contexts.is_empty() {
            return Ok(contexts);
        }

        warn!(
            "No DbContext found in compiled output of {:?}, building once and retrying",
            data_project
        );
        let build = CommandSpec::new(dotnet)
            .arg("build")
            .arg(data_project.display().to_string())
            .args(["--nologo", "--verbosity", "quiet"])
            .current_dir(project_dir)
            .env("DOTNET_CLI_TELEMETRY_OPTOUT", "1");
        match runner.run(&build).await {
            Ok(output) if output.success() => {
                let contexts = self.list_compiled_contexts(runner, dotnet, data_project).await?;
                if !contexts.is_empty() {
                    return Ok(contexts);
                }
            }
            Ok(output) => warn!(
                "Build of {:?} failed with exit code {}:\n{}",
                data_project,
                output.exit_code,
                output.tail(OUTPUT_TAIL_LINES)
            ),
            Err(e @ (MigrateError::Cancelled | MigrateError::Timeout { .. })) => return Err(e),
            Err(e) => warn!("Build of {:?} could not run: {}", data_project, e),
        }

        warn!("Falling back to source scan for DbContext types in {:?}", project_dir);
        let mut contexts = scan_sources_for_contexts(project_dir)?;
        let assembly = data_project
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned());
        for context in &mut contexts {
            context.assembly = context.assembly.take().or_else(|| assembly.clone());
        }
        Ok(contexts)
    }

    async fn list_compiled_contexts(
        &self,
        runner: &CommandRunner,
        dotnet: &Path,
        data_project: &Path,
    ) -> Result<Vec<DbContextInfo>> {
        let project_dir = data_project.parent().unwrap_or(Path::new("."));
        let spec = EfCommand::new(EfVerb::DbContextList, data_project)
            .no_build(true)
            .to_spec(dotnet, project_dir);

        match runner.run(&spec).await {
            Ok(output) if output.success() => match parse_context_list(&output.stdout) {
                Ok(contexts) => {
                    debug!("Tool reported {} DbContext type(s)", contexts.len());
                    Ok(contexts)
                }
                Err(e) => {
                    warn!("Could not parse dbcontext list output: {}", e);
                    Ok(Vec::new())
                }
            },
            Ok(output) => {
                debug!(
                    "dbcontext list exited with {}: {}",
                    output.exit_code,
                    output.tail(5)
                );
                Ok(Vec::new())
            }
            Err(e @ (MigrateError::Cancelled | MigrateError::Timeout { .. })) => Err(e),
            Err(e) => {
                warn!("dbcontext list could not run: {}", e);
                Ok(Vec::new())
            }
        }
    }
}

/// Find an executable: the explicit path if given, else `DOTNET_ROOT`, else PATH.
pub fn find_executable(name: &str, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(MigrateError::ToolNotFound(format!(
                "{} (configured path {:?} does not exist)",
                name, path
            )))
        };
    }

    let candidates = executable_names(name);
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Some(root) = std::env::var_os("DOTNET_ROOT") {
        dirs.push(PathBuf::from(root));
    }
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }

    dirs.iter()
        .flat_map(|dir| candidates.iter().map(move |c| dir.join(c)))
        .find(|p| p.is_file())
        .ok_or_else(|| MigrateError::ToolNotFound(format!("{} not found on PATH", name)))
}

fn executable_names(name: &str) -> Vec<OsString> {
    if cfg!(windows) {
        vec![format!("{}.exe", name).into(), format!("{}.cmd", name).into()]
    } else {
        vec![name.into()]
    }
}

/// Walk up from `start` to the first directory containing a `.sln`/`.slnx`.
pub fn find_solution_root(start: &Path) -> Option<PathBuf> {
    start.ancestors().find_map(|dir| {
        let entries = std::fs::read_dir(dir).ok()?;
        let has_solution = entries.flatten().any(|entry| {
            let path = entry.path();
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("sln") | Some("slnx")
                )
        });
        has_solution.then(|| dir.to_path_buf())
    })
}

/// Resolve the data-access project.
///
/// A configured path is probed directly (file or directory); otherwise
/// `*.csproj` files whose name contains one of `patterns` are searched,
/// shallowest first. Test projects are skipped.
pub fn find_data_project(
    root: &Path,
    explicit: Option<&Path>,
    patterns: &[String],
) -> Result<PathBuf> {
    if let Some(explicit) = explicit {
        let path = if explicit.is_absolute() {
            explicit.to_path_buf()
        } else {
            root.join(explicit)
        };
        if path.is_file() && is_csproj(&path) {
            return Ok(path);
        }
        if path.is_dir() {
            if let Some(project) = first_csproj_in(&path)? {
                return Ok(project);
            }
        }
        warn!(
            "Configured data project {:?} not found, searching by name pattern",
            path
        );
    }

    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
    let mut matches: Vec<(usize, PathBuf)> = WalkDir::new(root)
        .max_depth(PROJECT_SEARCH_DEPTH)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_csproj(e.path()))
        .filter(|e| {
            let stem = e
                .path()
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            !stem.contains("test") && patterns.iter().any(|p| stem.contains(p.as_str()))
        })
        .map(|e| (e.depth(), e.into_path()))
        .collect();
    matches.sort();

    match matches.into_iter().next() {
        Some((_, path)) => {
            info!("Using data project {:?}", path);
            Ok(path)
        }
        None => Err(MigrateError::ProjectNotFound(format!(
            "no *.csproj matching {:?} under {:?}",
            patterns, root
        ))),
    }
}

fn first_csproj_in(dir: &Path) -> Result<Option<PathBuf>> {
    let mut projects: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && is_csproj(p))
        .collect();
    projects.sort();
    Ok(projects.into_iter().next())
}

fn is_csproj(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("csproj")
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Regex-scan `.cs` sources for non-abstract classes whose first base type
/// ends in `DbContext`.
pub fn scan_sources_for_contexts(project_dir: &Path) -> Result<Vec<DbContextInfo>> {
    let mut contexts = Vec::new();

    for entry in WalkDir::new(project_dir)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e))
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.path().extension().and_then(|x| x.to_str()) == Some("cs")
        })
    {
        let source = match std::fs::read_to_string(entry.path()) {
            Ok(s) => s,
            Err(e) => {
                debug!("Skipping unreadable source {:?}: {}", entry.path(), e);
                continue;
            }
        };
        contexts.extend(contexts_in_source(&source, entry.path()));
    }

    contexts.sort_by(|a, b| a.full_name.cmp(&b.full_name));
    contexts.dedup_by(|a, b| a.full_name == b.full_name);
    Ok(contexts)
}

fn contexts_in_source(source: &str, path: &Path) -> Vec<DbContextInfo> {
    let namespace = NAMESPACE_DECL
        .captures(source)
        .map(|caps| caps[1].to_string());

    CLASS_DECL
        .captures_iter(source)
        .filter(|caps| !caps[1].split_whitespace().any(|m| m == "abstract"))
        .filter(|caps| first_base_type(&caps[3]).ends_with("DbContext"))
        .map(|caps| {
            let name = caps[2].to_string();
            let full_name = match namespace {
                Some(ref ns) => format!("{}.{}", ns, name),
                None => name.clone(),
            };
            DbContextInfo {
                name,
                full_name,
                namespace: namespace.clone(),
                assembly: None,
                source_file: Some(path.to_path_buf()),
            }
        })
        .collect()
}

/// Unqualified, non-generic name of the first entry in a base list.
fn first_base_type(bases: &str) -> &str {
    let mut depth = 0usize;
    let mut end = bases.len();
    for (i, c) in bases.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    let first = bases[..end].trim();
    let first = first.split(" where ").next().unwrap_or(first);
    let first = first.split('<').next().unwrap_or(first).trim();
    first.rsplit('.').next().unwrap_or(first)
}

/// Pick a context: exact name, then `<name>DbContext`, then `AppDbContext`,
/// then the first one discovered.
pub fn match_context<'a>(
    contexts: &'a [DbContextInfo],
    requested: Option<&str>,
) -> Option<&'a DbContextInfo> {
    if let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty()) {
        let suffixed = format!("{}DbContext", requested);
        let found = contexts
            .iter()
            .find(|c| c.name == requested || c.full_name == requested)
            .or_else(|| {
                contexts
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(requested))
            })
            .or_else(|| {
                contexts
                    .iter()
                    .find(|c| c.name.eq_ignore_ascii_case(&suffixed))
            });
        if found.is_some() {
            return found;
        }
        warn!(
            "Requested DbContext '{}' not found among {} discovered type(s)",
            requested,
            contexts.len()
        );
    }

    contexts
        .iter()
        .find(|c| c.name == CONVENTIONAL_CONTEXT)
        .or_else(|| contexts.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn ctx(full_name: &str) -> DbContextInfo {
        DbContextInfo::new(full_name)
    }

    #[test]
    fn test_match_context_exact() {
        let contexts = [ctx("A.OrdersDbContext"), ctx("A.Orders"), ctx("A.AppDbContext")];
        assert_eq!(match_context(&contexts, Some("Orders")).unwrap().name, "Orders");
    }

    #[test]
    fn test_match_context_suffix() {
        let contexts = [ctx("A.AppDbContext"), ctx("A.OrdersDbContext")];
        assert_eq!(
            match_context(&contexts, Some("orders")).unwrap().name,
            "OrdersDbContext"
        );
    }

    #[test]
    fn test_match_context_conventional_then_first() {
        let contexts = [ctx("A.ReportingDbContext"), ctx("A.AppDbContext")];
        assert_eq!(
            match_context(&contexts, Some("Missing")).unwrap().name,
            "AppDbContext"
        );

        let contexts = [ctx("A.ReportingDbContext"), ctx("A.AuditDbContext")];
        assert_eq!(
            match_context(&contexts, None).unwrap().name,
            "ReportingDbContext"
        );
        assert!(match_context(&[], Some("x")).is_none());
    }

    #[test]
    fn test_first_base_type() {
        assert_eq!(first_base_type("DbContext"), "DbContext");
        assert_eq!(
            first_base_type("IdentityDbContext<User, Role, Guid>, IAuditable"),
            "IdentityDbContext"
        );
        assert_eq!(
            first_base_type("Microsoft.EntityFrameworkCore.DbContext"),
            "DbContext"
        );
        assert_eq!(
            first_base_type("IDesignTimeDbContextFactory<AppDbContext>"),
            "IDesignTimeDbContextFactory"
        );
    }

    #[test]
    fn test_scan_sources_finds_contexts() {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join("AppDbContext.cs"),
            "namespace Acme.Data;\n\npublic sealed class AppDbContext : DbContext\n{\n}\n",
        );
        write(
            &dir.path().join("Identity/AuthContext.cs"),
            "namespace Acme.Data.Identity\n{\n    public partial class AuthContext : IdentityDbContext<User>\n    {\n    }\n}\n",
        );
        write(
            &dir.path().join("Base.cs"),
            "namespace Acme.Data;\npublic abstract class TenantDbContextBase : DbContext {}\n",
        );
        write(
            &dir.path().join("Factory.cs"),
            "namespace Acme.Data;\npublic class Factory : IDesignTimeDbContextFactory<AppDbContext> {}\n// class Commented : DbContext\n",
        );
        write(
            &dir.path().join("obj/Generated.cs"),
            "namespace Gen;\npublic class GeneratedDbContext : DbContext {}\n",
        );

        let contexts = scan_sources_for_contexts(dir.path()).unwrap();
        let names: Vec<_> = contexts.iter().map(|c| c.full_name.as_str()).collect();
        assert_eq!(names, ["Acme.Data.AppDbContext", "Acme.Data.Identity.AuthContext"]);
        assert!(contexts[0].source_file.is_some());
    }

    #[test]
    fn test_find_solution_root_walks_up() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("Acme.sln"), "");
        let nested = dir.path().join("src/Acme.Data");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_solution_root(&nested).unwrap(), dir.path());
    }

    #[test]
    fn test_find_data_project_by_pattern() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("src/Acme.Web/Acme.Web.csproj"), "<Project/>");
        write(&dir.path().join("src/Acme.Data/Acme.Data.csproj"), "<Project/>");
        write(&dir.path().join("tests/Acme.Data.Tests/Acme.Data.Tests.csproj"), "<Project/>");
        write(&dir.path().join("src/Acme.Data/bin/Debug/Copy.Data.csproj"), "<Project/>");

        let patterns = vec!["Data".to_string()];
        let project = find_data_project(dir.path(), None, &patterns).unwrap();
        assert!(project.ends_with("src/Acme.Data/Acme.Data.csproj"));
    }

    #[test]
    fn test_find_data_project_direct_probe() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("db/Storage.csproj"), "<Project/>");

        let project = find_data_project(dir.path(), Some(Path::new("db")), &[]).unwrap();
        assert!(project.ends_with("db/Storage.csproj"));

        let err = find_data_project(dir.path(), Some(Path::new("nope")), &[]).unwrap_err();
        assert!(matches!(err, MigrateError::ProjectNotFound(_)));
    }

    #[test]
    fn test_find_executable_explicit_missing() {
        let err = find_executable("dotnet", Some(Path::new("/no/such/dotnet"))).unwrap_err();
        assert!(matches!(err, MigrateError::ToolNotFound(_)));
    }
}
