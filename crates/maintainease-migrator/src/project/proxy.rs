//! Throwaway startup project for running `dotnet ef` in isolation.
//!
//! The proxy references the real data project and carries a design-time
//! factory that reads the connection string from the environment, so the
//! caller's own project files are never touched and no secret ends up on a
//! command line. The directory lives in the system temp dir with a random
//! suffix and is deleted when the [`ProxyProject`] drops.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::config::ProjectSettings;
use crate::error::Result;
use crate::executor::CONNECTION_ENV_VAR;
use crate::model::DbContextInfo;
use crate::provider::Provider;

const PROXY_PREFIX: &str = "maintainease-proxy-";
const PROXY_PROJECT_NAME: &str = "MaintainEase.MigrationProxy";

/// A generated proxy project. Removed from disk on drop.
#[derive(Debug)]
pub struct ProxyProject {
    dir: TempDir,
    project_file: PathBuf,
}

impl ProxyProject {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn project_file(&self) -> &Path {
        &self.project_file
    }

    /// Delete the directory now, reporting failures instead of ignoring them.
    pub fn close(self) -> Result<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed proxy project {:?}", path);
        Ok(())
    }
}

/// Generates [`ProxyProject`]s.
#[derive(Debug, Clone)]
pub struct ProxyProjectGenerator {
    target_framework: String,
    ef_version: String,
    temp_root: Option<PathBuf>,
}

impl ProxyProjectGenerator {
    pub fn new(settings: &ProjectSettings) -> Self {
        Self {
            target_framework: settings.target_framework.clone(),
            ef_version: settings.ef_version.clone(),
            temp_root: None,
        }
    }

    /// Create proxies under `dir` instead of the system temp directory.
    pub fn with_temp_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(dir.into());
        self
    }

    pub fn generate(
        &self,
        provider: Provider,
        data_project: &Path,
        context: &DbContextInfo,
    ) -> Result<ProxyProject> {
        let builder = {
            let mut b = tempfile::Builder::new();
            b.prefix(PROXY_PREFIX);
            b
        };
        let dir = match self.temp_root {
            Some(ref root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let data_project = data_project
            .canonicalize()
            .unwrap_or_else(|_| data_project.to_path_buf());
        let migrations_assembly = context.assembly.clone().unwrap_or_else(|| {
            data_project
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

        let project_file = dir.path().join(format!("{}.csproj", PROXY_PROJECT_NAME));
        std::fs::write(
            &project_file,
            self.render_project(provider, &data_project),
        )?;
        std::fs::write(dir.path().join("Program.cs"), PROGRAM_SOURCE)?;
        std::fs::write(
            dir.path().join("ProxyDbContextFactory.cs"),
            render_factory(provider, context, &migrations_assembly),
        )?;

        debug!(
            "Generated proxy project {:?} for {} ({})",
            project_file, context.full_name, provider
        );
        if context.namespace.is_none() && context.full_name == context.name {
            warn!(
                "DbContext '{}' has no namespace; the proxy factory may not resolve it",
                context.name
            );
        }

        Ok(ProxyProject { dir, project_file })
    }

    fn render_project(&self, provider: Provider, data_project: &Path) -> String {
        format!(
            r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>{framework}</TargetFramework>
    <ImplicitUsings>enable</ImplicitUsings>
    <Nullable>enable</Nullable>
    <IsPackable>false</IsPackable>
    <AssemblyName>{name}</AssemblyName>
  </PropertyGroup>
  <ItemGroup>
    <PackageReference Include="Microsoft.EntityFrameworkCore.Design" Version="{ef}">
      <PrivateAssets>all</PrivateAssets>
    </PackageReference>
    <PackageReference Include="{package}" Version="{ef}" />
  </ItemGroup>
  <ItemGroup>
    <ProjectReference Include="{reference}" />
  </ItemGroup>
</Project>
"#,
            framework = xml_escape(&self.target_framework),
            name = PROXY_PROJECT_NAME,
            ef = xml_escape(&self.ef_version),
            package = provider.ef_package(),
            reference = xml_escape(&data_project.display().to_string()),
        )
    }
}

const PROGRAM_SOURCE: &str = "// Entry point required by the EF design-time host.\nreturn 0;\n";

fn render_factory(provider: Provider, context: &DbContextInfo, migrations_assembly: &str) -> String {
    format!(
        r#"using Microsoft.EntityFrameworkCore;
using Microsoft.EntityFrameworkCore.Design;

namespace MaintainEase.MigrationProxy;

public sealed class ProxyDbContextFactory : IDesignTimeDbContextFactory<global::{context}>
{{
    public global::{context} CreateDbContext(string[] args)
    {{
        var connectionString = Environment.GetEnvironmentVariable("{env}")
            ?? throw new InvalidOperationException("{env} is not set");
        var options = new DbContextOptionsBuilder<global::{context}>()
            .{use_method}(connectionString, o => o.MigrationsAssembly("{assembly}"))
            .Options;
        return new global::{context}(options);
    }}
}}
"#,
        context = context.full_name,
        env = CONNECTION_ENV_VAR,
        use_method = provider.use_method(),
        assembly = migrations_assembly,
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
