//! Output directory layout.
//!
//! ```text
//! <root>/Migrations/<Provider>/<tenant|default>/
//! <root>/Scripts/<Provider>/<tenant|default>/
//! <root>/Backups/<Provider>/<tenant|default>/
//! ```

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::provider::Provider;

const DEFAULT_TENANT: &str = "default";

#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn migrations_dir(&self, provider: Provider, tenant: Option<&str>) -> PathBuf {
        self.scoped("Migrations", provider, tenant)
    }

    pub fn scripts_dir(&self, provider: Provider, tenant: Option<&str>) -> PathBuf {
        self.scoped("Scripts", provider, tenant)
    }

    pub fn backups_dir(&self, provider: Provider, tenant: Option<&str>) -> PathBuf {
        self.scoped("Backups", provider, tenant)
    }

    /// Create a directory (and parents) and return it.
    pub fn ensure(dir: PathBuf) -> Result<PathBuf> {
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    fn scoped(&self, kind: &str, provider: Provider, tenant: Option<&str>) -> PathBuf {
        self.root
            .join(kind)
            .join(provider.name())
            .join(tenant_segment(tenant))
    }
}

/// Directory segment for a tenant. Path separators are neutralized.
pub fn tenant_segment(tenant: Option<&str>) -> String {
    match tenant.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => t
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect(),
        None => DEFAULT_TENANT.to_string(),
    }
}
