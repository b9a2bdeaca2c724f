//! Advisory lock file guarding `apply` against concurrent runs on one database.
//!
//! The lock is a file created with `create_new`, so only one process can hold
//! it. It is removed when the guard drops. A crashed process leaves the file
//! behind: on Linux it is reclaimed once the recorded pid is gone, elsewhere
//! it has to be deleted by hand after confirming nothing is running.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};

#[derive(Debug)]
pub struct MigrationLock {
    path: PathBuf,
}

impl MigrationLock {
    /// Acquire the lock for `key` inside `dir`.
    pub fn acquire(dir: &Path, key: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(".{}.migrate.lock", sanitize(key)));

        let mut file = match create(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && is_stale(&path) => {
                warn!("Removing stale migration lock {:?}", path);
                std::fs::remove_file(&path)?;
                create(&path).map_err(|e| locked_or_io(e, &path))?
            }
            Err(e) => return Err(locked_or_io(e, &path)),
        };
        writeln!(file, "pid={}", std::process::id())?;
        writeln!(file, "acquired_at={}", Utc::now().to_rfc3339())?;

        debug!("Acquired migration lock {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to release migration lock {:?}: {}", self.path, e);
        }
    }
}

fn create(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

fn locked_or_io(e: std::io::Error, path: &Path) -> MigrateError {
    if e.kind() == std::io::ErrorKind::AlreadyExists {
        MigrateError::Locked(path.to_path_buf())
    } else {
        e.into()
    }
}

/// A lock whose recorded holder is no longer running. Unreadable locks are
/// treated as held.
fn is_stale(path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(path) else {
        return false;
    };
    let pid = content
        .lines()
        .find_map(|line| line.strip_prefix("pid="))
        .and_then(|pid| pid.trim().parse::<u32>().ok());
    match pid {
        Some(pid) => !process_alive(pid),
        None => false,
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}
