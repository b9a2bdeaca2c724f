//! Error types for the migrator library.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid settings, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required executable could not be located.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Solution root or data project could not be resolved.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    /// No DbContext type could be discovered or matched.
    #[error("DbContext not found: {0}")]
    ContextNotFound(String),

    /// External command exited with a non-zero status.
    #[error("Command `{command}` failed with exit code {code}\n{output}")]
    CommandFailed {
        command: String,
        code: i32,
        output: String,
    },

    /// External command exceeded its timeout and was killed.
    #[error("Command `{command}` timed out after {seconds}s")]
    Timeout { command: String, seconds: u64 },

    /// No real handler is registered for a provider.
    #[error("No migration handler registered for provider '{0}'")]
    NoHandler(String),

    /// Another process holds the migration lock.
    #[error("Migration lock held: {0:?} already exists; remove it if no migration is running")]
    Locked(PathBuf),

    /// Backup creation failed.
    #[error("Backup failed: {0}")]
    Backup(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled (SIGINT, etc.)
    #[error("Operation cancelled")]
    Cancelled,
}

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for missing tools or projects.
pub const EXIT_ENVIRONMENT_ERROR: u8 = 2;
/// Exit code for failed external commands.
pub const EXIT_COMMAND_FAILED: u8 = 3;
/// Exit code for timeouts.
pub const EXIT_TIMEOUT: u8 = 4;
/// Exit code for missing handlers and lock contention.
pub const EXIT_UNAVAILABLE: u8 = 5;
/// Exit code for cancellation.
pub const EXIT_CANCELLED: u8 = 6;
/// Exit code for IO errors.
pub const EXIT_IO_ERROR: u8 = 7;

impl MigrateError {
    /// Create a CommandFailed error.
    pub fn command_failed(
        command: impl Into<String>,
        code: i32,
        output: impl Into<String>,
    ) -> Self {
        MigrateError::CommandFailed {
            command: command.into(),
            code,
            output: output.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) | MigrateError::Json(_) => {
                EXIT_CONFIG_ERROR
            }
            MigrateError::ToolNotFound(_)
            | MigrateError::ProjectNotFound(_)
            | MigrateError::ContextNotFound(_) => EXIT_ENVIRONMENT_ERROR,
            MigrateError::CommandFailed { .. } | MigrateError::Backup(_) => EXIT_COMMAND_FAILED,
            MigrateError::Timeout { .. } => EXIT_TIMEOUT,
            MigrateError::NoHandler(_) | MigrateError::Locked(_) => EXIT_UNAVAILABLE,
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
