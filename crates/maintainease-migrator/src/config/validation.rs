//! Settings validation.

use super::Settings;
use crate::connection::ConnectionFields;
use crate::error::{MigrateError, Result};
use crate::provider::Provider;

/// Accepted values of `preferences.verbosity`.
const VERBOSITY_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

/// Accepted values of `preferences.log_format`.
const LOG_FORMATS: &[&str] = &["text", "json"];

/// Validate the settings.
pub fn validate(settings: &Settings) -> Result<()> {
    Provider::from_name(&settings.database.provider)?;

    if settings.database.timeout_secs == 0 {
        return Err(MigrateError::Config(
            "database.timeout_secs must be at least 1".into(),
        ));
    }
    if settings.execution.command_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "execution.command_timeout_secs must be at least 1".into(),
        ));
    }
    if settings.connection_retry.max_attempts == 0 {
        return Err(MigrateError::Config(
            "connection_retry.max_attempts must be at least 1".into(),
        ));
    }

    if let Some(ref cs) = settings.database.connection_string {
        validate_connection_string("database.connection_string", cs)?;
    }
    for (tenant, cs) in &settings.database.tenants {
        validate_connection_string(&format!("database.tenants.{}", tenant), cs)?;
    }
    for (env, cs) in &settings.database.environments {
        validate_connection_string(&format!("database.environments.{}", env), cs)?;
    }

    let verbosity = settings.preferences.verbosity.to_lowercase();
    if !VERBOSITY_LEVELS.contains(&verbosity.as_str()) {
        return Err(MigrateError::Config(format!(
            "preferences.verbosity must be one of {}, got '{}'",
            VERBOSITY_LEVELS.join(", "),
            settings.preferences.verbosity
        )));
    }
    let log_format = settings.preferences.log_format.to_lowercase();
    if !LOG_FORMATS.contains(&log_format.as_str()) {
        return Err(MigrateError::Config(format!(
            "preferences.log_format must be one of {}, got '{}'",
            LOG_FORMATS.join(", "),
            settings.preferences.log_format
        )));
    }

    if settings.project.target_framework.trim().is_empty() {
        return Err(MigrateError::Config(
            "project.target_framework is required".into(),
        ));
    }

    Ok(())
}

fn validate_connection_string(field: &str, connection_string: &str) -> Result<()> {
    let fields = ConnectionFields::parse(connection_string);
    if fields.server.as_deref().map_or(true, str::is_empty) {
        return Err(MigrateError::Config(format!(
            "{} has no server/host",
            field
        )));
    }
    if fields.database.as_deref().map_or(true, str::is_empty) {
        return Err(MigrateError::Config(format!("{} has no database", field)));
    }
    Ok(())
}
