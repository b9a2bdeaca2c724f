//! Supported database providers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// A relational backend with its own EF Core provider and native tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    SqlServer,
    PostgreSql,
}

impl Provider {
    /// All built-in providers in registration order.
    pub const ALL: [Provider; 2] = [Provider::SqlServer, Provider::PostgreSql];

    /// Resolve a provider from a user-supplied name. Matching is case-insensitive.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider name is not recognized.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "sqlserver" | "sql_server" | "sql server" | "mssql" => Ok(Provider::SqlServer),
            "postgresql" | "postgres" | "pg" | "npgsql" => Ok(Provider::PostgreSql),
            _ => Err(MigrateError::Config(format!(
                "Unknown provider: '{}'. Supported providers: SqlServer, PostgreSql",
                name.trim()
            ))),
        }
    }

    /// Canonical provider name, also used as a directory name.
    pub fn name(&self) -> &'static str {
        match self {
            Provider::SqlServer => "SqlServer",
            Provider::PostgreSql => "PostgreSql",
        }
    }

    /// NuGet package of the EF Core provider.
    pub fn ef_package(&self) -> &'static str {
        match self {
            Provider::SqlServer => "Microsoft.EntityFrameworkCore.SqlServer",
            Provider::PostgreSql => "Npgsql.EntityFrameworkCore.PostgreSQL",
        }
    }

    /// Options-builder extension method that wires the provider in.
    pub fn use_method(&self) -> &'static str {
        match self {
            Provider::SqlServer => "UseSqlServer",
            Provider::PostgreSql => "UseNpgsql",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Provider::SqlServer => 1433,
            Provider::PostgreSql => 5432,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_is_case_insensitive() {
        assert_eq!(Provider::from_name("SQLSERVER").unwrap(), Provider::SqlServer);
        assert_eq!(Provider::from_name("sqlServer").unwrap(), Provider::SqlServer);
        assert_eq!(Provider::from_name("PostgreSQL").unwrap(), Provider::PostgreSql);
        assert_eq!(Provider::from_name(" pg ").unwrap(), Provider::PostgreSql);
    }

    #[test]
    fn test_from_name_rejects_unknown() {
        let err = Provider::from_name("oracle").unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }
}
