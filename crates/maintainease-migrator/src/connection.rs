//! Connection string handling: field extraction and secret masking.
//!
//! Connection strings are `;`-delimited `key=value` lists. Keys are matched
//! case-insensitively and the usual ADO.NET / Npgsql aliases are accepted
//! (`Initial Catalog` vs `Database`, `Data Source` vs `Server`, and so on).
//!
//! Values may be wrapped in `"` or `'`; inside quotes `;` is literal and a
//! doubled quote stands for one quote character. Parsing and masking share the
//! same tokenizer, so a masked string never exposes part of a quoted secret.
//!
//! Secrets never reach a log line unmasked: use [`mask_connection_string`] or
//! the `Debug` impl of [`ConnectionConfig`]. The real value is handed to child
//! processes through environment variables only.

use std::borrow::Cow;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};
use crate::provider::Provider;

/// Fixed placeholder substituted for password values.
pub const MASK: &str = "********";

const SERVER_KEYS: &[&str] = &["server", "data source", "host", "address", "addr"];
const DATABASE_KEYS: &[&str] = &["database", "initial catalog"];
const USER_KEYS: &[&str] = &["user id", "uid", "user", "username", "user name"];
const PASSWORD_KEYS: &[&str] = &["password", "pwd"];

/// Connection settings for one migration invocation.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Raw connection string. Contains secrets.
    pub connection_string: String,

    /// Provider name as supplied by the caller.
    pub provider: String,

    /// Connection/command timeout in seconds.
    pub timeout_secs: u64,

    /// Whether migrations should run inside a transaction.
    pub use_transaction: bool,
}

impl ConnectionConfig {
    pub fn new(connection_string: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            provider: provider.into(),
            timeout_secs: 30,
            use_transaction: true,
        }
    }

    /// Resolve the provider name.
    pub fn provider(&self) -> Result<Provider> {
        Provider::from_name(&self.provider)
    }

    /// Extract server, database and credentials.
    pub fn fields(&self) -> ConnectionFields {
        ConnectionFields::parse(&self.connection_string)
    }

    /// Connection string with the password replaced, safe for logging.
    pub fn masked(&self) -> String {
        mask_connection_string(&self.connection_string)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connection_string", &self.masked())
            .field("provider", &self.provider)
            .field("timeout_secs", &self.timeout_secs)
            .field("use_transaction", &self.use_transaction)
            .finish()
    }
}

/// Fields extracted from a connection string.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionFields {
    pub server: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub integrated_security: bool,
}

impl ConnectionFields {
    /// Parse a connection string. Unknown keys are ignored.
    pub fn parse(connection_string: &str) -> Self {
        let mut fields = ConnectionFields::default();

        for (key, value) in split_pairs(connection_string) {
            let key = key.as_str();
            if SERVER_KEYS.contains(&key) {
                let (server, port) = split_server_port(&value);
                fields.server = Some(server);
                if port.is_some() {
                    fields.port = port;
                }
            } else if DATABASE_KEYS.contains(&key) {
                fields.database = Some(value);
            } else if USER_KEYS.contains(&key) {
                fields.user = Some(value);
            } else if PASSWORD_KEYS.contains(&key) {
                fields.password = Some(value);
            } else if key == "port" {
                fields.port = value.parse().ok();
            } else if key == "integrated security" || key == "trusted_connection" {
                fields.integrated_security =
                    matches!(value.to_lowercase().as_str(), "true" | "yes" | "sspi");
            }
        }

        fields
    }

    /// Server name, or an error naming the missing key.
    pub fn require_server(&self) -> Result<&str> {
        self.server
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MigrateError::Config("connection string has no server/host".into()))
    }

    /// Database name, or an error naming the missing key.
    pub fn require_database(&self) -> Result<&str> {
        self.database
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MigrateError::Config("connection string has no database".into()))
    }
}

impl fmt::Debug for ConnectionFields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFields")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("integrated_security", &self.integrated_security)
            .finish()
    }
}

/// Replace every password value with [`MASK`].
///
/// Idempotent, and leaves every non-password field byte-for-byte intact.
pub fn mask_connection_string(connection_string: &str) -> String {
    let mut masked = String::with_capacity(connection_string.len());
    for (i, range) in segments(connection_string).into_iter().enumerate() {
        if i > 0 {
            masked.push(';');
        }
        let segment = &connection_string[range];
        match segment.split_once('=') {
            Some((key, _)) if PASSWORD_KEYS.contains(&key.trim().to_lowercase().as_str()) => {
                masked.push_str(key);
                masked.push('=');
                masked.push_str(MASK);
            }
            _ => masked.push_str(segment),
        }
    }
    masked
}

/// Quote `value` for use on the right of `key=` when it contains characters
/// the tokenizer treats specially.
pub fn quote_value(value: &str) -> Cow<'_, str> {
    let needs_quotes = value.contains([';', '=', '"', '\''])
        || value.trim() != value
        || value.is_empty();
    if needs_quotes {
        Cow::Owned(format!("\"{}\"", value.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(value)
    }
}

/// Byte ranges of the `;`-separated segments, skipping separators that sit
/// inside a quoted value.
fn segments(connection_string: &str) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    let mut chars = connection_string.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match quote {
            Some(q) if c == q => {
                if chars.peek().map(|&(_, next)| next) == Some(q) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None if (c == '"' || c == '\'')
                && connection_string[start..i].trim_end().ends_with('=') =>
            {
                quote = Some(c);
            }
            None if c == ';' => {
                ranges.push(start..i);
                start = i + 1;
            }
            None => {}
        }
    }
    ranges.push(start..connection_string.len());

    ranges
}

/// Split into lowercase keys and unquoted values.
fn split_pairs(connection_string: &str) -> Vec<(String, String)> {
    segments(connection_string)
        .into_iter()
        .filter_map(|range| {
            let (key, value) = connection_string[range].split_once('=')?;
            let key = key.trim().to_lowercase();
            if key.is_empty() {
                return None;
            }
            Some((key, unquote(value.trim())))
        })
        .collect()
}

fn unquote(value: &str) -> String {
    for q in ['"', '\''] {
        if let Some(inner) = value.strip_prefix(q).and_then(|v| v.strip_suffix(q)) {
            return inner.replace(&format!("{q}{q}"), &q.to_string());
        }
    }
    value.to_string()
}

/// `tcp:db1,1433` -> (`db1`, Some(1433)). A bare host passes through.
fn split_server_port(value: &str) -> (String, Option<u16>) {
    let value = value.strip_prefix("tcp:").unwrap_or(value);
    match value.rsplit_once(',') {
        Some((host, port)) => match port.trim().parse() {
            Ok(port) => (host.trim().to_string(), Some(port)),
            Err(_) => (value.to_string(), None),
        },
        None => (value.to_string(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sql_server_style() {
        let fields =
            ConnectionFields::parse("Server=db1;Database=Orders;User Id=sa;Password=Secret1;");
        assert_eq!(fields.server.as_deref(), Some("db1"));
        assert_eq!(fields.database.as_deref(), Some("Orders"));
        assert_eq!(fields.user.as_deref(), Some("sa"));
        assert_eq!(fields.password.as_deref(), Some("Secret1"));
    }

    #[test]
    fn test_parse_aliases_case_insensitive() {
        let fields = ConnectionFields::parse(
            "DATA SOURCE=tcp:sql.local,1444;initial catalog=Billing;UID=app;PWD=x",
        );
        assert_eq!(fields.server.as_deref(), Some("sql.local"));
        assert_eq!(fields.port, Some(1444));
        assert_eq!(fields.database.as_deref(), Some("Billing"));
        assert_eq!(fields.user.as_deref(), Some("app"));
        assert_eq!(fields.password.as_deref(), Some("x"));
    }

    #[test]
    fn test_parse_npgsql_style() {
        let fields = ConnectionFields::parse(
            "Host=pg.local;Port=6543;Database=tenants;Username=postgres;Password=pw",
        );
        assert_eq!(fields.server.as_deref(), Some("pg.local"));
        assert_eq!(fields.port, Some(6543));
        assert_eq!(fields.user.as_deref(), Some("postgres"));
    }

    #[test]
    fn test_parse_quoted_password_with_semicolon() {
        let fields = ConnectionFields::parse("Server=a;Password=\"p;w\";Database=b");
        assert_eq!(fields.password.as_deref(), Some("p;w"));
        assert_eq!(fields.database.as_deref(), Some("b"));
    }

    #[test]
    fn test_parse_apostrophe_inside_value() {
        let fields = ConnectionFields::parse("Server=a;User Id=o'brien;Database=b");
        assert_eq!(fields.user.as_deref(), Some("o'brien"));
        assert_eq!(fields.database.as_deref(), Some("b"));
    }

    #[test]
    fn test_parse_integrated_security() {
        let fields = ConnectionFields::parse("Server=.;Database=x;Integrated Security=SSPI");
        assert!(fields.integrated_security);
        assert!(fields.user.is_none());
    }

    #[test]
    fn test_mask_preserves_other_fields() {
        let masked = mask_connection_string("Server=db1;Database=Orders;User Id=sa;Password=Secret1;");
        assert_eq!(masked, "Server=db1;Database=Orders;User Id=sa;Password=********;");
        assert!(masked.contains("Server=db1;Database=Orders;User Id=sa;"));
        assert!(!masked.contains("Secret1"));
    }

    #[test]
    fn test_mask_is_idempotent() {
        let inputs = [
            "Server=db1;Database=Orders;User Id=sa;Password=Secret1;",
            "host=x; PWD = abc ;database=y",
            "Password=\"a;b\";Server=z",
            "Server=nopassword;Database=d",
        ];
        for input in inputs {
            let once = mask_connection_string(input);
            assert_eq!(mask_connection_string(&once), once, "input: {}", input);
        }
    }

    #[test]
    fn test_mask_handles_pwd_and_quotes() {
        let masked = mask_connection_string("Server=z;pwd='a;b';Database=d");
        assert_eq!(masked, "Server=z;pwd=********;Database=d");
    }

    #[test]
    fn test_mask_quoted_password_after_whitespace() {
        let input = "Server=a;Password= \"p;secretTail\";Database=b";
        assert_eq!(
            ConnectionFields::parse(input).password.as_deref(),
            Some("p;secretTail")
        );

        let masked = mask_connection_string(input);
        assert_eq!(masked, "Server=a;Password=********;Database=b");
        assert!(!masked.contains("secretTail"));
    }

    #[test]
    fn test_doubled_quotes_stay_inside_value() {
        let input = "Server=a;Password='it''s;tail';Database=b";
        let fields = ConnectionFields::parse(input);
        assert_eq!(fields.password.as_deref(), Some("it's;tail"));
        assert_eq!(fields.database.as_deref(), Some("b"));

        let masked = mask_connection_string(input);
        assert_eq!(masked, "Server=a;Password=********;Database=b");
        assert!(!masked.contains("tail"));
    }

    #[test]
    fn test_quote_value_round_trips_through_parse() {
        assert_eq!(quote_value("Secret1"), "Secret1");

        for secret in ["p;wTail", "a=b", "say \"hi\";x", "o'brien", " padded "] {
            let cs = format!("Server=a;Password={};Database=b", quote_value(secret));
            let fields = ConnectionFields::parse(&cs);
            assert_eq!(fields.password.as_deref(), Some(secret), "cs: {}", cs);
            assert_eq!(fields.database.as_deref(), Some("b"), "cs: {}", cs);
            assert_eq!(mask_connection_string(&cs), "Server=a;Password=********;Database=b");
        }
    }

    #[test]
    fn test_mask_does_not_touch_similar_keys() {
        let input = "Server=z;OldPassword=keep;Database=d";
        assert_eq!(mask_connection_string(input), input);
    }

    #[test]
    fn test_connection_config_debug_redacts_password() {
        let config = ConnectionConfig::new("Server=a;Password=super_secret_123", "SqlServer");
        let debug = format!("{:?}", config);
        assert!(debug.contains(MASK));
        assert!(!debug.contains("super_secret_123"));
    }

    #[test]
    fn test_require_fields() {
        let fields = ConnectionFields::parse("Server=a");
        assert_eq!(fields.require_server().unwrap(), "a");
        assert!(fields.require_database().is_err());
    }
}
