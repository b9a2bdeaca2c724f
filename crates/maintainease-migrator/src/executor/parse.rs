//! Parsers for `dotnet ef` output.
//!
//! The JSON form (`--json --prefix-output`) is preferred. The text parsers
//! cover older tool versions and commands without a machine-readable mode.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::model::{DbContextInfo, MigrationInfo};

static LIST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{14}_[A-Za-z0-9_]+)(?:\s*\((Applied|Pending)\))?\s*$")
        .expect("Invalid list line regex")
});

static APPLYING_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Applying migration '(\d{14}_[A-Za-z0-9_]+)'").expect("Invalid applying regex")
});

/// Migrations split by applied state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationList {
    pub applied: Vec<MigrationInfo>,
    pub pending: Vec<MigrationInfo>,
}

impl MigrationList {
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonMigration {
    id: String,
    #[serde(default)]
    applied: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonContext {
    full_name: String,
    #[serde(default)]
    assembly_qualified_name: Option<String>,
}

/// Parse `migrations list` output, JSON first, then text.
pub fn parse_migration_list(output: &str) -> MigrationList {
    if let Some(payload) = json_payload(output) {
        match parse_migration_list_json(&payload) {
            Ok(list) => return list,
            Err(e) => debug!("migrations list output is not JSON ({}), parsing as text", e),
        }
    }
    parse_migration_list_text(output)
}

fn parse_migration_list_json(payload: &str) -> Result<MigrationList> {
    let entries: Vec<JsonMigration> = serde_json::from_str(payload)?;
    let mut list = MigrationList::default();
    for entry in entries {
        let info = MigrationInfo::from_id(entry.id);
        // `applied: null` means the database was unreachable; treat as pending
        if entry.applied == Some(true) {
            list.applied.push(info);
        } else {
            list.pending.push(info);
        }
    }
    list.applied.sort();
    list.pending.sort();
    Ok(list)
}

/// Parse the text form: one `<timestamp>_<name>` per line with an optional
/// `(Applied)` / `(Pending)` marker. Unmarked lines count as applied.
pub fn parse_migration_list_text(output: &str) -> MigrationList {
    let mut list = MigrationList::default();
    for line in output.lines() {
        let line = strip_prefix_marker(line);
        let Some(caps) = LIST_LINE.captures(line) else {
            continue;
        };
        let info = MigrationInfo::from_id(&caps[1]);
        match caps.get(2).map(|m| m.as_str()) {
            Some("Pending") => list.pending.push(info),
            _ => list.applied.push(info),
        }
    }
    list.applied.sort();
    list.pending.sort();
    list
}

/// Migrations reported by `database update` as applied during this run.
pub fn parse_applied_during_update(output: &str) -> Vec<MigrationInfo> {
    APPLYING_LINE
        .captures_iter(output)
        .map(|caps| MigrationInfo::from_id(&caps[1]))
        .collect()
}

/// Parse `dbcontext list --json` output.
pub fn parse_context_list(output: &str) -> Result<Vec<DbContextInfo>> {
    let payload = json_payload(output).ok_or_else(|| {
        MigrateError::ContextNotFound("dbcontext list produced no JSON output".into())
    })?;
    let entries: Vec<JsonContext> = serde_json::from_str(&payload)?;
    Ok(entries
        .into_iter()
        .map(|entry| {
            let mut info = DbContextInfo::new(entry.full_name);
            info.assembly = entry
                .assembly_qualified_name
                .as_deref()
                .and_then(assembly_from_qualified_name);
            info
        })
        .collect())
}

/// `Ns.Type, Acme.Data, Version=1.0.0.0, ...` -> `Acme.Data`
fn assembly_from_qualified_name(name: &str) -> Option<String> {
    name.split(',')
        .nth(1)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the JSON document from tool output.
///
/// With `--prefix-output` data lines start with `data:`; otherwise the JSON
/// starts at the first line opening an array or object.
fn json_payload(output: &str) -> Option<String> {
    let data: Vec<&str> = output
        .lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(str::trim)
        .collect();
    if !data.is_empty() {
        return Some(data.join("\n"));
    }

    let lines: Vec<&str> = output.lines().collect();
    let start = lines.iter().position(|l| {
        let t = l.trim_start();
        t.starts_with('[') || t.starts_with('{')
    })?;
    Some(lines[start..].join("\n"))
}

/// Drop `info:` / `verbose:` style prefixes added by `--prefix-output`.
fn strip_prefix_marker(line: &str) -> &str {
    for prefix in ["info:", "data:", "verbose:", "warn:"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest;
        }
    }
    line
}
