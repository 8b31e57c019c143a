//! SQL Server identifier checks and escaping.
//!
//! Uses SQL Server's bracket notation `[identifier]` to safely escape identifiers.

use crate::error::ServerError;
use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum length for SQL Server identifiers.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

/// Characters accepted in a database name used for a context switch.
static DATABASE_NAME: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Za-z0-9_\- \[\]]+$"));

/// `procedure` or `schema.procedure`.
static PROCEDURE_NAME: Lazy<Regex> =
    Lazy::new(|| compile(r"^[A-Za-z0-9_]+(\.[A-Za-z0-9_]+)?$"));

/// A bare parameter name, without the leading `@`.
static PARAMETER_NAME: Lazy<Regex> = Lazy::new(|| compile(r"^[A-Za-z_][A-Za-z0-9_]*$"));

/// Check that a database name is safe to splice into `USE [...]`.
pub fn validate_database_name(name: &str) -> Result<(), ServerError> {
    if name.len() > MAX_IDENTIFIER_LENGTH + 2 || !DATABASE_NAME.is_match(name) {
        return Err(ServerError::validation(format!(
            "Invalid database name: {}",
            truncate_for_log(name, MAX_IDENTIFIER_LENGTH)
        ))
        .with_detail("database", name));
    }
    Ok(())
}

/// Quote a database name in brackets.
///
/// Outer brackets supplied by the caller are stripped first and embedded
/// right brackets are doubled.
///
/// ```
/// use mssql_mcp_bridge::security::quote_database;
///
/// assert_eq!(quote_database("Sales"), "[Sales]");
/// assert_eq!(quote_database("[Sales]"), "[Sales]");
/// assert_eq!(quote_database("odd]name"), "[odd]]name]");
/// ```
pub fn quote_database(name: &str) -> String {
    let trimmed = name.trim();
    let clean = trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(trimmed);
    format!("[{}]", clean.replace(']', "]]"))
}

/// Escape a `procedure` or `schema.procedure` name.
///
/// ```
/// use mssql_mcp_bridge::security::escape_procedure_name;
///
/// assert_eq!(escape_procedure_name("dbo.GetUsers").unwrap(), "[dbo].[GetUsers]");
/// assert_eq!(escape_procedure_name("GetUsers").unwrap(), "[GetUsers]");
/// assert!(escape_procedure_name("dbo.Get;Users").is_err());
/// ```
pub fn escape_procedure_name(name: &str) -> Result<String, ServerError> {
    let name = name.trim();
    if name.len() > MAX_IDENTIFIER_LENGTH * 2 + 1 || !PROCEDURE_NAME.is_match(name) {
        return Err(ServerError::validation(format!(
            "Invalid stored procedure name: {}",
            truncate_for_log(name, MAX_IDENTIFIER_LENGTH)
        ))
        .with_detail("procedure", name));
    }

    Ok(name
        .split('.')
        .map(|part| format!("[{}]", part))
        .collect::<Vec<_>>()
        .join("."))
}

/// Normalize a parameter name: strip one leading `@` and check the rest is a
/// plain identifier.
pub fn normalize_parameter_name(name: &str) -> Result<String, ServerError> {
    let trimmed = name.trim();
    let bare = trimmed.strip_prefix('@').unwrap_or(trimmed);

    if bare.len() > MAX_IDENTIFIER_LENGTH || !PARAMETER_NAME.is_match(bare) {
        return Err(
            ServerError::validation(format!("Invalid parameter name: {}", trimmed))
                .with_detail("parameter", trimmed),
        );
    }

    Ok(bare.to_string())
}

/// Truncate a string for logging purposes without splitting a character.
pub fn truncate_for_log(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}...", &s[..cut]),
    }
}
