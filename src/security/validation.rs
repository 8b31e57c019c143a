//! Read-only query validation.
//!
//! Ad-hoc queries are parsed with the MS SQL dialect and every top-level
//! statement must be a plain `SELECT` (CTEs and set operations of selects
//! included). A coarse substring filter runs afterwards.

use super::identifiers::truncate_for_log;
use crate::constants::{BLOCKED_PATTERNS, LOG_QUERY_TRUNCATE_LENGTH};
use crate::error::ServerError;
use sqlparser::ast::{Query, SetExpr, Statement};
use sqlparser::dialect::MsSqlDialect;
use sqlparser::parser::Parser;
use tracing::warn;

/// Validates ad-hoc query text before it reaches the database.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_query_length: usize,
}

impl QueryValidator {
    pub fn new(max_query_length: usize) -> Self {
        Self { max_query_length }
    }

    /// Validate a query, returning the first violation found.
    pub fn validate(&self, sql: &str) -> Result<(), ServerError> {
        if sql.trim().is_empty() {
            return Err(ServerError::validation("Query text cannot be empty"));
        }

        let length = sql.chars().count();
        if length > self.max_query_length {
            return Err(reject(
                ServerError::validation(format!(
                    "Query exceeds maximum length of {} characters",
                    self.max_query_length
                ))
                .with_detail("length", length)
                .with_detail("maxLength", self.max_query_length),
                sql,
            ));
        }

        let statements = Parser::parse_sql(&MsSqlDialect {}, sql).map_err(|e| {
            reject(
                ServerError::parser(format!("Failed to parse SQL: {}", e)).with_cause(e),
                sql,
            )
        })?;

        if statements.is_empty() {
            return Err(ServerError::validation("Query contains no statements"));
        }

        for statement in &statements {
            if !is_read_only_statement(statement) {
                let kind = statement_kind(statement);
                return Err(reject(
                    ServerError::validation(format!(
                        "Only SELECT queries are allowed, found {}",
                        kind
                    ))
                    .with_detail("statementType", kind),
                    sql,
                ));
            }
        }

        let lowered = sql.to_lowercase();
        if let Some(pattern) = BLOCKED_PATTERNS.iter().find(|p| lowered.contains(**p)) {
            return Err(reject(
                ServerError::validation(format!(
                    "Query contains a blocked pattern: '{}'",
                    pattern.trim()
                ))
                .with_detail("pattern", pattern.trim()),
                sql,
            ));
        }

        Ok(())
    }
}

fn reject(err: ServerError, sql: &str) -> ServerError {
    let query = truncate_for_log(sql, LOG_QUERY_TRUNCATE_LENGTH);
    warn!(error = %err, query = %query, "Query rejected by validation");
    err.with_detail("query", query)
}

fn is_read_only_statement(statement: &Statement) -> bool {
    match statement {
        Statement::Query(query) => is_read_only_query(query),
        _ => false,
    }
}

fn is_read_only_query(query: &Query) -> bool {
    let ctes_ok = query
        .with
        .as_ref()
        .is_none_or(|with| with.cte_tables.iter().all(|cte| is_read_only_query(&cte.query)));
    ctes_ok && is_read_only_body(&query.body)
}

fn is_read_only_body(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_none(),
        SetExpr::Query(query) => is_read_only_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            is_read_only_body(left) && is_read_only_body(right)
        }
        _ => false,
    }
}

/// Leading keyword of a rejected statement, e.g. `INSERT` or `SELECT INTO`.
fn statement_kind(statement: &Statement) -> String {
    if let Statement::Query(query) = statement {
        if let SetExpr::Select(select) = query.body.as_ref() {
            if select.into.is_some() {
                return "SELECT INTO".to_string();
            }
        }
    }

    statement
        .to_string()
        .split_whitespace()
        .next()
        .map(str::to_uppercase)
        .unwrap_or_else(|| "UNKNOWN".to_string())
}
