//! Query and stored procedure execution with result shaping.

use super::driver::{Connector, RecordSet, SqlPool};
use super::pool::{PoolLease, PoolManager};
use super::procedure::{decode_outcome, plan_call, ProcedureOutcome, ProcedureParam};
use super::types::ParamValue;
use crate::constants::LOG_QUERY_TRUNCATE_LENGTH;
use crate::error::{ErrorKind, ServerError};
use crate::security::{truncate_for_log, validate_database_name, DatabaseWhitelist, QueryValidator};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::{debug, info};

/// Columns and positional rows of a row-set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSetResult {
    /// Column names ordered by position.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub record_count: usize,
}

impl From<RecordSet> for RowSetResult {
    fn from(set: RecordSet) -> Self {
        let columns = set.column_names();
        let record_count = set.rows.len();
        Self {
            columns,
            rows: set.rows,
            record_count,
        }
    }
}

/// Success without a row-set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResult {
    pub message: String,
    pub record_count: usize,
}

/// Result of an ad-hoc query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    Rows(RowSetResult),
    Message(MessageResult),
}

impl QueryResult {
    /// Shape the driver's row-sets. Only the first row-set is reported.
    pub fn from_record_sets(sets: Vec<RecordSet>) -> Self {
        match sets.into_iter().next() {
            Some(set) => QueryResult::Rows(set.into()),
            None => QueryResult::Message(MessageResult {
                message: "Query executed successfully".to_string(),
                record_count: 0,
            }),
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            QueryResult::Rows(rows) => rows.record_count,
            QueryResult::Message(msg) => msg.record_count,
        }
    }
}

/// Result of a stored procedure call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredProcedureResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<Vec<Value>>>,

    pub record_count: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// OUTPUT parameter values by name.
    pub output: Map<String, Value>,

    pub return_value: Value,

    /// Row count reported by `@@ROWCOUNT` right after the `EXEC`, i.e. of
    /// the procedure's last statement. At most one entry; this is not a
    /// per-statement breakdown.
    pub rows_affected: Vec<u64>,
}

impl From<ProcedureOutcome> for StoredProcedureResult {
    fn from(outcome: ProcedureOutcome) -> Self {
        let ProcedureOutcome {
            primary,
            output,
            return_value,
            rows_affected,
        } = outcome;

        match primary.filter(|set| !set.is_empty()) {
            Some(set) => {
                let rows = RowSetResult::from(set);
                Self {
                    columns: Some(rows.columns),
                    record_count: rows.record_count,
                    rows: Some(rows.rows),
                    message: None,
                    output,
                    return_value,
                    rows_affected,
                }
            }
            None => Self {
                columns: None,
                rows: None,
                record_count: 0,
                message: Some("Stored procedure executed successfully".to_string()),
                output,
                return_value,
                rows_affected,
            },
        }
    }
}

/// Runs validated queries and procedure calls against the shared pool.
pub struct QueryExecutor<C: Connector> {
    pools: PoolManager<C>,
    whitelist: DatabaseWhitelist,
    validator: QueryValidator,
}

impl<C: Connector> QueryExecutor<C> {
    pub fn new(pools: PoolManager<C>, whitelist: DatabaseWhitelist, validator: QueryValidator) -> Self {
        Self {
            pools,
            whitelist,
            validator,
        }
    }

    pub fn pools(&self) -> &PoolManager<C> {
        &self.pools
    }

    pub fn whitelist(&self) -> &DatabaseWhitelist {
        &self.whitelist
    }

    pub fn default_database(&self) -> &str {
        self.pools.connector().default_database()
    }

    /// Pick the target database and enforce the whitelist on it.
    ///
    /// A blank name counts as absent and falls back to the default database.
    pub fn resolve_target(&self, database: Option<&str>) -> Result<String, ServerError> {
        let target = database
            .map(str::trim)
            .filter(|db| !db.is_empty())
            .unwrap_or_else(|| self.default_database());
        self.whitelist.check(target)?;
        Ok(target.to_string())
    }

    /// Database every batch for `target` runs in.
    ///
    /// The configured default is used as-is; any other name must pass the
    /// identifier check before it is spliced into `USE`.
    pub fn batch_database(&self, target: &str) -> Result<String, ServerError> {
        let default = self.default_database();
        if target.eq_ignore_ascii_case(default) {
            return Ok(default.to_string());
        }
        validate_database_name(target)?;
        Ok(target.to_string())
    }

    /// Run a read-only query.
    pub async fn execute_query(
        &self,
        query: &str,
        database: Option<&str>,
    ) -> Result<QueryResult, ServerError> {
        let target = self.resolve_target(database)?;
        let lease = self.pools.lease().await?;
        let context = self.batch_database(&target)?;
        self.validator.validate(query)?;

        let preview = truncate_for_log(query, LOG_QUERY_TRUNCATE_LENGTH);
        debug!(database = %target, query = %preview, "Executing query");

        let start = Instant::now();
        let sets = self
            .run_batch(
                &lease,
                &context,
                query,
                &[],
                ErrorKind::QueryError,
                "Query execution failed",
            )
            .await
            .map_err(|e| e.with_detail("query", preview.clone()))?;

        let result = QueryResult::from_record_sets(sets);
        info!(
            database = %target,
            records = result.record_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Query completed"
        );
        Ok(result)
    }

    /// Call a stored procedure with bound parameters.
    pub async fn execute_stored_procedure(
        &self,
        procedure: &str,
        params: &[ProcedureParam],
        database: Option<&str>,
    ) -> Result<StoredProcedureResult, ServerError> {
        let target = self.resolve_target(database)?;
        let lease = self.pools.lease().await?;
        let context = self.batch_database(&target)?;
        let call = plan_call(procedure, params)?;

        debug!(
            database = %target,
            procedure = %call.procedure,
            params = call.params.len(),
            outputs = call.outputs.len(),
            "Executing stored procedure"
        );

        let start = Instant::now();
        let sets = self
            .run_batch(
                &lease,
                &context,
                &call.sql,
                &call.params,
                ErrorKind::StoredProcedureError,
                &format!("Stored procedure {} failed", call.procedure),
            )
            .await
            .map_err(|e| e.with_detail("procedure", call.procedure.clone()))?;

        let result = StoredProcedureResult::from(decode_outcome(&call, sets));
        info!(
            database = %target,
            procedure = %call.procedure,
            records = result.record_count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Stored procedure completed"
        );
        Ok(result)
    }

    /// Run one batch, classifying driver failures.
    ///
    /// A connection-class failure discards the leased pool and waits for a
    /// replacement. The failure is surfaced either way.
    pub async fn run_batch(
        &self,
        lease: &PoolLease<C::Pool>,
        database: &str,
        sql: &str,
        params: &[ParamValue],
        fallback: ErrorKind,
        action: &str,
    ) -> Result<Vec<RecordSet>, ServerError> {
        match lease.pool.execute(database, sql, params).await {
            Ok(sets) => Ok(sets),
            Err(e) => {
                let err = ServerError::from_driver(e, fallback, action);
                if err.kind().is_connection() {
                    Err(self.pools.heal(err, lease.generation).await)
                } else {
                    Err(err)
                }
            }
        }
    }
}
