//! Driver seam between the pool manager and the SQL Server client.
//!
//! [`Connector`] builds pools and [`SqlPool`] runs batches on them. The
//! production implementation is [`super::connection::TdsConnector`]; tests
//! plug in an in-memory one.

use super::types::ParamValue;
use crate::error::{DriverError, ServerError};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Callback invoked with a pool generation and a reason when that pool
/// reports a pool-level error.
pub type PoolErrorHook = Arc<dyn Fn(u64, &str) + Send + Sync>;

/// Handle a pool uses to report pool-level errors back to its manager.
#[derive(Clone)]
pub struct PoolEvents {
    generation: u64,
    hook: PoolErrorHook,
}

impl PoolEvents {
    pub fn new(generation: u64, hook: PoolErrorHook) -> Self {
        Self { generation, hook }
    }

    /// Generation of the pool this handle belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Report a pool-level error. The manager discards the pool if it is
    /// still the current one.
    pub fn pool_error(&self, reason: &str) {
        (self.hook)(self.generation, reason)
    }
}

impl fmt::Debug for PoolEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEvents")
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Column metadata reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    /// Zero-based position in the row-set.
    pub index: usize,
    /// SQL Server type name, e.g. `nvarchar`.
    pub sql_type: String,
}

/// One row-set produced by a batch.
///
/// A row-set with columns and no rows is an empty result, not a missing one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl RecordSet {
    /// Create an empty row-set with the given column names.
    pub fn with_columns<S: AsRef<str>>(names: &[S]) -> Self {
        let columns = names
            .iter()
            .enumerate()
            .map(|(index, name)| ColumnMeta {
                name: name.as_ref().to_string(),
                index,
                sql_type: "sql_variant".to_string(),
            })
            .collect();
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append a row.
    pub fn push_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    /// Column names ordered by position.
    pub fn column_names(&self) -> Vec<String> {
        let mut columns: Vec<&ColumnMeta> = self.columns.iter().collect();
        columns.sort_by_key(|c| c.index);
        columns.into_iter().map(|c| c.name.clone()).collect()
    }

    /// Position of a column by exact name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.index)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Builds connection pools.
pub trait Connector: Send + Sync + 'static {
    type Pool: SqlPool;

    /// Database a fresh connection lands in.
    fn default_database(&self) -> &str;

    /// Check that credentials are configured. Failures are not retried.
    fn check_credentials(&self) -> Result<(), ServerError>;

    /// Build a pool and open its first connection. Pool-level errors raised
    /// later are reported through `events`.
    fn connect(
        &self,
        events: PoolEvents,
    ) -> impl Future<Output = Result<Self::Pool, DriverError>> + Send;
}

/// A live connection pool.
pub trait SqlPool: Clone + Send + Sync + 'static {
    /// Run `SELECT 1` on a pooled connection.
    fn ping(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Run a batch on one borrowed connection and collect every row-set.
    ///
    /// The connection switches to `database` immediately before the batch,
    /// so nothing a previous borrower left behind decides the context.
    fn execute(
        &self,
        database: &str,
        sql: &str,
        params: &[ParamValue],
    ) -> impl Future<Output = Result<Vec<RecordSet>, DriverError>> + Send;

    /// Stop handing out connections. Connections close once released.
    fn close(&self);
}
