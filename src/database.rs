//! Database connectivity and query execution.

mod connection;
pub mod driver;
pub mod metadata;
pub mod pool;
pub mod procedure;
mod query;
pub mod types;

pub use connection::{TdsConnector, TdsPool};
pub use driver::{ColumnMeta, Connector, PoolEvents, RecordSet, SqlPool};
pub use metadata::{ColumnSchema, TableSchema};
pub use pool::{PoolLease, PoolManager, PoolState};
pub use procedure::ProcedureParam;
pub use query::{MessageResult, QueryExecutor, QueryResult, RowSetResult, StoredProcedureResult};
pub use types::{ParamType, ParamValue, TypeMapper};
