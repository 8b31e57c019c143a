//! SQL Server connectivity through tiberius and bb8.

use super::driver::{ColumnMeta, Connector, PoolEvents, RecordSet, SqlPool};
use super::types::{ParamValue, TypeMapper};
use crate::config::DatabaseConfig;
use crate::error::{DriverError, ServerError};
use crate::security::quote_database;
use bb8::{ErrorSink, Pool, PooledConnection};
use bb8_tiberius::ConnectionManager;
use futures_util::TryStreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tiberius::{AuthMethod, Config, EncryptionLevel, QueryItem, QueryStream, ToSql};
use tracing::{debug, info, warn};

/// Builds tiberius connection pools from configuration.
#[derive(Debug, Clone)]
pub struct TdsConnector {
    config: DatabaseConfig,
}

impl TdsConnector {
    pub fn new(config: DatabaseConfig) -> Self {
        Self { config }
    }

    /// Create a tiberius Config from DatabaseConfig.
    fn client_config(&self) -> Config {
        let db = &self.config;
        let mut config = Config::new();

        config.host(&db.host);
        config.port(db.port);
        config.database(&db.database);
        config.authentication(AuthMethod::sql_server(
            db.user.as_deref().unwrap_or_default(),
            db.password.as_deref().unwrap_or_default(),
        ));

        if db.encrypt {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::Off);
        }

        if db.trust_server_certificate {
            config.trust_cert();
        }

        config.application_name(&db.application_name);
        config
    }
}

impl Connector for TdsConnector {
    type Pool = TdsPool;

    fn default_database(&self) -> &str {
        &self.config.database
    }

    fn check_credentials(&self) -> Result<(), ServerError> {
        let missing: Vec<&str> = [
            ("SQL_USER", self.config.user.is_none()),
            ("SQL_PASSWORD", self.config.password.is_none()),
        ]
        .into_iter()
        .filter(|(_, missing)| *missing)
        .map(|(name, _)| name)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ServerError::validation(format!(
                "SQL Server credentials are not configured: set {}",
                missing.join(" and ")
            ))
            .with_detail("missing", missing))
        }
    }

    async fn connect(&self, events: PoolEvents) -> Result<TdsPool, DriverError> {
        let db = &self.config;
        info!(
            host = %db.host,
            port = db.port,
            database = %db.database,
            min = db.pool.min_connections,
            max = db.pool.max_connections,
            generation = events.generation(),
            "Creating connection pool"
        );

        let manager = ConnectionManager::new(self.client_config());
        let min_idle = Some(db.pool.min_connections).filter(|n| *n > 0);

        let pool = Pool::builder()
            .max_size(db.pool.max_connections)
            .min_idle(min_idle)
            .idle_timeout(Some(db.pool.idle_timeout))
            .connection_timeout(db.connection_timeout)
            .error_sink(Box::new(PoolErrorSink { events }))
            .build(manager)
            .await
            .map_err(|e| DriverError::Pool(e.to_string()))?;

        Ok(TdsPool {
            pool,
            closed: Arc::new(AtomicBool::new(false)),
            request_timeout: db.request_timeout,
        })
    }
}

/// Forwards bb8 connection errors to the pool manager.
#[derive(Debug, Clone)]
struct PoolErrorSink {
    events: PoolEvents,
}

impl ErrorSink<bb8_tiberius::Error> for PoolErrorSink {
    fn sink(&self, error: bb8_tiberius::Error) {
        warn!(error = %error, "Connection pool reported an error");
        self.events.pool_error(&error.to_string());
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<bb8_tiberius::Error>> {
        Box::new(self.clone())
    }
}

/// A bb8 pool of tiberius clients.
#[derive(Clone)]
pub struct TdsPool {
    pool: Pool<ConnectionManager>,
    closed: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl TdsPool {
    async fn checkout(&self) -> Result<PooledConnection<'_, ConnectionManager>, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Pool("connection pool is closed".to_string()));
        }
        Ok(self.pool.get().await?)
    }

    /// Switch the borrowed connection to `database`, then run the batch.
    ///
    /// A pooled connection keeps whatever context its last borrower set,
    /// including one abandoned by a timed-out request, so the switch is
    /// issued for the default database too.
    async fn run(
        &self,
        database: &str,
        sql: &str,
        params: &[ParamValue],
    ) -> Result<Vec<RecordSet>, DriverError> {
        let mut conn = self.checkout().await?;

        debug!(database, "Setting database context");
        conn.simple_query(format!("USE {}", quote_database(database)))
            .await?
            .into_results()
            .await?;

        let refs: Vec<&dyn ToSql> = params.iter().map(|p| p as &dyn ToSql).collect();
        let stream = conn.query(sql, &refs).await?;
        collect_record_sets(stream).await
    }
}

impl SqlPool for TdsPool {
    async fn ping(&self) -> Result<(), DriverError> {
        let ping = async {
            let mut conn = self.checkout().await?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
            Ok::<(), DriverError>(())
        };

        tokio::time::timeout(self.request_timeout, ping)
            .await
            .map_err(|_| DriverError::RequestTimeout(self.request_timeout))?
    }

    async fn execute(
        &self,
        database: &str,
        sql: &str,
        params: &[ParamValue],
    ) -> Result<Vec<RecordSet>, DriverError> {
        tokio::time::timeout(self.request_timeout, self.run(database, sql, params))
            .await
            .map_err(|_| DriverError::RequestTimeout(self.request_timeout))?
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Drain a query stream into row-sets, one per metadata token.
async fn collect_record_sets(mut stream: QueryStream<'_>) -> Result<Vec<RecordSet>, DriverError> {
    let mut sets: Vec<RecordSet> = Vec::new();

    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let columns = meta
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(index, col)| ColumnMeta {
                        name: col.name().to_string(),
                        index,
                        sql_type: TypeMapper::sql_type_name(col).to_string(),
                    })
                    .collect();
                sets.push(RecordSet {
                    columns,
                    rows: Vec::new(),
                });
            }
            QueryItem::Row(row) => {
                let values = (0..row.len())
                    .map(|idx| TypeMapper::extract_column(&row, idx))
                    .collect();
                match sets.last_mut() {
                    Some(set) => set.rows.push(values),
                    None => sets.push(RecordSet {
                        columns: Vec::new(),
                        rows: vec![values],
                    }),
                }
            }
        }
    }

    Ok(sets)
}
