//! The database service facade.
//!
//! [`DatabaseService`] owns the pool manager, the executor and the schema
//! cache. The transport layer holds one instance behind an `Arc` and every
//! tool call goes through it.

use crate::cache::{SchemaCache, SchemaSnapshot};
use crate::config::Config;
use crate::database::metadata::{assemble_tables, SCHEMA_QUERY};
use crate::database::{
    Connector, PoolManager, PoolState, ProcedureParam, QueryExecutor, QueryResult,
    StoredProcedureResult, TdsConnector,
};
use crate::error::{ErrorKind, ServerError};
use crate::security::{DatabaseWhitelist, QueryValidator};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// Outcome of a health check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub healthy: bool,
    pub pool_state: PoolState,
    pub default_database: String,
    pub whitelist_enabled: bool,
    pub allowed_databases: Vec<String>,
    pub latency_ms: u64,
    pub schema_cache_entries: usize,
    /// Percentage of schema lookups served from the cache.
    pub schema_cache_hit_rate: f64,
    pub schema_cache_ttl_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Connection lifecycle and query safety for one SQL Server.
pub struct DatabaseService<C: Connector = TdsConnector> {
    executor: QueryExecutor<C>,
    cache: SchemaCache,
}

impl DatabaseService<TdsConnector> {
    /// Build a service that talks to the configured server.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, TdsConnector::new(config.database.clone()))
    }
}

impl<C: Connector> DatabaseService<C> {
    pub fn new(config: &Config, connector: C) -> Self {
        let pools = PoolManager::new(
            connector,
            config.retry.clone(),
            config.database.connection_timeout,
        );
        let whitelist = DatabaseWhitelist::new(&config.security.allowed_databases);
        if !whitelist.is_enabled() {
            warn!("SQL_ALLOWED_DATABASES is empty, every database visible to the login is reachable");
        }

        Self {
            executor: QueryExecutor::new(
                pools,
                whitelist,
                QueryValidator::new(config.security.max_query_length),
            ),
            cache: SchemaCache::new(config.cache.schema_ttl),
        }
    }

    /// Return a live pool, creating it if needed. Used at startup to fail fast.
    pub async fn get_pool(&self) -> Result<C::Pool, ServerError> {
        self.executor.pools().get_pool().await
    }

    /// Release the pool and cancel any in-flight creation.
    pub fn close_pool(&self) {
        self.executor.pools().close_pool();
    }

    pub fn pool_state(&self) -> PoolState {
        self.executor.pools().state()
    }

    pub fn whitelist(&self) -> &DatabaseWhitelist {
        self.executor.whitelist()
    }

    pub fn default_database(&self) -> &str {
        self.executor.default_database()
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.cache
    }

    /// Run a read-only query.
    pub async fn execute_query(
        &self,
        query: &str,
        database: Option<&str>,
    ) -> Result<QueryResult, ServerError> {
        self.executor.execute_query(query, database).await
    }

    /// Call a stored procedure.
    pub async fn execute_stored_procedure(
        &self,
        procedure: &str,
        params: &[ProcedureParam],
        database: Option<&str>,
    ) -> Result<StoredProcedureResult, ServerError> {
        self.executor
            .execute_stored_procedure(procedure, params, database)
            .await
    }

    /// Table list of a database, served from the cache while it is fresh.
    pub async fn get_schema(&self, database: Option<&str>) -> Result<SchemaSnapshot, ServerError> {
        let target = self.executor.resolve_target(database)?;

        if let Some(tables) = self.cache.get(&target).await {
            return Ok(tables);
        }

        let lease = self.executor.pools().lease().await?;
        let context = self.executor.batch_database(&target)?;
        let sets = self
            .executor
            .run_batch(
                &lease,
                &context,
                SCHEMA_QUERY,
                &[],
                ErrorKind::SchemaError,
                "Failed to fetch schema",
            )
            .await
            .map_err(|e| e.with_detail("database", target.clone()))?;

        let tables = match sets.into_iter().next() {
            Some(set) => assemble_tables(&set)?,
            None => Vec::new(),
        };
        let tables: SchemaSnapshot = Arc::new(tables);

        info!(database = %target, tables = tables.len(), "Schema fetched");
        self.cache.insert(&target, Arc::clone(&tables)).await;
        Ok(tables)
    }

    /// Check the pool and report service state.
    pub async fn health_check(&self) -> HealthReport {
        let start = Instant::now();
        let pool = self.get_pool().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let cache = self.cache.stats().await;
        HealthReport {
            healthy: pool.is_ok(),
            pool_state: self.pool_state(),
            default_database: self.default_database().to_string(),
            whitelist_enabled: self.whitelist().is_enabled(),
            allowed_databases: self.whitelist().allowed().to_vec(),
            latency_ms,
            schema_cache_entries: cache.entry_count,
            schema_cache_hit_rate: cache.hit_rate(),
            schema_cache_ttl_ms: self.cache.ttl().as_millis() as u64,
            error: pool.err().map(|e| e.to_json()),
        }
    }
}
