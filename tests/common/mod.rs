//! In-memory driver used by the service tests.

#![allow(dead_code)]

use mssql_mcp_bridge::config::Config;
use mssql_mcp_bridge::database::{Connector, ParamValue, PoolEvents, RecordSet, SqlPool};
use mssql_mcp_bridge::error::{DriverError, ServerError};
use mssql_mcp_bridge::resilience::RetryConfig;
use mssql_mcp_bridge::DatabaseService;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One batch sent to a pool.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// Database the batch ran in.
    pub database: String,
    /// Database the session was left in by the previous batch.
    pub inherited: String,
    /// Generation of the pool that ran the batch.
    pub pool: u64,
    pub sql: String,
    pub params: Vec<ParamValue>,
}

pub type Handler = Arc<dyn Fn(&Call) -> Result<Vec<RecordSet>, DriverError> + Send + Sync>;

/// Shared knobs and counters of a [`MockConnector`].
pub struct MockState {
    pub connects: AtomicU32,
    pub connect_times: Mutex<Vec<Instant>>,
    /// Upcoming connects that fail before one succeeds.
    pub failures_left: AtomicU32,
    pub always_fail: AtomicBool,
    pub hang: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    pub credentials: AtomicBool,
    pub healthy: AtomicBool,
    /// Resources held by connect attempts that have not finished.
    pub open_resources: AtomicI64,
    pub closed_pools: AtomicU32,
    pub calls: Mutex<Vec<Call>>,
    /// Current database of the single modeled session. Survives failed batches.
    pub session_database: Mutex<String>,
    pub events: Mutex<Vec<PoolEvents>>,
    pub handler: Mutex<Handler>,
}

impl MockState {
    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn closed_pools(&self) -> u32 {
        self.closed_pools.load(Ordering::SeqCst)
    }

    pub fn session_database(&self) -> String {
        self.session_database.lock().clone()
    }

    pub fn open_resources(&self) -> i64 {
        self.open_resources.load(Ordering::SeqCst)
    }

    /// Report a pool-level error from the most recently built pool.
    pub fn raise_pool_error(&self, reason: &str) {
        let events = self.events.lock().last().cloned();
        if let Some(events) = events {
            events.pool_error(reason);
        }
    }

    /// Gaps between consecutive connect attempts.
    pub fn connect_gaps(&self) -> Vec<Duration> {
        let times = self.connect_times.lock();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

struct ResourceGuard(Arc<MockState>);

impl ResourceGuard {
    fn open(state: &Arc<MockState>) -> Self {
        state.open_resources.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(state))
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.0.open_resources.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connector producing [`MockPool`]s.
#[derive(Clone)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    pub fn new() -> Self {
        let handler: Handler = Arc::new(|_: &Call| {
            Ok(vec![RecordSet::with_columns(&["value"]).push_row(vec![json!(1)])])
        });
        Self {
            state: Arc::new(MockState {
                connects: AtomicU32::new(0),
                connect_times: Mutex::new(Vec::new()),
                failures_left: AtomicU32::new(0),
                always_fail: AtomicBool::new(false),
                hang: AtomicBool::new(false),
                connect_delay: Mutex::new(Duration::ZERO),
                credentials: AtomicBool::new(true),
                healthy: AtomicBool::new(true),
                open_resources: AtomicI64::new(0),
                closed_pools: AtomicU32::new(0),
                calls: Mutex::new(Vec::new()),
                session_database: Mutex::new("master".to_string()),
                events: Mutex::new(Vec::new()),
                handler: Mutex::new(handler),
            }),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: Fn(&Call) -> Result<Vec<RecordSet>, DriverError> + Send + Sync + 'static,
    {
        *self.state.handler.lock() = Arc::new(handler);
        self
    }

    pub fn failing_times(self, n: u32) -> Self {
        self.state.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn failing_always(self) -> Self {
        self.state.always_fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn hanging(self) -> Self {
        self.state.hang.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_connect_delay(self, delay: Duration) -> Self {
        *self.state.connect_delay.lock() = delay;
        self
    }

    pub fn without_credentials(self) -> Self {
        self.state.credentials.store(false, Ordering::SeqCst);
        self
    }
}

impl Connector for MockConnector {
    type Pool = MockPool;

    fn default_database(&self) -> &str {
        "master"
    }

    fn check_credentials(&self) -> Result<(), ServerError> {
        if self.state.credentials.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServerError::validation(
                "Missing SQL Server credentials: SQL_USER, SQL_PASSWORD",
            ))
        }
    }

    async fn connect(&self, events: PoolEvents) -> Result<MockPool, DriverError> {
        let state = &self.state;
        state.connects.fetch_add(1, Ordering::SeqCst);
        state.connect_times.lock().push(Instant::now());
        let _guard = ResourceGuard::open(state);

        if state.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        let delay = *state.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let transient = state
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient || state.always_fail.load(Ordering::SeqCst) {
            return Err(DriverError::other("connection refused (os error 111)"));
        }

        let generation = events.generation();
        state.events.lock().push(events);
        Ok(MockPool {
            state: Arc::clone(state),
            generation,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Pool answering batches through the connector's handler.
#[derive(Clone)]
pub struct MockPool {
    state: Arc<MockState>,
    generation: u64,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for MockPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockPool")
            .field("generation", &self.generation)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl MockPool {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl SqlPool for MockPool {
    async fn ping(&self) -> Result<(), DriverError> {
        if self.is_closed() {
            return Err(DriverError::Pool("connection pool is closed".into()));
        }
        if !self.state.healthy.load(Ordering::SeqCst) {
            return Err(DriverError::other("connection reset by peer"));
        }
        Ok(())
    }

    async fn execute(
        &self,
        database: &str,
        sql: &str,
        params: &[ParamValue],
    ) -> Result<Vec<RecordSet>, DriverError> {
        // Let concurrent callers reach the pool before any of them fails.
        tokio::task::yield_now().await;

        let inherited = std::mem::replace(
            &mut *self.state.session_database.lock(),
            database.to_string(),
        );
        let call = Call {
            database: database.to_string(),
            inherited,
            pool: self.generation,
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        self.state.calls.lock().push(call.clone());
        let handler = Arc::clone(&*self.state.handler.lock());
        handler(&call)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed_pools.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Configuration with fast, deterministic backoff.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.retry = RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter: false,
    };
    config.database.connection_timeout = Duration::from_secs(1);
    config.cache.schema_ttl = Duration::from_secs(60);
    config
}

pub fn service(connector: MockConnector) -> DatabaseService<MockConnector> {
    DatabaseService::new(&test_config(), connector)
}

pub fn service_with(config: &Config, connector: MockConnector) -> DatabaseService<MockConnector> {
    DatabaseService::new(config, connector)
}
