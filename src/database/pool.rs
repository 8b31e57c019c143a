//! Lifecycle of the service-wide connection pool.
//!
//! The manager owns at most one live pool and at most one in-flight
//! creation. Callers arriving while a creation runs await the same shared
//! future, so a burst of requests produces a single connect sequence.

use super::driver::{Connector, PoolErrorHook, PoolEvents, SqlPool};
use crate::constants::CONNECT_DEADLINE_GRACE;
use crate::error::{ErrorKind, ServerError};
use crate::resilience::RetryConfig;
use futures_util::future::{AbortHandle, Abortable, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Creation<P> = Shared<BoxFuture<'static, Result<PoolLease<P>, ServerError>>>;

/// A pool handed to a caller, tagged with the generation that built it.
///
/// The generation ties a later failure to this pool, so healing never
/// tears down a pool that has already replaced it.
#[derive(Debug, Clone)]
pub struct PoolLease<P> {
    pub pool: P,
    pub generation: u64,
}

/// Observable state of the pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    Absent,
    Connecting,
    Live,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolState::Absent => write!(f, "absent"),
            PoolState::Connecting => write!(f, "connecting"),
            PoolState::Live => write!(f, "live"),
        }
    }
}

struct LivePool<P> {
    pool: P,
    generation: u64,
}

struct Pending<P> {
    generation: u64,
    creation: Creation<P>,
    abort: AbortHandle,
}

struct PoolSlot<P> {
    current: Option<LivePool<P>>,
    pending: Option<Pending<P>>,
    next_generation: u64,
}

struct Inner<C: Connector> {
    connector: Arc<C>,
    retry: RetryConfig,
    connect_deadline: Duration,
    slot: Mutex<PoolSlot<C::Pool>>,
}

/// Creates, checks, heals and tears down the connection pool.
pub struct PoolManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> Clone for PoolManager<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> PoolManager<C> {
    /// Create a manager. No connection is opened until [`get_pool`](Self::get_pool).
    pub fn new(connector: C, retry: RetryConfig, connection_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector: Arc::new(connector),
                retry,
                connect_deadline: connection_timeout + CONNECT_DEADLINE_GRACE,
                slot: Mutex::new(PoolSlot {
                    current: None,
                    pending: None,
                    next_generation: 1,
                }),
            }),
        }
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Current state of the slot.
    pub fn state(&self) -> PoolState {
        let slot = self.inner.slot.lock();
        if slot.current.is_some() {
            PoolState::Live
        } else if slot.pending.is_some() {
            PoolState::Connecting
        } else {
            PoolState::Absent
        }
    }

    /// Return a live pool, creating one if needed.
    ///
    /// A current pool is checked first and discarded if the check fails.
    /// Otherwise the caller joins the in-flight creation or starts one.
    pub async fn get_pool(&self) -> Result<C::Pool, ServerError> {
        self.lease().await.map(|lease| lease.pool)
    }

    /// Like [`get_pool`](Self::get_pool), also reporting the pool generation.
    pub async fn lease(&self) -> Result<PoolLease<C::Pool>, ServerError> {
        if let Some((pool, generation)) = self.current() {
            match pool.ping().await {
                Ok(()) => return Ok(PoolLease { pool, generation }),
                Err(e) => {
                    warn!(generation, error = %e, "Pool liveness check failed, discarding pool");
                    self.discard(generation, "liveness check failed");
                }
            }
        }

        self.join_or_start().await
    }

    /// Release the current pool and cancel any in-flight creation.
    ///
    /// Safe to call any number of times.
    pub fn close_pool(&self) {
        let (current, pending) = {
            let mut slot = self.inner.slot.lock();
            (slot.current.take(), slot.pending.take())
        };

        if let Some(pending) = pending {
            pending.abort.abort();
            info!(generation = pending.generation, "Cancelled in-flight pool creation");
        }
        if let Some(live) = current {
            live.pool.close();
            info!(generation = live.generation, "Connection pool closed");
        }
    }

    /// Recover from a connection-class failure on pool `generation`.
    ///
    /// That pool is discarded if it is still current. The caller then waits
    /// for a live pool: the one a concurrent heal already built or joined,
    /// or a fresh one. The current operation is never retried. Returns the
    /// error to surface: the original one, or a combined error when no pool
    /// can be obtained.
    pub async fn heal(&self, original: ServerError, generation: u64) -> ServerError {
        warn!(generation, error = %original, "Connection error, rebuilding pool");
        self.discard(generation, "connection error during execution");

        match self.lease().await {
            Ok(lease) => {
                info!(
                    failed = generation,
                    generation = lease.generation,
                    "Connection pool available after connection error"
                );
                original
            }
            Err(rebuild) => {
                error!(error = %rebuild, "Connection pool rebuild failed");
                ServerError::connection(format!(
                    "{}; pool rebuild failed: {}",
                    original.message(),
                    rebuild.message()
                ))
                .with_detail("originalError", original.message())
                .with_detail("rebuildError", rebuild.message())
                .with_cause(original)
            }
        }
    }

    fn current(&self) -> Option<(C::Pool, u64)> {
        let slot = self.inner.slot.lock();
        slot.current
            .as_ref()
            .map(|live| (live.pool.clone(), live.generation))
    }

    fn discard(&self, generation: u64, reason: &str) {
        discard_generation(&self.inner, generation, reason);
    }

    fn join_or_start(&self) -> Creation<C::Pool> {
        let mut slot = self.inner.slot.lock();

        if let Some(pending) = &slot.pending {
            debug!(generation = pending.generation, "Joining in-flight pool creation");
            return pending.creation.clone();
        }

        if let Some(live) = &slot.current {
            let lease = PoolLease {
                pool: live.pool.clone(),
                generation: live.generation,
            };
            return futures_util::future::ready(Ok::<_, ServerError>(lease))
                .boxed()
                .shared();
        }

        let generation = slot.next_generation;
        slot.next_generation += 1;

        let connector = Arc::clone(&self.inner.connector);
        let retry = self.inner.retry.clone();
        let deadline = self.inner.connect_deadline;
        let weak = Arc::downgrade(&self.inner);
        let events = PoolEvents::new(generation, error_hook(&self.inner));

        let (abort, registration) = AbortHandle::new_pair();
        let creation = Abortable::new(
            async move {
                let result = create_with_retry(connector.as_ref(), &retry, deadline, events).await;
                finish(&weak, generation, result)
            },
            registration,
        )
        .map(|outcome| outcome.unwrap_or_else(|_| Err(cancelled())))
        .boxed()
        .shared();

        slot.pending = Some(Pending {
            generation,
            creation: creation.clone(),
            abort,
        });
        info!(generation, "Starting connection pool creation");
        creation
    }
}

fn cancelled() -> ServerError {
    ServerError::connection("Connection pool creation was cancelled")
}

fn error_hook<C: Connector>(inner: &Arc<Inner<C>>) -> PoolErrorHook {
    let weak = Arc::downgrade(inner);
    Arc::new(move |generation, reason: &str| {
        if let Some(inner) = weak.upgrade() {
            discard_generation(&inner, generation, reason);
        }
    })
}

fn discard_generation<C: Connector>(inner: &Inner<C>, generation: u64, reason: &str) {
    let discarded = {
        let mut slot = inner.slot.lock();
        match &slot.current {
            Some(live) if live.generation == generation => slot.current.take(),
            _ => None,
        }
    };

    if let Some(live) = discarded {
        live.pool.close();
        warn!(generation, reason, "Connection pool discarded");
    }
}

/// Install a finished creation if it still owns the slot.
fn finish<C: Connector>(
    weak: &Weak<Inner<C>>,
    generation: u64,
    result: Result<C::Pool, ServerError>,
) -> Result<PoolLease<C::Pool>, ServerError> {
    let installed = weak.upgrade().is_some_and(|inner| {
        let mut slot = inner.slot.lock();
        let owns_slot = slot
            .pending
            .as_ref()
            .is_some_and(|p| p.generation == generation);
        if owns_slot {
            slot.pending = None;
            if let Ok(pool) = &result {
                slot.current = Some(LivePool {
                    pool: pool.clone(),
                    generation,
                });
            }
        }
        owns_slot
    });

    if installed {
        if result.is_ok() {
            info!(generation, "Connection pool ready");
        }
        return result.map(|pool| PoolLease { pool, generation });
    }

    if let Ok(pool) = &result {
        pool.close();
    }
    Err(cancelled())
}

async fn create_with_retry<C: Connector>(
    connector: &C,
    retry: &RetryConfig,
    deadline: Duration,
    events: PoolEvents,
) -> Result<C::Pool, ServerError> {
    connector.check_credentials()?;

    let attempts = retry.max_attempts.max(1);
    let mut last_error: Option<ServerError> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = retry.delay_for_attempt(attempt - 1);
            debug!(attempt = attempt + 1, ?delay, "Backing off before next connection attempt");
            tokio::time::sleep(delay).await;
        }

        let err = match tokio::time::timeout(deadline, connect_and_verify(connector, events.clone()))
            .await
        {
            Ok(Ok(pool)) => return Ok(pool),
            Ok(Err(e)) => e,
            Err(_) => ServerError::timeout(format!(
                "Connection attempt timed out after {} ms",
                deadline.as_millis()
            )),
        };

        warn!(
            attempt = attempt + 1,
            max_attempts = attempts,
            error = %err,
            "Connection pool creation attempt failed"
        );
        last_error = Some(err);
    }

    let last = last_error.unwrap_or_else(|| ServerError::connection("no connection attempt made"));
    error!(attempts, error = %last, "Giving up on connection pool creation");

    Err(ServerError::connection(format!(
        "Failed to create connection pool after {} attempts: {}",
        attempts,
        last.message()
    ))
    .with_detail("attempts", attempts)
    .with_detail("lastErrorKind", last.kind().as_str())
    .with_cause(last))
}

async fn connect_and_verify<C: Connector>(
    connector: &C,
    events: PoolEvents,
) -> Result<C::Pool, ServerError> {
    let pool = connector.connect(events).await.map_err(|e| {
        ServerError::from_driver(e, ErrorKind::ConnectionError, "Failed to connect to SQL Server")
    })?;

    if let Err(e) = pool.ping().await {
        pool.close();
        return Err(ServerError::from_driver(
            e,
            ErrorKind::ConnectionError,
            "Connection verification failed",
        ));
    }

    Ok(pool)
}
