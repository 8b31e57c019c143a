//! Graceful shutdown handling.
//!
//! Signals (SIGINT, SIGTERM, SIGHUP) flip a watch channel. The binary waits
//! on it alongside the transport and then tears the database service down:
//! any in-flight pool creation is cancelled, the pool is released and the
//! schema cache is dropped.

use crate::database::Connector;
use crate::service::DatabaseService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

/// Shutdown signal that can be awaited.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait for the shutdown signal.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|&v| v).await;
    }
}

/// Shutdown phases, logged as teardown progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Initiated,
    ClosingPool,
    ClearingCache,
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Initiated => write!(f, "initiated"),
            ShutdownPhase::ClosingPool => write!(f, "closing_pool"),
            ShutdownPhase::ClearingCache => write!(f, "clearing_cache"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Controller for managing graceful shutdown.
pub struct ShutdownController {
    sender: watch::Sender<bool>,
    shutting_down: AtomicBool,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);

        Self {
            sender,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Get a shutdown signal receiver.
    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Initiate shutdown. Returns `false` if it was already initiated.
    pub fn shutdown(&self) -> bool {
        let initiated = self
            .shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if initiated {
            self.notify_phase(ShutdownPhase::Initiated);
            let _ = self.sender.send(true);
        }
        initiated
    }

    fn notify_phase(&self, phase: ShutdownPhase) {
        info!(%phase, "Shutdown phase");
    }

    /// Release every database resource held by the service.
    pub async fn graceful_shutdown<C: Connector>(&self, service: &DatabaseService<C>) {
        self.shutdown();

        self.notify_phase(ShutdownPhase::ClosingPool);
        service.close_pool();

        self.notify_phase(ShutdownPhase::ClearingCache);
        service.schema_cache().clear().await;

        self.notify_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown complete");
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared shutdown controller type.
pub type SharedShutdownController = Arc<ShutdownController>;

/// Create a new shared shutdown controller.
pub fn new_shutdown_controller() -> SharedShutdownController {
    Arc::new(ShutdownController::new())
}

/// Install signal handlers for graceful shutdown.
///
/// Ctrl+C everywhere; SIGTERM and SIGHUP on Unix.
pub async fn install_signal_handlers(controller: SharedShutdownController) {
    let ctrl_c_controller = controller.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating shutdown...");
                ctrl_c_controller.shutdown();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C signal"),
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name) in [
            (SignalKind::terminate(), "SIGTERM"),
            (SignalKind::hangup(), "SIGHUP"),
        ] {
            let controller = controller.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!(signal = name, "Received signal, initiating shutdown...");
                        controller.shutdown();
                    }
                    Err(e) => error!(signal = name, error = %e, "Failed to install signal handler"),
                }
            });
        }
    }
}
