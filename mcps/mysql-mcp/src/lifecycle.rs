//! Lifecycle Coordinator
//!
//! Startup runs tunnel, then pool, then transport. Shutdown runs the reverse,
//! exactly once, whichever of a signal or the transport closing comes first.

use async_trait::async_trait;
use mcp_common::shutdown_signal;
use rmcp::{
    service::{QuitReason, ServerInitializeError},
    transport::io::stdio,
    ServiceExt,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{PoolFactory, PoolManager, PoolOptions};
use crate::error::{Error, Result};
use crate::query::QueryExecutor;
use crate::router::Router;
use crate::schema::SchemaInspector;
use crate::server::MysqlMcpServer;
use crate::tunnel::TunnelManager;

/// How long the transport gets to wind down once cancelled
const TRANSPORT_DRAIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    TunnelUp,
    PoolUp,
    Listening,
    ShuttingDown,
    Stopped,
}

// ============================================================================
// Shutdown
// ============================================================================

/// One step of the shutdown sequence
#[async_trait]
pub trait Teardown: Send + Sync {
    fn name(&self) -> &'static str;

    async fn teardown(&self) -> Result<()>;
}

/// Ordered, run-once teardown
pub struct Shutdown {
    in_progress: AtomicBool,
    steps: Vec<Box<dyn Teardown>>,
}

impl Shutdown {
    pub fn new(steps: Vec<Box<dyn Teardown>>) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            steps,
        }
    }

    /// Run every step in order
    ///
    /// A failing step is logged and the remaining steps still run. Returns
    /// the number of failed steps, or `None` if shutdown had already begun.
    pub async fn run(&self) -> Option<usize> {
        if self.in_progress.swap(true, Ordering::SeqCst) {
            tracing::warn!("Shutdown already in progress, ignoring duplicate request");
            return None;
        }

        let mut failures = 0;
        for step in &self.steps {
            tracing::info!(step = step.name(), "Shutting down");
            if let Err(e) = step.teardown().await {
                tracing::error!(step = step.name(), error = %e, "Shutdown step failed");
                failures += 1;
            }
        }
        Some(failures)
    }
}

type Serving = JoinHandle<std::result::Result<QuitReason, JoinError>>;

/// Drive a running transport in the background
///
/// The returned token is cancelled once the transport stops on its own,
/// e.g. when the client closes its input.
fn watch_transport<F>(waiting: F) -> (Serving, CancellationToken)
where
    F: Future<Output = std::result::Result<QuitReason, JoinError>> + Send + 'static,
{
    let closed = CancellationToken::new();
    let serving = {
        let closed = closed.clone();
        tokio::spawn(async move {
            let reason = waiting.await;
            closed.cancel();
            reason
        })
    };
    (serving, closed)
}

/// True when the client went away before finishing initialization
fn client_went_away(error: &ServerInitializeError) -> bool {
    matches!(
        error,
        ServerInitializeError::ConnectionClosed(_) | ServerInitializeError::Cancelled
    )
}

fn exit_code(failures: usize) -> i32 {
    if failures == 0 {
        0
    } else {
        1
    }
}

struct TransportStep {
    cancel: CancellationToken,
    serving: Mutex<Option<Serving>>,
    drain: Duration,
}

impl TransportStep {
    fn new(cancel: CancellationToken, serving: Serving) -> Self {
        Self {
            cancel,
            serving: Mutex::new(Some(serving)),
            drain: TRANSPORT_DRAIN,
        }
    }
}

#[async_trait]
impl Teardown for TransportStep {
    fn name(&self) -> &'static str {
        "transport"
    }

    async fn teardown(&self) -> Result<()> {
        self.cancel.cancel();
        let Some(serving) = self.serving.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.drain, serving).await {
            Ok(Ok(Ok(reason))) => {
                tracing::debug!(?reason, "Transport stopped");
                Ok(())
            }
            Ok(Ok(Err(e))) | Ok(Err(e)) => Err(Error::Transport(e.to_string())),
            Err(_) => Err(Error::Transport(format!(
                "did not stop within {}ms",
                self.drain.as_millis()
            ))),
        }
    }
}

struct PoolStep(Arc<PoolManager>);

#[async_trait]
impl Teardown for PoolStep {
    fn name(&self) -> &'static str {
        "database pool"
    }

    async fn teardown(&self) -> Result<()> {
        self.0.close().await;
        Ok(())
    }
}

struct TunnelStep(Arc<TunnelManager>);

#[async_trait]
impl Teardown for TunnelStep {
    fn name(&self) -> &'static str {
        "ssh tunnel"
    }

    async fn teardown(&self) -> Result<()> {
        self.0.close().await
    }
}

// ============================================================================
// Coordinator
// ============================================================================

/// Owns the tunnel and pool for the life of the process
pub struct Coordinator {
    config: Config,
    tunnel: Arc<TunnelManager>,
    pool: Arc<PoolManager>,
    phase: Phase,
}

impl Coordinator {
    pub fn new(config: Config, factory: Arc<dyn PoolFactory>) -> Self {
        Self {
            config,
            tunnel: Arc::new(TunnelManager::new()),
            pool: Arc::new(PoolManager::new(factory)),
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn advance(&mut self, next: Phase) {
        tracing::info!(from = ?self.phase, to = ?next, "Lifecycle transition");
        self.phase = next;
    }

    /// Bring up the tunnel (when configured) and then the pool
    ///
    /// On failure, whatever was already up is torn down before returning.
    pub async fn start(&mut self) -> Result<Router> {
        let local = self.tunnel.connect(self.config.tunnel.as_ref()).await?;
        let options = match local {
            Some(addr) => {
                self.advance(Phase::TunnelUp);
                PoolOptions::through_tunnel(&self.config.database, addr)
            }
            None => PoolOptions::direct(&self.config.database),
        };

        if let Err(e) = self.pool.initialize(&options).await {
            if let Err(close_err) = self.tunnel.close().await {
                tracing::warn!(error = %close_err, "Failed to close SSH tunnel after startup failure");
            }
            self.advance(Phase::Idle);
            return Err(e);
        }
        self.advance(Phase::PoolUp);

        Ok(Router::new(
            SchemaInspector::new(self.pool.clone(), self.config.database.name.clone()),
            QueryExecutor::new(self.pool.clone(), self.config.query_timeout),
        ))
    }

    fn shutdown_sequence(&self, transport: Option<TransportStep>) -> Shutdown {
        let mut steps: Vec<Box<dyn Teardown>> = Vec::with_capacity(3);
        if let Some(transport) = transport {
            steps.push(Box::new(transport));
        }
        steps.push(Box::new(PoolStep(self.pool.clone())));
        steps.push(Box::new(TunnelStep(self.tunnel.clone())));
        Shutdown::new(steps)
    }

    /// Run the shutdown sequence once, ignoring repeated signals meanwhile
    ///
    /// Returns the process exit code.
    async fn shut_down(&mut self, transport: Option<TransportStep>) -> i32 {
        self.advance(Phase::ShuttingDown);
        let shutdown = Arc::new(self.shutdown_sequence(transport));

        let duplicate_watcher = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    let signal = shutdown_signal().await;
                    tracing::info!(%signal, "Received termination signal");
                    shutdown.run().await;
                }
            })
        };

        let failures = shutdown.run().await.unwrap_or(0);
        duplicate_watcher.abort();
        self.advance(Phase::Stopped);

        if failures == 0 {
            tracing::info!("Shutdown complete");
        } else {
            tracing::error!(failures, "Shutdown finished with errors");
        }
        exit_code(failures)
    }

    /// Run until a termination signal or the client disconnects
    ///
    /// Returns the process exit code.
    pub async fn run(mut self) -> i32 {
        tracing::info!("Starting MySQL MCP server");

        let router = match self.start().await {
            Ok(router) => router,
            Err(e) => {
                tracing::error!(error = %e, "Failed to start server");
                return 1;
            }
        };

        // The handshake waits on the client, so a signal must be able to
        // interrupt it
        let transport_cancel = CancellationToken::new();
        let handshake =
            MysqlMcpServer::new(router).serve_with_ct(stdio(), transport_cancel.clone());
        let running = tokio::select! {
            started = handshake => match started {
                Ok(running) => running,
                Err(e) if client_went_away(&e) => {
                    tracing::info!(error = %e, "Client closed the transport before initializing, shutting down");
                    return self.shut_down(None).await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to start MCP transport");
                    self.shut_down(None).await;
                    return 1;
                }
            },
            signal = shutdown_signal() => {
                tracing::info!(%signal, "Received termination signal before initialization, shutting down");
                transport_cancel.cancel();
                return self.shut_down(None).await;
            }
        };
        self.advance(Phase::Listening);
        tracing::info!(database = %self.config.database.name, "MySQL MCP server running");

        let (serving, transport_closed) = watch_transport(running.waiting());

        tokio::select! {
            signal = shutdown_signal() => {
                tracing::info!(%signal, "Received termination signal, shutting down");
            }
            _ = transport_closed.cancelled() => {
                tracing::info!("Transport closed, shutting down");
            }
        }

        self.shut_down(Some(TransportStep::new(transport_cancel, serving)))
            .await
    }
}
