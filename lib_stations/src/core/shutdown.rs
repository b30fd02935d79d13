//! # Shutdown Coordinator
//!
//! Sequences process shutdown after a termination signal. The sequence is linear and
//! runs at most once:
//!
//! `Running -> StoppingLiveness -> ClosingSockets -> ClosingTransport -> Exited`
//!
//! ## Phases:
//!
//! 1.  **StoppingLiveness**: the liveness monitor is cancelled and awaited, so no
//!     connection is terminated mid-shutdown.
//! 2.  **ClosingSockets**: the registry is sealed, every connection is asked to close
//!     with a "going away" frame, and the phase waits until the registry is empty.
//! 3.  **ClosingTransport**: the HTTP listener is asked to stop and awaited.
//! 4.  **Exited**: the caller may now exit the process with status 0.
//!
//! No phase has a timeout. A close that never completes stalls shutdown.
//! `run` takes the coordinator by value, so it cannot be re-entered.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::registry::ConnectionRegistry;

/// Errors surfaced while stopping a background task.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("{task} task failed to join: {source}")]
    Join {
        task: &'static str,
        #[source]
        source: JoinError,
    },

    #[error("{task} task ended with an I/O error: {source}")]
    Io {
        task: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// # Stop Handle
///
/// A cancellable background task: the token asks it to stop, the join handle reports
/// when it has.
pub struct StopHandle {
    name: &'static str,
    token: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl StopHandle {
    pub fn new(
        name: &'static str,
        token: CancellationToken,
        task: JoinHandle<std::io::Result<()>>,
    ) -> Self {
        Self { name, token, task }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the task and waits for it to finish.
    pub async fn stop(self) -> Result<(), ShutdownError> {
        self.token.cancel();
        self.task
            .await
            .map_err(|source| ShutdownError::Join {
                task: self.name,
                source,
            })?
            .map_err(|source| ShutdownError::Io {
                task: self.name,
                source,
            })
    }
}

impl fmt::Debug for StopHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StopHandle")
            .field("name", &self.name)
            .field("cancelled", &self.token.is_cancelled())
            .field("finished", &self.task.is_finished())
            .finish()
    }
}

/// Where the shutdown sequence currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    StoppingLiveness,
    ClosingSockets,
    ClosingTransport,
    Exited,
}

pub struct ShutdownCoordinator {
    registry: Arc<ConnectionRegistry>,
    liveness: StopHandle,
    transport: StopHandle,
    phase: watch::Sender<ShutdownPhase>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ConnectionRegistry>, liveness: StopHandle, transport: StopHandle) -> Self {
        let (phase, _) = watch::channel(ShutdownPhase::Running);
        Self {
            registry,
            liveness,
            transport,
            phase,
        }
    }

    /// Observes phase changes.
    pub fn subscribe(&self) -> watch::Receiver<ShutdownPhase> {
        self.phase.subscribe()
    }

    /// Runs the whole sequence. Each phase completes before the next begins.
    pub async fn run(self) -> Result<(), ShutdownError> {
        let Self {
            registry,
            liveness,
            transport,
            phase,
        } = self;

        enter(&phase, ShutdownPhase::StoppingLiveness);
        liveness.stop().await?;
        info!("Liveness monitor stopped");

        enter(&phase, ShutdownPhase::ClosingSockets);
        let asked = registry.close_all();
        info!(connections = asked, "Closing client sockets");
        registry.wait_empty().await;
        info!("All client sockets closed");

        enter(&phase, ShutdownPhase::ClosingTransport);
        transport.stop().await?;
        info!("HTTP transport closed");

        enter(&phase, ShutdownPhase::Exited);
        Ok(())
    }
}

fn enter(phase: &watch::Sender<ShutdownPhase>, next: ShutdownPhase) {
    info!(phase = ?next, "Shutdown phase");
    phase.send_replace(next);
}
