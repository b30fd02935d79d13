//! # Liveness Monitor
//!
//! A single global ticker, independent of the stream timers, that detects dead peers
//! with a two-round ping/pong scheme. On every sweep each registered connection is
//! either:
//!
//! - **terminated**, when it did not answer the previous round's ping (its flag is
//!   still cleared), or
//! - **probed**, by clearing its flag and queueing a ping.
//!
//! A pong from the peer sets the flag again. A peer therefore has one full
//! `ping_interval` to answer before it is presumed dead. Termination is abrupt (no
//! close handshake) and runs through the same teardown path as a transport error.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::registry::ConnectionRegistry;
use crate::core::shutdown::StopHandle;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub probed: usize,
    pub terminated: usize,
}

/// Runs one liveness round over every registered connection.
pub fn sweep(registry: &ConnectionRegistry) -> SweepReport {
    let mut report = SweepReport::default();
    for conn in registry.snapshot() {
        // Already on its way out; teardown removes it from the registry.
        if conn.is_terminated() {
            continue;
        }
        if !conn.take_alive() {
            warn!(conn = %conn.id(), peer = ?conn.peer(), "No pong since last probe, terminating");
            conn.terminate();
            report.terminated += 1;
            continue;
        }
        if let Err(e) = conn.send_ping() {
            debug!(conn = %conn.id(), error = %e, "Ping could not be queued");
        }
        report.probed += 1;
    }
    report
}

pub struct LivenessMonitor;

impl LivenessMonitor {
    /// Starts the global sweep. The first sweep happens one `interval` from now.
    pub fn spawn(registry: Arc<ConnectionRegistry>, interval: Duration) -> StopHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(Self::run(registry, interval, token.clone()));
        StopHandle::new("liveness", token, task)
    }

    async fn run(
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        token: CancellationToken,
    ) -> std::io::Result<()> {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = interval.as_millis() as u64, "Liveness monitor started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = sweep(&registry);
                    debug!(probed = report.probed, terminated = report.terminated, "Liveness sweep");
                }
            }
        }
        Ok(())
    }
}
