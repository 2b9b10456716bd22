//! Heartbeat Task
//!
//! Sends the venue's liveness probe over the current connection on a fixed
//! interval, independently of the read loop. Ticks with no open connection
//! are skipped; send failures are logged and counted but never stop the
//! task.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::connection::{ConnectionHandle, ConnectionSlot};
use crate::application::ports::OutboundFrame;
use crate::infrastructure::metrics;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Sleep between probes.
    pub interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

impl HeartbeatConfig {
    /// Create a configuration with a custom interval.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

/// Result of one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// No open connection.
    Skipped,
    /// Probe queued.
    Sent,
    /// Probe could not be queued.
    Failed,
}

/// Counters shared with the owner of the task.
#[derive(Debug, Default)]
pub struct HeartbeatStats {
    sent: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl HeartbeatStats {
    /// Probes queued.
    #[must_use]
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Ticks skipped for lack of a connection.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Probes that failed.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    fn record(&self, outcome: HeartbeatOutcome) {
        let counter = match outcome {
            HeartbeatOutcome::Skipped => &self.skipped,
            HeartbeatOutcome::Sent => &self.sent,
            HeartbeatOutcome::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Periodic liveness probe over the shared connection slot.
pub struct HeartbeatTask {
    config: HeartbeatConfig,
    probe: OutboundFrame,
    slot: Arc<ConnectionSlot>,
    stats: Arc<HeartbeatStats>,
    cancel: CancellationToken,
}

impl HeartbeatTask {
    /// Create a heartbeat task.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        probe: OutboundFrame,
        slot: Arc<ConnectionSlot>,
        stats: Arc<HeartbeatStats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            probe,
            slot,
            stats,
            cancel,
        }
    }

    /// Run until cancelled. The first probe fires one interval after start.
    pub async fn run(self) {
        let period = self.config.interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat task cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let outcome = self.tick().await;
                    self.stats.record(outcome);
                }
            }
        }
    }

    /// Perform one probe attempt.
    pub async fn tick(&self) -> HeartbeatOutcome {
        let Some(handle) = self.slot.current().filter(ConnectionHandle::is_open) else {
            tracing::trace!("Heartbeat skipped, no open connection");
            return HeartbeatOutcome::Skipped;
        };

        match tokio::time::timeout(self.config.interval, handle.send(self.probe.clone())).await {
            Ok(Ok(())) => {
                tracing::trace!(connection_id = handle.id(), "Heartbeat probe queued");
                HeartbeatOutcome::Sent
            }
            Ok(Err(e)) => {
                tracing::warn!(connection_id = handle.id(), error = %e, "Heartbeat failed");
                metrics::record_heartbeat_failure();
                HeartbeatOutcome::Failed
            }
            Err(_) => {
                tracing::warn!(connection_id = handle.id(), "Heartbeat timed out waiting for writer");
                metrics::record_heartbeat_failure();
                HeartbeatOutcome::Failed
            }
        }
    }
}
