//! # LogWriter: renders runtime events through `tracing`.
//!
//! ## Example output
//! ```text
//! INFO shardvisor::events: plan computed total_shards=5 total_clusters=3
//! INFO shardvisor::events: cluster spawned cluster=0 shards=[0, 1] pid=4120 attempt=1
//! WARN shardvisor::events: cluster exited cluster=0 code=Some(1) signal=None
//! WARN shardvisor::events: respawn scheduled cluster=0 delay_ms=5000 attempt=1
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let shards = e.shards.as_deref().unwrap_or(&[]);
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::PlanComputed => info!(
                target: "shardvisor::events",
                total_shards = e.total_shards, total_clusters = e.total_clusters,
                "plan computed"
            ),
            EventKind::FleetStarted => {
                info!(target: "shardvisor::events", spawned = e.count, "fleet started")
            }
            EventKind::FleetReady => {
                info!(target: "shardvisor::events", clusters = e.count, "all clusters ready")
            }
            EventKind::FleetStopped => info!(target: "shardvisor::events", "fleet stopped"),
            EventKind::ClusterSpawned => info!(
                target: "shardvisor::events",
                cluster = e.cluster, shards = ?shards, pid = e.pid, attempt = e.attempt,
                "cluster spawned"
            ),
            EventKind::ClusterSpawnFailed => error!(
                target: "shardvisor::events",
                cluster = e.cluster, reason, "cluster spawn failed"
            ),
            EventKind::ClusterSkipped => info!(
                target: "shardvisor::events",
                cluster = e.cluster, reason, "cluster skipped"
            ),
            EventKind::ClusterReady => info!(
                target: "shardvisor::events",
                cluster = e.cluster, shards = ?shards, "cluster ready"
            ),
            EventKind::ClusterExited => {
                let exit = e.exit();
                let signal = exit.and_then(|x| x.signal_name());
                let signal = signal.as_deref();
                if exit.is_some_and(|x| x.is_crash()) {
                    warn!(
                        target: "shardvisor::events",
                        cluster = e.cluster, code = e.exit_code, signal, "cluster exited"
                    )
                } else {
                    info!(
                        target: "shardvisor::events",
                        cluster = e.cluster, code = e.exit_code, signal, "cluster exited"
                    )
                }
            }
            EventKind::RespawnScheduled => warn!(
                target: "shardvisor::events",
                cluster = e.cluster, delay_ms = e.delay_ms, attempt = e.attempt,
                "respawn scheduled"
            ),
            EventKind::RespawnSuppressed => info!(
                target: "shardvisor::events",
                cluster = e.cluster, reason, "respawn suppressed"
            ),
            EventKind::ShutdownRequested => {
                info!(target: "shardvisor::events", reason, "shutdown requested")
            }
            EventKind::ClusterShutdownRequested => info!(
                target: "shardvisor::events",
                cluster = e.cluster, timeout_ms = e.timeout_ms, "cluster shutdown requested"
            ),
            EventKind::ShutdownForced => warn!(
                target: "shardvisor::events",
                cluster = e.cluster, timeout_ms = e.timeout_ms,
                "cluster ignored shutdown, killed"
            ),
            EventKind::RestartRequested => {
                info!(target: "shardvisor::events", reason, "fleet restart requested")
            }
            EventKind::RestartSkipped => info!(
                target: "shardvisor::events",
                reason, "fleet restart already in progress, skipped"
            ),
            EventKind::RestartCompleted => {
                info!(target: "shardvisor::events", spawned = e.count, "fleet restart completed")
            }
            EventKind::BroadcastForwarded => {
                info!(target: "shardvisor::events", clusters = e.count, "broadcast forwarded")
            }
            EventKind::ControlDropped => {
                warn!(target: "shardvisor::events", reason, "control message dropped")
            }
            EventKind::WatchTriggered => {
                info!(target: "shardvisor::events", "file change detected")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
