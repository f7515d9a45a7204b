//! # Runtime events emitted by the manager and cluster supervisors.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Fleet events**: plan computed, fleet started/ready/stopped
//! - **Cluster events**: spawned, ready, exited, respawn scheduled/suppressed
//! - **Restart/shutdown events**: requested, skipped, forced kill, completed
//! - **Control events**: broadcasts forwarded, malformed messages dropped, watcher triggers
//!
//! The [`Event`] struct carries metadata such as the cluster id, shard list,
//! exit status and delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Events published by one supervisor are sequenced in the
//! order it observed them.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use shardvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RespawnScheduled)
//!     .with_cluster(2)
//!     .with_delay(Duration::from_secs(5))
//!     .with_attempt(1);
//!
//! assert_eq!(ev.kind, EventKind::RespawnScheduled);
//! assert_eq!(ev.cluster, Some(2));
//! assert_eq!(ev.delay_ms, Some(5000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::planner::ShardPlan;
use crate::process::ClusterExit;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Fleet events ===
    /// A shard plan was computed for a fleet start.
    ///
    /// Sets: `total_shards`, `total_clusters`
    PlanComputed,

    /// `start_all` finished issuing spawns.
    ///
    /// Sets: `count` (clusters spawned)
    FleetStarted,

    /// Every live cluster reported ready.
    ///
    /// Sets: `count` (ready clusters)
    FleetReady,

    /// `shutdown_all` finished; no clusters remain.
    FleetStopped,

    // === Cluster lifecycle ===
    /// A cluster process was launched.
    ///
    /// Sets: `cluster`, `shards`, `pid`, `attempt` (launches of this supervisor, 1-based)
    ClusterSpawned,

    /// A cluster process could not be launched.
    ///
    /// Sets: `cluster`, `reason`
    ClusterSpawnFailed,

    /// A cluster was not spawned (empty shard slice or slot already taken).
    ///
    /// Sets: `cluster`, `reason`
    ClusterSkipped,

    /// A cluster reported `ready`.
    ///
    /// Sets: `cluster`, `shards`
    ClusterReady,

    /// A cluster process exited.
    ///
    /// Sets: `cluster`, `exit_code`, `signal`
    ClusterExited,

    /// A crashed cluster will be respawned after a delay.
    ///
    /// Sets: `cluster`, `delay_ms`, `attempt` (consecutive crashes)
    RespawnScheduled,

    /// A crashed cluster will not be respawned (fleet restarting/stopping).
    ///
    /// Sets: `cluster`, `reason`
    RespawnSuppressed,

    // === Restart / shutdown ===
    /// Fleet shutdown requested (OS signal).
    ShutdownRequested,

    /// A single cluster was asked to shut down.
    ///
    /// Sets: `cluster`, `timeout_ms`
    ClusterShutdownRequested,

    /// A cluster ignored `shutdown` past its timeout and was killed.
    ///
    /// Sets: `cluster`, `timeout_ms`
    ShutdownForced,

    /// A fleet restart started.
    ///
    /// Sets: `reason` (trigger)
    RestartRequested,

    /// A fleet restart was dropped because one is already running.
    ///
    /// Sets: `reason` (trigger)
    RestartSkipped,

    /// A fleet restart finished respawning.
    ///
    /// Sets: `count` (clusters spawned)
    RestartCompleted,

    // === Control ===
    /// A broadcast payload was forwarded to clusters.
    ///
    /// Sets: `count` (clusters reached)
    BroadcastForwarded,

    /// A control message was dropped (malformed or unknown type).
    ///
    /// Sets: `reason`
    ControlDropped,

    /// The file watcher saw changes and asked for a restart.
    WatchTriggered,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Cluster id, if applicable.
    pub cluster: Option<u32>,
    /// Shard ids of the cluster.
    pub shards: Option<Arc<[u32]>>,
    /// OS process id.
    pub pid: Option<u32>,
    /// Attempt / crash counter.
    pub attempt: Option<u32>,
    /// Exit code of a finished process.
    pub exit_code: Option<i32>,
    /// Terminating signal of a finished process.
    pub signal: Option<i32>,
    /// Delay before the next spawn in milliseconds.
    pub delay_ms: Option<u32>,
    /// Shutdown timeout in milliseconds.
    pub timeout_ms: Option<u32>,
    /// Total shard count of a plan.
    pub total_shards: Option<u32>,
    /// Total cluster count of a plan.
    pub total_clusters: Option<u32>,
    /// Generic counter (clusters spawned/ready/reached).
    pub count: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            cluster: None,
            shards: None,
            pid: None,
            attempt: None,
            exit_code: None,
            signal: None,
            delay_ms: None,
            timeout_ms: None,
            total_shards: None,
            total_clusters: None,
            count: None,
            reason: None,
        }
    }

    /// Attaches a cluster id.
    #[inline]
    pub fn with_cluster(mut self, cluster: u32) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Attaches a shard list.
    #[inline]
    pub fn with_shards(mut self, shards: impl Into<Arc<[u32]>>) -> Self {
        self.shards = Some(shards.into());
        self
    }

    /// Attaches an OS process id.
    #[inline]
    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches an exit status.
    #[inline]
    pub fn with_exit(mut self, exit: ClusterExit) -> Self {
        self.exit_code = exit.code;
        self.signal = exit.signal;
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(millis(d));
        self
    }

    /// Attaches a timeout (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(millis(d));
        self
    }

    /// Attaches plan totals.
    #[inline]
    pub fn with_plan(mut self, plan: &ShardPlan) -> Self {
        self.total_shards = Some(plan.total_shards());
        self.total_clusters = Some(plan.total_clusters());
        self
    }

    /// Attaches a counter.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(u32::try_from(n).unwrap_or(u32::MAX));
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Exit status carried by a [`EventKind::ClusterExited`] event.
    pub fn exit(&self) -> Option<ClusterExit> {
        match self.kind {
            EventKind::ClusterExited => Some(ClusterExit::new(self.exit_code, self.signal)),
            _ => None,
        }
    }
}

fn millis(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(EventKind::FleetStarted);
        let b = Event::new(EventKind::FleetStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_exit_round_trips_through_event() {
        let exit = ClusterExit::new(Some(3), None);
        let ev = Event::new(EventKind::ClusterExited).with_cluster(1).with_exit(exit);
        assert_eq!(ev.exit(), Some(exit));
        assert_eq!(Event::new(EventKind::ClusterReady).exit(), None);
    }

    #[test]
    fn test_huge_delay_saturates() {
        let ev = Event::new(EventKind::RespawnScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
