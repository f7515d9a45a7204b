//! # Fleet state: the single record of what is running.
//!
//! [`FleetState`] maps cluster ids to their [`ClusterHandle`]s (ascending id
//! order) and owns the [`RestartGate`] shared with every supervisor.
//!
//! ## Rules
//! - Only the manager inserts and drains handles.
//! - `restarting` is a mutual-exclusion flag, not a queue: a second
//!   `try_begin_restart` while one is running fails and the caller drops its request.
//! - While restarting or stopping, supervisors do not respawn crashed clusters.
//! - Once stopping, no new handles are accepted.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::RwLock;

use crate::core::cluster::{ClusterHandle, ClusterStatus};

/// Flags consulted by supervisors before respawning.
#[derive(Debug, Default)]
pub struct RestartGate {
    restarting: AtomicBool,
    stopping: AtomicBool,
}

impl RestartGate {
    /// Creates an open gate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the restart slot. Returns `false` if a restart is already running.
    pub fn try_begin_restart(&self) -> bool {
        self.restarting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Releases the restart slot.
    pub fn end_restart(&self) {
        self.restarting.store(false, Ordering::Release);
    }

    /// `true` while a fleet restart is in progress.
    pub fn is_restarting(&self) -> bool {
        self.restarting.load(Ordering::Acquire)
    }

    /// Marks the fleet as stopping for good.
    pub fn begin_shutdown(&self) {
        self.stopping.store(true, Ordering::Release);
    }

    /// `true` once shutdown began.
    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    /// Why a crashed cluster must not be respawned right now, if it must not.
    pub fn suppresses_respawn(&self) -> Option<&'static str> {
        if self.is_stopping() {
            Some("fleet stopping")
        } else if self.is_restarting() {
            Some("fleet restarting")
        } else {
            None
        }
    }
}

/// Running clusters keyed by id.
pub struct FleetState {
    handles: RwLock<BTreeMap<u32, ClusterHandle>>,
    gate: Arc<RestartGate>,
}

impl FleetState {
    /// Creates an empty fleet.
    pub fn new() -> Self {
        Self {
            handles: RwLock::new(BTreeMap::new()),
            gate: Arc::new(RestartGate::new()),
        }
    }

    /// Gate shared with supervisors.
    pub fn gate(&self) -> &Arc<RestartGate> {
        &self.gate
    }

    /// Whether a slot is occupied.
    pub async fn contains(&self, cluster_id: u32) -> bool {
        self.handles.read().await.contains_key(&cluster_id)
    }

    /// Stores a handle.
    ///
    /// Returns the handle back if the fleet is stopping or the slot is taken.
    pub async fn insert(&self, handle: ClusterHandle) -> Result<(), ClusterHandle> {
        let mut handles = self.handles.write().await;
        if self.gate.is_stopping() || handles.contains_key(&handle.cluster_id()) {
            return Err(handle);
        }
        handles.insert(handle.cluster_id(), handle);
        Ok(())
    }

    /// Removes every handle, ascending by id.
    pub async fn drain(&self) -> Vec<ClusterHandle> {
        let mut handles = self.handles.write().await;
        std::mem::take(&mut *handles).into_values().collect()
    }

    /// Forwards `payload` to every connected cluster. Returns how many accepted it.
    pub async fn broadcast(&self, payload: &Arc<Value>) -> usize {
        self.handles
            .read()
            .await
            .values()
            .filter(|h| h.broadcast(payload))
            .count()
    }

    /// Per-cluster snapshot, ascending by id.
    pub async fn status(&self) -> Vec<ClusterStatus> {
        self.handles
            .read()
            .await
            .values()
            .map(ClusterHandle::status)
            .collect()
    }
}

impl Default for FleetState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_gate_is_exclusive() {
        let gate = RestartGate::new();
        assert!(gate.try_begin_restart());
        assert!(!gate.try_begin_restart());
        assert_eq!(gate.suppresses_respawn(), Some("fleet restarting"));

        gate.end_restart();
        assert!(gate.suppresses_respawn().is_none());
        assert!(gate.try_begin_restart());
    }

    #[test]
    fn test_stopping_wins_over_restarting() {
        let gate = RestartGate::new();
        assert!(gate.try_begin_restart());
        gate.begin_shutdown();
        assert_eq!(gate.suppresses_respawn(), Some("fleet stopping"));
    }
}
