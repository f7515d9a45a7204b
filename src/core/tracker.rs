//! # Cluster liveness tracker with sequence-based ordering.
//!
//! Maintains which clusters are alive and which reported `ready`, using event
//! sequence numbers to ignore out-of-order delivery.
//!
//! ## Architecture
//! ```text
//! cluster actors ──► Bus ──► manager listener ──► FleetTracker::update()
//!                                                        │
//!                                                        ▼
//!                                          BTreeMap<u32, ClusterState>
//!                                          (cluster → {seq, alive, ready})
//! ```
//!
//! ## Rules
//! - `ClusterSpawned` → alive, not ready
//! - `ClusterReady` → ready
//! - `ClusterExited` → neither alive nor ready
//! - Events with `seq <= last_seq` for that cluster are **rejected** (stale)
//! - The fleet is ready once `expected` clusters are alive and ready; that
//!   transition is reported once per [`FleetTracker::expect`] call.

use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::events::{Event, EventKind};

#[derive(Debug, Clone, Copy, Default)]
struct ClusterState {
    last_seq: Option<u64>,
    alive: bool,
    ready: bool,
}

#[derive(Default)]
struct Inner {
    clusters: BTreeMap<u32, ClusterState>,
    expected: usize,
    announced: bool,
}

/// Thread-safe tracker of cluster liveness.
#[derive(Default)]
pub struct FleetTracker {
    state: RwLock<Inner>,
}

impl FleetTracker {
    /// Creates a new empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets how many clusters make a ready fleet and re-arms the ready report.
    pub async fn expect(&self, clusters: usize) {
        let mut state = self.state.write().await;
        state.expected = clusters;
        state.announced = false;
    }

    /// Applies one event.
    ///
    /// Returns `Some(n)` exactly when this event made the fleet ready with
    /// `n` ready clusters.
    pub async fn update(&self, ev: &Event) -> Option<usize> {
        let id = ev.cluster?;
        let mut state = self.state.write().await;
        let entry = state.clusters.entry(id).or_default();

        if entry.last_seq.is_some_and(|seq| ev.seq <= seq) {
            return None;
        }
        match ev.kind {
            EventKind::ClusterSpawned => {
                *entry = ClusterState {
                    last_seq: Some(ev.seq),
                    alive: true,
                    ready: false,
                };
            }
            EventKind::ClusterReady => {
                entry.last_seq = Some(ev.seq);
                entry.ready = entry.alive;
            }
            EventKind::ClusterExited => {
                *entry = ClusterState {
                    last_seq: Some(ev.seq),
                    alive: false,
                    ready: false,
                };
            }
            _ => {
                entry.last_seq = Some(ev.seq);
                return None;
            }
        }

        let ready = state.clusters.values().filter(|c| c.ready).count();
        if !state.announced && state.expected > 0 && ready >= state.expected {
            state.announced = true;
            return Some(ready);
        }
        None
    }

    /// Ascending ids of alive clusters.
    pub async fn alive(&self) -> Vec<u32> {
        self.state
            .read()
            .await
            .clusters
            .iter()
            .filter(|(_, c)| c.alive)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: EventKind, cluster: u32) -> Event {
        Event::new(kind).with_cluster(cluster)
    }

    #[tokio::test]
    async fn test_ready_reported_once_when_all_expected_are_ready() {
        let t = FleetTracker::new();
        t.expect(2).await;

        assert_eq!(t.update(&ev(EventKind::ClusterSpawned, 0)).await, None);
        assert_eq!(t.update(&ev(EventKind::ClusterReady, 0)).await, None);
        assert_eq!(t.update(&ev(EventKind::ClusterSpawned, 1)).await, None);
        assert_eq!(t.update(&ev(EventKind::ClusterReady, 1)).await, Some(2));

        // a respawned cluster becoming ready again does not re-announce
        t.update(&ev(EventKind::ClusterExited, 1)).await;
        t.update(&ev(EventKind::ClusterSpawned, 1)).await;
        assert_eq!(t.update(&ev(EventKind::ClusterReady, 1)).await, None);
        assert_eq!(t.alive().await, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_stale_events_are_rejected() {
        let t = FleetTracker::new();
        let spawned = ev(EventKind::ClusterSpawned, 3);
        let exited = ev(EventKind::ClusterExited, 3);

        t.update(&exited).await;
        t.update(&spawned).await;

        assert!(t.alive().await.is_empty());
    }

    #[tokio::test]
    async fn test_ready_without_spawn_is_ignored() {
        let t = FleetTracker::new();
        t.expect(1).await;
        assert_eq!(t.update(&ev(EventKind::ClusterReady, 0)).await, None);
        assert!(t.alive().await.is_empty());
    }
}
