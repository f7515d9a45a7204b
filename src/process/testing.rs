//! In-memory launcher for supervisor and manager tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{ClusterError, SpawnError};
use crate::process::child::{ChildProcess, LaunchSpec, Launcher, Spawned};
use crate::process::message::{ChildEvent, ChildMessage, ClusterExit, ParentMessage};

pub(crate) const SIGKILL: i32 = 9;

/// One recorded launch.
pub(crate) struct Launch {
    pub spec: LaunchSpec,
    pub at: Instant,
    child: Arc<FakeChild>,
}

#[derive(Default)]
struct Inner {
    launches: Vec<Launch>,
    failing: HashSet<u32>,
    hung: HashSet<u32>,
}

/// Launcher whose children live entirely in memory.
///
/// Children answer `shutdown` with a clean exit unless their cluster was
/// marked with [`FakeLauncher::hang`], and report `ready` right after launch.
#[derive(Clone, Default)]
pub(crate) struct FakeLauncher {
    inner: Arc<Mutex<Inner>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Future launches of `cluster_id` fail.
    pub fn fail(&self, cluster_id: u32) {
        self.inner.lock().failing.insert(cluster_id);
    }

    /// Future children of `cluster_id` ignore `shutdown`.
    pub fn hang(&self, cluster_id: u32) {
        self.inner.lock().hung.insert(cluster_id);
    }

    /// Total launches so far.
    pub fn count(&self) -> usize {
        self.inner.lock().launches.len()
    }

    /// Launches of one cluster so far.
    pub fn count_for(&self, cluster_id: u32) -> usize {
        self.inner
            .lock()
            .launches
            .iter()
            .filter(|l| l.spec.cluster_id == cluster_id)
            .count()
    }

    /// `(cluster_id, shard_ids, at)` of every launch in order.
    pub fn history(&self) -> Vec<(u32, Vec<u32>, Instant)> {
        self.inner
            .lock()
            .launches
            .iter()
            .map(|l| (l.spec.cluster_id, l.spec.shard_ids.clone(), l.at))
            .collect()
    }

    /// Makes the newest child of `cluster_id` exit with `code`.
    pub fn crash(&self, cluster_id: u32, code: i32) {
        if let Some(child) = self.latest(cluster_id) {
            child.exit(ClusterExit::new(Some(code), None));
        }
    }

    /// Payloads received by the newest child of `cluster_id`.
    pub fn received(&self, cluster_id: u32) -> Vec<ParentMessage> {
        self.latest(cluster_id)
            .map(|c| c.received.lock().clone())
            .unwrap_or_default()
    }

    /// Whether the newest child of `cluster_id` was hard-killed.
    pub fn was_killed(&self, cluster_id: u32) -> bool {
        self.latest(cluster_id)
            .map(|c| c.killed.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn latest(&self, cluster_id: u32) -> Option<Arc<FakeChild>> {
        self.inner
            .lock()
            .launches
            .iter()
            .rev()
            .find(|l| l.spec.cluster_id == cluster_id)
            .map(|l| l.child.clone())
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Spawned, SpawnError> {
        let mut inner = self.inner.lock();
        if inner.failing.contains(&spec.cluster_id) {
            return Err(SpawnError::Rejected {
                cluster_id: spec.cluster_id,
                reason: "fake failure".into(),
            });
        }

        let (tx, rx) = mpsc::channel(16);
        let _ = tx.try_send(ChildEvent::Message(ChildMessage::Ready {
            cluster_id: spec.cluster_id,
            shard_ids: spec.shard_ids.clone(),
        }));
        let child = Arc::new(FakeChild {
            cluster_id: spec.cluster_id,
            responsive: !inner.hung.contains(&spec.cluster_id),
            connected: AtomicBool::new(true),
            killed: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
            events: tx,
        });
        inner.launches.push(Launch {
            spec: spec.clone(),
            at: Instant::now(),
            child: child.clone(),
        });

        Ok(Spawned {
            child,
            events: rx,
        })
    }
}

pub(crate) struct FakeChild {
    cluster_id: u32,
    responsive: bool,
    connected: AtomicBool,
    killed: AtomicBool,
    received: Mutex<Vec<ParentMessage>>,
    events: mpsc::Sender<ChildEvent>,
}

impl FakeChild {
    fn exit(&self, exit: ClusterExit) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.events.try_send(ChildEvent::Exit(exit));
        }
    }
}

impl ChildProcess for FakeChild {
    fn id(&self) -> Option<u32> {
        Some(10_000 + self.cluster_id)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, msg: ParentMessage) -> Result<(), ClusterError> {
        if !self.is_connected() {
            return Err(ClusterError::NotConnected {
                cluster_id: self.cluster_id,
            });
        }
        let shutdown = matches!(msg, ParentMessage::Shutdown);
        self.received.lock().push(msg);
        if shutdown && self.responsive {
            self.exit(ClusterExit::new(Some(0), None));
        }
        Ok(())
    }

    fn kill(&self) {
        self.killed.store(true, Ordering::Release);
        self.exit(ClusterExit::new(None, Some(SIGKILL)));
    }
}
