//! # TopologyManager: plans the fleet, spawns clusters, restarts and stops them.
//!
//! The [`TopologyManager`] owns the event bus, the [`FleetState`], and the
//! [`SubscriberSet`]. It turns configuration into a [`ShardPlan`], starts one
//! cluster supervisor per assignment, and reacts to control messages, file
//! changes and OS signals.
//!
//! ## High-level architecture
//! ```text
//! run():
//!   ShutdownSignals::register()
//!   PubSub::subscribe(control_topic) ──► dispatch_raw() ──► handle_control_message()
//!   ChangeWatcher (auto_reload)      ──► restart_all()
//!   tokio::spawn(start_all())
//!
//! start_all():
//!   compute_shard_count() ─► ShardPlan::resolve() ─► PlanComputed
//!   for cluster in 0..total_clusters (ascending):
//!       empty slice / slot taken → ClusterSkipped
//!       cluster::spawn()         → FleetState::insert()
//!       sleep(stagger)
//!
//! restart_all():                         shutdown_all():
//!   gate.try_begin_restart() or drop       gate.begin_shutdown()
//!   join_all(request_shutdown)             join_all(request_shutdown)
//!   sleep(settle)                          FleetStopped
//!   start_all()
//!   gate.end_restart()
//!
//! Event flow:
//!   actors ── publish ──► Bus ──► listener ──► FleetTracker (FleetReady)
//!                                          └─► SubscriberSet::emit(&Event)
//! ```
//!
//! ## Rules
//! - Within one `start_all`, clusters spawn in ascending id order with the
//!   stagger delay between spawns. Nothing else is ordered.
//! - At most one restart runs at a time; overlapping requests are dropped.
//! - Fleet starts never overlap: a restart waits for an in-flight start.
//! - No failure inside the topology layer ends [`TopologyManager::run`]; only
//!   an OS signal (or the caller's shutdown future) does.

use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, CountSetting};
use crate::core::cluster::{self, ClusterStatus, SupervisorParams};
use crate::core::fleet::{FleetState, RestartGate};
use crate::core::shutdown::ShutdownSignals;
use crate::core::tracker::FleetTracker;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::planner::{ShardCountSource, ShardPlan, compute_shard_count};
use crate::process::{LaunchSpec, Launcher};
use crate::pubsub::{ControlMessage, PubSub, Subscription};
use crate::subscribers::SubscriberSet;

/// Coordinates cluster supervisors for one bot.
///
/// Build it with [`TopologyManager::builder`].
pub struct TopologyManager {
    pub(crate) cfg: Config,
    pub(crate) bus: Bus,
    fleet: FleetState,
    tracker: Arc<FleetTracker>,
    launcher: Arc<dyn Launcher>,
    shard_source: Arc<dyn ShardCountSource>,
    pubsub: Arc<dyn PubSub>,
    parallelism: usize,
    plan: Mutex<Option<ShardPlan>>,
    starting: tokio::sync::Mutex<()>,
    listener: Mutex<Option<JoinHandle<()>>>,
    listener_token: CancellationToken,
}

/// Clears the restart flag when the restart ends, however it ends.
struct RestartGuard<'a>(&'a RestartGate);

impl Drop for RestartGuard<'_> {
    fn drop(&mut self) {
        self.0.end_restart();
    }
}

impl TopologyManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: SubscriberSet,
        launcher: Arc<dyn Launcher>,
        shard_source: Arc<dyn ShardCountSource>,
        pubsub: Arc<dyn PubSub>,
        parallelism: usize,
    ) -> Self {
        let tracker = Arc::new(FleetTracker::new());
        let listener_token = CancellationToken::new();
        let listener = spawn_listener(
            bus.subscribe(),
            subs,
            Arc::clone(&tracker),
            listener_token.clone(),
        );

        Self {
            cfg,
            bus,
            fleet: FleetState::new(),
            tracker,
            launcher,
            shard_source,
            pubsub,
            parallelism: parallelism.max(1),
            plan: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
            listener: Mutex::new(Some(listener)),
            listener_token,
        }
    }

    /// Configuration this manager runs with.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Plan of the most recent fleet start.
    pub fn plan(&self) -> Option<ShardPlan> {
        *self.plan.lock()
    }

    /// Receiver for runtime events published from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Per-cluster snapshot, ascending by id.
    pub async fn status(&self) -> Vec<ClusterStatus> {
        self.fleet.status().await
    }

    /// Ids of clusters whose process is running, as seen on the event stream.
    pub async fn alive_clusters(&self) -> Vec<u32> {
        self.tracker.alive().await
    }

    /// `true` while a fleet restart is running.
    pub fn is_restarting(&self) -> bool {
        self.fleet.gate().is_restarting()
    }

    /// Computes a fresh plan and spawns every cluster that is not running.
    ///
    /// Returns the number of clusters spawned. Spawn failures are published
    /// and skipped.
    pub async fn start_all(&self) -> usize {
        let _guard = self.starting.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> usize {
        let plan = self.compute_plan().await;
        *self.plan.lock() = Some(plan);
        self.bus
            .publish(Event::new(EventKind::PlanComputed).with_plan(&plan));
        self.tracker.expect(plan.total_clusters() as usize).await;

        let params = SupervisorParams {
            restart: self.cfg.restart,
            backoff: self.cfg.backoff,
        };
        let gate = self.fleet.gate();
        let mut spawned = 0;
        let mut attempted = false;

        for assignment in plan.assignments() {
            let id = assignment.cluster_id;
            if gate.is_stopping() {
                break;
            }
            if assignment.shard_ids.is_empty() {
                self.publish_skipped(id, "no shards");
                continue;
            }
            if self.fleet.contains(id).await {
                self.publish_skipped(id, "already running");
                continue;
            }
            if attempted {
                time::sleep(self.cfg.stagger).await;
                if gate.is_stopping() {
                    break;
                }
            }
            attempted = true;

            let spec = LaunchSpec {
                cluster_id: id,
                shard_ids: assignment.shard_ids,
                total_shards: plan.total_shards(),
            };
            match cluster::spawn(
                Arc::clone(&self.launcher),
                spec,
                params.clone(),
                self.bus.clone(),
                Arc::clone(gate),
            ) {
                Ok(handle) => match self.fleet.insert(handle).await {
                    Ok(()) => spawned += 1,
                    Err(handle) => {
                        handle.request_shutdown(self.cfg.shutdown_timeout).await;
                        self.publish_skipped(id, "fleet stopping");
                    }
                },
                Err(e) => {
                    self.bus.publish(
                        Event::new(EventKind::ClusterSpawnFailed)
                            .with_cluster(id)
                            .with_reason(e.to_string()),
                    );
                }
            }
        }

        self.bus
            .publish(Event::new(EventKind::FleetStarted).with_count(spawned));
        spawned
    }

    async fn compute_plan(&self) -> ShardPlan {
        let total_shards = if self.cfg.sharding {
            compute_shard_count(self.cfg.total_shards, self.shard_source.as_ref()).await
        } else {
            1
        };
        let clusters = if self.cfg.clustering {
            self.cfg.total_clusters
        } else {
            CountSetting::Fixed(1)
        };
        ShardPlan::resolve(
            total_shards,
            self.cfg.shards_per_cluster_clamped(),
            clusters,
            self.parallelism,
        )
    }

    /// Stops every cluster, waits the settle delay, and starts a fresh plan.
    ///
    /// Returns `false` without doing anything if a restart is already running
    /// or the fleet is stopping.
    pub async fn restart_all(&self) -> bool {
        self.restart("requested").await
    }

    pub(crate) async fn restart(&self, trigger: &'static str) -> bool {
        let gate = self.fleet.gate();
        if !gate.try_begin_restart() {
            self.bus
                .publish(Event::new(EventKind::RestartSkipped).with_reason(trigger));
            return false;
        }
        let _restart = RestartGuard(gate);
        if gate.is_stopping() {
            return false;
        }
        self.bus
            .publish(Event::new(EventKind::RestartRequested).with_reason(trigger));

        let _start = self.starting.lock().await;
        self.stop_handles().await;
        time::sleep(self.cfg.settle).await;
        if gate.is_stopping() {
            return false;
        }
        let spawned = self.start_locked().await;

        self.bus
            .publish(Event::new(EventKind::RestartCompleted).with_count(spawned));
        true
    }

    /// Stops every cluster for good. Later starts and respawns are refused.
    ///
    /// A start or restart in flight is allowed to wind down first, so clusters
    /// it is still stopping have exited when this returns.
    pub async fn shutdown_all(&self) {
        self.fleet.gate().begin_shutdown();
        let _start = self.starting.lock().await;
        self.stop_handles().await;
        self.bus.publish(Event::new(EventKind::FleetStopped));
    }

    /// Requests shutdown of every handle concurrently and waits for all.
    async fn stop_handles(&self) -> usize {
        let handles = self.fleet.drain().await;
        let timeout = self.cfg.shutdown_timeout;
        join_all(handles.iter().map(|h| h.request_shutdown(timeout))).await;
        handles.len()
    }

    /// Acts on one decoded control message.
    pub async fn handle_control_message(&self, msg: ControlMessage) {
        match msg {
            ControlMessage::Broadcast(payload) => {
                let reached = self.fleet.broadcast(&payload).await;
                self.bus
                    .publish(Event::new(EventKind::BroadcastForwarded).with_count(reached));
            }
            ControlMessage::Restart => {
                self.restart("control message").await;
            }
            ControlMessage::Unknown(kind) => {
                debug!(kind = %kind, "ignoring unknown control message");
            }
        }
    }

    /// Decodes and handles one raw control-topic message. Malformed input is dropped.
    pub async fn dispatch_raw(&self, raw: &str) {
        match ControlMessage::decode(raw) {
            Ok(msg) => self.handle_control_message(msg).await,
            Err(e) => self.bus.publish(
                Event::new(EventKind::ControlDropped).with_reason(format!("{}: {e}", e.as_label())),
            ),
        }
    }

    /// Runs the fleet until a termination signal, then stops every cluster.
    ///
    /// The caller is expected to exit the process afterwards.
    pub async fn run(self: &Arc<Self>) -> Result<(), RuntimeError> {
        let signals = ShutdownSignals::register().map_err(RuntimeError::Signal)?;
        self.run_until(async move {
            let signal = signals.recv().await;
            info!(signal, "termination signal received");
        })
        .await;
        Ok(())
    }

    /// Runs the fleet until `shutdown` completes, then stops every cluster.
    pub async fn run_until<F>(self: &Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut control = match self.pubsub.subscribe(&self.cfg.control_topic).await {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(topic = %self.cfg.control_topic, error = %e, "control topic unavailable");
                None
            }
        };

        #[cfg(feature = "watch")]
        let _watcher = self.spawn_watcher();

        let starter = {
            let me = Arc::clone(self);
            tokio::spawn(async move {
                me.start_all().await;
            })
        };

        tokio::pin!(shutdown);
        loop {
            let raw = tokio::select! {
                _ = &mut shutdown => break,
                raw = next_control(&mut control) => raw,
            };
            match raw {
                Some(raw) => {
                    let me = Arc::clone(self);
                    tokio::spawn(async move { me.dispatch_raw(&raw).await });
                }
                None => {
                    warn!(topic = %self.cfg.control_topic, "control topic closed");
                    control = None;
                }
            }
        }

        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.shutdown_all().await;
        starter.abort();
        let _ = starter.await;
        self.close_listener().await;
    }

    #[cfg(feature = "watch")]
    fn spawn_watcher(self: &Arc<Self>) -> Option<crate::watcher::ChangeWatcher> {
        if !self.cfg.auto_reload {
            return None;
        }
        let me = Arc::downgrade(self);
        let on_change = move || {
            let Some(me) = me.upgrade() else { return };
            me.bus.publish(Event::new(EventKind::WatchTriggered));
            tokio::spawn(async move {
                me.restart("file change").await;
            });
        };
        match crate::watcher::ChangeWatcher::spawn(&self.cfg.watch, on_change) {
            Ok(w) => Some(w),
            Err(e) => {
                warn!(error = %e, label = e.as_label(), "file watcher disabled");
                None
            }
        }
    }

    /// Stops the event listener after it delivered everything already published.
    async fn close_listener(&self) {
        self.listener_token.cancel();
        let handle = self.listener.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    fn publish_skipped(&self, id: u32, reason: &'static str) {
        self.bus.publish(
            Event::new(EventKind::ClusterSkipped)
                .with_cluster(id)
                .with_reason(reason),
        );
    }
}

async fn next_control(sub: &mut Option<Subscription>) -> Option<Arc<str>> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// Feeds bus events to the tracker and subscribers until cancelled, then drains
/// what is left and flushes subscriber queues.
fn spawn_listener(
    mut rx: broadcast::Receiver<Event>,
    subs: SubscriberSet,
    tracker: Arc<FleetTracker>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let ev = tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => ev,
            };
            match ev {
                Ok(ev) => deliver(&ev, &subs, &tracker).await,
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event listener lagged"),
                Err(RecvError::Closed) => break,
            }
        }
        while let Ok(ev) = rx.try_recv() {
            deliver(&ev, &subs, &tracker).await;
        }
        subs.shutdown().await;
    })
}

async fn deliver(ev: &Event, subs: &SubscriberSet, tracker: &FleetTracker) {
    subs.emit(ev);
    if let Some(ready) = tracker.update(ev).await {
        subs.emit(&Event::new(EventKind::FleetReady).with_count(ready));
    }
}
