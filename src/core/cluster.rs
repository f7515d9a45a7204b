//! # ClusterSupervisor: one actor per cluster process.
//!
//! Supervises one cluster child with:
//! - respawns per [`RestartPolicy`] (crashes only, by default),
//! - delays per [`BackoffPolicy`] (fixed 5 s unless configured),
//! - graceful shutdown with a forced kill after a timeout.
//!
//! ## Event flow
//! ```text
//! ClusterSpawned → [ready] ClusterReady → ClusterExited
//!
//! crash (code != 0, not SIGTERM), fleet not restarting:
//!   → RespawnScheduled → [sleep] → gate re-checked → ClusterSpawned ...
//!
//! crash while restarting/stopping:
//!   → RespawnSuppressed (actor ends)
//! ```
//!
//! ## Architecture
//! ```text
//! ClusterHandle ── Command::Shutdown ──► ClusterActor::run()
//!      │                                   loop {
//!      │ broadcast (direct send)             ├─► supervise(): child events | commands
//!      ▼                                     ├─► exit → policy → gate
//!  Arc<dyn ChildProcess>                     ├─► RespawnScheduled → sleep | shutdown
//!                                            └─► gate re-check → launch
//!                                          }
//! ```
//!
//! ## Rules
//! - Launches of one cluster are **sequential**; the actor owns at most one child.
//! - A supervisor that handled a shutdown request **never** respawns.
//! - `request_shutdown` always resolves: immediately if nothing is running,
//!   otherwise within `timeout` plus a short kill grace.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::core::fleet::RestartGate;
use crate::error::SpawnError;
use crate::events::{Bus, Event, EventKind};
use crate::policies::{BackoffPolicy, RestartPolicy};
use crate::process::{
    ChildEvent, ChildMessage, ChildProcess, ClusterExit, LaunchSpec, Launcher, ParentMessage,
};

/// How long a killed child gets to report its exit.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Parameters shared by every supervisor of one fleet start.
#[derive(Clone, Debug)]
pub struct SupervisorParams {
    /// Which exits are respawned.
    pub restart: RestartPolicy,
    /// Delay before a respawn.
    pub backoff: BackoffPolicy,
}

/// Snapshot of one cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterStatus {
    /// Cluster id.
    pub cluster_id: u32,
    /// Shards the cluster hosts.
    pub shard_ids: Vec<u32>,
    /// OS process id of the current child.
    pub pid: Option<u32>,
    /// Whether the control channel is open.
    pub connected: bool,
    /// Whether the current child reported `ready`.
    pub ready: bool,
    /// Children launched by this supervisor so far.
    pub spawns: u32,
    /// How the previous child ended.
    pub last_exit: Option<ClusterExit>,
}

#[derive(Default)]
struct Shared {
    process: Mutex<Option<Arc<dyn ChildProcess>>>,
    last_exit: Mutex<Option<ClusterExit>>,
    ready: AtomicBool,
    spawns: AtomicU32,
}

impl Shared {
    fn attach(&self, child: Arc<dyn ChildProcess>) -> u32 {
        *self.process.lock() = Some(child);
        self.ready.store(false, Ordering::Release);
        self.spawns.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn detach(&self, exit: ClusterExit) {
        *self.process.lock() = None;
        *self.last_exit.lock() = Some(exit);
        self.ready.store(false, Ordering::Release);
    }

    fn current(&self) -> Option<Arc<dyn ChildProcess>> {
        self.process.lock().clone()
    }
}

enum Command {
    Shutdown {
        timeout: Duration,
        done: oneshot::Sender<()>,
    },
}

/// Manager-side handle to one cluster supervisor.
///
/// Dropping the handle (without a shutdown request) kills the child and ends
/// the supervisor.
pub struct ClusterHandle {
    cluster_id: u32,
    shard_ids: Arc<[u32]>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedSender<Command>,
    join: JoinHandle<()>,
}

impl ClusterHandle {
    /// Cluster id.
    pub fn cluster_id(&self) -> u32 {
        self.cluster_id
    }

    /// Shards hosted by this cluster.
    pub fn shard_ids(&self) -> &[u32] {
        &self.shard_ids
    }

    /// Whether a child is running with an open control channel.
    pub fn is_connected(&self) -> bool {
        self.shared
            .current()
            .is_some_and(|child| child.is_connected())
    }

    /// OS process id of the current child.
    pub fn pid(&self) -> Option<u32> {
        self.shared.current().and_then(|child| child.id())
    }

    /// How the previous child ended.
    pub fn last_exit(&self) -> Option<ClusterExit> {
        *self.shared.last_exit.lock()
    }

    /// `true` once the supervisor task has ended.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Snapshot for status reporting.
    pub fn status(&self) -> ClusterStatus {
        let child = self.shared.current();
        ClusterStatus {
            cluster_id: self.cluster_id,
            shard_ids: self.shard_ids.to_vec(),
            pid: child.as_ref().and_then(|c| c.id()),
            connected: child.as_ref().is_some_and(|c| c.is_connected()),
            ready: self.shared.ready.load(Ordering::Acquire),
            spawns: self.shared.spawns.load(Ordering::Acquire),
            last_exit: self.last_exit(),
        }
    }

    /// Forwards a payload to the child. Silently skipped when not connected.
    ///
    /// Returns whether the payload was queued.
    pub fn broadcast(&self, payload: &Arc<Value>) -> bool {
        match self.shared.current() {
            Some(child) if child.is_connected() => child
                .send(ParentMessage::Broadcast(Arc::clone(payload)))
                .is_ok(),
            _ => false,
        }
    }

    /// Asks the child to exit, killing it after `timeout`.
    ///
    /// Resolves immediately when the supervisor has nothing running, and
    /// cancels a pending respawn.
    pub async fn request_shutdown(&self, timeout: Duration) {
        let (done, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Shutdown { timeout, done })
            .is_err()
        {
            return;
        }
        let _ = rx.await;
    }
}

/// Launches a cluster and starts its supervisor.
///
/// The launch itself is synchronous; readiness is reported later as
/// [`EventKind::ClusterReady`]. A launch error is returned to the caller and
/// no supervisor is started.
pub fn spawn(
    launcher: Arc<dyn Launcher>,
    spec: LaunchSpec,
    params: SupervisorParams,
    bus: Bus,
    gate: Arc<RestartGate>,
) -> Result<ClusterHandle, SpawnError> {
    let spawned = launcher.launch(&spec)?;
    let cluster_id = spec.cluster_id;
    let shared = Arc::new(Shared::default());
    let shard_ids: Arc<[u32]> = spec.shard_ids.clone().into();

    let attempt = shared.attach(Arc::clone(&spawned.child));
    bus.publish(
        Event::new(EventKind::ClusterSpawned)
            .with_cluster(spec.cluster_id)
            .with_shards(Arc::clone(&shard_ids))
            .with_pid(spawned.child.id())
            .with_attempt(attempt),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let actor = ClusterActor {
        spec,
        shard_ids: Arc::clone(&shard_ids),
        launcher,
        params,
        bus,
        gate,
        shared: Arc::clone(&shared),
        commands: rx,
        crashes: 0,
    };
    let join = tokio::spawn(actor.run(spawned.events));

    Ok(ClusterHandle {
        cluster_id,
        shard_ids,
        shared,
        commands: tx,
        join,
    })
}

enum Supervised {
    Exited(ClusterExit),
    Stopped,
}

enum Wake {
    Child(Option<ChildEvent>),
    Command(Option<Command>),
}

struct ClusterActor {
    spec: LaunchSpec,
    shard_ids: Arc<[u32]>,
    launcher: Arc<dyn Launcher>,
    params: SupervisorParams,
    bus: Bus,
    gate: Arc<RestartGate>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Consecutive crashes since the last `ready`.
    crashes: u32,
}

impl ClusterActor {
    async fn run(mut self, mut events: mpsc::Receiver<ChildEvent>) {
        loop {
            let exit = match self.supervise(&mut events).await {
                Supervised::Exited(exit) => exit,
                Supervised::Stopped => return,
            };
            self.record_exit(exit);

            if !self.params.restart.should_respawn(&exit) {
                return;
            }
            if self.suppressed() {
                return;
            }

            let delay = self.params.backoff.next(self.crashes);
            self.crashes += 1;
            self.bus.publish(
                Event::new(EventKind::RespawnScheduled)
                    .with_cluster(self.spec.cluster_id)
                    .with_delay(delay)
                    .with_attempt(self.crashes),
            );
            if !self.backoff(delay).await {
                return;
            }
            if self.suppressed() {
                return;
            }

            match self.launcher.launch(&self.spec) {
                Ok(spawned) => {
                    let attempt = self.shared.attach(Arc::clone(&spawned.child));
                    self.bus.publish(
                        Event::new(EventKind::ClusterSpawned)
                            .with_cluster(self.spec.cluster_id)
                            .with_shards(Arc::clone(&self.shard_ids))
                            .with_pid(spawned.child.id())
                            .with_attempt(attempt),
                    );
                    events = spawned.events;
                }
                Err(e) => {
                    self.bus.publish(
                        Event::new(EventKind::ClusterSpawnFailed)
                            .with_cluster(self.spec.cluster_id)
                            .with_reason(e.to_string()),
                    );
                    return;
                }
            }
        }
    }

    /// Runs until the child exits or a shutdown is handled.
    async fn supervise(&mut self, events: &mut mpsc::Receiver<ChildEvent>) -> Supervised {
        loop {
            let wake = tokio::select! {
                ev = events.recv() => Wake::Child(ev),
                cmd = self.commands.recv() => Wake::Command(cmd),
            };

            match wake {
                Wake::Child(Some(ChildEvent::Message(msg))) => self.on_message(msg),
                Wake::Child(Some(ChildEvent::Exit(exit))) => return Supervised::Exited(exit),
                Wake::Child(None) => return Supervised::Exited(ClusterExit::unknown()),
                Wake::Command(Some(Command::Shutdown { timeout, done })) => {
                    let exit = self.shutdown_child(events, timeout).await;
                    self.record_exit(exit);
                    let _ = done.send(());
                    return Supervised::Stopped;
                }
                Wake::Command(None) => {
                    if let Some(child) = self.shared.current() {
                        child.kill();
                    }
                    let exit = await_exit(events, KILL_GRACE).await;
                    self.record_exit(exit);
                    return Supervised::Stopped;
                }
            }
        }
    }

    fn on_message(&mut self, msg: ChildMessage) {
        match msg {
            ChildMessage::Ready {
                cluster_id,
                shard_ids,
            } => {
                if cluster_id != self.spec.cluster_id {
                    warn!(
                        cluster = self.spec.cluster_id,
                        reported = cluster_id,
                        "child reported a different cluster id"
                    );
                }
                self.crashes = 0;
                self.shared.ready.store(true, Ordering::Release);
                self.bus.publish(
                    Event::new(EventKind::ClusterReady)
                        .with_cluster(self.spec.cluster_id)
                        .with_shards(shard_ids),
                );
            }
        }
    }

    async fn shutdown_child(
        &mut self,
        events: &mut mpsc::Receiver<ChildEvent>,
        timeout: Duration,
    ) -> ClusterExit {
        let id = self.spec.cluster_id;
        self.bus.publish(
            Event::new(EventKind::ClusterShutdownRequested)
                .with_cluster(id)
                .with_timeout(timeout),
        );

        let Some(child) = self.shared.current() else {
            return ClusterExit::unknown();
        };
        if !child.is_connected() {
            child.kill();
            return ClusterExit::unknown();
        }
        if let Err(e) = child.send(ParentMessage::Shutdown) {
            debug!(cluster = id, error = %e, "shutdown not delivered, killing");
            child.kill();
            return await_exit(events, KILL_GRACE).await;
        }

        match time::timeout(timeout, next_exit(events)).await {
            Ok(exit) => exit,
            Err(_) => {
                self.bus.publish(
                    Event::new(EventKind::ShutdownForced)
                        .with_cluster(id)
                        .with_timeout(timeout),
                );
                child.kill();
                await_exit(events, KILL_GRACE).await
            }
        }
    }

    /// Sleeps for `delay`. Returns `false` if a shutdown arrived meanwhile.
    async fn backoff(&mut self, delay: Duration) -> bool {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);
        let cmd = tokio::select! {
            _ = &mut sleep => return true,
            cmd = self.commands.recv() => cmd,
        };
        match cmd {
            Some(Command::Shutdown { timeout, done }) => {
                self.bus.publish(
                    Event::new(EventKind::ClusterShutdownRequested)
                        .with_cluster(self.spec.cluster_id)
                        .with_timeout(timeout),
                );
                let _ = done.send(());
            }
            None => {}
        }
        false
    }

    fn suppressed(&self) -> bool {
        match self.gate.suppresses_respawn() {
            Some(reason) => {
                self.bus.publish(
                    Event::new(EventKind::RespawnSuppressed)
                        .with_cluster(self.spec.cluster_id)
                        .with_reason(reason),
                );
                true
            }
            None => false,
        }
    }

    fn record_exit(&self, exit: ClusterExit) {
        self.shared.detach(exit);
        self.bus.publish(
            Event::new(EventKind::ClusterExited)
                .with_cluster(self.spec.cluster_id)
                .with_exit(exit),
        );
    }
}

async fn next_exit(events: &mut mpsc::Receiver<ChildEvent>) -> ClusterExit {
    while let Some(ev) = events.recv().await {
        if let ChildEvent::Exit(exit) = ev {
            return exit;
        }
    }
    ClusterExit::unknown()
}

async fn await_exit(events: &mut mpsc::Receiver<ChildEvent>, grace: Duration) -> ClusterExit {
    time::timeout(grace, next_exit(events))
        .await
        .unwrap_or_else(|_| ClusterExit::unknown())
}

#[cfg(test)]
mod tests {
    use tokio::time::{Instant, sleep};

    use super::*;
    use crate::process::testing::{FakeLauncher, SIGKILL};

    const SECOND: Duration = Duration::from_secs(1);

    fn params() -> SupervisorParams {
        SupervisorParams {
            restart: RestartPolicy::OnCrash,
            backoff: BackoffPolicy::constant(5 * SECOND),
        }
    }

    fn start(launcher: &FakeLauncher, bus: &Bus, gate: &Arc<RestartGate>) -> ClusterHandle {
        let spec = LaunchSpec {
            cluster_id: 0,
            shard_ids: vec![0, 1],
            total_shards: 2,
        };
        spawn(
            Arc::new(launcher.clone()),
            spec,
            params(),
            bus.clone(),
            Arc::clone(gate),
        )
        .expect("fake launch succeeds")
    }

    fn kinds(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev.kind);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_crash_is_respawned_after_backoff() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        sleep(Duration::from_millis(10)).await;
        launcher.crash(0, 1);

        sleep(Duration::from_millis(4_900)).await;
        assert_eq!(launcher.count_for(0), 1);

        sleep(Duration::from_millis(200)).await;
        assert_eq!(launcher.count_for(0), 2);
        assert!(handle.is_connected());
        assert_eq!(handle.status().spawns, 2);
        assert_eq!(handle.last_exit(), Some(ClusterExit::new(Some(1), None)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_exit_is_not_respawned() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        launcher.crash(0, 0);
        sleep(30 * SECOND).await;

        assert_eq!(launcher.count_for(0), 1);
        assert!(handle.is_finished());
        assert!(!handle.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_responsive_child_shuts_down_cleanly() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        let started = Instant::now();
        handle.request_shutdown(10 * SECOND).await;

        assert!(started.elapsed() < SECOND);
        assert_eq!(launcher.received(0), vec![ParentMessage::Shutdown]);
        assert!(!launcher.was_killed(0));
        assert_eq!(handle.last_exit(), Some(ClusterExit::new(Some(0), None)));

        // never respawns after a handled shutdown
        sleep(30 * SECOND).await;
        assert_eq!(launcher.count_for(0), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_child_is_killed_after_timeout() {
        let launcher = FakeLauncher::new();
        launcher.hang(0);
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        let timeout = 3 * SECOND;
        let started = Instant::now();
        handle.request_shutdown(timeout).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= timeout);
        assert!(elapsed <= timeout + KILL_GRACE);
        assert!(launcher.was_killed(0));
        assert_eq!(handle.last_exit(), Some(ClusterExit::new(None, Some(SIGKILL))));
        assert!(kinds(&mut rx).contains(&EventKind::ShutdownForced));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_after_exit_resolves_immediately() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        launcher.crash(0, 0);
        sleep(SECOND).await;

        let started = Instant::now();
        handle.request_shutdown(10 * SECOND).await;
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_cancels_respawn() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        launcher.crash(0, 1);
        sleep(SECOND).await;
        handle.request_shutdown(10 * SECOND).await;

        sleep(30 * SECOND).await;
        assert_eq!(launcher.count_for(0), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_started_during_backoff_suppresses_respawn() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let gate = Arc::new(RestartGate::new());
        let _handle = start(&launcher, &bus, &gate);

        launcher.crash(0, 1);
        sleep(SECOND).await;
        assert!(gate.try_begin_restart());

        sleep(30 * SECOND).await;
        assert_eq!(launcher.count_for(0), 1);

        let seen = kinds(&mut rx);
        assert!(seen.contains(&EventKind::RespawnScheduled));
        assert!(seen.contains(&EventKind::RespawnSuppressed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_requires_a_connected_child() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        let payload = Arc::new(serde_json::json!({ "event": "reload-locales" }));
        assert!(handle.broadcast(&payload));
        assert_eq!(
            launcher.received(0),
            vec![ParentMessage::Broadcast(payload.clone())]
        );

        launcher.crash(0, 1);
        sleep(SECOND).await;
        assert!(!handle.broadcast(&payload));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_is_published_and_recorded() {
        let launcher = FakeLauncher::new();
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let gate = Arc::new(RestartGate::new());
        let handle = start(&launcher, &bus, &gate);

        sleep(Duration::from_millis(10)).await;

        assert!(handle.status().ready);
        assert_eq!(
            kinds(&mut rx),
            vec![EventKind::ClusterSpawned, EventKind::ClusterReady]
        );
    }

    #[test]
    fn test_launch_failure_is_returned() {
        let launcher = FakeLauncher::new();
        launcher.fail(0);
        let spec = LaunchSpec {
            cluster_id: 0,
            shard_ids: vec![0],
            total_shards: 1,
        };
        let res = spawn(
            Arc::new(launcher.clone()),
            spec,
            params(),
            Bus::new(8),
            Arc::new(RestartGate::new()),
        );
        assert!(matches!(res, Err(SpawnError::Rejected { cluster_id: 0, .. })));
    }
}
