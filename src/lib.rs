//! # shardvisor
//!
//! **Shardvisor** runs a sharded Discord bot as a fleet of OS processes.
//!
//! It decides how many gateway shards the bot needs, groups them into
//! clusters (one child process each), spawns the clusters with a stagger,
//! respawns crashed ones, and restarts or stops the whole fleet on demand.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Config ──► ShardPlanner ──► ShardPlan { total_shards, shards_per_cluster, total_clusters }
//!                                   │
//!                                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  TopologyManager                                                  │
//! │  - FleetState (cluster id → ClusterHandle, restart/stop gate)     │
//! │  - Bus (broadcast events)                                         │
//! │  - FleetTracker (liveness by sequence number)                     │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────┬──────────────────┬──────────────────┬──────────────▲───────┘
//!        ▼                  ▼                  ▼              │
//!   ┌───────────┐      ┌───────────┐      ┌───────────┐       │ control topic
//!   │ cluster 0 │      │ cluster 1 │      │ cluster N │       │ {"type":"restart"}
//!   │  actor    │      │  actor    │      │  actor    │       │ {"type":"broadcast"}
//!   └─────┬─────┘      └─────┬─────┘      └─────┬─────┘       │
//!         │ stdin/stdout JSON lines             │          PubSub / ChangeWatcher
//!         ▼                  ▼                  ▼
//!    child process      child process      child process
//!    shards [0,1]       shards [2,3]       shards [..]
//! ```
//!
//! ### Cluster lifecycle
//! ```text
//! Spawning ──► Running ──► ExitedClean (code 0 / SIGTERM) ──► done
//!                    └───► ExitedCrashed ──► RespawnScheduled (5 s) ──► Spawning
//!                                    (suppressed while the fleet restarts or stops)
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                          |
//! |-------------------|----------------------------------------------------------|---------------------------------------------|
//! | **Planning**      | Shard and cluster counts, contiguous shard slices.       | [`ShardPlan`], [`ShardCountSource`]         |
//! | **Supervision**   | Fleet start/restart/shutdown, control messages.          | [`TopologyManager`], [`ClusterHandle`]      |
//! | **Processes**     | Child launch seam and wire messages.                     | [`Launcher`], [`ChildProcess`]              |
//! | **Control**       | Pub/sub topic transport and message envelope.            | [`PubSub`], [`ControlMessage`]              |
//! | **Subscriber API**| Hook into runtime events.                                | [`Subscribe`], [`LogWriter`]                |
//! | **Policies**      | Respawn classification and delay.                        | [`RestartPolicy`], [`BackoffPolicy`]        |
//! | **Configuration** | TOML file plus `SHARDVISOR_*` environment overrides.     | [`Config`]                                  |
//!
//! ## Optional features
//! - `watch` (default): [`ChangeWatcher`] restarts the fleet when source files change.
mod config;
mod core;
mod error;
mod events;
mod planner;
mod policies;
mod process;
mod pubsub;
mod subscribers;

#[cfg(feature = "watch")]
mod watcher;

// ---- Public re-exports ----

pub use config::{ChildCommand, Config, CountSetting, WatchConfig};
pub use core::{ClusterHandle, ClusterStatus, TopologyBuilder, TopologyManager};
pub use error::{ClusterError, ConfigError, FetchError, PubSubError, RuntimeError, SpawnError};
pub use events::{Bus, Event, EventKind};
pub use planner::{
    ClusterAssignment, DISCORD_API, DiscordGateway, ShardCountSource, ShardPlan,
    available_parallelism, clusters_needed, compute_cluster_count, compute_shard_count,
    max_auto_clusters, shards_for_cluster,
};
pub use policies::{BackoffPolicy, RestartPolicy};
pub use process::{
    ChildEvent, ChildMessage, ChildProcess, ClusterExit, CommandLauncher, LaunchSpec, Launcher,
    ParentMessage, Spawned,
};
pub use pubsub::{ControlMessage, LocalBroker, PubSub, Subscription};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};

#[cfg(feature = "watch")]
pub use error::WatchError;
#[cfg(feature = "watch")]
pub use watcher::{ChangeWatcher, PathFilter};
