//! Runtime core: fleet orchestration and cluster lifecycle.
//!
//! The public entry point is [`TopologyManager`], built with [`TopologyBuilder`].
//!
//! Internal modules:
//! - [`manager`]: plans the fleet, starts/restarts/stops it, dispatches control messages;
//! - [`cluster`]: one supervisor actor per cluster process (respawn, shutdown, broadcast);
//! - [`fleet`]: running handles plus the restart/stop gate;
//! - [`tracker`]: liveness and readiness derived from events;
//! - [`shutdown`]: cross-platform termination signals;
//! - [`builder`]: wiring of default collaborators.

mod builder;
mod cluster;
mod fleet;
mod manager;
mod shutdown;
mod tracker;

pub use builder::TopologyBuilder;
pub use cluster::{ClusterHandle, ClusterStatus};
pub use manager::TopologyManager;
