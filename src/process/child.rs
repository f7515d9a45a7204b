//! # Child process abstraction.
//!
//! A cluster process is an opaque unit the supervisor can only **spawn**,
//! **send** to, **kill**, and observe **exit** of. Everything else about the
//! child (its Discord connections, command handling) is its own business.
//!
//! ```text
//! Launcher::launch(&LaunchSpec) ──► Spawned {
//!                                     child:  Arc<dyn ChildProcess>   (send / kill / connected)
//!                                     events: mpsc::Receiver<ChildEvent>  (messages…, Exit)
//!                                   }
//! ```
//!
//! The real implementation is [`CommandLauncher`](super::CommandLauncher); tests
//! plug in a fake that never touches the OS.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{ClusterError, SpawnError};
use crate::process::message::{ChildEvent, ParentMessage};

/// What a cluster process is started with.
///
/// Exposed to the child as `CLUSTER_ID`, `SHARD_IDS` (JSON array) and `TOTAL_SHARDS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchSpec {
    /// Cluster id (0-based).
    pub cluster_id: u32,
    /// Shards the cluster hosts, ascending.
    pub shard_ids: Vec<u32>,
    /// Shard count of the whole bot.
    pub total_shards: u32,
}

impl LaunchSpec {
    /// Environment variables describing the assignment.
    pub fn env(&self) -> Result<[(&'static str, String); 3], serde_json::Error> {
        Ok([
            ("CLUSTER_ID", self.cluster_id.to_string()),
            ("SHARD_IDS", serde_json::to_string(&self.shard_ids)?),
            ("TOTAL_SHARDS", self.total_shards.to_string()),
        ])
    }
}

/// Handle to one live (or recently exited) cluster process.
pub trait ChildProcess: Send + Sync + 'static {
    /// OS process id, when known.
    fn id(&self) -> Option<u32>;

    /// `true` while the control channel accepts messages.
    fn is_connected(&self) -> bool;

    /// Queues a message on the control channel.
    fn send(&self, msg: ParentMessage) -> Result<(), ClusterError>;

    /// Hard-kills the process. The exit is reported on the event stream.
    fn kill(&self);
}

/// A freshly launched child together with its event stream.
pub struct Spawned {
    /// Control handle.
    pub child: Arc<dyn ChildProcess>,
    /// Messages from the child, terminated by exactly one [`ChildEvent::Exit`].
    pub events: mpsc::Receiver<ChildEvent>,
}

/// Starts cluster processes.
///
/// `launch` must not block: it starts the process and returns; readiness is
/// reported later on the event stream.
pub trait Launcher: Send + Sync + 'static {
    /// Starts one cluster process.
    fn launch(&self, spec: &LaunchSpec) -> Result<Spawned, SpawnError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_env_payload() {
        let spec = LaunchSpec {
            cluster_id: 1,
            shard_ids: vec![2, 3],
            total_shards: 5,
        };
        let env = spec.env().expect("encodes");
        assert_eq!(env[0], ("CLUSTER_ID", "1".to_string()));
        assert_eq!(env[1], ("SHARD_IDS", "[2,3]".to_string()));
        assert_eq!(env[2], ("TOTAL_SHARDS", "5".to_string()));
    }
}
