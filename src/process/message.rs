//! # Control-channel messages and exit status.
//!
//! The manager and each cluster process exchange newline-delimited JSON:
//!
//! ```text
//! child → manager:  {"name":"ready","clusterId":0,"shardIds":[0,1]}
//! manager → child:  {"name":"shutdown"}
//! manager → child:  <any JSON payload forwarded from the control topic>
//! ```
//!
//! [`ClusterExit`] classifies how a process ended, which drives respawn decisions.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[cfg(unix)]
const SIGTERM: i32 = nix::sys::signal::Signal::SIGTERM as i32;
#[cfg(not(unix))]
const SIGTERM: i32 = 15;

/// Message sent by a cluster process to the manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum ChildMessage {
    /// The cluster connected its shards.
    Ready {
        /// Cluster id reported by the child.
        #[serde(rename = "clusterId")]
        cluster_id: u32,
        /// Shards the child hosts.
        #[serde(rename = "shardIds")]
        shard_ids: Vec<u32>,
    },
}

/// Message sent by the manager to a cluster process.
#[derive(Clone, Debug, PartialEq)]
pub enum ParentMessage {
    /// Ask the child to close its connections and exit with code 0.
    Shutdown,
    /// Opaque payload forwarded from the control topic.
    Broadcast(Arc<Value>),
}

impl ParentMessage {
    /// Wire representation of this message.
    pub fn to_value(&self) -> Value {
        match self {
            ParentMessage::Shutdown => json!({ "name": "shutdown" }),
            ParentMessage::Broadcast(payload) => payload.as_ref().clone(),
        }
    }
}

/// Something observed on a child's control channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChildEvent {
    /// A structured message from the child.
    Message(ChildMessage),
    /// The process ended. Always the last event of a child.
    Exit(ClusterExit),
}

/// How a cluster process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClusterExit {
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Terminating signal number, if the process was killed by one.
    pub signal: Option<i32>,
}

impl ClusterExit {
    /// Creates an exit record.
    pub fn new(code: Option<i32>, signal: Option<i32>) -> Self {
        Self { code, signal }
    }

    /// Exit record for a status the OS could not report.
    pub fn unknown() -> Self {
        Self::new(None, None)
    }

    /// Builds an exit record from an OS exit status.
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self::new(status.code(), signal)
    }

    /// Exited with code `0`.
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }

    /// Killed by SIGTERM (a deliberate stop, not a crash).
    pub fn is_terminated(&self) -> bool {
        self.signal == Some(SIGTERM)
    }

    /// Neither a clean exit nor a SIGTERM.
    pub fn is_crash(&self) -> bool {
        !self.is_clean() && !self.is_terminated()
    }

    /// Symbolic name of the terminating signal (`"SIGKILL"`), if any.
    pub fn signal_name(&self) -> Option<String> {
        let sig = self.signal?;
        #[cfg(unix)]
        {
            match nix::sys::signal::Signal::try_from(sig) {
                Ok(s) => Some(s.as_str().to_string()),
                Err(_) => Some(format!("signal {sig}")),
            }
        }
        #[cfg(not(unix))]
        {
            Some(format!("signal {sig}"))
        }
    }
}
