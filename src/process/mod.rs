//! Cluster processes: launch, control channel, exit status.
//!
//! ## Contents
//! - [`Launcher`], [`ChildProcess`], [`Spawned`], [`LaunchSpec`] the seam the
//!   supervisor talks to
//! - [`CommandLauncher`] forks a real program with stdio as the control channel
//! - [`ChildMessage`], [`ParentMessage`], [`ChildEvent`], [`ClusterExit`] the
//!   wire protocol and exit classification

mod child;
mod command;
mod message;

#[cfg(test)]
pub(crate) mod testing;

pub use child::{ChildProcess, LaunchSpec, Launcher, Spawned};
pub use command::CommandLauncher;
pub use message::{ChildEvent, ChildMessage, ClusterExit, ParentMessage};
