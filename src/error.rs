//! Error types used by the shardvisor runtime.
//!
//! Each subsystem gets its own enum so callers can match on what actually failed:
//!
//! - [`RuntimeError`] failures of the manager loop itself (signal registration).
//! - [`SpawnError`] a cluster process could not be launched.
//! - [`ClusterError`] a control message could not reach a cluster.
//! - [`FetchError`] the recommended shard count could not be fetched.
//! - [`ConfigError`] the configuration file could not be read or parsed.
//! - [`PubSubError`] broker and control-message failures.
//! - [`WatchError`] file watcher setup failures (feature `watch`).
//!
//! All types provide `as_label` returning a short stable snake_case label for
//! logs and metrics.

use std::path::PathBuf;

use thiserror::Error;

/// # Errors produced by the manager loop.
///
/// Everything that happens *inside* the topology layer is contained and logged;
/// only problems that prevent the manager from running at all end up here.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// OS termination signal handlers could not be installed.
    #[error("failed to register shutdown signal handlers: {0}")]
    Signal(#[source] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use shardvisor::RuntimeError;
    ///
    /// let err = RuntimeError::Signal(std::io::Error::other("denied"));
    /// assert_eq!(err.as_label(), "runtime_signal");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::Signal(_) => "runtime_signal",
        }
    }
}

/// # Errors produced while launching a cluster process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SpawnError {
    /// The OS refused to start the child process.
    #[error("failed to launch cluster {cluster_id}: {source}")]
    Io {
        /// Cluster the launch was for.
        cluster_id: u32,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// The child was started without one of its control pipes.
    #[error("cluster {cluster_id} was started without a {pipe} pipe")]
    MissingPipe {
        /// Cluster the launch was for.
        cluster_id: u32,
        /// `"stdin"` or `"stdout"`.
        pipe: &'static str,
    },

    /// The startup payload could not be serialized.
    #[error("failed to encode startup environment: {0}")]
    Encode(#[from] serde_json::Error),

    /// The launcher rejected the request (used by custom launchers).
    #[error("launch of cluster {cluster_id} rejected: {reason}")]
    Rejected {
        /// Cluster the launch was for.
        cluster_id: u32,
        /// Human-readable reason.
        reason: String,
    },
}

impl SpawnError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SpawnError::Io { .. } => "spawn_io",
            SpawnError::MissingPipe { .. } => "spawn_missing_pipe",
            SpawnError::Encode(_) => "spawn_encode",
            SpawnError::Rejected { .. } => "spawn_rejected",
        }
    }
}

/// # Errors produced when talking to a running cluster.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The child process is gone or its control channel is closed.
    #[error("cluster {cluster_id} is not connected")]
    NotConnected {
        /// Target cluster.
        cluster_id: u32,
    },
}

impl ClusterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ClusterError::NotConnected { .. } => "cluster_not_connected",
        }
    }
}

/// # Errors produced while fetching the recommended shard count.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum FetchError {
    /// No bot token available to authenticate the request.
    #[error("no bot token configured")]
    MissingToken,

    /// HTTP transport or status failure.
    #[error("gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a shard count below 1.
    #[error("gateway returned invalid shard count {0}")]
    InvalidCount(u32),
}

impl FetchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FetchError::MissingToken => "fetch_missing_token",
            FetchError::Http(_) => "fetch_http",
            FetchError::InvalidCount(_) => "fetch_invalid_count",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`Config`](crate::Config).
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse(_) => "config_parse",
        }
    }
}

/// # Errors produced by the pub/sub layer.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PubSubError {
    /// The payload is not a valid control message envelope.
    #[error("malformed control message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A `broadcast` control message arrived without `data`.
    #[error("broadcast control message has no data")]
    MissingData,

    /// The broker connection is gone.
    #[error("broker closed")]
    Closed,
}

impl PubSubError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PubSubError::Malformed(_) => "pubsub_malformed",
            PubSubError::MissingData => "pubsub_missing_data",
            PubSubError::Closed => "pubsub_closed",
        }
    }
}

/// # Errors produced while setting up the file watcher.
#[cfg(feature = "watch")]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum WatchError {
    /// A watch or exclude pattern is not a valid glob.
    #[error("invalid watch pattern: {0}")]
    Glob(#[from] globset::Error),

    /// The OS watcher could not be created or attached.
    #[error("file watcher failed: {0}")]
    Notify(#[from] notify::Error),

    /// The watch root does not exist or cannot be resolved.
    #[error("cannot resolve watch root {path}: {source}")]
    Root {
        /// Configured root.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(feature = "watch")]
impl WatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            WatchError::Glob(_) => "watch_glob",
            WatchError::Notify(_) => "watch_notify",
            WatchError::Root { .. } => "watch_root",
        }
    }
}
