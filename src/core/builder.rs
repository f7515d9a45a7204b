//! # Builder for [`TopologyManager`].
//!
//! Every collaborator has a production default:
//!
//! | Seam                | Default                                   |
//! |---------------------|-------------------------------------------|
//! | [`Launcher`]        | [`CommandLauncher`] from `Config::child`  |
//! | [`ShardCountSource`]| [`DiscordGateway::from_env`]              |
//! | [`PubSub`]          | [`LocalBroker`]                           |
//! | parallelism         | [`available_parallelism`]                 |
//!
//! ```no_run
//! use std::sync::Arc;
//! use shardvisor::{Config, LogWriter, TopologyManager};
//!
//! # async fn demo() {
//! let manager = TopologyManager::builder(Config::default())
//!     .with_subscribers(vec![Arc::new(LogWriter::new())])
//!     .build();
//! manager.run().await.ok();
//! # }
//! ```

use std::sync::Arc;

use crate::{
    config::Config,
    core::manager::TopologyManager,
    events::Bus,
    planner::{DiscordGateway, ShardCountSource, available_parallelism},
    process::{CommandLauncher, Launcher},
    pubsub::{LocalBroker, PubSub},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`TopologyManager`].
pub struct TopologyBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    launcher: Option<Arc<dyn Launcher>>,
    shard_source: Option<Arc<dyn ShardCountSource>>,
    pubsub: Option<Arc<dyn PubSub>>,
    parallelism: Option<usize>,
}

impl TopologyBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            launcher: None,
            shard_source: None,
            pubsub: None,
            parallelism: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive runtime events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Replaces the process launcher.
    pub fn with_launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Replaces the recommended-shard-count source used for `total_shards = "auto"`.
    pub fn with_shard_source(mut self, source: Arc<dyn ShardCountSource>) -> Self {
        self.shard_source = Some(source);
        self
    }

    /// Replaces the control-topic transport.
    pub fn with_pubsub(mut self, pubsub: Arc<dyn PubSub>) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Overrides the CPU parallelism used to cap `total_clusters = "auto"`.
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Builds the manager.
    ///
    /// Must be called inside a Tokio runtime: the event listener and
    /// subscriber workers are spawned here.
    pub fn build(self) -> Arc<TopologyManager> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = SubscriberSet::new(self.subscribers);
        let launcher = self
            .launcher
            .unwrap_or_else(|| Arc::new(CommandLauncher::new(self.cfg.child.clone())));
        let shard_source = self
            .shard_source
            .unwrap_or_else(|| Arc::new(DiscordGateway::from_env()));
        let pubsub = self
            .pubsub
            .unwrap_or_else(|| Arc::new(LocalBroker::new()));
        let parallelism = self.parallelism.unwrap_or_else(available_parallelism);

        Arc::new(TopologyManager::new_internal(
            self.cfg,
            bus,
            subs,
            launcher,
            shard_source,
            pubsub,
            parallelism,
        ))
    }
}

impl TopologyManager {
    /// Starts building a manager for `cfg`.
    pub fn builder(cfg: Config) -> TopologyBuilder {
        TopologyBuilder::new(cfg)
    }
}
