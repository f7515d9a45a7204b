//! Shard planning.
//!
//! - pure arithmetic: [`ShardPlan`], [`compute_cluster_count`],
//!   [`shards_for_cluster`]
//! - gateway lookup: [`ShardCountSource`], [`DiscordGateway`], [`compute_shard_count`]

mod gateway;
mod plan;

pub use gateway::{DISCORD_API, DiscordGateway, ShardCountSource, compute_shard_count};
pub use plan::{
    ClusterAssignment, ShardPlan, clusters_needed, compute_cluster_count, max_auto_clusters,
    shards_for_cluster,
};

/// CPU parallelism reported by the OS (1 if unknown).
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
