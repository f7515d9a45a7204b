//! # Shard-to-cluster arithmetic.
//!
//! Pure functions; no I/O. Given a shard count and a nominal cluster width they
//! decide how many cluster processes to run and which shards each one hosts.
//!
//! ## Layout
//! ```text
//! total_shards = 5, shards_per_cluster = 2
//!
//!   cluster 0: [0, 1]
//!   cluster 1: [2, 3]
//!   cluster 2: [4]
//! ```
//!
//! ## Clamped plans
//! With an `auto` cluster count the result is capped at CPU count − 1. When the
//! cap bites, `shards_per_cluster` is **not** recomputed: every cluster keeps
//! its nominal slice and the last one also takes the remaining tail.
//! ```text
//! total_shards = 4, shards_per_cluster = 2, parallelism = 2 → 1 cluster
//!
//!   cluster 0: [0, 1, 2, 3]
//! ```

use crate::config::CountSetting;

/// Upper bound for an `auto` cluster count: `available_parallelism - 1`, at least 1.
pub fn max_auto_clusters(available_parallelism: usize) -> u32 {
    let cap = available_parallelism.saturating_sub(1).max(1);
    u32::try_from(cap).unwrap_or(u32::MAX)
}

/// Clusters needed to host every shard at full width: `ceil(total / width)`.
pub fn clusters_needed(total_shards: u32, shards_per_cluster: u32) -> u32 {
    total_shards.max(1).div_ceil(shards_per_cluster.max(1))
}

/// Decides the number of cluster processes.
///
/// - `Auto`: `max(1, min(ceil(total / width), parallelism - 1))`
/// - `Fixed(n)`: `n`
///
/// Either way the result is then clamped down to `ceil(total / width)` so no
/// cluster is left without shards.
pub fn compute_cluster_count(
    total_shards: u32,
    shards_per_cluster: u32,
    setting: CountSetting,
    available_parallelism: usize,
) -> u32 {
    let needed = clusters_needed(total_shards, shards_per_cluster);
    let requested = match setting {
        CountSetting::Auto => needed.min(max_auto_clusters(available_parallelism)),
        CountSetting::Fixed(n) => n,
    };
    requested.clamp(1, needed)
}

/// The contiguous slice `[id*width, min((id+1)*width, total))`.
///
/// Empty when `cluster_id` lies past the last shard; callers treat that as
/// "do not spawn".
pub fn shards_for_cluster(cluster_id: u32, shards_per_cluster: u32, total_shards: u32) -> Vec<u32> {
    let width = u64::from(shards_per_cluster.max(1));
    let total = u64::from(total_shards);
    let start = u64::from(cluster_id) * width;
    let end = (start + width).min(total);
    if start >= end {
        return Vec::new();
    }
    // start < end <= total_shards, so both fit in u32.
    (start as u32..end as u32).collect()
}

/// One cluster and the shards it hosts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterAssignment {
    /// Cluster id (0-based).
    pub cluster_id: u32,
    /// Hosted shards, ascending and contiguous.
    pub shard_ids: Vec<u32>,
}

/// Shard distribution for one fleet start.
///
/// Computed once per (re)start and never mutated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardPlan {
    total_shards: u32,
    shards_per_cluster: u32,
    total_clusters: u32,
}

impl ShardPlan {
    /// Builds a plan; every field is clamped to at least 1 and the cluster count
    /// to at most `ceil(total / width)`.
    pub fn new(total_shards: u32, shards_per_cluster: u32, total_clusters: u32) -> Self {
        let total_shards = total_shards.max(1);
        let shards_per_cluster = shards_per_cluster.max(1);
        let total_clusters = total_clusters.clamp(1, clusters_needed(total_shards, shards_per_cluster));
        Self {
            total_shards,
            shards_per_cluster,
            total_clusters,
        }
    }

    /// Builds a plan from a cluster-count setting (see [`compute_cluster_count`]).
    pub fn resolve(
        total_shards: u32,
        shards_per_cluster: u32,
        clusters: CountSetting,
        available_parallelism: usize,
    ) -> Self {
        let clusters = compute_cluster_count(
            total_shards,
            shards_per_cluster,
            clusters,
            available_parallelism,
        );
        Self::new(total_shards, shards_per_cluster, clusters)
    }

    /// Total shard count.
    pub fn total_shards(&self) -> u32 {
        self.total_shards
    }

    /// Nominal shards per cluster.
    pub fn shards_per_cluster(&self) -> u32 {
        self.shards_per_cluster
    }

    /// Number of clusters.
    pub fn total_clusters(&self) -> u32 {
        self.total_clusters
    }

    /// Shards hosted by `cluster_id`.
    ///
    /// Empty for ids at or past `total_clusters`. The last cluster owns every
    /// shard from its nominal start to the end.
    pub fn shards_for(&self, cluster_id: u32) -> Vec<u32> {
        if cluster_id >= self.total_clusters {
            return Vec::new();
        }
        if cluster_id + 1 < self.total_clusters {
            return shards_for_cluster(cluster_id, self.shards_per_cluster, self.total_shards);
        }
        let start = u64::from(cluster_id) * u64::from(self.shards_per_cluster);
        if start >= u64::from(self.total_shards) {
            return Vec::new();
        }
        (start as u32..self.total_shards).collect()
    }

    /// Every cluster in ascending id order.
    pub fn assignments(&self) -> impl Iterator<Item = ClusterAssignment> + '_ {
        (0..self.total_clusters).map(|cluster_id| ClusterAssignment {
            cluster_id,
            shard_ids: self.shards_for(cluster_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(plan: &ShardPlan) -> Vec<(u32, Vec<u32>)> {
        plan.assignments()
            .map(|a| (a.cluster_id, a.shard_ids))
            .collect()
    }

    #[test]
    fn test_five_shards_two_per_cluster() {
        let plan = ShardPlan::resolve(5, 2, CountSetting::Auto, 16);
        assert_eq!(plan.total_clusters(), 3);
        assert_eq!(
            layout(&plan),
            vec![(0, vec![0, 1]), (1, vec![2, 3]), (2, vec![4])]
        );
    }

    #[test]
    fn test_auto_clamp_gives_last_cluster_the_tail() {
        assert_eq!(compute_cluster_count(4, 2, CountSetting::Auto, 2), 1);

        let plan = ShardPlan::resolve(4, 2, CountSetting::Auto, 2);
        assert_eq!(plan.total_clusters(), 1);
        assert_eq!(plan.shards_per_cluster(), 2);
        assert_eq!(layout(&plan), vec![(0, vec![0, 1, 2, 3])]);
    }

    #[test]
    fn test_auto_never_below_one() {
        assert_eq!(compute_cluster_count(8, 2, CountSetting::Auto, 1), 1);
        assert_eq!(compute_cluster_count(8, 2, CountSetting::Auto, 0), 1);
        assert_eq!(max_auto_clusters(0), 1);
        assert_eq!(max_auto_clusters(8), 7);
    }

    #[test]
    fn test_fixed_count_overshoot_is_clamped() {
        assert_eq!(compute_cluster_count(5, 2, CountSetting::Fixed(10), 64), 3);
        assert_eq!(compute_cluster_count(5, 2, CountSetting::Fixed(2), 64), 2);
    }

    #[test]
    fn test_slice_past_the_end_is_empty() {
        assert!(shards_for_cluster(3, 2, 5).is_empty());
        assert!(shards_for_cluster(100, 2, 5).is_empty());

        let plan = ShardPlan::resolve(5, 2, CountSetting::Auto, 16);
        assert!(plan.shards_for(3).is_empty());
        assert!(plan.shards_for(u32::MAX).is_empty());
    }

    #[test]
    fn test_slices_partition_all_shards() {
        for total in 1..=40u32 {
            for width in 1..=9u32 {
                for parallelism in [1usize, 2, 3, 5, 64] {
                    for setting in [
                        CountSetting::Auto,
                        CountSetting::Fixed(1),
                        CountSetting::Fixed(3),
                        CountSetting::Fixed(50),
                    ] {
                        let plan = ShardPlan::resolve(total, width, setting, parallelism);
                        let mut seen = Vec::new();
                        for a in plan.assignments() {
                            assert!(
                                !a.shard_ids.is_empty(),
                                "cluster {} empty for total={total} width={width} {setting:?}",
                                a.cluster_id
                            );
                            seen.extend(a.shard_ids);
                        }
                        let expected: Vec<u32> = (0..total).collect();
                        assert_eq!(seen, expected, "total={total} width={width} {setting:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_unclamped_plan_matches_literal_slices() {
        let plan = ShardPlan::resolve(23, 4, CountSetting::Auto, 64);
        assert_eq!(plan.total_clusters(), 6);
        for id in 0..plan.total_clusters() {
            assert_eq!(plan.shards_for(id), shards_for_cluster(id, 4, 23));
        }
    }
}
