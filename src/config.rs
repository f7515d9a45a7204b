//! # Topology configuration.
//!
//! Provides [`Config`], the settings the manager reads once at start.
//!
//! Config is assembled in three layers:
//! 1. [`Config::default`]
//! 2. a TOML file via [`Config::load`] (every key optional)
//! 3. `SHARDVISOR_*` environment overrides via [`Config::apply_env`]
//!
//! ## Example file
//! ```toml
//! total_shards = "auto"
//! shards_per_cluster = 2
//! total_clusters = "auto"
//! auto_reload = true
//! stagger_ms = 1000
//!
//! [child]
//! program = "./target/release/bot"
//! env = { RUST_LOG = "info" }
//!
//! [watch]
//! include = ["src/**", "locales/**"]
//! ```
//!
//! ## Lenient counts
//! `total_shards` and `total_clusters` accept `"auto"`, a positive integer, or a
//! numeric string. Anything else (zero, negative, garbage) falls back to `1`
//! with a warning instead of failing the whole load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::IgnoredAny;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::policies::{BackoffPolicy, RestartPolicy};

/// `"auto"` or a fixed positive count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "RawCount")]
pub enum CountSetting {
    /// Derive the value at start (Discord recommendation / CPU count).
    Auto,
    /// Use exactly this many (always `>= 1`).
    Fixed(u32),
}

impl CountSetting {
    /// Parses a textual setting leniently: `"auto"`, a positive integer, or `Fixed(1)`.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.eq_ignore_ascii_case("auto") {
            return CountSetting::Auto;
        }
        match raw.parse::<u32>() {
            Ok(n) if n >= 1 => CountSetting::Fixed(n),
            _ => {
                tracing::warn!(value = raw, "invalid count setting, using 1");
                CountSetting::Fixed(1)
            }
        }
    }

    /// Returns `true` for [`CountSetting::Auto`].
    pub fn is_auto(&self) -> bool {
        matches!(self, CountSetting::Auto)
    }
}

impl Default for CountSetting {
    fn default() -> Self {
        CountSetting::Fixed(1)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Int(i64),
    Text(String),
    Other(IgnoredAny),
}

impl From<RawCount> for CountSetting {
    fn from(raw: RawCount) -> Self {
        match raw {
            RawCount::Int(n) => match u32::try_from(n) {
                Ok(n) if n >= 1 => CountSetting::Fixed(n),
                _ => {
                    tracing::warn!(value = n, "count setting out of range, using 1");
                    CountSetting::Fixed(1)
                }
            },
            RawCount::Text(s) => CountSetting::parse(&s),
            RawCount::Other(_) => {
                tracing::warn!("count setting has unsupported type, using 1");
                CountSetting::Fixed(1)
            }
        }
    }
}

/// Program each cluster process runs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ChildCommand {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Extra environment on top of the inherited one and the shard assignment.
    pub env: BTreeMap<String, String>,
    /// Working directory (`None` = inherit).
    pub cwd: Option<PathBuf>,
}

impl Default for ChildCommand {
    fn default() -> Self {
        Self {
            program: PathBuf::from("./bot"),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

/// File watcher settings (used when `auto_reload` is on).
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directory the globs are relative to.
    pub root: PathBuf,
    /// Globs that trigger a restart.
    pub include: Vec<String>,
    /// Globs that never trigger (build output, VCS, management scripts).
    pub exclude: Vec<String>,
    /// Quiet period after the last change before restarting.
    #[serde(rename = "debounce_ms", deserialize_with = "de_millis")]
    pub debounce: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            include: vec!["src/**".into(), "locales/**".into(), "config/**".into()],
            exclude: vec![
                "target/**".into(),
                "**/target/**".into(),
                "**/.git/**".into(),
                "scripts/**".into(),
            ],
            debounce: Duration::from_secs(2),
        }
    }
}

/// Settings for the topology manager.
///
/// ## Field semantics
/// - `total_shards`: `Auto` asks Discord; fixed values are used as-is
/// - `shards_per_cluster`: nominal cluster width (`0` is treated as `1`)
/// - `total_clusters`: `Auto` = `ceil(shards / width)` capped by CPU count − 1
/// - `sharding = false` forces one shard; `clustering = false` forces one cluster
/// - `stagger`: pause between successive spawns in one fleet start
/// - `settle`: pause between fleet shutdown and respawn in a restart
/// - `shutdown_timeout`: per-cluster wait before force-kill
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Total shard count.
    pub total_shards: CountSetting,
    /// Shards hosted by one cluster process.
    pub shards_per_cluster: u32,
    /// Number of cluster processes.
    pub total_clusters: CountSetting,
    /// Whether the bot is sharded at all.
    pub sharding: bool,
    /// Whether shards are spread over several processes.
    pub clustering: bool,
    /// Restart the fleet when watched files change.
    pub auto_reload: bool,
    /// File watcher settings.
    pub watch: WatchConfig,
    /// Program each cluster runs.
    pub child: ChildCommand,

    /// Delay between spawns during a fleet start.
    #[serde(rename = "stagger_ms", deserialize_with = "de_millis")]
    pub stagger: Duration,
    /// Delay between shutdown and respawn during a fleet restart.
    #[serde(rename = "settle_ms", deserialize_with = "de_millis")]
    pub settle: Duration,
    /// How long a cluster gets to exit after `shutdown` before it is killed.
    #[serde(rename = "shutdown_timeout_ms", deserialize_with = "de_millis")]
    pub shutdown_timeout: Duration,

    /// Whether crashed clusters are respawned.
    pub restart: RestartPolicy,
    /// Delay before respawning a crashed cluster.
    pub backoff: BackoffPolicy,

    /// Pub/sub topic carrying fleet control messages.
    pub control_topic: String,
    /// Internal event bus ring buffer size (min 1).
    pub bus_capacity: usize,
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - one shard, two shards per cluster, one cluster
    /// - sharding and clustering on, auto reload off
    /// - `stagger = 1s`, `settle = 2s`, `shutdown_timeout = 10s`
    /// - respawn on crash after a constant 5s
    fn default() -> Self {
        Self {
            total_shards: CountSetting::Fixed(1),
            shards_per_cluster: 2,
            total_clusters: CountSetting::Fixed(1),
            sharding: true,
            clustering: true,
            auto_reload: false,
            watch: WatchConfig::default(),
            child: ChildCommand::default(),
            stagger: Duration::from_secs(1),
            settle: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(10),
            restart: RestartPolicy::default(),
            backoff: BackoffPolicy::default(),
            control_topic: "shardvisor:control".to_string(),
            bus_capacity: 1024,
        }
    }
}

impl Config {
    /// Reads and parses a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Applies `SHARDVISOR_*` overrides using `lookup` (usually `std::env::var`).
    ///
    /// Recognised keys: `TOTAL_SHARDS`, `SHARDS_PER_CLUSTER`, `TOTAL_CLUSTERS`,
    /// `SHARDING`, `CLUSTERING`, `AUTO_RELOAD`, `CONTROL_TOPIC`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(&format!("SHARDVISOR_{key}"));

        if let Some(v) = get("TOTAL_SHARDS") {
            self.total_shards = CountSetting::parse(&v);
        }
        if let Some(v) = get("SHARDS_PER_CLUSTER") {
            match v.trim().parse::<u32>() {
                Ok(n) if n >= 1 => self.shards_per_cluster = n,
                _ => tracing::warn!(value = %v, "ignoring invalid SHARDVISOR_SHARDS_PER_CLUSTER"),
            }
        }
        if let Some(v) = get("TOTAL_CLUSTERS") {
            self.total_clusters = CountSetting::parse(&v);
        }
        if let Some(v) = get("SHARDING") {
            self.sharding = parse_flag(&v);
        }
        if let Some(v) = get("CLUSTERING") {
            self.clustering = parse_flag(&v);
        }
        if let Some(v) = get("AUTO_RELOAD") {
            self.auto_reload = parse_flag(&v);
        }
        if let Some(v) = get("CONTROL_TOPIC") {
            self.control_topic = v;
        }
    }

    /// Returns `shards_per_cluster` clamped to a minimum of 1.
    #[inline]
    pub fn shards_per_cluster_clamped(&self) -> u32 {
        self.shards_per_cluster.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Deserializes a `Duration` from an integer number of milliseconds.
pub(crate) fn de_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let cfg = Config::from_toml("").expect("empty config parses");
        assert_eq!(cfg.total_shards, CountSetting::Fixed(1));
        assert_eq!(cfg.shards_per_cluster, 2);
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(10));
        assert_eq!(cfg.stagger, Duration::from_secs(1));
        assert_eq!(cfg.restart, RestartPolicy::OnCrash);
    }

    #[test]
    fn test_counts_accept_auto_and_numbers() {
        let cfg = Config::from_toml(
            r#"
            total_shards = "auto"
            total_clusters = 3
            shards_per_cluster = 4
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.total_shards, CountSetting::Auto);
        assert_eq!(cfg.total_clusters, CountSetting::Fixed(3));
        assert_eq!(cfg.shards_per_cluster, 4);

        let cfg = Config::from_toml(r#"total_shards = "6""#).expect("valid config");
        assert_eq!(cfg.total_shards, CountSetting::Fixed(6));
    }

    #[test]
    fn test_invalid_counts_fall_back_to_one() {
        let cfg = Config::from_toml(
            r#"
            total_shards = -3
            total_clusters = "lots"
            "#,
        )
        .expect("lenient config");
        assert_eq!(cfg.total_shards, CountSetting::Fixed(1));
        assert_eq!(cfg.total_clusters, CountSetting::Fixed(1));

        let cfg = Config::from_toml("total_shards = 0").expect("lenient config");
        assert_eq!(cfg.total_shards, CountSetting::Fixed(1));

        let cfg = Config::from_toml("total_shards = true").expect("lenient config");
        assert_eq!(cfg.total_shards, CountSetting::Fixed(1));
    }

    #[test]
    fn test_durations_and_child_section() {
        let cfg = Config::from_toml(
            r#"
            settle_ms = 500
            shutdown_timeout_ms = 2500

            [child]
            program = "/usr/bin/bot"
            args = ["--cluster-mode"]
            env = { LOG = "debug" }

            [backoff]
            first_ms = 100

            [watch]
            debounce_ms = 750
            "#,
        )
        .expect("valid config");
        assert_eq!(cfg.settle, Duration::from_millis(500));
        assert_eq!(cfg.shutdown_timeout, Duration::from_millis(2500));
        assert_eq!(cfg.child.program, PathBuf::from("/usr/bin/bot"));
        assert_eq!(cfg.child.args, vec!["--cluster-mode".to_string()]);
        assert_eq!(cfg.child.env.get("LOG").map(String::as_str), Some("debug"));
        assert_eq!(cfg.backoff.first, Duration::from_millis(100));
        assert_eq!(cfg.watch.debounce, Duration::from_millis(750));
        assert!(!cfg.watch.exclude.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_env(|key| match key {
            "SHARDVISOR_TOTAL_SHARDS" => Some("auto".into()),
            "SHARDVISOR_SHARDS_PER_CLUSTER" => Some("0".into()),
            "SHARDVISOR_CLUSTERING" => Some("false".into()),
            "SHARDVISOR_AUTO_RELOAD" => Some("yes".into()),
            _ => None,
        });
        assert_eq!(cfg.total_shards, CountSetting::Auto);
        assert_eq!(cfg.shards_per_cluster, 2);
        assert!(!cfg.clustering);
        assert!(cfg.auto_reload);
        assert!(cfg.sharding);
    }
}
