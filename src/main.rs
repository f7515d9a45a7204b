//! `shardvisor` binary: loads configuration, starts the fleet and runs until
//! SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use shardvisor::{Config, LogWriter, Subscribe, TopologyManager};
use tracing_subscriber::EnvFilter;

/// Runs a sharded Discord bot as a supervised fleet of cluster processes.
#[derive(Debug, Parser)]
#[command(name = "shardvisor", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "SHARDVISOR_CONFIG")]
    config: Option<PathBuf>,

    /// Restart the fleet when watched source files change.
    #[arg(short, long)]
    watch: bool,

    /// Cluster program and its arguments (overrides `[child]` in the config).
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    cfg.apply_env(|key| std::env::var(key).ok());

    if let Some((program, args)) = cli.command.split_first() {
        cfg.child.program = PathBuf::from(program);
        cfg.child.args = args.to_vec();
    }
    if cli.watch {
        cfg.auto_reload = true;
    }

    tracing::info!(
        program = %cfg.child.program.display(),
        auto_reload = cfg.auto_reload,
        "starting shardvisor"
    );

    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let manager = TopologyManager::builder(cfg)
        .with_subscribers(subscribers)
        .build();

    manager.run().await?;
    tracing::info!("fleet stopped, exiting");
    Ok(())
}
