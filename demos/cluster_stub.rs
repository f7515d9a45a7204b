//! # Example: Cluster Stub
//!
//! A stand-in cluster process. It reads its shard assignment from the
//! environment, reports `ready` on stdout and then follows the control
//! channel on stdin until asked to shut down.
//!
//! ```text
//! cargo run -- -- cargo run --example cluster_stub
//! ```
//!
//! Set `STUB_CRASH_AFTER_MS` to make the stub exit with code 1 after a delay,
//! which exercises the respawn path.

use std::time::Duration;

use anyhow::Context;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cluster_id: u32 = std::env::var("CLUSTER_ID")
        .context("CLUSTER_ID not set")?
        .parse()
        .context("CLUSTER_ID is not a number")?;
    let shard_ids: Vec<u32> = serde_json::from_str(
        &std::env::var("SHARD_IDS").context("SHARD_IDS not set")?,
    )
    .context("SHARD_IDS is not a JSON array")?;
    let total_shards = std::env::var("TOTAL_SHARDS").unwrap_or_default();

    eprintln!("[cluster {cluster_id}] shards {shard_ids:?} of {total_shards}");

    // pretend to connect
    tokio::time::sleep(Duration::from_millis(300)).await;

    let mut stdout = tokio::io::stdout();
    let ready = json!({ "name": "ready", "clusterId": cluster_id, "shardIds": shard_ids });
    stdout.write_all(format!("{ready}\n").as_bytes()).await?;
    stdout.flush().await?;

    let crash_after = std::env::var("STUB_CRASH_AFTER_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_millis);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let crash = async {
        match crash_after {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(crash);

    loop {
        let line = tokio::select! {
            _ = &mut crash => {
                eprintln!("[cluster {cluster_id}] simulated crash");
                std::process::exit(1);
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            eprintln!("[cluster {cluster_id}] control channel closed");
            return Ok(());
        };
        let msg: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("[cluster {cluster_id}] bad message: {e}");
                continue;
            }
        };
        if msg.get("name").and_then(Value::as_str) == Some("shutdown") {
            eprintln!("[cluster {cluster_id}] shutting down");
            return Ok(());
        }
        eprintln!("[cluster {cluster_id}] broadcast: {msg}");
    }
}
