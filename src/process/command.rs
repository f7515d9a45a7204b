//! # OS-process launcher.
//!
//! [`CommandLauncher`] forks the configured program once per cluster and wires
//! its stdio as the control channel.
//!
//! ## Wiring
//! ```text
//!            ┌───────────── manager ─────────────┐
//!  send() ──►│ outbox ─► writer task ─► stdin    │──► child
//!            │                                   │
//!  events ◄──│ reader task ◄─ stdout (JSON lines)│◄── child
//!            │ waiter task ◄─ wait() / kill      │
//!            └───────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - stdout lines that decode as a [`ChildMessage`] are events; any other line
//!   is logged as child output. stderr is inherited.
//! - stdout is read until EOF. Invalid UTF-8 is replaced and lines over
//!   64 KiB are skipped; neither closes the pipe.
//! - The waiter drains the reader before reporting `Exit`, so a `ready` written
//!   just before exiting is never reordered after the exit.
//! - `kill_on_drop` is set: a manager that dies takes its children with it.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ChildCommand;
use crate::error::{ClusterError, SpawnError};
use crate::process::child::{ChildProcess, LaunchSpec, Launcher, Spawned};
use crate::process::message::{ChildEvent, ChildMessage, ClusterExit, ParentMessage};

/// How long the waiter waits for trailing stdout after the process ended.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Longest stdout line the manager buffers.
const MAX_LINE: usize = 64 * 1024;

/// Event queue depth per child.
const EVENT_QUEUE: usize = 64;

/// Launches cluster processes from a [`ChildCommand`].
#[derive(Clone, Debug)]
pub struct CommandLauncher {
    command: ChildCommand,
}

impl CommandLauncher {
    /// Creates a launcher for `command`.
    pub fn new(command: ChildCommand) -> Self {
        Self { command }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Spawned, SpawnError> {
        let cluster_id = spec.cluster_id;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .envs(&self.command.env)
            .envs(spec.env()?)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &self.command.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| SpawnError::Io { cluster_id, source })?;
        let stdin = child.stdin.take().ok_or(SpawnError::MissingPipe {
            cluster_id,
            pipe: "stdin",
        })?;
        let stdout = child.stdout.take().ok_or(SpawnError::MissingPipe {
            cluster_id,
            pipe: "stdout",
        })?;

        let pid = child.id();
        let connected = Arc::new(AtomicBool::new(true));
        let kill = CancellationToken::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(cluster_id, stdin, outbox_rx, connected.clone()));
        let reader = tokio::spawn(read_loop(cluster_id, stdout, events_tx.clone()));
        tokio::spawn(wait_loop(
            cluster_id,
            child,
            kill.clone(),
            reader,
            events_tx,
            connected.clone(),
        ));

        debug!(cluster = cluster_id, pid, "cluster process started");
        Ok(Spawned {
            child: Arc::new(OsChild {
                cluster_id,
                pid,
                connected,
                outbox: outbox_tx,
                kill,
            }),
            events: events_rx,
        })
    }
}

/// Control handle for a forked cluster process.
struct OsChild {
    cluster_id: u32,
    pid: Option<u32>,
    connected: Arc<AtomicBool>,
    outbox: mpsc::UnboundedSender<Value>,
    kill: CancellationToken,
}

impl ChildProcess for OsChild {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, msg: ParentMessage) -> Result<(), ClusterError> {
        let not_connected = ClusterError::NotConnected {
            cluster_id: self.cluster_id,
        };
        if !self.is_connected() {
            return Err(not_connected);
        }
        self.outbox.send(msg.to_value()).map_err(|_| not_connected)
    }

    fn kill(&self) {
        self.kill.cancel();
    }
}

/// Serializes outgoing messages onto the child's stdin, one JSON document per line.
async fn write_loop(
    cluster_id: u32,
    mut stdin: ChildStdin,
    mut outbox: mpsc::UnboundedReceiver<Value>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg) = outbox.recv().await {
        let mut line = match serde_json::to_vec(&msg) {
            Ok(line) => line,
            Err(e) => {
                warn!(cluster = cluster_id, error = %e, "dropping unencodable control message");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = stdin.write_all(&line).await {
            debug!(cluster = cluster_id, error = %e, "control channel closed");
            break;
        }
        if let Err(e) = stdin.flush().await {
            debug!(cluster = cluster_id, error = %e, "control channel closed");
            break;
        }
    }
    connected.store(false, Ordering::Release);
}

/// Splits the child's stdout into control messages and plain output.
///
/// Reads until EOF: undecodable bytes are replaced and overlong lines are
/// skipped, so the pipe stays open for the child's later writes.
async fn read_loop(cluster_id: u32, stdout: ChildStdout, events: mpsc::Sender<ChildEvent>) {
    let mut lines = FramedRead::new(stdout, ChildLines::new(MAX_LINE));
    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(Line::Text(line)) => line,
            Ok(Line::Overlong) => {
                warn!(cluster = cluster_id, max = MAX_LINE, "skipping overlong stdout line");
                continue;
            }
            Err(e) => {
                debug!(cluster = cluster_id, error = %e, "stdout read failed");
                break;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('{') {
            match serde_json::from_str::<ChildMessage>(trimmed) {
                Ok(msg) => {
                    if events.send(ChildEvent::Message(msg)).await.is_err() {
                        break;
                    }
                    continue;
                }
                Err(_) if serde_json::from_str::<Value>(trimmed).is_ok() => {
                    debug!(cluster = cluster_id, message = trimmed, "unrecognised child message");
                    continue;
                }
                Err(_) => {}
            }
        }
        info!(target: "shardvisor::child", cluster = cluster_id, "{trimmed}");
    }
}

/// One frame of child output.
#[derive(Debug, PartialEq, Eq)]
enum Line {
    /// A complete line without its terminator, lossily decoded.
    Text(String),
    /// A line longer than the limit; its bytes are dropped up to the next newline.
    Overlong,
}

/// Newline framing that never fails on content.
struct ChildLines {
    max: usize,
    next_index: usize,
    discarding: bool,
}

impl ChildLines {
    fn new(max: usize) -> Self {
        Self {
            max,
            next_index: 0,
            discarding: false,
        }
    }
}

impl Decoder for ChildLines {
    type Item = Line;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        loop {
            if self.discarding {
                match buf.iter().position(|b| *b == b'\n') {
                    Some(i) => {
                        let _ = buf.split_to(i + 1);
                        self.discarding = false;
                        continue;
                    }
                    None => {
                        buf.clear();
                        return Ok(None);
                    }
                }
            }

            let limit = buf.len().min(self.max + 1);
            let found = buf[self.next_index..limit]
                .iter()
                .position(|b| *b == b'\n');
            return match found {
                Some(offset) => {
                    let end = self.next_index + offset;
                    self.next_index = 0;
                    let line = buf.split_to(end + 1);
                    Ok(Some(Line::Text(
                        String::from_utf8_lossy(&line[..end]).into_owned(),
                    )))
                }
                None if buf.len() > self.max => {
                    self.next_index = 0;
                    self.discarding = true;
                    Ok(Some(Line::Overlong))
                }
                None => {
                    self.next_index = buf.len();
                    Ok(None)
                }
            };
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Line>, io::Error> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        self.next_index = 0;
        if buf.is_empty() || self.discarding {
            buf.clear();
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(Line::Text(String::from_utf8_lossy(&rest).into_owned())))
    }
}

/// Waits for the process to end (or kills it on request) and reports the exit.
async fn wait_loop(
    cluster_id: u32,
    mut child: Child,
    kill: CancellationToken,
    reader: JoinHandle<()>,
    events: mpsc::Sender<ChildEvent>,
    connected: Arc<AtomicBool>,
) {
    let waited = tokio::select! {
        res = child.wait() => Some(res),
        _ = kill.cancelled() => None,
    };
    let status = match waited {
        Some(res) => res,
        None => {
            if let Err(e) = child.start_kill() {
                debug!(cluster = cluster_id, error = %e, "kill failed; process already gone");
            }
            child.wait().await
        }
    };
    connected.store(false, Ordering::Release);

    if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
        debug!(cluster = cluster_id, "stdout still open after exit; not draining further");
    }

    let exit = match status {
        Ok(status) => ClusterExit::from_status(status),
        Err(e) => {
            warn!(cluster = cluster_id, error = %e, "could not collect exit status");
            ClusterExit::unknown()
        }
    };
    let _ = events.send(ChildEvent::Exit(exit)).await;
}
