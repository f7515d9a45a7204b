//! # ChangeWatcher: restart the fleet when watched files change.
//!
//! ```text
//! notify (OS events) ──► unbounded channel ──► debounce task ──► on_change()
//!                          (paths)              PathFilter        (restart_all)
//!                                               2 s quiet period
//! ```
//!
//! - Access events are ignored; every other event kind counts as a change.
//! - Paths are matched relative to the canonical watch root against the
//!   include globs, minus the exclude globs (`target/`, `.git/`, scripts).
//! - Watch errors are logged and never stop the watcher.
//!
//! Dropping the [`ChangeWatcher`] stops both the OS watch and the debounce task.

mod debounce;

use std::sync::Arc;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::WatchConfig;
use crate::error::WatchError;

pub use debounce::PathFilter;

/// Live file watch feeding a debounced callback.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ChangeWatcher {
    /// Starts watching `cfg.root` recursively.
    ///
    /// `on_change` runs on the Tokio runtime once per burst of matching changes.
    pub fn spawn<F>(cfg: &WatchConfig, on_change: F) -> Result<Self, WatchError>
    where
        F: Fn() + Send + 'static,
    {
        let root = cfg.root.canonicalize().map_err(|source| WatchError::Root {
            path: cfg.root.clone(),
            source,
        })?;
        let filter = PathFilter::new(root.clone(), &cfg.include, &cfg.exclude)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let mut watcher =
            notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
                Ok(ev) => {
                    if matches!(ev.kind, notify::EventKind::Access(_)) {
                        return;
                    }
                    for path in ev.paths {
                        let _ = tx.send(path);
                    }
                }
                Err(e) => warn!(error = %e, "file watch error"),
            })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let task = tokio::spawn(debounce::debounce(
            rx,
            Arc::new(filter),
            cfg.debounce,
            on_change,
        ));
        info!(root = %root.display(), "watching for file changes");

        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}
