//! Path filtering and the debounce loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::trace;

use crate::error::WatchError;

/// Include/exclude glob matcher rooted at a directory.
#[derive(Debug)]
pub struct PathFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl PathFilter {
    /// Compiles the patterns. An empty include list matches everything.
    pub fn new(root: PathBuf, include: &[String], exclude: &[String]) -> Result<Self, WatchError> {
        Ok(Self {
            root,
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// Whether a change at `path` should trigger a restart.
    pub fn matches(&self, path: &Path) -> bool {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        if self.exclude.is_match(rel) {
            return false;
        }
        self.include.is_empty() || self.include.is_match(rel)
    }
}

fn compile(patterns: &[String]) -> Result<GlobSet, WatchError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Calls `on_change` once `delay` passed without another matching path.
///
/// Ends when the sender side closes.
pub(crate) async fn debounce<F>(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    filter: Arc<PathFilter>,
    delay: Duration,
    on_change: F,
) where
    F: Fn(),
{
    let mut deadline: Option<Instant> = None;
    loop {
        tokio::select! {
            path = rx.recv() => match path {
                Some(path) => {
                    if filter.matches(&path) {
                        trace!(path = %path.display(), "change");
                        deadline = Some(Instant::now() + delay);
                    }
                }
                None => break,
            },
            _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                on_change();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn filter() -> Arc<PathFilter> {
        let include = vec!["src/**".to_string(), "locales/**".to_string()];
        let exclude = vec!["**/target/**".to_string(), "scripts/**".to_string()];
        Arc::new(PathFilter::new(PathBuf::from("/bot"), &include, &exclude).expect("valid globs"))
    }

    #[test]
    fn test_filter_include_and_exclude() {
        let f = filter();
        assert!(f.matches(Path::new("/bot/src/commands/ping.rs")));
        assert!(f.matches(Path::new("/bot/locales/en.json")));
        assert!(!f.matches(Path::new("/bot/scripts/deploy.sh")));
        assert!(!f.matches(Path::new("/bot/src/target/debug/out")));
        assert!(!f.matches(Path::new("/bot/README.md")));
    }

    #[test]
    fn test_empty_include_matches_everything_not_excluded() {
        let exclude = vec!["target/**".to_string()];
        let f = PathFilter::new(PathBuf::from("/bot"), &[], &exclude).expect("valid globs");
        assert!(f.matches(Path::new("/bot/anything.txt")));
        assert!(!f.matches(Path::new("/bot/target/x")));
    }

    #[test]
    fn test_invalid_glob_is_reported() {
        let err = PathFilter::new(PathBuf::from("/"), &["src/[".to_string()], &[])
            .expect_err("unclosed class");
        assert_eq!(err.as_label(), "watch_glob");
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_of_changes_triggers_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let task = tokio::spawn(debounce(rx, filter(), Duration::from_secs(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        for _ in 0..5 {
            tx.send(PathBuf::from("/bot/src/main.rs")).expect("send");
            time::sleep(Duration::from_millis(500)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tx.send(PathBuf::from("/bot/locales/de.json")).expect("send");
        time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);

        drop(tx);
        task.await.expect("debounce ends when the sender closes");
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_changes_never_trigger() {
        let (tx, rx) = mpsc::unbounded_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        tokio::spawn(debounce(rx, filter(), Duration::from_secs(2), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tx.send(PathBuf::from("/bot/scripts/restart.sh")).expect("send");
        tx.send(PathBuf::from("/bot/target/debug/bot")).expect("send");
        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
