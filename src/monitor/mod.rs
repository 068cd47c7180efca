//! Polling file monitor.
//!
//! The monitor keeps an `(mtime, len)` snapshot of every file under its
//! registered paths and diffs it on each poll. The first scan only records
//! the baseline. Afterwards new files are reported as touched, changed
//! files as modified, and vanished files as removed.
//!
//! A single edit can produce several events (an editor writing a temp file
//! then renaming it, for instance); consumers must treat them as hints.
//! [`debounce`] collapses bursts into one batch.

mod debounce;

pub use debounce::debounce;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// What happened to a watched file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Touch,
    Modify,
    Remove,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Touch => "touched",
            EventKind::Modify => "modify",
            EventKind::Remove => "remove",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    pub kind: EventKind,
    pub path: PathBuf,
}

impl fmt::Display for MonitorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File {} {}", self.path.display(), self.kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

type Snapshot = HashMap<PathBuf, Stamp>;

/// Watches files and directories (recursively) by polling.
pub struct FileMonitor {
    roots: Vec<PathBuf>,
    snapshot: Snapshot,
    primed: bool,
    interval: Duration,
}

impl FileMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            roots: Vec::new(),
            snapshot: Snapshot::new(),
            primed: false,
            interval,
        }
    }

    /// Register a file or directory. Adding the same path twice is a no-op.
    /// Paths that do not exist yet are picked up once they appear.
    pub fn add(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.roots.contains(&path) {
            debug!(path = %path.display(), "watching");
            self.roots.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Poll once and return what changed since the previous poll.
    pub async fn scan(&mut self) -> Vec<MonitorEvent> {
        let roots = self.roots.clone();
        let current = match tokio::task::spawn_blocking(move || collect(&roots)).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "file scan task failed");
                return Vec::new();
            }
        };

        let events = if self.primed {
            diff(&self.snapshot, &current)
        } else {
            self.primed = true;
            Vec::new()
        };
        self.snapshot = current;
        events
    }

    /// Poll in a background task until `shutdown` flips to true.
    ///
    /// The returned channel closes when the task ends.
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> mpsc::Receiver<MonitorEvent> {
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for event in self.scan().await {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("file monitor stopped");
                            return;
                        }
                    }
                }
            }
        });

        rx
    }
}

fn collect(roots: &[PathBuf]) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for root in roots {
        walk(root, &mut snapshot);
    }
    snapshot
}

fn walk(path: &Path, snapshot: &mut Snapshot) {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return,
    };

    if meta.is_dir() {
        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cannot read directory");
                return;
            }
        };
        for entry in entries.flatten() {
            walk(&entry.path(), snapshot);
        }
    } else {
        snapshot.insert(
            path.to_path_buf(),
            Stamp {
                modified: meta.modified().ok(),
                len: meta.len(),
            },
        );
    }
}

fn diff(old: &Snapshot, new: &Snapshot) -> Vec<MonitorEvent> {
    let mut events: Vec<MonitorEvent> = new
        .iter()
        .filter_map(|(path, stamp)| {
            let kind = match old.get(path) {
                None => EventKind::Touch,
                Some(prev) if prev != stamp => EventKind::Modify,
                Some(_) => return None,
            };
            Some(MonitorEvent {
                kind,
                path: path.clone(),
            })
        })
        .collect();

    events.extend(
        old.keys()
            .filter(|path| !new.contains_key(*path))
            .map(|path| MonitorEvent {
                kind: EventKind::Remove,
                path: path.clone(),
            }),
    );

    events.sort_by(|a, b| a.path.cmp(&b.path));
    events
}
