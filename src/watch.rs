//! File watches feeding the reload loop
//!
//! Every artifact file gets its own [`WatchedSource`] backed by a `notify`
//! watcher. Watchers only forward content-change events into a channel; the
//! registry's reload loop consumes them through a [`Subscription`], which
//! coalesces bursts of events into one reload per artifact.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::artifact::Artifact;
use crate::error::Result;

/// Lifecycle of a watched file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unwatched,
    Watching,
    ChangeDetected,
    Reloading,
    Closed,
}

/// A content change on one artifact file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub artifact: Artifact,
    pub path: PathBuf,
}

/// Message consumed by the reload loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    Changed(ChangeEvent),
    Shutdown,
}

/// Only writes to file contents count as changes
pub fn is_content_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any))
}

/// Create a connected sender/subscription pair
pub fn subscribe() -> (Sender<WatchSignal>, Subscription) {
    let (tx, rx) = mpsc::channel();
    (tx, Subscription { rx })
}

/// The receiving end of the change stream
pub struct Subscription {
    rx: Receiver<WatchSignal>,
}

impl Subscription {
    /// Block until changes arrive, then keep collecting until `quiet` passes
    /// without a new event.
    ///
    /// Returns the distinct changes in arrival order, or `None` once the
    /// stream has been shut down or every sender is gone.
    pub fn next_batch(&self, quiet: Duration) -> Option<Vec<ChangeEvent>> {
        let mut batch = match self.rx.recv() {
            Ok(WatchSignal::Changed(change)) => vec![change],
            Ok(WatchSignal::Shutdown) | Err(_) => return None,
        };

        loop {
            match self.rx.recv_timeout(quiet) {
                Ok(WatchSignal::Changed(change)) => {
                    if !batch.contains(&change) {
                        batch.push(change);
                    }
                }
                Ok(WatchSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return None,
                Err(RecvTimeoutError::Timeout) => return Some(batch),
            }
        }
    }
}

/// One watched artifact file
pub struct WatchedSource {
    path: PathBuf,
    artifact: Artifact,
    state: WatchState,
    open: Arc<AtomicBool>,
    watcher: Option<RecommendedWatcher>,
}

impl WatchedSource {
    pub fn new(path: impl Into<PathBuf>, artifact: Artifact) -> Self {
        Self {
            path: path.into(),
            artifact,
            state: WatchState::Unwatched,
            open: Arc::new(AtomicBool::new(false)),
            watcher: None,
        }
    }

    /// Install the OS watch; content changes are forwarded to `tx`
    pub fn watch(&mut self, tx: Sender<WatchSignal>) -> Result<()> {
        let artifact = self.artifact;
        let path = self.path.clone();
        let open = Arc::clone(&self.open);

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if !open.load(Ordering::Acquire) {
                        return;
                    }
                    if !is_content_change(&event.kind) {
                        debug!(path = %path.display(), kind = ?event.kind, "ignoring non-content event");
                        return;
                    }
                    let change = ChangeEvent {
                        artifact,
                        path: path.clone(),
                    };
                    // The reload loop is gone once the registry stops.
                    let _ = tx.send(WatchSignal::Changed(change));
                }
                Err(e) => warn!(path = %path.display(), error = %e, "file watcher error"),
            }
        })?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        self.open.store(true, Ordering::Release);
        self.watcher = Some(watcher);
        self.state = WatchState::Watching;
        debug!(path = %self.path.display(), artifact = %self.artifact, "watching artifact file");
        Ok(())
    }

    /// Release the OS watch. Further events are dropped.
    pub fn close(&mut self) {
        self.open.store(false, Ordering::Release);
        self.watcher = None;
        self.state = WatchState::Closed;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn artifact(&self) -> Artifact {
        self.artifact
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Move through the reload cycle; closed sources stay closed
    pub fn set_state(&mut self, state: WatchState) {
        if self.state != WatchState::Closed {
            self.state = state;
        }
    }
}

impl Drop for WatchedSource {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Active watches keyed by full file path
#[derive(Default)]
pub struct WatchSet {
    sources: HashMap<PathBuf, WatchedSource>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a source, closing any previous watch on the same path
    pub fn install(&mut self, source: WatchedSource) {
        if let Some(mut previous) = self.sources.insert(source.path().to_path_buf(), source) {
            previous.close();
        }
    }

    pub fn set_state(&mut self, path: &Path, state: WatchState) {
        if let Some(source) = self.sources.get_mut(path) {
            source.set_state(state);
        }
    }

    /// Apply `state` to every file of an artifact
    pub fn set_artifact_state(&mut self, artifact: Artifact, state: WatchState) {
        for source in self.sources.values_mut().filter(|s| s.artifact() == artifact) {
            source.set_state(state);
        }
    }

    pub fn state(&self, path: &Path) -> Option<WatchState> {
        self.sources.get(path).map(WatchedSource::state)
    }

    pub fn close_all(&mut self) {
        for (_, mut source) in self.sources.drain() {
            source.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
