//! Filesystem watcher for the watch root
//!
//! A `notify::RecommendedWatcher` on the root, recursive. The callback does
//! nothing but filter events and append change items to the queue; the drain
//! loop does the work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::services::classification::is_ingestible;
use crate::services::queue::{IngestQueue, WorkItem};

/// Event kinds that can mean "new content is ready at this path"
pub fn is_content_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => true,
        EventKind::Modify(ModifyKind::Name(mode)) => {
            matches!(mode, RenameMode::To | RenameMode::Both | RenameMode::Any)
        }
        _ => false,
    }
}

/// Paths from `event` worth queueing
fn queueable_paths(event: &Event) -> Vec<PathBuf> {
    if !is_content_event(&event.kind) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter(|path| is_ingestible(path) && path.is_file())
        .cloned()
        .collect()
}

/// Keeps the OS watch alive; dropping it stops notifications
pub struct RootWatcher {
    _watcher: notify::RecommendedWatcher,
}

impl RootWatcher {
    pub fn start(root: &Path, queue: Arc<IngestQueue>) -> Result<Self> {
        let mut watcher = notify::RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for path in queueable_paths(&event) {
                        debug!(path = %path.display(), kind = ?event.kind, "File change");
                        queue.push(WorkItem::change(path));
                    }
                }
                Err(e) => warn!(error = %e, "Filesystem watcher error"),
            },
            notify::Config::default(),
        )
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        info!(root = %root.display(), "Watching for changes");
        Ok(Self { _watcher: watcher })
    }
}
