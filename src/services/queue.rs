//! In-memory work queue with reason tags

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

use parking_lot::Mutex;

use crate::db::{PersonRecord, SessionRecord};

/// Session a catch-up item is linked into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CatchUpTarget {
    pub session: SessionRecord,
    /// Teacher of the group that decided the session title
    pub group_teacher: Option<PersonRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkReason {
    /// Found by the startup scan
    Startup,
    /// Reported by the filesystem watcher
    Change,
    /// Sibling of a freshly linked file; never triggers another scan
    CatchUp(CatchUpTarget),
}

impl WorkReason {
    pub fn label(&self) -> &'static str {
        match self {
            WorkReason::Startup => "startup",
            WorkReason::Change => "change",
            WorkReason::CatchUp(_) => "catch-up",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub path: PathBuf,
    pub reason: WorkReason,
}

impl WorkItem {
    pub fn startup(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reason: WorkReason::Startup,
        }
    }

    pub fn change(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reason: WorkReason::Change,
        }
    }

    pub fn catch_up(path: impl Into<PathBuf>, target: CatchUpTarget) -> Self {
        Self {
            path: path.into(),
            reason: WorkReason::CatchUp(target),
        }
    }
}

/// FIFO of pending work. A path already pending with the same reason is not
/// queued twice.
#[derive(Default)]
pub struct IngestQueue {
    inner: Mutex<Pending>,
}

/// The deque and its membership index, always updated together
#[derive(Default)]
struct Pending {
    order: VecDeque<WorkItem>,
    members: HashSet<WorkItem>,
}

impl IngestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the item coalesced with a pending one
    pub fn push(&self, item: WorkItem) -> bool {
        let mut pending = self.inner.lock();
        if !pending.members.insert(item.clone()) {
            return false;
        }
        pending.order.push_back(item);
        true
    }

    /// Number of items actually added
    pub fn push_all(&self, items: impl IntoIterator<Item = WorkItem>) -> usize {
        let mut pending = self.inner.lock();
        let mut added = 0;
        for item in items {
            if pending.members.insert(item.clone()) {
                pending.order.push_back(item);
                added += 1;
            }
        }
        added
    }

    pub fn pop(&self) -> Option<WorkItem> {
        let mut pending = self.inner.lock();
        let item = pending.order.pop_front()?;
        pending.members.remove(&item);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }
}
