//! Short-lived record of files that were already fully processed
//!
//! Filesystem notifications arrive in bursts (create, several writes, a
//! rename). The cache lets the pipeline skip a path it just finished with.
//! It is never the source of truth: the store's (session, title) check is.

use std::collections::HashMap;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Injected "have I just done this?" check
pub trait DedupCache: Send + Sync {
    fn seen(&self, path: &Path) -> bool;
    fn remember(&self, path: &Path);
}

/// A cached entry with expiration time
#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// TTL map; expired entries read as absent and are purged on write
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| Instant::now() < entry.expires_at)
            .map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.expires_at > now);
        entries.insert(
            key,
            CacheEntry {
                value,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .read()
            .values()
            .filter(|entry| entry.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Default [DedupCache]: paths expire after a fixed window
pub struct TtlDedupCache {
    paths: TtlCache<PathBuf, ()>,
}

impl TtlDedupCache {
    pub fn new(window: Duration) -> Self {
        Self {
            paths: TtlCache::new(window),
        }
    }
}

impl DedupCache for TtlDedupCache {
    fn seen(&self, path: &Path) -> bool {
        self.paths.get(path).is_some()
    }

    fn remember(&self, path: &Path) {
        self.paths.insert(path.to_path_buf(), ());
    }
}
