//! Content store gateway
//!
//! Blob keys and the upload-if-absent contract over a [BlobStore]. Student
//! boards go under the owner's id with a random suffix; teacher boards and
//! videos go under [SHARED_NAMESPACE], scoped to the student whose folder they
//! came from, with a suffix derived from the filename. Re-processing the same
//! shared file finds the existing object.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use rand::Rng;
use rand::distributions::Alphanumeric;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::services::classification;

/// Top-level key prefix for content shared between students
pub const SHARED_NAMESPACE: &str = "shared";

const OWNER_SUFFIX_LEN: usize = 12;

/// Result of a put against the blob store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    AlreadyPresent,
}

/// Object storage addressed by string keys
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Store `bytes` at `key` without overwriting an existing object
    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<PutOutcome>;

    /// Retrievable URL for `key`
    fn public_url(&self, key: &str) -> String;
}

/// An object known to be in the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredContent {
    pub key: String,
    pub url: String,
    /// False when the object was already there
    pub uploaded: bool,
}

/// Upload gateway used by the material linker
#[derive(Clone)]
pub struct ContentStore {
    blobs: Arc<dyn BlobStore>,
}

impl ContentStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Upload the file at `source` to `key` unless an object already exists there.
    /// The file is only read when an upload is actually needed.
    pub async fn upload_if_absent(&self, key: &str, source: &Path) -> Result<StoredContent> {
        let url = self.blobs.public_url(key);

        if self.blobs.exists(key).await? {
            debug!(key = %key, "Object already present, skipping upload");
            return Ok(StoredContent {
                key: key.to_string(),
                url,
                uploaded: false,
            });
        }

        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read {}", source.display()))?;
        let content_type = classification::content_type(source);

        let outcome = self.blobs.put(key, bytes, &content_type).await?;
        debug!(key = %key, content_type = %content_type, outcome = ?outcome, "Uploaded content");

        Ok(StoredContent {
            key: key.to_string(),
            url,
            uploaded: outcome == PutOutcome::Written,
        })
    }

    /// URL prefix every shared object's URL starts with
    pub fn shared_prefix(&self) -> String {
        self.blobs.public_url(&format!("{SHARED_NAMESPACE}/"))
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
}

fn with_extension(stem: String, filename: &str) -> String {
    match extension_of(filename) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// `{owner}/{date}/{random}.{ext}`
pub fn owner_key(owner: Uuid, date: NaiveDate, filename: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(OWNER_SUFFIX_LEN)
        .map(char::from)
        .collect();
    with_extension(format!("{owner}/{date}/{suffix}"), filename)
}

/// `shared/{student}/{date}/{sha256(filename)}.{ext}`
pub fn shared_key(student: Uuid, date: NaiveDate, filename: &str) -> String {
    let digest = Sha256::digest(filename.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    with_extension(format!("{SHARED_NAMESPACE}/{student}/{date}/{hex}"), filename)
}

/// In-process [BlobStore]
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, (Vec<u8>, String)>>,
    writes: AtomicUsize,
    fail_uploads: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of puts that wrote bytes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.read().get(key).map(|(_, ct)| ct.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(key))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<PutOutcome> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            bail!("upload of {key} rejected");
        }
        let mut objects = self.objects.write();
        if objects.contains_key(key) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        objects.insert(key.to_string(), (bytes, content_type.to_string()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(PutOutcome::Written)
    }

    fn public_url(&self, key: &str) -> String {
        format!("memory://materials/{key}")
    }
}
