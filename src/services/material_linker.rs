//! Material linker: dedup, upload, insert
//!
//! Turns one file into one material row on a session. The (session, title)
//! check against the store is the authoritative duplicate test; the blob
//! upload happens only after it passes.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

use crate::db::{CreateMaterial, MaterialKind, MaterialRecord, SessionRecord, SharedStore};
use crate::services::content_store::{ContentStore, StoredContent, owner_key, shared_key};
use crate::services::path_metadata::WatchedFile;

/// `URL=` line of a Windows `.url` shortcut
static URL_SHORTCUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*URL\s*=\s*(\S+)\s*$").expect("valid regex"));

/// First `<string>` of a macOS `.webloc` plist
static WEBLOC_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<key>\s*URL\s*</key>\s*<string>\s*([^<\s]+)\s*</string>").expect("valid regex"));

/// Where a file's blob lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Owner(Uuid),
    /// Shared content staged under the entity-folder student
    Shared(Uuid),
}

/// Everything the linker needs besides the session and the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkPlan {
    pub kind: MaterialKind,
    pub order_index: i32,
    pub date: NaiveDate,
    pub namespace: Namespace,
}

impl LinkPlan {
    /// Shared kinds go to the shared namespace, everything else under `owner`
    pub fn new(kind: MaterialKind, order_index: i32, date: NaiveDate, owner: Uuid) -> Self {
        let namespace = if kind.is_shared() {
            Namespace::Shared(owner)
        } else {
            Namespace::Owner(owner)
        };
        Self {
            kind,
            order_index,
            date,
            namespace,
        }
    }

    pub fn key_for(&self, filename: &str) -> String {
        match self.namespace {
            Namespace::Owner(owner) => owner_key(owner, self.date, filename),
            Namespace::Shared(student) => shared_key(student, self.date, filename),
        }
    }
}

#[derive(Debug)]
pub enum LinkOutcome {
    Linked(MaterialRecord),
    SkippedDuplicate,
    Failed(anyhow::Error),
}

/// Extract the target URL from a `.url` or `.webloc` file's contents
pub fn parse_link_file(contents: &str) -> Option<String> {
    let candidate = URL_SHORTCUT
        .captures(contents)
        .or_else(|| WEBLOC_STRING.captures(contents))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())?;

    let url = Url::parse(candidate).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

async fn read_link_target(path: &Path) -> Result<String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read link file {}", path.display()))?;
    parse_link_file(&contents).ok_or_else(|| anyhow!("No http(s) URL in {}", path.display()))
}

pub struct MaterialLinker {
    store: SharedStore,
    content: ContentStore,
}

impl MaterialLinker {
    pub fn new(store: SharedStore, content: ContentStore) -> Self {
        Self { store, content }
    }

    pub fn content(&self) -> &ContentStore {
        &self.content
    }

    /// Link `file` to `session`, uploading its bytes if needed
    pub async fn link(&self, session: &SessionRecord, file: &WatchedFile, plan: &LinkPlan) -> LinkOutcome {
        match self.store.find_material(session.id, &file.basename).await {
            Ok(Some(_)) => {
                debug!(session_id = %session.id, title = %file.basename, "Material already linked");
                return LinkOutcome::SkippedDuplicate;
            }
            Ok(None) => {}
            Err(e) => return LinkOutcome::Failed(e.context("Duplicate check failed")),
        }

        let content_url = match self.content_url(file, plan).await {
            Ok(url) => url,
            Err(e) => return LinkOutcome::Failed(e),
        };

        self.insert(session, &file.basename, plan.kind, plan.order_index, content_url)
            .await
    }

    /// Attach an already-stored URL without touching the blob store
    pub async fn link_existing_url(
        &self,
        session: &SessionRecord,
        title: &str,
        kind: MaterialKind,
        order_index: i32,
        content_url: String,
    ) -> LinkOutcome {
        match self.store.find_material(session.id, title).await {
            Ok(Some(_)) => return LinkOutcome::SkippedDuplicate,
            Ok(None) => {}
            Err(e) => return LinkOutcome::Failed(e.context("Duplicate check failed")),
        }
        self.insert(session, title, kind, order_index, content_url)
            .await
    }

    /// Upload a shared asset ahead of its session existing, at the key a later
    /// `link` with the same plan will use
    pub async fn stage_shared(&self, file: &WatchedFile, plan: &LinkPlan) -> Result<StoredContent> {
        let key = plan.key_for(&file.basename);
        self.content.upload_if_absent(&key, &file.path).await
    }

    async fn content_url(&self, file: &WatchedFile, plan: &LinkPlan) -> Result<String> {
        if plan.kind == MaterialKind::Link {
            return read_link_target(&file.path).await;
        }
        let key = plan.key_for(&file.basename);
        let stored = self.content.upload_if_absent(&key, &file.path).await?;
        Ok(stored.url)
    }

    async fn insert(
        &self,
        session: &SessionRecord,
        title: &str,
        kind: MaterialKind,
        order_index: i32,
        content_url: String,
    ) -> LinkOutcome {
        let input = CreateMaterial {
            session_id: session.id,
            kind,
            content_url,
            title: title.to_string(),
            order_index,
        };
        match self.store.create_material(input).await {
            Ok(material) => {
                info!(
                    session_id = %session.id,
                    material_id = %material.id,
                    kind = %material.kind,
                    title = %material.title,
                    "Linked material"
                );
                LinkOutcome::Linked(material)
            }
            Err(e) => LinkOutcome::Failed(e.context("Material insert failed")),
        }
    }
}
