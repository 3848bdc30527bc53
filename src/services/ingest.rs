//! Per-file ingestion
//!
//! [FileIngestor] takes one work item from extraction to a linked material:
//! path metadata, entity resolution, session find-or-create, link, rollback
//! and the catch-up scan. Every outcome is reported, never raised, except
//! store lookups that fail outright.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{MaterialKind, PersonRecord, SessionKey, SessionRecord, SharedStore};
use crate::services::catch_up::CatchUpScanner;
use crate::services::classification::{
    ContentClass, KindSignals, classify, has_teacher_honorific, is_ingestible,
};
use crate::services::content_store::{BlobStore, ContentStore};
use crate::services::dedup_cache::DedupCache;
use crate::services::entity_resolver::{
    EntityResolver, NameToken, Resolution, TitleResolution, parse_name_token,
};
use crate::services::material_linker::{LinkOutcome, LinkPlan, MaterialLinker};
use crate::services::path_metadata::{self, DateSource, ParsedMetadata, WatchedFile};
use crate::services::queue::{CatchUpTarget, WorkItem, WorkReason};
use crate::services::session_registry::{RollbackOutcome, SessionRegistry};
use crate::services::text_utils::normalize_name;

/// How long the people directory is reused before refetching
const DIRECTORY_TTL: Duration = Duration::from_secs(30);

/// What happened to one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Linked {
        session_id: Uuid,
        material_id: Uuid,
        kind: MaterialKind,
    },
    SkippedDuplicate,
    /// Dedup cache hit, nothing queried
    RecentlyProcessed,
    /// Shared content uploaded ahead of its session
    Deferred,
    NotIngestible,
    Unresolvable(String),
    Failed {
        reason: String,
        rolled_back: bool,
    },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Linked { .. } => "linked",
            FileOutcome::SkippedDuplicate => "skipped-duplicate",
            FileOutcome::RecentlyProcessed => "recently-processed",
            FileOutcome::Deferred => "deferred",
            FileOutcome::NotIngestible => "not-ingestible",
            FileOutcome::Unresolvable(_) => "unresolvable",
            FileOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug)]
pub struct ProcessReport {
    pub outcome: FileOutcome,
    /// Catch-up items to enqueue
    pub follow_ups: Vec<WorkItem>,
}

impl From<FileOutcome> for ProcessReport {
    fn from(outcome: FileOutcome) -> Self {
        Self {
            outcome,
            follow_ups: Vec::new(),
        }
    }
}

/// Who a file belongs to once its name token is resolved
struct Ownership {
    student: PersonRecord,
    /// Only files naming a student may create a session
    may_create: bool,
    resolved_teacher: bool,
}

pub struct FileIngestor {
    root: PathBuf,
    resolver: Arc<EntityResolver>,
    registry: SessionRegistry,
    linker: Arc<MaterialLinker>,
    catch_up: CatchUpScanner,
    cache: Arc<dyn DedupCache>,
    today: fn() -> NaiveDate,
}

fn local_today() -> NaiveDate {
    Local::now().date_naive()
}

impl FileIngestor {
    pub fn new(
        root: impl Into<PathBuf>,
        store: SharedStore,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn DedupCache>,
    ) -> Self {
        let resolver = Arc::new(EntityResolver::new(store.clone(), DIRECTORY_TTL));
        let linker = Arc::new(MaterialLinker::new(store.clone(), ContentStore::new(blobs)));
        let catch_up = CatchUpScanner::new(
            store.clone(),
            resolver.clone(),
            linker.clone(),
            cache.clone(),
        );

        Self {
            root: root.into(),
            resolver,
            registry: SessionRegistry::new(store),
            linker,
            catch_up,
            cache,
            today: local_today,
        }
    }

    /// Override the processing date used when a path holds none
    pub fn with_today(mut self, today: fn() -> NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Run one work item to completion
    pub async fn process(&self, item: &WorkItem) -> Result<ProcessReport> {
        let path = &item.path;
        if !is_ingestible(path) {
            return Ok(FileOutcome::NotIngestible.into());
        }
        if self.cache.seen(path) {
            debug!(path = %path.display(), "Recently processed, skipping");
            return Ok(FileOutcome::RecentlyProcessed.into());
        }
        let is_file = tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        let Some(file) = WatchedFile::new(path.as_path()).filter(|_| is_file) else {
            return Ok(FileOutcome::NotIngestible.into());
        };

        let Some(meta) = path_metadata::extract(path, &self.root, (self.today)()) else {
            return Ok(unresolvable(&file, "not enough folder structure below the watch root"));
        };
        if meta.date_source == DateSource::Today {
            warn!(
                path = %path.display(),
                date = %meta.date,
                "No date in path, using the processing date"
            );
        }

        let token = parse_name_token(&file.basename);
        match &item.reason {
            WorkReason::CatchUp(target) => self.process_catch_up(&file, &meta, &token, target).await,
            WorkReason::Startup | WorkReason::Change => {
                self.process_initial(&file, &meta, &token).await
            }
        }
    }

    /// Decide whose content this is, or why it can't be placed
    async fn ownership(
        &self,
        file: &WatchedFile,
        meta: &ParsedMetadata,
        token: &NameToken,
    ) -> Result<std::result::Result<Ownership, String>> {
        let resolution = self.resolver.resolve_token(token).await?;
        let class = ContentClass::from_extension(&file.extension());

        let resolved_teacher = match resolution {
            Resolution::Student(student) => {
                return Ok(Ok(Ownership {
                    student,
                    may_create: true,
                    resolved_teacher: false,
                }));
            }
            Resolution::Teacher(teacher) => {
                debug!(path = %file.path.display(), teacher = %teacher.display_name, "Teacher-authored content");
                true
            }
            Resolution::Unresolved { hint } => {
                let shared = matches!(class, Some(ContentClass::Video | ContentClass::Link))
                    || has_teacher_honorific(&token.normalized);
                if !shared {
                    let reason = match hint {
                        Some(hint) => format!("no person matches '{}' (closest: {hint})", token.raw),
                        None => format!("no person matches '{}'", token.raw),
                    };
                    return Ok(Err(reason));
                }
                false
            }
        };

        match self.resolver.resolve_folder_student(&meta.entity_folder).await? {
            Some(student) => Ok(Ok(Ownership {
                student,
                may_create: false,
                resolved_teacher,
            })),
            None => Ok(Err(format!(
                "entity folder '{}' does not name a student",
                meta.entity_folder
            ))),
        }
    }

    fn plan(
        &self,
        file: &WatchedFile,
        meta: &ParsedMetadata,
        token: &NameToken,
        owner: &Ownership,
        group_teacher: Option<&PersonRecord>,
    ) -> LinkPlan {
        let extension = file.extension();
        let teacher_name = group_teacher.map(|t| normalize_name(&t.display_name));
        let (kind, rule) = classify(&KindSignals {
            extension: &extension,
            token: &token.normalized,
            group_teacher: teacher_name.as_deref(),
            resolved_teacher: owner.resolved_teacher,
        });
        debug!(path = %file.path.display(), kind = %kind, rule, "Classified material");
        LinkPlan::new(kind, token.order_index, meta.date, owner.student.id)
    }

    async fn process_initial(
        &self,
        file: &WatchedFile,
        meta: &ParsedMetadata,
        token: &NameToken,
    ) -> Result<ProcessReport> {
        let owner = match self.ownership(file, meta, token).await? {
            Ok(owner) => owner,
            Err(reason) => return Ok(unresolvable(file, &reason)),
        };

        let TitleResolution {
            title,
            group_teacher,
            ..
        } = self
            .resolver
            .resolve_title(owner.student.id, &meta.topic_candidate)
            .await?;
        let plan = self.plan(file, meta, token, &owner, group_teacher.as_ref());
        let key = SessionKey {
            student_id: owner.student.id,
            date: meta.date,
            title,
        };

        let (session, was_created) = if owner.may_create {
            match self.registry.find_or_create(&key).await {
                Ok(handle) => (handle.session, handle.was_created),
                Err(e) => return Ok(failed(file, &e, false)),
            }
        } else {
            match self.registry.find(&key).await? {
                Some(session) => (session, false),
                None => return Ok(self.defer(file, &plan).await),
            }
        };

        let mut report = self.link(file, &session, &plan, was_created).await;
        if matches!(report.outcome, FileOutcome::Linked { .. }) {
            match self.catch_up.scan(&session, file, group_teacher.as_ref()).await {
                Ok(catch_up) => report.follow_ups = catch_up.scheduled,
                Err(e) => warn!(path = %file.path.display(), error = %e, "Catch-up scan failed"),
            }
        }
        Ok(report)
    }

    async fn process_catch_up(
        &self,
        file: &WatchedFile,
        meta: &ParsedMetadata,
        token: &NameToken,
        target: &CatchUpTarget,
    ) -> Result<ProcessReport> {
        let owner = match self.ownership(file, meta, token).await? {
            Ok(owner) => owner,
            Err(reason) => return Ok(unresolvable(file, &reason)),
        };
        if owner.student.id != target.session.student_id {
            return Ok(unresolvable(file, "belongs to another student's session"));
        }
        let Some(session) = self.registry.find(&target.session.key()).await? else {
            return Ok(unresolvable(file, "catch-up target session no longer exists"));
        };

        // The plan's date comes from the session so shared keys line up with staging
        let meta = ParsedMetadata {
            date: session.date,
            ..meta.clone()
        };
        let plan = self.plan(file, &meta, token, &owner, target.group_teacher.as_ref());
        Ok(self.link(file, &session, &plan, false).await)
    }

    /// Link and, for a session created by this item, roll back on failure
    async fn link(
        &self,
        file: &WatchedFile,
        session: &SessionRecord,
        plan: &LinkPlan,
        was_created: bool,
    ) -> ProcessReport {
        match self.linker.link(session, file, plan).await {
            LinkOutcome::Linked(material) => {
                self.cache.remember(&file.path);
                FileOutcome::Linked {
                    session_id: session.id,
                    material_id: material.id,
                    kind: material.kind,
                }
                .into()
            }
            LinkOutcome::SkippedDuplicate => {
                self.cache.remember(&file.path);
                FileOutcome::SkippedDuplicate.into()
            }
            LinkOutcome::Failed(e) => {
                let rolled_back = was_created
                    && self.registry.discard_if_empty(session).await == RollbackOutcome::Deleted;
                failed(file, &e, rolled_back)
            }
        }
    }

    /// Upload a shared asset whose session doesn't exist yet
    async fn defer(&self, file: &WatchedFile, plan: &LinkPlan) -> ProcessReport {
        if plan.kind == MaterialKind::Link {
            info!(path = %file.path.display(), "No session yet for link, waiting for catch-up");
            return FileOutcome::Deferred.into();
        }
        match self.linker.stage_shared(file, plan).await {
            Ok(stored) => {
                info!(
                    path = %file.path.display(),
                    key = %stored.key,
                    uploaded = stored.uploaded,
                    "No session yet, staged shared content"
                );
                FileOutcome::Deferred.into()
            }
            Err(e) => failed(file, &e, false),
        }
    }
}

fn unresolvable(file: &WatchedFile, reason: &str) -> ProcessReport {
    info!(path = %file.path.display(), reason, "Skipping file");
    FileOutcome::Unresolvable(reason.to_string()).into()
}

fn failed(file: &WatchedFile, error: &anyhow::Error, rolled_back: bool) -> ProcessReport {
    warn!(
        path = %file.path.display(),
        error = %format!("{error:#}"),
        rolled_back,
        "Failed to link file"
    );
    FileOutcome::Failed {
        reason: format!("{error:#}"),
        rolled_back,
    }
    .into()
}
