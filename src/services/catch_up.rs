//! Catch-up scan after a successful link
//!
//! Content often lands in a folder before the file that creates its session
//! (a lesson video copied ahead of the student's boards). Once a session
//! exists, its siblings get another chance: shared content already stored
//! elsewhere is linked by URL, the rest is queued as catch-up work.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::db::{PersonRecord, SessionRecord, SharedStore};
use crate::services::classification::{KindSignals, classify, is_ingestible};
use crate::services::dedup_cache::DedupCache;
use crate::services::entity_resolver::{EntityResolver, Resolution, parse_name_token};
use crate::services::material_linker::{LinkOutcome, MaterialLinker};
use crate::services::path_metadata::WatchedFile;
use crate::services::queue::{CatchUpTarget, WorkItem};
use crate::services::text_utils::normalize_name;

#[derive(Debug, Default)]
pub struct CatchUpReport {
    /// Siblings linked by reusing a shared URL
    pub reused: usize,
    pub scheduled: Vec<WorkItem>,
}

pub struct CatchUpScanner {
    store: SharedStore,
    resolver: Arc<EntityResolver>,
    linker: Arc<MaterialLinker>,
    cache: Arc<dyn DedupCache>,
}

impl CatchUpScanner {
    pub fn new(
        store: SharedStore,
        resolver: Arc<EntityResolver>,
        linker: Arc<MaterialLinker>,
        cache: Arc<dyn DedupCache>,
    ) -> Self {
        Self {
            store,
            resolver,
            linker,
            cache,
        }
    }

    async fn siblings(dir: &Path, linked: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to list {}", dir.display()))?;

        let mut siblings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path == linked || !is_ingestible(&path) {
                continue;
            }
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                siblings.push(path);
            }
        }
        siblings.sort();
        Ok(siblings)
    }

    /// Scan the directory of `linked` for content not yet on `session`
    pub async fn scan(
        &self,
        session: &SessionRecord,
        linked: &WatchedFile,
        group_teacher: Option<&PersonRecord>,
    ) -> Result<CatchUpReport> {
        let mut report = CatchUpReport::default();
        let Some(dir) = linked.directory() else {
            return Ok(report);
        };

        let teacher_name = group_teacher.map(|t| normalize_name(&t.display_name));
        let shared_prefix = self.linker.content().shared_prefix();

        for path in Self::siblings(dir, &linked.path).await? {
            if self.cache.seen(&path) {
                continue;
            }
            let Some(file) = WatchedFile::new(&path) else {
                continue;
            };
            if self.store.find_material(session.id, &file.basename).await?.is_some() {
                continue;
            }

            let token = parse_name_token(&file.basename);
            let resolution = self.resolver.resolve_token(&token).await?;
            if let Resolution::Student(other) = &resolution {
                if other.id != session.student_id {
                    debug!(path = %path.display(), student = %other.display_name, "Sibling belongs to another student");
                    continue;
                }
            }

            let extension = file.extension();
            let (kind, rule) = classify(&KindSignals {
                extension: &extension,
                token: &token.normalized,
                group_teacher: teacher_name.as_deref(),
                resolved_teacher: matches!(resolution, Resolution::Teacher(_)),
            });

            if kind.is_shared() {
                let existing = self
                    .store
                    .find_shared_material(&file.basename, kind, &shared_prefix)
                    .await?;
                if let Some(existing) = existing {
                    let outcome = self
                        .linker
                        .link_existing_url(
                            session,
                            &file.basename,
                            kind,
                            token.order_index,
                            existing.content_url,
                        )
                        .await;
                    match outcome {
                        LinkOutcome::Linked(_) | LinkOutcome::SkippedDuplicate => {
                            self.cache.remember(&path);
                            report.reused += 1;
                            continue;
                        }
                        LinkOutcome::Failed(e) => {
                            debug!(path = %path.display(), error = %e, "Reuse failed, scheduling catch-up");
                        }
                    }
                }
            }

            debug!(path = %path.display(), kind = %kind, rule, "Scheduling catch-up");
            report.scheduled.push(WorkItem::catch_up(
                path,
                CatchUpTarget {
                    session: session.clone(),
                    group_teacher: group_teacher.cloned(),
                },
            ));
        }

        if report.reused > 0 || !report.scheduled.is_empty() {
            info!(
                session_id = %session.id,
                reused = report.reused,
                scheduled = report.scheduled.len(),
                "Catch-up scan finished"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CreateMaterial, MaterialKind, MemoryStore, RecordStore, SessionKey};
    use crate::services::content_store::{ContentStore, MemoryBlobStore};
    use crate::services::dedup_cache::TtlDedupCache;
    use crate::services::queue::WorkReason;
    use crate::services::session_registry::SessionRegistry;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        scanner: CatchUpScanner,
        cache: Arc<TtlDedupCache>,
        session: SessionRecord,
        dir: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let student = store.add_student("Jiwoo");
        store.add_student("Minji");
        let session = SessionRegistry::new(store.clone())
            .find_or_create(&SessionKey {
                student_id: student,
                date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
                title: "Jiwoo".to_string(),
            })
            .await
            .unwrap()
            .session;

        let cache = Arc::new(TtlDedupCache::new(Duration::from_secs(60)));
        let linker = Arc::new(MaterialLinker::new(
            store.clone(),
            ContentStore::new(Arc::new(MemoryBlobStore::new())),
        ));
        let resolver = Arc::new(EntityResolver::new(store.clone(), Duration::from_secs(60)));
        let scanner = CatchUpScanner::new(store.clone(), resolver, linker, cache.clone());

        Fixture {
            store,
            scanner,
            cache,
            session,
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"x").unwrap();
        path
    }

    #[tokio::test]
    async fn test_schedules_unlinked_siblings() {
        let f = fixture().await;
        let linked = touch(f.dir.path(), "01_Jiwoo.png");
        let video = touch(f.dir.path(), "lesson.mp4");
        touch(f.dir.path(), "notes.txt");
        touch(f.dir.path(), ".hidden.png");

        let report = f
            .scanner
            .scan(&f.session, &WatchedFile::new(&linked).unwrap(), None)
            .await
            .unwrap();

        assert_eq!(report.reused, 0);
        assert_eq!(report.scheduled.len(), 1);
        assert_eq!(report.scheduled[0].path, video);
        assert!(matches!(
            &report.scheduled[0].reason,
            WorkReason::CatchUp(t) if t.session.id == f.session.id
        ));
    }

    #[tokio::test]
    async fn test_skips_cached_linked_and_foreign_siblings() {
        let f = fixture().await;
        let linked = touch(f.dir.path(), "01_Jiwoo.png");
        let cached = touch(f.dir.path(), "02_Jiwoo.png");
        touch(f.dir.path(), "03_Jiwoo.png");
        touch(f.dir.path(), "04_Minji.png");
        f.cache.remember(&cached);
        f.store
            .create_material(CreateMaterial {
                session_id: f.session.id,
                kind: MaterialKind::StudentBoard,
                content_url: "memory://x".to_string(),
                title: "03_Jiwoo.png".to_string(),
                order_index: 3,
            })
            .await
            .unwrap();

        let report = f
            .scanner
            .scan(&f.session, &WatchedFile::new(&linked).unwrap(), None)
            .await
            .unwrap();
        assert!(report.scheduled.is_empty());
    }

    #[tokio::test]
    async fn test_reuses_shared_upload() {
        let f = fixture().await;
        let linked = touch(f.dir.path(), "01_Jiwoo.png");
        let video = touch(f.dir.path(), "lesson.mp4");

        let other_student = f.store.add_student("Seojun");
        let other = SessionRegistry::new(f.store.clone())
            .find_or_create(&SessionKey {
                student_id: other_student,
                date: f.session.date,
                title: "Seojun".to_string(),
            })
            .await
            .unwrap()
            .session;
        f.store
            .create_material(CreateMaterial {
                session_id: other.id,
                kind: MaterialKind::Video,
                content_url: "memory://materials/shared/2024-03-15/abc.mp4".to_string(),
                title: "lesson.mp4".to_string(),
                order_index: 0,
            })
            .await
            .unwrap();

        let report = f
            .scanner
            .scan(&f.session, &WatchedFile::new(&linked).unwrap(), None)
            .await
            .unwrap();

        assert_eq!(report.reused, 1);
        assert!(report.scheduled.is_empty());
        assert!(f.cache.seen(&video));
        let linked_video = f.store.materials_for(f.session.id);
        assert_eq!(linked_video.len(), 1);
        assert_eq!(
            linked_video[0].content_url,
            "memory://materials/shared/2024-03-15/abc.mp4"
        );
    }
}
