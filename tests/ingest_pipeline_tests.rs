//! Integration tests for the ingestion pipeline
//!
//! These tests drive the full flow against in-memory stores:
//! - Session creation and material linking from folder layout
//! - Teacher-authored boards and shared content
//! - Idempotence, rollback and catch-up of out-of-order arrivals

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use lesson_ingest::db::{MaterialKind, MemoryStore};
use lesson_ingest::services::{
    FileIngestor, FileOutcome, MemoryBlobStore, Orchestrator, OrchestratorConfig, TtlDedupCache,
    WorkItem,
};

// ============================================================================
// Harness
// ============================================================================

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn fixed_today() -> NaiveDate {
    date(2026, 3, 9)
}

struct Harness {
    root: TempDir,
    store: Arc<MemoryStore>,
    blobs: Arc<MemoryBlobStore>,
}

impl Harness {
    fn new() -> Self {
        Self {
            root: tempfile::tempdir().unwrap(),
            store: Arc::new(MemoryStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    fn root(&self) -> &Path {
        self.root.path()
    }

    fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Ingestor with its own dedup cache
    fn ingestor(&self) -> FileIngestor {
        FileIngestor::new(
            self.root(),
            self.store.clone(),
            self.blobs.clone(),
            Arc::new(TtlDedupCache::new(Duration::from_secs(60))),
        )
        .with_today(fixed_today)
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            OrchestratorConfig {
                root: self.root().to_path_buf(),
                drain_interval: Duration::from_millis(10),
                settle_delay: Duration::ZERO,
            },
            self.ingestor(),
        )
    }
}

// ============================================================================
// Scenarios
// ============================================================================

mod scenarios {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_student_board_creates_session() {
        let h = Harness::new();
        let jiwoo = h.store.add_student("Jiwoo");
        h.write("Jiwoo/2024-05-01/03_Jiwoo_math.png", b"board");

        let summary = h.orchestrator().run_once().await;
        assert_eq!(summary.linked, 1);

        let sessions = h.store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].student_id, jiwoo);
        assert_eq!(sessions[0].date, date(2024, 5, 1));
        assert_eq!(sessions[0].title, "Jiwoo");

        let materials = h.store.materials_for(sessions[0].id);
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].order_index, 3);
        assert_eq!(materials[0].kind, MaterialKind::StudentBoard);
        assert_eq!(materials[0].title, "03_Jiwoo_math.png");
        assert!(materials[0].content_url.contains(&jiwoo.to_string()));
    }

    #[tokio::test]
    async fn test_teacher_board_joins_student_session() {
        let h = Harness::new();
        let jiwoo = h.store.add_student("Jiwoo");
        let kim = h.store.add_teacher("Kim");
        h.store.add_group("Math A", Some(kim), &[jiwoo]);
        h.write("Jiwoo/2024-05-01/03_Jiwoo_math.png", b"board");
        h.write("Jiwoo/2024-05-01/01_Teacher_Kim_intro.png", b"intro");

        let summary = h.orchestrator().run_once().await;
        assert_eq!(summary.linked, 2);

        let sessions = h.store.sessions();
        assert_eq!(sessions.len(), 1);

        let mut materials = h.store.materials_for(sessions[0].id);
        materials.sort_by_key(|m| m.order_index);
        assert_eq!(materials.len(), 2);
        assert_eq!(materials[0].title, "01_Teacher_Kim_intro.png");
        assert_eq!(materials[0].kind, MaterialKind::TeacherBoard);
        assert_eq!(materials[0].order_index, 1);
        assert!(materials[0].content_url.starts_with("memory://materials/shared/"));
        assert_eq!(materials[1].kind, MaterialKind::StudentBoard);
    }

    #[tokio::test]
    async fn test_rerun_skips_duplicate() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/2024-05-01/03_Jiwoo_math.png", b"board");

        h.orchestrator().run_once().await;
        let writes = h.blobs.writes();

        let report = h.ingestor().process(&WorkItem::startup(&path)).await.unwrap();
        assert_eq!(report.outcome, FileOutcome::SkippedDuplicate);
        assert_eq!(h.store.materials().len(), 1);
        assert_eq!(h.blobs.writes(), writes);
    }

    #[tokio::test]
    async fn test_video_before_image_is_caught_up() {
        let h = Harness::new();
        let jiwoo = h.store.add_student("Jiwoo");
        h.write("Jiwoo/2024-05-01/lesson.mp4", b"video bytes");

        let orchestrator = h.orchestrator();
        let first = orchestrator.run_once().await;
        assert_eq!(first.deferred, 1);
        assert!(h.store.sessions().is_empty());
        assert!(h.store.materials().is_empty());
        assert_eq!(h.blobs.writes(), 1);

        let image = h.write("Jiwoo/2024-05-01/03_Jiwoo_math.png", b"board");
        orchestrator.queue().push(WorkItem::change(&image));
        let second = orchestrator.drain().await.unwrap();

        assert_eq!(second.linked, 2);
        assert_eq!(second.catch_up_scheduled, 1);

        let sessions = h.store.sessions();
        assert_eq!(sessions.len(), 1);
        let video = h
            .store
            .materials_for(sessions[0].id)
            .into_iter()
            .find(|m| m.title == "lesson.mp4")
            .unwrap();
        assert_eq!(video.kind, MaterialKind::Video);
        assert!(
            video
                .content_url
                .starts_with(&format!("memory://materials/shared/{jiwoo}/2024-05-01/"))
        );
        // One write for the staged video, one for the image
        assert_eq!(h.blobs.writes(), 2);
    }
}

// ============================================================================
// Properties
// ============================================================================

mod properties {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_second_pass_changes_nothing() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        h.write("Jiwoo/2024-05-01/02_Jiwoo.png", b"b");

        let orchestrator = h.orchestrator();
        orchestrator.run_once().await;
        let materials = h.store.materials().len();
        let writes = h.blobs.writes();

        let again = orchestrator.run_once().await;
        assert_eq!(again.linked, 0);
        assert_eq!(again.skipped, 2);
        assert_eq!(h.store.materials().len(), materials);
        assert_eq!(h.blobs.writes(), writes);

        // A fresh cache falls back to the store's duplicate check
        let fresh = h.orchestrator().run_once().await;
        assert_eq!(fresh.linked, 0);
        assert_eq!(h.store.materials().len(), materials);
    }

    #[tokio::test]
    async fn test_one_session_per_student_date_title() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        h.store.add_student("Minji");
        h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        h.write("Jiwoo/2024-05-01/02_Jiwoo.png", b"b");
        h.write("Jiwoo/2024-05-02/01_Jiwoo.png", b"c");
        h.write("Minji/2024-05-01/01_Minji.png", b"d");

        h.orchestrator().run_once().await;

        let sessions = h.store.sessions();
        assert_eq!(sessions.len(), 3);
        let mut keys: Vec<_> = sessions.iter().map(|s| s.key()).collect();
        keys.sort_by(|a, b| (a.date, &a.title).cmp(&(b.date, &b.title)));
        keys.dedup();
        assert_eq!(keys.len(), 3);
        assert_eq!(h.store.materials().len(), 4);
    }

    #[tokio::test]
    async fn test_group_name_is_session_title() {
        let h = Harness::new();
        let jiwoo = h.store.add_student("Jiwoo");
        let kim = h.store.add_teacher("Kim");
        h.store.add_group("Math A", Some(kim), &[jiwoo]);
        h.write("Jiwoo/2024-05-01/matha/01_Jiwoo.png", b"a");
        h.write("Jiwoo/2024-05-01/matha/02_Jiwoo_Kim.png", b"b");

        h.orchestrator().run_once().await;

        let sessions = h.store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].title, "Math A");

        let mut materials = h.store.materials_for(sessions[0].id);
        materials.sort_by_key(|m| m.order_index);
        assert_eq!(materials[0].kind, MaterialKind::StudentBoard);
        // Token names the group's teacher
        assert_eq!(materials[1].kind, MaterialKind::TeacherBoard);
    }

    #[tokio::test]
    async fn test_same_video_name_stays_per_student() {
        let h = Harness::new();
        let jiwoo = h.store.add_student("Jiwoo");
        let minji = h.store.add_student("Minji");
        h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"jiwoo board");
        h.write("Jiwoo/2024-05-01/lesson.mp4", b"AAAA");
        h.write("Minji/2024-05-01/01_Minji.png", b"minji board");
        h.write("Minji/2024-05-01/lesson.mp4", b"BBBB");

        h.orchestrator().run_once().await;

        let video_of = |student: uuid::Uuid| {
            let session = h
                .store
                .sessions()
                .into_iter()
                .find(|s| s.student_id == student)
                .unwrap();
            h.store
                .materials_for(session.id)
                .into_iter()
                .find(|m| m.kind == MaterialKind::Video)
                .unwrap()
        };
        let jiwoo_video = video_of(jiwoo);
        let minji_video = video_of(minji);

        assert_ne!(jiwoo_video.content_url, minji_video.content_url);
        assert!(jiwoo_video.content_url.contains(&jiwoo.to_string()));
        assert!(minji_video.content_url.contains(&minji.to_string()));
        assert_eq!(h.blobs.writes(), 4);
    }

    #[tokio::test]
    async fn test_missing_date_uses_processing_date() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        h.write("Jiwoo/misc/01_Jiwoo.png", b"a");

        h.orchestrator().run_once().await;

        let sessions = h.store.sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].date, fixed_today());
        assert_eq!(sessions[0].title, "misc");
    }

    #[tokio::test]
    async fn test_loose_date_anywhere_in_path() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        h.write("Jiwoo/spring/20240503/01_Jiwoo.png", b"a");

        h.orchestrator().run_once().await;

        let sessions = h.store.sessions();
        assert_eq!(sessions[0].date, date(2024, 5, 3));
        assert_eq!(sessions[0].title, "spring");
    }
}

// ============================================================================
// Failure handling
// ============================================================================

mod failures {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_failed_first_link_rolls_back_session() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        h.store.fail_material_inserts(true);

        let report = h.ingestor().process(&WorkItem::startup(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Failed { rolled_back: true, .. });
        assert!(h.store.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_rolls_back_session() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        h.blobs.fail_uploads(true);

        let report = h.ingestor().process(&WorkItem::startup(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Failed { rolled_back: true, .. });
        assert!(h.store.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_session_insert_failure_skips_upload() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        h.store.fail_session_inserts(true);

        let report = h.ingestor().process(&WorkItem::startup(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Failed { rolled_back: false, .. });
        assert!(report.follow_ups.is_empty());
        assert_eq!(h.blobs.writes(), 0);
        assert!(h.store.sessions().is_empty());
        assert!(h.store.materials().is_empty());
    }

    #[tokio::test]
    async fn test_existing_session_survives_failure() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let first = h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        let second = h.write("Jiwoo/2024-05-01/02_Jiwoo.png", b"b");
        let ingestor = h.ingestor();

        let report = ingestor.process(&WorkItem::change(&first)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Linked { .. });

        h.store.fail_material_inserts(true);
        let report = ingestor.process(&WorkItem::change(&second)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Failed { rolled_back: false, .. });
        assert_eq!(h.store.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_file_is_retried_later() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        let ingestor = h.ingestor();

        h.store.fail_material_inserts(true);
        let report = ingestor.process(&WorkItem::startup(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Failed { .. });

        h.store.fail_material_inserts(false);
        let report = ingestor.process(&WorkItem::change(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Linked { .. });
    }

    #[tokio::test]
    async fn test_unknown_name_is_skipped() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/2024-05-01/05_Someone.png", b"a");

        let report = h.ingestor().process(&WorkItem::startup(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Unresolvable(_));
        assert!(h.store.sessions().is_empty());
        assert_eq!(h.blobs.writes(), 0);
    }

    #[tokio::test]
    async fn test_shallow_path_is_skipped() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        let path = h.write("Jiwoo/01_Jiwoo.png", b"a");

        let report = h.ingestor().process(&WorkItem::startup(&path)).await.unwrap();
        assert_matches!(report.outcome, FileOutcome::Unresolvable(_));
    }

    #[tokio::test]
    async fn test_non_content_file_is_ignored() {
        let h = Harness::new();
        let path = h.write("Jiwoo/2024-05-01/notes.txt", b"a");

        let report = h.ingestor().process(&WorkItem::change(&path)).await.unwrap();
        assert_eq!(report.outcome, FileOutcome::NotIngestible);
    }
}

// ============================================================================
// Links
// ============================================================================

mod links {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_link_file_stores_its_url() {
        let h = Harness::new();
        h.store.add_student("Jiwoo");
        h.write("Jiwoo/2024-05-01/01_Jiwoo.png", b"a");
        h.write(
            "Jiwoo/2024-05-01/02_Jiwoo_reading.url",
            b"[InternetShortcut]\nURL=https://example.com/reading\n",
        );

        h.orchestrator().run_once().await;

        let link = h
            .store
            .materials()
            .into_iter()
            .find(|m| m.kind == MaterialKind::Link)
            .unwrap();
        assert_eq!(link.content_url, "https://example.com/reading");
        assert_eq!(link.order_index, 2);
        assert_eq!(h.blobs.writes(), 1);
    }
}
