//! Content classification rules
//!
//! Which files the pipeline ingests at all, and what kind of material a file
//! becomes. Kind is decided by an ordered list of named rules so each
//! heuristic can be tested (and argued about) on its own.

use std::path::Path;

use crate::db::MaterialKind;
use crate::services::text_utils::contains_word_sequence;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "heic", "bmp"];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "avi", "mkv", "webm", "wmv"];

const LINK_EXTENSIONS: &[&str] = &["url", "webloc"];

/// Substrings that mark a file as authored by the teacher
pub const TEACHER_HONORIFICS: &[&str] = &["teacher", "instructor", "tutor", "선생님", "선생", "쌤"];

/// What the file physically is, judged by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentClass {
    Image,
    Video,
    Link,
}

impl ContentClass {
    pub fn from_extension(extension: &str) -> Option<Self> {
        let ext = extension.to_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentClass::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentClass::Video)
        } else if LINK_EXTENSIONS.contains(&ext.as_str()) {
            Some(ContentClass::Link)
        } else {
            None
        }
    }
}

/// Whether the pipeline should look at this file at all
pub fn is_ingestible(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if name.starts_with('.') || name.starts_with("~$") {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(ContentClass::from_extension)
        .is_some()
}

/// MIME type sent with an upload. Images and videos always get an `image/`
/// or `video/` type so the bucket's allow-list accepts them, even when
/// `mime_guess` doesn't know the extension.
pub fn content_type(path: &Path) -> String {
    let guessed = mime_guess::from_path(path).first_or_octet_stream();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    let top = match ContentClass::from_extension(&ext) {
        Some(ContentClass::Image) => "image",
        Some(ContentClass::Video) => "video",
        _ => return guessed.to_string(),
    };
    if guessed.type_().as_str() == top {
        guessed.to_string()
    } else {
        format!("{top}/{ext}")
    }
}

/// Everything the kind rules may look at
#[derive(Debug, Clone, Copy)]
pub struct KindSignals<'a> {
    /// Lowercased file extension
    pub extension: &'a str,
    /// Normalized name token (see `text_utils::normalize_name`)
    pub token: &'a str,
    /// Normalized name of the teacher of the matched group
    pub group_teacher: Option<&'a str>,
    /// The name token itself resolved to a teacher
    pub resolved_teacher: bool,
}

pub struct KindRule {
    pub name: &'static str,
    pub kind: MaterialKind,
    pub applies: fn(&KindSignals<'_>) -> bool,
}

fn video_extension(signals: &KindSignals<'_>) -> bool {
    ContentClass::from_extension(signals.extension) == Some(ContentClass::Video)
}

fn link_extension(signals: &KindSignals<'_>) -> bool {
    ContentClass::from_extension(signals.extension) == Some(ContentClass::Link)
}

fn group_teacher_name(signals: &KindSignals<'_>) -> bool {
    signals
        .group_teacher
        .is_some_and(|teacher| contains_word_sequence(signals.token, teacher))
}

fn resolved_teacher(signals: &KindSignals<'_>) -> bool {
    signals.resolved_teacher
}

fn teacher_honorific(signals: &KindSignals<'_>) -> bool {
    has_teacher_honorific(signals.token)
}

/// Checked in order; extension rules come first and always win
pub const KIND_RULES: &[KindRule] = &[
    KindRule { name: "video-extension", kind: MaterialKind::Video, applies: video_extension },
    KindRule { name: "link-extension", kind: MaterialKind::Link, applies: link_extension },
    KindRule {
        name: "group-teacher-name",
        kind: MaterialKind::TeacherBoard,
        applies: group_teacher_name,
    },
    KindRule {
        name: "resolved-teacher",
        kind: MaterialKind::TeacherBoard,
        applies: resolved_teacher,
    },
    KindRule {
        name: "teacher-honorific",
        kind: MaterialKind::TeacherBoard,
        applies: teacher_honorific,
    },
];

/// Rule name reported when nothing matched
pub const DEFAULT_RULE: &str = "student-default";

/// Kind of material plus the name of the rule that decided it
pub fn classify(signals: &KindSignals<'_>) -> (MaterialKind, &'static str) {
    KIND_RULES
        .iter()
        .find(|rule| (rule.applies)(signals))
        .map(|rule| (rule.kind, rule.name))
        .unwrap_or((MaterialKind::StudentBoard, DEFAULT_RULE))
}

pub fn has_teacher_honorific(token: &str) -> bool {
    let lower = token.to_lowercase();
    TEACHER_HONORIFICS.iter().any(|h| lower.contains(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_content_types_fit_the_bucket() {
        for ext in IMAGE_EXTENSIONS {
            let ct = content_type(Path::new(&format!("board.{ext}")));
            assert!(ct.starts_with("image/"), "{ext} -> {ct}");
        }
        for ext in VIDEO_EXTENSIONS {
            let ct = content_type(Path::new(&format!("lesson.{}", ext.to_uppercase())));
            assert!(ct.starts_with("video/"), "{ext} -> {ct}");
        }
        assert_eq!(content_type(Path::new("board.png")), "image/png");
    }

    fn signals<'a>(extension: &'a str, token: &'a str) -> KindSignals<'a> {
        KindSignals {
            extension,
            token,
            group_teacher: None,
            resolved_teacher: false,
        }
    }

    #[test]
    fn test_is_ingestible() {
        assert!(is_ingestible(Path::new("/r/a/b/01_Jiwoo.png")));
        assert!(is_ingestible(Path::new("/r/a/b/lecture.MP4")));
        assert!(is_ingestible(Path::new("/r/a/b/homework.url")));
        assert!(!is_ingestible(Path::new("/r/a/b/.DS_Store")));
        assert!(!is_ingestible(Path::new("/r/a/b/.01.png")));
        assert!(!is_ingestible(Path::new("/r/a/b/~$notes.png")));
        assert!(!is_ingestible(Path::new("/r/a/b/notes.docx")));
        assert!(!is_ingestible(Path::new("/r/a/b/upload.png.crdownload")));
    }

    #[test]
    fn test_student_board_by_default() {
        assert_eq!(
            classify(&signals("png", "jiwoo math")),
            (MaterialKind::StudentBoard, DEFAULT_RULE)
        );
    }

    #[test]
    fn test_video_extension_beats_teacher_name() {
        let s = KindSignals {
            group_teacher: Some("kim"),
            resolved_teacher: true,
            ..signals("mov", "teacher kim lecture")
        };
        assert_eq!(classify(&s), (MaterialKind::Video, "video-extension"));
    }

    #[test]
    fn test_link_extension() {
        assert_eq!(
            classify(&signals("webloc", "worksheet")),
            (MaterialKind::Link, "link-extension")
        );
    }

    #[test]
    fn test_group_teacher_name() {
        let s = KindSignals {
            group_teacher: Some("kim"),
            ..signals("png", "kim intro")
        };
        assert_eq!(classify(&s), (MaterialKind::TeacherBoard, "group-teacher-name"));
    }

    #[test]
    fn test_group_teacher_name_needs_whole_word() {
        let s = KindSignals {
            group_teacher: Some("kim"),
            ..signals("png", "kimberly board")
        };
        assert_eq!(classify(&s).0, MaterialKind::StudentBoard);
    }

    #[test]
    fn test_resolved_teacher() {
        let s = KindSignals {
            resolved_teacher: true,
            ..signals("jpg", "park board")
        };
        assert_eq!(classify(&s), (MaterialKind::TeacherBoard, "resolved-teacher"));
    }

    #[test]
    fn test_teacher_honorific() {
        assert_eq!(
            classify(&signals("png", "teacher intro")),
            (MaterialKind::TeacherBoard, "teacher-honorific")
        );
        assert_eq!(
            classify(&signals("png", "김 선생님 판서")),
            (MaterialKind::TeacherBoard, "teacher-honorific")
        );
    }
}
