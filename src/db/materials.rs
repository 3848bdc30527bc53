//! Material records (boards, videos, links attached to a session)

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of linked content, stored in `materials.kind`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    StudentBoard,
    TeacherBoard,
    Video,
    Link,
}

impl MaterialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaterialKind::StudentBoard => "student_board",
            MaterialKind::TeacherBoard => "teacher_board",
            MaterialKind::Video => "video",
            MaterialKind::Link => "link",
        }
    }

    /// Kinds whose blobs live in the shared namespace rather than under the student
    pub fn is_shared(&self) -> bool {
        matches!(self, MaterialKind::TeacherBoard | MaterialKind::Video)
    }
}

impl std::fmt::Display for MaterialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Material record from the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialRecord {
    pub id: Uuid,
    pub session_id: Uuid,
    pub kind: MaterialKind,
    pub content_url: String,
    /// Original filename; unique per session
    pub title: String,
    pub order_index: i32,
}

/// Input for creating a material
#[derive(Debug, Clone, Serialize)]
pub struct CreateMaterial {
    pub session_id: Uuid,
    pub kind: MaterialKind,
    pub content_url: String,
    pub title: String,
    pub order_index: i32,
}
