//! Class session records

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Business key of a class session. At most one session exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub student_id: Uuid,
    pub date: NaiveDate,
    pub title: String,
}

/// Class session record from the remote store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    pub created_by: Uuid,
}

impl SessionRecord {
    pub fn key(&self) -> SessionKey {
        SessionKey {
            student_id: self.student_id,
            date: self.date,
            title: self.title.clone(),
        }
    }

    pub fn matches(&self, key: &SessionKey) -> bool {
        self.student_id == key.student_id && self.date == key.date && self.title == key.title
    }
}

/// Input for creating a class session
#[derive(Debug, Clone, Serialize)]
pub struct CreateSession {
    pub student_id: Uuid,
    pub title: String,
    pub date: NaiveDate,
    pub created_by: Uuid,
}
