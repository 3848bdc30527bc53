//! Class group records

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Group record from the remote directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: Uuid,
    pub name: String,
    pub teacher_id: Option<Uuid>,
}
