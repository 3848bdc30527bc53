//! Find-or-create of class sessions
//!
//! Sessions are keyed by (student, date, title) and created lazily by the
//! first file that needs one. The only delete is the compensating rollback
//! after a failed first link.

use anyhow::Result;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{CreateSession, SessionKey, SessionRecord, SharedStore};

/// A session plus whether this call created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub session: SessionRecord,
    pub was_created: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Deleted,
    /// Materials were attached in the meantime, so the session stays
    Kept(u64),
    Failed,
}

pub struct SessionRegistry {
    store: SharedStore,
    /// First admin account, looked up once
    creator: OnceCell<Option<Uuid>>,
}

impl SessionRegistry {
    pub fn new(store: SharedStore) -> Self {
        Self {
            store,
            creator: OnceCell::new(),
        }
    }

    pub async fn find(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        self.store.find_session(key).await
    }

    /// Attribution for new sessions: the first admin, else the student
    async fn creator_for(&self, student_id: Uuid) -> Uuid {
        let admin = self
            .creator
            .get_or_init(|| async {
                match self.store.first_admin().await {
                    Ok(admin) => {
                        if admin.is_none() {
                            warn!("No admin account found, sessions will be attributed to students");
                        }
                        admin
                    }
                    Err(e) => {
                        warn!(error = %e, "Admin lookup failed, sessions will be attributed to students");
                        None
                    }
                }
            })
            .await;
        admin.unwrap_or(student_id)
    }

    pub async fn find_or_create(&self, key: &SessionKey) -> Result<SessionHandle> {
        if let Some(session) = self.store.find_session(key).await? {
            debug!(session_id = %session.id, title = %session.title, "Reusing session");
            return Ok(SessionHandle {
                session,
                was_created: false,
            });
        }

        let created_by = self.creator_for(key.student_id).await;
        let session = self
            .store
            .create_session(CreateSession {
                student_id: key.student_id,
                title: key.title.clone(),
                date: key.date,
                created_by,
            })
            .await?;

        info!(
            session_id = %session.id,
            student_id = %session.student_id,
            date = %session.date,
            title = %session.title,
            "Created class session"
        );
        Ok(SessionHandle {
            session,
            was_created: true,
        })
    }

    /// Delete `session` if it still has no materials. Never retried.
    pub async fn discard_if_empty(&self, session: &SessionRecord) -> RollbackOutcome {
        let count = match self.store.count_materials(session.id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Could not count materials for rollback");
                return RollbackOutcome::Failed;
            }
        };

        if count > 0 {
            debug!(session_id = %session.id, count, "Session has materials, keeping it");
            return RollbackOutcome::Kept(count);
        }

        match self.store.delete_session(session.id).await {
            Ok(()) => {
                info!(session_id = %session.id, "Rolled back empty session");
                RollbackOutcome::Deleted
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to roll back empty session");
                RollbackOutcome::Failed
            }
        }
    }
}
