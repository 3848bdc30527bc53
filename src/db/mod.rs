//! Remote record store access
//!
//! The ingestion pipeline reads the people/group directory and writes class
//! sessions and materials through [RecordStore]. [RestStore] talks to the
//! managed backend's PostgREST endpoints; [MemoryStore] keeps everything
//! in-process and is what the tests run against.

pub mod groups;
pub mod materials;
pub mod memory;
pub mod people;
pub mod rest;
pub mod sessions;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

pub use groups::GroupRecord;
pub use materials::{CreateMaterial, MaterialKind, MaterialRecord};
pub use memory::MemoryStore;
pub use people::{PersonKind, PersonRecord};
pub use rest::{RestError, RestStore, RestStoreConfig};
pub use sessions::{CreateSession, SessionKey, SessionRecord};

/// Filtered reads, inserts and deletes against the remote collections
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// All people of one kind, in directory order
    async fn list_people(&self, kind: PersonKind) -> Result<Vec<PersonRecord>>;

    async fn get_person(&self, id: Uuid) -> Result<Option<PersonRecord>>;

    /// Groups the student is a member of
    async fn groups_for_student(&self, student_id: Uuid) -> Result<Vec<GroupRecord>>;

    /// First account holding the admin role, if any
    async fn first_admin(&self) -> Result<Option<Uuid>>;

    async fn find_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>>;

    async fn create_session(&self, input: CreateSession) -> Result<SessionRecord>;

    async fn delete_session(&self, id: Uuid) -> Result<()>;

    /// Material attached to `session_id` with this exact title
    async fn find_material(&self, session_id: Uuid, title: &str) -> Result<Option<MaterialRecord>>;

    /// Any material with this title and kind whose URL starts with `url_prefix`
    async fn find_shared_material(
        &self,
        title: &str,
        kind: MaterialKind,
        url_prefix: &str,
    ) -> Result<Option<MaterialRecord>>;

    async fn count_materials(&self, session_id: Uuid) -> Result<u64>;

    async fn create_material(&self, input: CreateMaterial) -> Result<MaterialRecord>;
}

/// Shared store handle passed between pipeline components
pub type SharedStore = Arc<dyn RecordStore>;
