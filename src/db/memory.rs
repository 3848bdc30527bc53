//! In-process record store
//!
//! Mirrors the uniqueness rules of the remote collections closely enough for
//! pipeline tests: one session per key, one material per (session, title).
//! Failure switches let tests force insert errors.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::{
    CreateMaterial, CreateSession, GroupRecord, MaterialKind, MaterialRecord, PersonKind,
    PersonRecord, RecordStore, SessionKey, SessionRecord,
};

#[derive(Default)]
struct MemoryState {
    people: Vec<PersonRecord>,
    admins: Vec<Uuid>,
    groups: Vec<GroupRecord>,
    /// (group_id, student_id)
    memberships: Vec<(Uuid, Uuid)>,
    sessions: Vec<SessionRecord>,
    materials: Vec<MaterialRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    fail_material_inserts: AtomicBool,
    fail_session_inserts: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_person(&self, display_name: &str, kind: PersonKind) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().people.push(PersonRecord {
            id,
            display_name: display_name.to_string(),
            kind,
        });
        id
    }

    pub fn add_student(&self, display_name: &str) -> Uuid {
        self.add_person(display_name, PersonKind::Student)
    }

    pub fn add_teacher(&self, display_name: &str) -> Uuid {
        self.add_person(display_name, PersonKind::Teacher)
    }

    pub fn add_admin(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().admins.push(id);
        id
    }

    pub fn add_group(&self, name: &str, teacher_id: Option<Uuid>, members: &[Uuid]) -> Uuid {
        let id = Uuid::new_v4();
        let mut state = self.state.lock();
        state.groups.push(GroupRecord {
            id,
            name: name.to_string(),
            teacher_id,
        });
        state
            .memberships
            .extend(members.iter().map(|student_id| (id, *student_id)));
        id
    }

    /// Make every following material insert fail until switched back
    pub fn fail_material_inserts(&self, fail: bool) {
        self.fail_material_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_session_inserts(&self, fail: bool) {
        self.fail_session_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        self.state.lock().sessions.clone()
    }

    pub fn materials(&self) -> Vec<MaterialRecord> {
        self.state.lock().materials.clone()
    }

    pub fn materials_for(&self, session_id: Uuid) -> Vec<MaterialRecord> {
        self.state
            .lock()
            .materials
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn list_people(&self, kind: PersonKind) -> Result<Vec<PersonRecord>> {
        Ok(self
            .state
            .lock()
            .people
            .iter()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect())
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<PersonRecord>> {
        Ok(self.state.lock().people.iter().find(|p| p.id == id).cloned())
    }

    async fn groups_for_student(&self, student_id: Uuid) -> Result<Vec<GroupRecord>> {
        let state = self.state.lock();
        Ok(state
            .memberships
            .iter()
            .filter(|(_, member)| *member == student_id)
            .filter_map(|(group_id, _)| state.groups.iter().find(|g| g.id == *group_id))
            .cloned()
            .collect())
    }

    async fn first_admin(&self) -> Result<Option<Uuid>> {
        Ok(self.state.lock().admins.first().copied())
    }

    async fn find_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        Ok(self
            .state
            .lock()
            .sessions
            .iter()
            .find(|s| s.matches(key))
            .cloned())
    }

    async fn create_session(&self, input: CreateSession) -> Result<SessionRecord> {
        if self.fail_session_inserts.load(Ordering::SeqCst) {
            bail!("class_sessions insert rejected");
        }
        let mut state = self.state.lock();
        let key = SessionKey {
            student_id: input.student_id,
            date: input.date,
            title: input.title.clone(),
        };
        if state.sessions.iter().any(|s| s.matches(&key)) {
            bail!("duplicate key value violates unique constraint on class_sessions");
        }
        let session = SessionRecord {
            id: Uuid::new_v4(),
            student_id: input.student_id,
            title: input.title,
            date: input.date,
            created_by: input.created_by,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        self.state.lock().sessions.retain(|s| s.id != id);
        Ok(())
    }

    async fn find_material(&self, session_id: Uuid, title: &str) -> Result<Option<MaterialRecord>> {
        Ok(self
            .state
            .lock()
            .materials
            .iter()
            .find(|m| m.session_id == session_id && m.title == title)
            .cloned())
    }

    async fn find_shared_material(
        &self,
        title: &str,
        kind: MaterialKind,
        url_prefix: &str,
    ) -> Result<Option<MaterialRecord>> {
        Ok(self
            .state
            .lock()
            .materials
            .iter()
            .find(|m| m.title == title && m.kind == kind && m.content_url.starts_with(url_prefix))
            .cloned())
    }

    async fn count_materials(&self, session_id: Uuid) -> Result<u64> {
        Ok(self
            .state
            .lock()
            .materials
            .iter()
            .filter(|m| m.session_id == session_id)
            .count() as u64)
    }

    async fn create_material(&self, input: CreateMaterial) -> Result<MaterialRecord> {
        if self.fail_material_inserts.load(Ordering::SeqCst) {
            bail!("materials insert rejected");
        }
        let mut state = self.state.lock();
        if state
            .materials
            .iter()
            .any(|m| m.session_id == input.session_id && m.title == input.title)
        {
            bail!("duplicate key value violates unique constraint on materials");
        }
        let material = MaterialRecord {
            id: Uuid::new_v4(),
            session_id: input.session_id,
            kind: input.kind,
            content_url: input.content_url,
            title: input.title,
            order_index: input.order_index,
        };
        state.materials.push(material.clone());
        Ok(material)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[tokio::test]
    async fn test_session_key_is_unique() {
        let store = MemoryStore::new();
        let student = store.add_student("Jiwoo");
        let input = CreateSession {
            student_id: student,
            title: "Jiwoo".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            created_by: student,
        };

        store.create_session(input.clone()).await.unwrap();
        assert!(store.create_session(input).await.is_err());
        assert_eq!(store.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_groups_for_student() {
        let store = MemoryStore::new();
        let jiwoo = store.add_student("Jiwoo");
        let minji = store.add_student("Minji");
        store.add_group("Math A", None, &[jiwoo, minji]);
        store.add_group("Science", None, &[minji]);

        let groups = store.groups_for_student(jiwoo).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Math A");
        assert_eq!(store.groups_for_student(minji).await.unwrap().len(), 2);
    }
}
