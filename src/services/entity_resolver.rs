//! Entity resolution: filename name tokens to people, students to groups
//!
//! Filenames carry a free-text person name (`03_Jiwoo_math.png`). The token is
//! matched against the people directory with ordered named rules; students
//! come before teachers. Group memberships then decide the canonical session
//! title.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{GroupRecord, PersonKind, PersonRecord, SharedStore};
use crate::services::dedup_cache::TtlCache;
use crate::services::text_utils::{
    closest_name, contains_word_sequence, normalize_group_name, normalize_name,
};

static ORDER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)[\s._\-]*").expect("valid regex"));

/// Minimum similarity for the "did you mean" hint on a failed lookup
const HINT_THRESHOLD: f64 = 0.8;

/// The name-carrying part of a filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameToken {
    /// Leading digit run, 0 when absent
    pub order_index: i32,
    /// Token as written, prefix and extension removed
    pub raw: String,
    /// Token after [normalize_name]
    pub normalized: String,
}

/// Split `03_Jiwoo_math.png` into order index 3 and token `Jiwoo_math`
pub fn parse_name_token(filename: &str) -> NameToken {
    let stem = match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.contains(char::is_whitespace) => stem,
        _ => filename,
    };

    let (order_index, rest) = match ORDER_PREFIX.captures(stem) {
        Some(caps) => {
            let digits = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let end = caps.get(0).map(|m| m.end()).unwrap_or(0);
            (digits.parse().unwrap_or(0), &stem[end..])
        }
        None => (0, stem),
    };

    let raw = rest
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, '_' | '-' | '.'))
        .to_string();

    NameToken {
        order_index,
        normalized: normalize_name(&raw),
        raw,
    }
}

/// A named test of a normalized token against a normalized display name
pub struct NameRule {
    pub name: &'static str,
    pub matches: fn(token: &str, display_name: &str) -> bool,
}

fn name_contains_token(token: &str, display_name: &str) -> bool {
    display_name.contains(token)
}

fn token_contains_name(token: &str, display_name: &str) -> bool {
    contains_word_sequence(token, display_name)
}

/// Tried in order against students, then against teachers
pub const NAME_RULES: &[NameRule] = &[
    NameRule { name: "name-contains-token", matches: name_contains_token },
    NameRule { name: "token-contains-name", matches: token_contains_name },
];

/// Outcome of resolving a name token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Student(PersonRecord),
    Teacher(PersonRecord),
    /// Nobody matched; `hint` is the closest display name, if any was close
    Unresolved { hint: Option<String> },
}

/// Session title after group precedence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleResolution {
    pub title: String,
    pub group: Option<GroupRecord>,
    pub group_teacher: Option<PersonRecord>,
}

/// Resolves name tokens and group titles against the people directory
pub struct EntityResolver {
    store: SharedStore,
    directory: TtlCache<PersonKind, Arc<Vec<PersonRecord>>>,
}

impl EntityResolver {
    pub fn new(store: SharedStore, directory_ttl: Duration) -> Self {
        Self {
            store,
            directory: TtlCache::new(directory_ttl),
        }
    }

    async fn people(&self, kind: PersonKind) -> Result<Arc<Vec<PersonRecord>>> {
        if let Some(people) = self.directory.get(&kind) {
            return Ok(people);
        }
        let people = Arc::new(self.store.list_people(kind).await?);
        debug!(kind = %kind, count = people.len(), "Loaded people directory");
        self.directory.insert(kind, people.clone());
        Ok(people)
    }

    /// First person of `kind` matching `normalized_token` by the name rules
    async fn match_kind(
        &self,
        kind: PersonKind,
        normalized_token: &str,
    ) -> Result<Option<PersonRecord>> {
        if normalized_token.is_empty() {
            return Ok(None);
        }
        let people = self.people(kind).await?;

        for rule in NAME_RULES {
            let mut candidates = people
                .iter()
                .filter(|p| (rule.matches)(normalized_token, &normalize_name(&p.display_name)));

            if let Some(first) = candidates.next() {
                let others: Vec<&str> = candidates.map(|p| p.display_name.as_str()).collect();
                if !others.is_empty() {
                    warn!(
                        token = %normalized_token,
                        kind = %kind,
                        rule = rule.name,
                        chosen = %first.display_name,
                        others = ?others,
                        "Ambiguous name token, using first match"
                    );
                }
                debug!(
                    token = %normalized_token,
                    kind = %kind,
                    rule = rule.name,
                    person = %first.display_name,
                    "Resolved name token"
                );
                return Ok(Some(first.clone()));
            }
        }

        Ok(None)
    }

    /// Resolve a filename token to a student, else a teacher
    pub async fn resolve_token(&self, token: &NameToken) -> Result<Resolution> {
        if let Some(student) = self.match_kind(PersonKind::Student, &token.normalized).await? {
            return Ok(Resolution::Student(student));
        }
        if let Some(teacher) = self.match_kind(PersonKind::Teacher, &token.normalized).await? {
            return Ok(Resolution::Teacher(teacher));
        }

        let students = self.people(PersonKind::Student).await?;
        let teachers = self.people(PersonKind::Teacher).await?;
        let hint = closest_name(
            &token.raw,
            students
                .iter()
                .chain(teachers.iter())
                .map(|p| p.display_name.as_str()),
            HINT_THRESHOLD,
        )
        .map(str::to_string);

        Ok(Resolution::Unresolved { hint })
    }

    /// Student named by the entity folder, for content whose filename names
    /// a teacher or nobody
    pub async fn resolve_folder_student(&self, entity_folder: &str) -> Result<Option<PersonRecord>> {
        self.match_kind(PersonKind::Student, &normalize_name(entity_folder))
            .await
    }

    /// Canonical session title for a student and a topic folder.
    ///
    /// A group the student belongs to whose normalized name equals, or is a
    /// prefix of / prefixed by, the normalized topic wins over the raw folder
    /// name. Exact matches are preferred over prefix matches.
    pub async fn resolve_title(
        &self,
        student_id: Uuid,
        topic_candidate: &str,
    ) -> Result<TitleResolution> {
        let topic = normalize_group_name(topic_candidate);
        let mut resolution = TitleResolution {
            title: topic_candidate.trim().to_string(),
            group: None,
            group_teacher: None,
        };
        if topic.is_empty() {
            return Ok(resolution);
        }

        let groups = self.store.groups_for_student(student_id).await?;
        let matched = groups
            .iter()
            .find(|g| normalize_group_name(&g.name) == topic)
            .or_else(|| {
                groups.iter().find(|g| {
                    let name = normalize_group_name(&g.name);
                    !name.is_empty() && (name.starts_with(&topic) || topic.starts_with(&name))
                })
            });

        let Some(group) = matched else {
            return Ok(resolution);
        };

        debug!(
            topic = %topic_candidate,
            group = %group.name,
            "Topic folder matched group, using canonical name"
        );
        resolution.title = group.name.clone();
        if let Some(teacher_id) = group.teacher_id {
            resolution.group_teacher = self.teacher_by_id(teacher_id).await?;
        }
        resolution.group = Some(group.clone());
        Ok(resolution)
    }

    async fn teacher_by_id(&self, id: Uuid) -> Result<Option<PersonRecord>> {
        let teachers = self.people(PersonKind::Teacher).await?;
        if let Some(teacher) = teachers.iter().find(|t| t.id == id) {
            return Ok(Some(teacher.clone()));
        }
        self.store.get_person(id).await
    }
}
