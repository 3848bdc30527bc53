//! PostgREST-backed record store
//!
//! Talks to `{base_url}/rest/v1/{table}` with the service role key. Reads use
//! PostgREST filter syntax (`column=eq.value`), inserts ask for
//! `return=representation` so the created row comes back, and counts use
//! `Prefer: count=exact` and read the total from `Content-Range`.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use super::{
    CreateMaterial, CreateSession, GroupRecord, MaterialKind, MaterialRecord, PersonKind,
    PersonRecord, RecordStore, SessionKey, SessionRecord,
};
use crate::services::rate_limiter::{
    RateLimitConfig, RateLimitedClient, RetryConfig, Retryable, is_transient_status,
    retry_transient,
};

const PROFILES: &str = "profiles";
const GROUP_MEMBERS: &str = "group_members";
const CLASS_SESSIONS: &str = "class_sessions";
const MATERIALS: &str = "materials";

const PERSON_COLUMNS: &str = "id,display_name,role";
const SESSION_COLUMNS: &str = "id,student_id,title,date,created_by";
const MATERIAL_COLUMNS: &str = "id,session_id,kind,content_url,title,order_index";

/// Errors from the REST endpoints
#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("request to {table} failed: {source}")]
    Transport {
        table: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{table} returned {status}: {body}")]
    Status {
        table: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("could not decode {table} response: {source}")]
    Decode {
        table: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{table} insert returned no row")]
    EmptyInsert { table: &'static str },
}

impl Retryable for RestError {
    fn is_transient(&self) -> bool {
        match self {
            RestError::Transport { source, .. } => source.is_timeout() || source.is_connect(),
            RestError::Status { status, .. } => is_transient_status(status.as_u16()),
            RestError::Decode { .. } | RestError::EmptyInsert { .. } => false,
        }
    }
}

/// Connection settings for [RestStore]
#[derive(Debug, Clone)]
pub struct RestStoreConfig {
    pub base_url: String,
    pub service_key: String,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryConfig,
}

type Filters = Vec<(&'static str, String)>;

/// Record store over the managed backend's REST interface
pub struct RestStore {
    base_url: String,
    service_key: String,
    client: RateLimitedClient,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct IdRow {
    id: Uuid,
}

#[derive(Debug, Deserialize)]
struct MembershipRow {
    groups: Option<GroupRecord>,
}

impl RestStore {
    pub fn new(config: RestStoreConfig) -> Result<Self> {
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key,
            client: RateLimitedClient::new("record-store", config.rate_limit)?,
            retry: config.retry,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .acquire()
            .await
            .request(method, self.table_url(table))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(
        table: &'static str,
        request: RequestBuilder,
    ) -> Result<reqwest::Response, RestError> {
        let resp = request
            .send()
            .await
            .map_err(|source| RestError::Transport { table, source })?;

        let status = resp.status();
        if status.is_success() {
            Ok(resp)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(RestError::Status { table, status, body })
        }
    }

    async fn try_select<T: DeserializeOwned>(
        &self,
        table: &'static str,
        filters: &Filters,
    ) -> Result<Vec<T>, RestError> {
        debug!(table = table, filters = ?filters, "Selecting rows");
        let request = self.request(Method::GET, table).await.query(filters);
        Self::send(table, request)
            .await?
            .json()
            .await
            .map_err(|source| RestError::Decode { table, source })
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &'static str,
        filters: Filters,
    ) -> Result<Vec<T>, RestError> {
        retry_transient(|| self.try_select(table, &filters), &self.retry, table).await
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &'static str,
        mut filters: Filters,
    ) -> Result<Option<T>, RestError> {
        filters.push(("limit", "1".to_string()));
        Ok(self.select(table, filters).await?.into_iter().next())
    }

    async fn try_insert<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        table: &'static str,
        body: &B,
    ) -> Result<T, RestError> {
        let request = self
            .request(Method::POST, table)
            .await
            .header("Prefer", "return=representation")
            .json(body);
        let rows: Vec<T> = Self::send(table, request)
            .await?
            .json()
            .await
            .map_err(|source| RestError::Decode { table, source })?;
        rows.into_iter()
            .next()
            .ok_or(RestError::EmptyInsert { table })
    }

    async fn try_delete(&self, table: &'static str, filters: &Filters) -> Result<(), RestError> {
        let request = self.request(Method::DELETE, table).await.query(filters);
        Self::send(table, request).await.map(|_| ())
    }

    async fn try_count(&self, table: &'static str, filters: &Filters) -> Result<u64, RestError> {
        let request = self
            .request(Method::HEAD, table)
            .await
            .header("Prefer", "count=exact")
            .query(filters);
        let resp = Self::send(table, request).await?;
        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .unwrap_or(0);
        Ok(total)
    }
}

/// Total from a PostgREST `Content-Range` header (`0-4/5`, `*/0`)
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/').and_then(|(_, total)| total.trim().parse().ok())
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl RecordStore for RestStore {
    async fn list_people(&self, kind: PersonKind) -> Result<Vec<PersonRecord>> {
        let people = self
            .select(
                PROFILES,
                vec![
                    ("select", PERSON_COLUMNS.to_string()),
                    ("role", eq(kind.as_str())),
                    ("order", "display_name.asc".to_string()),
                ],
            )
            .await?;
        Ok(people)
    }

    async fn get_person(&self, id: Uuid) -> Result<Option<PersonRecord>> {
        let person = self
            .select_one(
                PROFILES,
                vec![("select", PERSON_COLUMNS.to_string()), ("id", eq(id))],
            )
            .await?;
        Ok(person)
    }

    async fn groups_for_student(&self, student_id: Uuid) -> Result<Vec<GroupRecord>> {
        let rows: Vec<MembershipRow> = self
            .select(
                GROUP_MEMBERS,
                vec![
                    ("select", "groups(id,name,teacher_id)".to_string()),
                    ("student_id", eq(student_id)),
                ],
            )
            .await?;
        Ok(rows.into_iter().filter_map(|row| row.groups).collect())
    }

    async fn first_admin(&self) -> Result<Option<Uuid>> {
        let row: Option<IdRow> = self
            .select_one(
                PROFILES,
                vec![("select", "id".to_string()), ("role", eq("admin"))],
            )
            .await?;
        Ok(row.map(|r| r.id))
    }

    async fn find_session(&self, key: &SessionKey) -> Result<Option<SessionRecord>> {
        let session = self
            .select_one(
                CLASS_SESSIONS,
                vec![
                    ("select", SESSION_COLUMNS.to_string()),
                    ("student_id", eq(key.student_id)),
                    ("date", eq(key.date)),
                    ("title", eq(&key.title)),
                ],
            )
            .await?;
        Ok(session)
    }

    async fn create_session(&self, input: CreateSession) -> Result<SessionRecord> {
        // Inserts are not retried: a timed-out insert may still have landed
        let session = self.try_insert(CLASS_SESSIONS, &input).await?;
        Ok(session)
    }

    async fn delete_session(&self, id: Uuid) -> Result<()> {
        let filters = vec![("id", eq(id))];
        retry_transient(
            || self.try_delete(CLASS_SESSIONS, &filters),
            &self.retry,
            "delete_session",
        )
        .await?;
        Ok(())
    }

    async fn find_material(&self, session_id: Uuid, title: &str) -> Result<Option<MaterialRecord>> {
        let material = self
            .select_one(
                MATERIALS,
                vec![
                    ("select", MATERIAL_COLUMNS.to_string()),
                    ("session_id", eq(session_id)),
                    ("title", eq(title)),
                ],
            )
            .await?;
        Ok(material)
    }

    async fn find_shared_material(
        &self,
        title: &str,
        kind: MaterialKind,
        url_prefix: &str,
    ) -> Result<Option<MaterialRecord>> {
        let material = self
            .select_one(
                MATERIALS,
                vec![
                    ("select", MATERIAL_COLUMNS.to_string()),
                    ("title", eq(title)),
                    ("kind", eq(kind.as_str())),
                    ("content_url", format!("like.{}*", url_prefix)),
                ],
            )
            .await?;
        Ok(material)
    }

    async fn count_materials(&self, session_id: Uuid) -> Result<u64> {
        let filters = vec![("select", "id".to_string()), ("session_id", eq(session_id))];
        let count = retry_transient(
            || self.try_count(MATERIALS, &filters),
            &self.retry,
            "count_materials",
        )
        .await?;
        Ok(count)
    }

    async fn create_material(&self, input: CreateMaterial) -> Result<MaterialRecord> {
        let material = self.try_insert(MATERIALS, &input).await?;
        Ok(material)
    }
}
