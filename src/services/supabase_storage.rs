//! Supabase Storage client for lesson materials

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::services::content_store::{BlobStore, PutOutcome};

/// Supabase Storage client bound to one bucket
#[derive(Clone)]
pub struct StorageClient {
    base_url: String,
    service_key: String,
    bucket: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct CreateBucketRequest {
    id: String,
    name: String,
    public: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_mime_types: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct BucketInfo {
    id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct ListRequest<'a> {
    prefix: &'a str,
    search: &'a str,
    limit: u32,
}

#[derive(Debug, Deserialize)]
struct ListedObject {
    name: String,
}

/// Split `a/b/c.png` into (`a/b`, `c.png`)
fn split_key(key: &str) -> (&str, &str) {
    match key.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => ("", key),
    }
}

/// Percent-encode each segment of an object key for use in a URL path
fn object_path(key: &str) -> String {
    key.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_duplicate(status: StatusCode, body: &str) -> bool {
    status == StatusCode::CONFLICT || body.contains("Duplicate") || body.contains("already exists")
}

impl StorageClient {
    pub fn new(base_url: String, service_key: String, bucket: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            bucket,
            client: Client::new(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the bucket if it doesn't already exist
    pub async fn ensure_bucket(&self, public: bool) -> Result<()> {
        let bucket_url = format!("{}/storage/v1/bucket", self.base_url);

        let resp = self
            .client
            .get(&bucket_url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .send()
            .await
            .context("Failed to list buckets")?;

        if resp.status().is_success() {
            let buckets: Vec<BucketInfo> = resp.json().await.unwrap_or_default();
            if buckets
                .iter()
                .any(|b| b.id == self.bucket || b.name == self.bucket)
            {
                debug!(bucket = %self.bucket, "Bucket already exists");
                return Ok(());
            }
        }

        info!(bucket = %self.bucket, public = %public, "Creating storage bucket");

        let request = CreateBucketRequest {
            id: self.bucket.clone(),
            name: self.bucket.clone(),
            public,
            file_size_limit: Some(500 * 1024 * 1024), // lesson videos
            allowed_mime_types: Some(
                ["image/*", "video/*"].iter().map(|s| s.to_string()).collect(),
            ),
        };

        let resp = self
            .client
            .post(&bucket_url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .json(&request)
            .send()
            .await
            .context("Failed to create bucket")?;

        let status = resp.status();
        if status.is_success() {
            info!(bucket = %self.bucket, "Bucket created successfully");
            return Ok(());
        }

        let body = resp.text().await.unwrap_or_default();
        if is_duplicate(status, &body) {
            debug!(bucket = %self.bucket, "Bucket already exists (race condition)");
            Ok(())
        } else {
            warn!(bucket = %self.bucket, status = %status, body = %body, "Failed to create bucket");
            anyhow::bail!("Failed to create bucket: {} - {}", status, body)
        }
    }
}

#[async_trait]
impl BlobStore for StorageClient {
    async fn exists(&self, key: &str) -> Result<bool> {
        let (prefix, name) = split_key(key);
        let url = format!("{}/storage/v1/object/list/{}", self.base_url, self.bucket);

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .json(&ListRequest {
                prefix,
                search: name,
                limit: 100,
            })
            .send()
            .await
            .context("Failed to list storage objects")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Failed to list objects under {}: {} - {}", prefix, status, body);
        }

        let objects: Vec<ListedObject> = resp
            .json()
            .await
            .context("Failed to decode storage listing")?;
        Ok(objects.iter().any(|o| o.name == name))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<PutOutcome> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            object_path(key)
        );

        debug!(url = %url, size = bytes.len(), content_type = %content_type, "Uploading to Supabase Storage");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("apikey", &self.service_key)
            .header("Content-Type", content_type)
            .body(bytes)
            .send()
            .await
            .context("Failed to send upload request")?;

        let status = resp.status();
        if status.is_success() {
            debug!(key = %key, "Upload successful");
            return Ok(PutOutcome::Written);
        }

        let body = resp.text().await.unwrap_or_default();
        if is_duplicate(status, &body) {
            debug!(key = %key, "Object already exists");
            return Ok(PutOutcome::AlreadyPresent);
        }

        warn!(
            status = %status,
            body = %body,
            bucket = %self.bucket,
            key = %key,
            "Failed to upload to Supabase Storage"
        );
        anyhow::bail!("Failed to upload file: {} - {}", status, body)
    }

    fn public_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            self.bucket,
            object_path(key)
        )
    }
}
