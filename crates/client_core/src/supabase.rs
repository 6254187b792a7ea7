//! REST client for a Supabase project: PostgREST for rows, the storage API for
//! artifacts.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use shared::{
    domain::Record,
    error::{ApiException, ErrorCode},
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    error::StoreError,
    store::{ArtifactStore, LocalFile, RecordStore},
};

pub const DEFAULT_BUCKET: &str = "documents";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    /// Session token of the signed-in admin; requests fall back to the anon
    /// key when absent.
    pub access_token: Option<String>,
    pub bucket: String,
    pub timeout: Duration,
}

impl SupabaseConfig {
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            access_token: None,
            bucket: DEFAULT_BUCKET.to_string(),
            timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone)]
pub struct SupabaseClient {
    http: Client,
    base: Url,
    anon_key: String,
    access_token: Option<String>,
    bucket: String,
}

/// Union of the PostgREST (`code`/`message`/`details`/`hint`) and storage
/// (`statusCode`/`error`/`message`) error shapes.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
    msg: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let mut base = Url::parse(config.url.trim()).map_err(|err| StoreError::InvalidBaseUrl {
            url: config.url.clone(),
            reason: err.to_string(),
        })?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidBaseUrl {
                url: config.url,
                reason: "not a base url".to_string(),
            }
            .into());
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let bucket = config.bucket.trim().to_string();
        if bucket.is_empty() {
            return Err(StoreError::MissingBucket.into());
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            http,
            base,
            anon_key: config.anon_key,
            access_token: config.access_token.filter(|token| !token.is_empty()),
            bucket,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn set_access_token(&mut self, token: Option<String>) {
        self.access_token = token.filter(|token| !token.is_empty());
    }

    /// Publicly readable URL of an object in the configured bucket.
    pub fn public_url(&self, key: &str) -> Result<String> {
        Ok(self
            .endpoint(&format!(
                "storage/v1/object/public/{}/{}",
                self.bucket,
                key.trim_start_matches('/')
            ))?
            .to_string())
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("invalid endpoint path '{path}'"))
    }

    fn table_url(&self, table: &str) -> Result<Url> {
        self.endpoint(&format!("rest/v1/{table}"))
    }

    fn object_url(&self, key: &str) -> Result<Url> {
        self.endpoint(&format!(
            "storage/v1/object/{}/{}",
            self.bucket,
            key.trim_start_matches('/')
        ))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self.authorize(request).send().await?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(anyhow::Error::new(error_from_response(response).await))
    }
}

async fn error_from_response(response: Response) -> ApiException {
    let status = response.status();
    let url = response.url().clone();
    let body = response.text().await.unwrap_or_default();
    let exception = api_exception(status, &body);
    warn!(
        status = status.as_u16(),
        path = url.path(),
        error = %exception.message,
        "supabase: request failed"
    );
    exception
}

/// Maps a failed response to the message a user should see.
fn api_exception(status: StatusCode, body: &str) -> ApiException {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    if let Some(details) = parsed.details.as_deref().or(parsed.hint.as_deref()) {
        debug!(status = status.as_u16(), details, "supabase: error details");
    }
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error)
        .filter(|message| !message.trim().is_empty())
        .unwrap_or_else(|| match status.canonical_reason() {
            Some(reason) => format!("request failed with status {} {reason}", status.as_u16()),
            None => format!("request failed with status {}", status.as_u16()),
        });
    ApiException::new(ErrorCode::from_status(status.as_u16()), message)
}

#[async_trait]
impl<R: Record> RecordStore<R> for SupabaseClient {
    async fn list(&self) -> Result<Vec<R>> {
        let request = self
            .http
            .get(self.table_url(R::TABLE)?)
            .query(&[("select", "*"), ("order", "created_at.desc")]);
        let rows: Vec<R> = self
            .send(request)
            .await?
            .json()
            .await
            .with_context(|| format!("{}: malformed list response", R::TABLE))?;
        debug!(table = R::TABLE, rows = rows.len(), "supabase: listed rows");
        Ok(rows)
    }

    async fn create(&self, draft: R::Draft) -> Result<R> {
        let request = self
            .http
            .post(self.table_url(R::TABLE)?)
            .header("Prefer", "return=representation")
            .json(&draft);
        let rows: Vec<R> = self
            .send(request)
            .await?
            .json()
            .await
            .with_context(|| format!("{}: malformed create response", R::TABLE))?;
        let record = rows
            .into_iter()
            .next()
            .ok_or(StoreError::EmptyRepresentation { table: R::TABLE })?;
        debug!(table = R::TABLE, id = %record.id(), "supabase: row created");
        Ok(record)
    }

    async fn delete(&self, id: R::Id) -> Result<()> {
        let filter = format!("eq.{id}");
        let request = self
            .http
            .delete(self.table_url(R::TABLE)?)
            .query(&[("id", filter.as_str())])
            .header("Prefer", "return=representation");
        let response = self.send(request).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let removed: Vec<serde_json::Value> = response
            .json()
            .await
            .with_context(|| format!("{}: malformed delete response", R::TABLE))?;
        if removed.is_empty() {
            // Row-level security hides rows instead of rejecting the delete.
            return Err(anyhow::Error::new(ApiException::not_found(format!(
                "no row with id {id} in {}",
                R::TABLE
            ))));
        }
        debug!(table = R::TABLE, %id, "supabase: row deleted");
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for SupabaseClient {
    async fn upload(&self, key: &str, file: &LocalFile) -> Result<String> {
        let request = self
            .http
            .post(self.object_url(key)?)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, &file.mime_type)
            .body(file.bytes.clone());
        self.send(request).await?;
        debug!(
            bucket = %self.bucket,
            key,
            size_bytes = file.bytes.len(),
            "supabase: object uploaded"
        );
        self.public_url(key)
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let request = self.http.delete(self.object_url(key)?);
        self.send(request).await?;
        debug!(bucket = %self.bucket, key, "supabase: object removed");
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/supabase_tests.rs"]
mod tests;
