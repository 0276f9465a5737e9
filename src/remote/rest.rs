//! PostgREST-style HTTP client.
//!
//! Talks to `<url>/rest/v1/<table>` with the service key sent both as the
//! `apikey` header and as a bearer token. Writes use the `Prefer` header to
//! choose between "return the inserted rows", "return nothing" and
//! "merge duplicates on conflict".
//!
//! # Retry Strategy
//!
//! - HTTP 408, 409, 425, 429 and 500/502/503/504 → retry
//! - Timeouts and connection failures → retry
//! - Any other 4xx → fail immediately
//! - Backoff: `min(cap, attempt × step)`, by default 1.5s, 3s, then capped at 5s

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::{RemoteStore, Table, SECTION_CONFLICT_COLUMNS};
use crate::config::{Credentials, RemoteConfig};
use crate::error::RemoteError;
use crate::models::{ArtistRow, NewArtist, SectionRow, SongPayload, SongRow};

/// Filter value that matches every real row in a `neq` delete.
const NIL_UUID: &str = "00000000-0000-0000-0000-000000000000";

/// Raw outcome of a successful request.
struct RestResponse {
    url: String,
    body: String,
    is_json: bool,
    content_range: Option<String>,
}

impl RestResponse {
    fn json<T: DeserializeOwned>(&self) -> Result<T, RemoteError> {
        if !self.is_json || self.body.trim().is_empty() {
            return Err(RemoteError::UnexpectedResponse(format!(
                "expected a JSON body from {}",
                self.url
            )));
        }
        serde_json::from_str(&self.body).map_err(|e| RemoteError::Decode {
            url: self.url.clone(),
            message: e.to_string(),
        })
    }
}

/// HTTP implementation of [`RemoteStore`].
pub struct RestClient {
    base: String,
    client: reqwest::Client,
    max_attempts: u32,
    backoff_step: Duration,
    backoff_cap: Duration,
}

impl RestClient {
    /// Build a client from credentials and the `[remote]` settings.
    pub fn new(credentials: &Credentials, config: &RemoteConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut api_key = HeaderValue::from_str(&credentials.service_key)?;
        api_key.set_sensitive(true);
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credentials.service_key))?;
        bearer.set_sensitive(true);
        headers.insert("apikey", api_key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            base: format!("{}/rest/v1", credentials.url.trim_end_matches('/')),
            client,
            max_attempts: config.max_attempts.max(1),
            backoff_step: Duration::from_millis(1500),
            backoff_cap: Duration::from_secs(5),
        })
    }

    /// Override the backoff schedule.
    pub fn with_backoff(mut self, step: Duration, cap: Duration) -> Self {
        self.backoff_step = step;
        self.backoff_cap = cap;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        (self.backoff_step * attempt).min(self.backoff_cap)
    }

    async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        table: Table,
        query: &[(&str, String)],
        body: Option<&B>,
        prefer: Option<&str>,
    ) -> Result<RestResponse, RemoteError> {
        let url = format!("{}/{}", self.base, table.as_str());
        let payload = match body {
            Some(b) => Some(serde_json::to_vec(b).map_err(|e| RemoteError::Decode {
                url: url.clone(),
                message: format!("failed to encode request body: {}", e),
            })?),
            None => None,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut req = self.client.request(method.clone(), &url).query(query);
            if let Some(p) = prefer {
                req = req.header("Prefer", p);
            }
            if let Some(bytes) = &payload {
                req = req.body(bytes.clone());
            }

            let err = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let is_json = resp
                        .headers()
                        .get(CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .map(|v| v.contains("application/json"))
                        .unwrap_or(false);
                    let content_range = resp
                        .headers()
                        .get(CONTENT_RANGE)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    match resp.text().await {
                        Ok(text) if status.is_success() => {
                            debug!(%method, %url, status = status.as_u16(), "remote request ok");
                            return Ok(RestResponse {
                                url,
                                body: text,
                                is_json,
                                content_range,
                            });
                        }
                        Ok(text) => RemoteError::Status {
                            method: method.to_string(),
                            url: url.clone(),
                            status: status.as_u16(),
                            body: text.chars().take(500).collect(),
                        },
                        // Body cut off mid-read.
                        Err(source) => RemoteError::Transport {
                            method: method.to_string(),
                            url: url.clone(),
                            source,
                        },
                    }
                }
                Err(source) => RemoteError::Transport {
                    method: method.to_string(),
                    url: url.clone(),
                    source,
                },
            };

            if !err.is_transient() || attempt >= self.max_attempts {
                return Err(err);
            }
            let delay = self.backoff(attempt);
            warn!(%method, %url, attempt, ?delay, error = %err, "transient remote failure, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn fetch_page<T: DeserializeOwned>(
        &self,
        table: Table,
        select: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<T>, RemoteError> {
        let query = [
            ("select", select.to_string()),
            ("order", "created_at.asc".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];
        let resp = self
            .request::<()>(Method::GET, table, &query, None, None)
            .await?;
        if resp.body.trim().is_empty() {
            return Ok(Vec::new());
        }
        resp.json()
    }
}

/// Parse the total out of a `Content-Range` header (`0-24/3573`, `*/0`).
fn parse_total(content_range: &str) -> Option<u64> {
    content_range.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl RemoteStore for RestClient {
    async fn fetch_artists(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArtistRow>, RemoteError> {
        self.fetch_page(Table::Artists, "id,name_search", offset, limit)
            .await
    }

    async fn fetch_songs(&self, offset: usize, limit: usize) -> Result<Vec<SongRow>, RemoteError> {
        self.fetch_page(Table::Songs, "id,artist_id,title_search", offset, limit)
            .await
    }

    async fn insert_artists(&self, rows: &[NewArtist]) -> Result<Vec<ArtistRow>, RemoteError> {
        self.request(
            Method::POST,
            Table::Artists,
            &[],
            Some(rows),
            Some("return=representation"),
        )
        .await?
        .json()
    }

    async fn insert_songs(&self, rows: &[SongPayload]) -> Result<Vec<SongRow>, RemoteError> {
        self.request(
            Method::POST,
            Table::Songs,
            &[],
            Some(rows),
            Some("return=representation"),
        )
        .await?
        .json()
    }

    async fn patch_row(
        &self,
        table: Table,
        id: &str,
        payload: &Map<String, Value>,
    ) -> Result<(), RemoteError> {
        self.request(
            Method::PATCH,
            table,
            &[("id", format!("eq.{}", id))],
            Some(payload),
            Some("return=minimal"),
        )
        .await?;
        Ok(())
    }

    async fn upsert_sections(&self, rows: &[SectionRow]) -> Result<(), RemoteError> {
        self.request(
            Method::POST,
            Table::SongSections,
            &[("on_conflict", SECTION_CONFLICT_COLUMNS.to_string())],
            Some(rows),
            Some("resolution=merge-duplicates,return=minimal"),
        )
        .await?;
        Ok(())
    }

    async fn count_rows(&self, table: Table) -> Result<u64, RemoteError> {
        let resp = self
            .request::<()>(
                Method::GET,
                table,
                &[("select", "*".to_string()), ("limit", "1".to_string())],
                None,
                Some("count=exact"),
            )
            .await?;
        resp.content_range
            .as_deref()
            .and_then(parse_total)
            .ok_or_else(|| {
                RemoteError::UnexpectedResponse(format!(
                    "missing Content-Range count for {}",
                    table.as_str()
                ))
            })
    }

    async fn delete_all(&self, table: Table) -> Result<(), RemoteError> {
        self.request::<()>(
            Method::DELETE,
            table,
            &[("id", format!("neq.{}", NIL_UUID))],
            None,
            Some("return=minimal"),
        )
        .await?;
        Ok(())
    }
}
