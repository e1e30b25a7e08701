//! Hosted backend for Linkshelf.
//!
//! Speaks the PostgREST dialect of the hosted service over `reqwest`:
//! ranged reads use `Range` + `Prefer: count=exact` and read the total from
//! `Content-Range`; identity comes from `/auth/v1/user`. Realtime is served by
//! polling a change fingerprint of the owner's rows.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::services::data_service::{
    ChangeEvent, ChangeFilter, ChangeKind, DataServiceClient, MutationGateway, Subscription,
};
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::{DataServiceError, MutationError};
use crate::types::page::{RangedQuery, RangedRows};
use crate::types::session::{SessionContext, UserIdentity};
use crate::types::settings::HostedSettings;

const SUBSCRIPTION_CAPACITY: usize = 8;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 120,
        }
    }
}

/// Error body returned by the hosted REST layer.
#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

/// Cheap summary of an owner's rows; a change in it means the table changed.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ChangeFingerprint {
    total: usize,
    newest: Option<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct FingerprintRow {
    id: String,
    created_at: String,
}

/// REST client for the hosted data service and mutation endpoints.
#[derive(Clone)]
pub struct RestBackend {
    base_url: Url,
    anon_key: String,
    client: Client,
    poll_interval: Duration,
    retry: RetryPolicy,
}

impl RestBackend {
    pub fn new(settings: &HostedSettings) -> Result<Self, DataServiceError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| DataServiceError::Decode(format!("invalid service url: {}", e)))?;
        if settings.anon_key.is_empty() {
            return Err(DataServiceError::Unauthenticated("anon key is not configured".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| DataServiceError::Network(e.to_string()))?;
        Ok(Self {
            base_url,
            anon_key: settings.anon_key.clone(),
            client,
            poll_interval: Duration::from_millis(settings.realtime_poll_ms.max(100)),
            retry: RetryPolicy::default(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, DataServiceError> {
        self.base_url
            .join(path)
            .map_err(|e| DataServiceError::Decode(format!("invalid endpoint {}: {}", path, e)))
    }

    fn table_url(&self, table: &str) -> Result<Url, DataServiceError> {
        self.endpoint(&format!("rest/v1/{}", table))
    }

    /// `apikey` plus the session bearer, falling back to the anon key.
    fn auth_headers(&self, session: &SessionContext) -> Result<HeaderMap, DataServiceError> {
        let mut headers = HeaderMap::new();
        let apikey = HeaderValue::from_str(&self.anon_key)
            .map_err(|e| DataServiceError::Decode(format!("invalid apikey header: {}", e)))?;
        headers.insert("apikey", apikey);
        let bearer = session.bearer().unwrap_or(&self.anon_key);
        let value = HeaderValue::from_str(&format!("Bearer {}", bearer))
            .map_err(|e| DataServiceError::Decode(format!("invalid auth header: {}", e)))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    #[instrument(name = "rest_get_with_retry", skip(self, headers))]
    async fn get_with_retry(
        &self,
        url: &Url,
        headers: HeaderMap,
    ) -> Result<reqwest::Response, DataServiceError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url.clone()).headers(headers.clone()).send().await {
                Ok(resp) if !resp.status().is_server_error() => return Ok(resp),
                Ok(resp) => {
                    if attempt >= self.retry.max_attempts {
                        let status = resp.status().as_u16();
                        return Err(DataServiceError::Status {
                            status,
                            message: read_error_message(resp).await,
                        });
                    }
                }
                Err(e) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(DataServiceError::Network(e.to_string()));
                    }
                }
            }
            tokio::time::sleep(Duration::from_millis(
                self.retry.base_backoff_ms.saturating_mul(attempt as u64),
            ))
            .await;
        }
    }

    async fn fingerprint(&self, session: &SessionContext) -> Result<ChangeFingerprint, DataServiceError> {
        let mut url = self.table_url("bookmarks")?;
        url.query_pairs_mut()
            .append_pair("select", "id,created_at")
            .append_pair("user_id", &format!("eq.{}", session.user_id()))
            .append_pair("order", "created_at.desc")
            .append_pair("limit", "1");
        let mut headers = self.auth_headers(session)?;
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));

        let resp = self.get_with_retry(&url, headers).await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(DataServiceError::Status {
                status: status.as_u16(),
                message: read_error_message(resp).await,
            });
        }
        let total = content_range_total(resp.headers())?;
        let rows: Vec<FingerprintRow> = resp
            .json()
            .await
            .map_err(|e| DataServiceError::Decode(e.to_string()))?;
        Ok(ChangeFingerprint {
            total,
            newest: rows.into_iter().next().map(|r| (r.created_at, r.id)),
        })
    }
}

/// Extracts the exact total from a `Content-Range` header (`0-4/12`, `*/0`).
pub fn parse_content_range_total(value: &str) -> Option<usize> {
    let (_, total) = value.trim().rsplit_once('/')?;
    if total == "*" {
        return None;
    }
    total.parse().ok()
}

fn content_range_total(headers: &HeaderMap) -> Result<usize, DataServiceError> {
    let value = headers
        .get(CONTENT_RANGE)
        .ok_or_else(|| DataServiceError::Decode("missing Content-Range header".to_string()))?
        .to_str()
        .map_err(|e| DataServiceError::Decode(format!("invalid Content-Range header: {}", e)))?;
    parse_content_range_total(value)
        .ok_or_else(|| DataServiceError::Decode(format!("no exact count in Content-Range: {}", value)))
}

/// Decodes a ranged read. A 416 means the offset lies past the end: no rows,
/// with the total still reported in `Content-Range`.
async fn read_ranged_rows(resp: reqwest::Response) -> Result<RangedRows, DataServiceError> {
    let status = resp.status();
    if status == StatusCode::RANGE_NOT_SATISFIABLE {
        let total = content_range_total(resp.headers()).unwrap_or(0);
        return Ok(RangedRows {
            rows: Vec::new(),
            exact_total: total,
        });
    }
    if !status.is_success() {
        return Err(DataServiceError::Status {
            status: status.as_u16(),
            message: read_error_message(resp).await,
        });
    }
    let exact_total = content_range_total(resp.headers())?;
    let rows: Vec<Bookmark> = resp
        .json()
        .await
        .map_err(|e| DataServiceError::Decode(e.to_string()))?;
    Ok(RangedRows { rows, exact_total })
}

async fn read_error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    match resp.json::<ServiceErrorBody>().await {
        Ok(body) => body
            .message
            .or(body.details)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}

async fn read_mutation_error(resp: reqwest::Response) -> MutationError {
    let status = resp.status();
    match resp.json::<ServiceErrorBody>().await {
        Ok(body) => {
            let message = body
                .message
                .or(body.details)
                .unwrap_or_else(|| status.to_string());
            match body.code {
                Some(code) => MutationError::with_code(code, message),
                None => MutationError::new(message),
            }
        }
        Err(_) => MutationError::new(status.to_string()),
    }
}

#[async_trait]
impl DataServiceClient for RestBackend {
    async fn ranged_select(
        &self,
        session: &SessionContext,
        query: &RangedQuery,
    ) -> Result<RangedRows, DataServiceError> {
        let Some(last) = query.range.last_inclusive() else {
            return Ok(RangedRows::default());
        };
        let mut url = self.table_url(&query.table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("user_id", &format!("eq.{}", session.user_id()))
            .append_pair(
                "order",
                &format!("{}.{},id.{}", query.order_by, query.direction.as_rest(), query.direction.as_rest()),
            );

        let mut headers = self.auth_headers(session)?;
        headers.insert("Range-Unit", HeaderValue::from_static("items"));
        let range = HeaderValue::from_str(&format!("{}-{}", query.range.from, last))
            .map_err(|e| DataServiceError::Decode(e.to_string()))?;
        headers.insert(RANGE, range);
        headers.insert("Prefer", HeaderValue::from_static("count=exact"));

        let resp = self.get_with_retry(&url, headers).await?;
        let rows = read_ranged_rows(resp).await?;
        debug!(
            from = query.range.from,
            returned = rows.rows.len(),
            exact_total = rows.exact_total,
            "hosted ranged select"
        );
        Ok(rows)
    }

    async fn current_user(
        &self,
        session: &SessionContext,
    ) -> Result<Option<UserIdentity>, DataServiceError> {
        if session.bearer().is_none() {
            return Ok(None);
        }
        let url = self.endpoint("auth/v1/user")?;
        let resp = self.get_with_retry(&url, self.auth_headers(session)?).await?;
        match resp.status() {
            s if s.is_success() => {
                let user: UserIdentity = resp
                    .json()
                    .await
                    .map_err(|e| DataServiceError::Decode(e.to_string()))?;
                Ok(Some(user))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            s => Err(DataServiceError::Status {
                status: s.as_u16(),
                message: read_error_message(resp).await,
            }),
        }
    }

    async fn subscribe_to_changes(
        &self,
        session: &SessionContext,
        filter: &ChangeFilter,
    ) -> Result<Subscription, DataServiceError> {
        if filter.owner_id != session.user_id() {
            return Err(DataServiceError::Subscription(
                "can only subscribe to the session user's rows".to_string(),
            ));
        }
        let baseline = self.fingerprint(session).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let backend = self.clone();
        let session = session.clone();
        let table = filter.table.clone();

        let producer = tokio::spawn(async move {
            let mut last = baseline;
            let mut ticker = tokio::time::interval(backend.poll_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match backend.fingerprint(&session).await {
                    Ok(current) if current != last => {
                        last = current;
                        let event = ChangeEvent {
                            table: table.clone(),
                            kind: ChangeKind::Unknown,
                            record_id: None,
                        };
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "change poll failed"),
                }
                if tx.is_closed() {
                    break;
                }
            }
        });

        Ok(Subscription::from_receiver(rx, Some(producer)))
    }
}

#[async_trait]
impl MutationGateway for RestBackend {
    async fn insert_bookmark(
        &self,
        session: &SessionContext,
        title: &str,
        url: &str,
    ) -> Result<Bookmark, MutationError> {
        let endpoint = self.table_url("bookmarks")?;
        let mut headers = self.auth_headers(session)?;
        headers.insert("Prefer", HeaderValue::from_static("return=representation"));
        let body = NewBookmark {
            title: title.to_string(),
            url: url.to_string(),
        };

        let resp = self
            .client
            .post(endpoint)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| MutationError::new(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(read_mutation_error(resp).await);
        }
        let mut rows: Vec<Bookmark> = resp
            .json()
            .await
            .map_err(|e| MutationError::new(format!("invalid insert response: {}", e)))?;
        rows.pop()
            .ok_or_else(|| MutationError::new("insert returned no row"))
    }

    async fn delete_bookmark(&self, session: &SessionContext, id: &str) -> Result<(), MutationError> {
        let mut endpoint = self.table_url("bookmarks")?;
        endpoint.query_pairs_mut().append_pair("id", &format!("eq.{}", id));
        let resp = self
            .client
            .delete(endpoint)
            .headers(self.auth_headers(session)?)
            .send()
            .await
            .map_err(|e| MutationError::new(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(read_mutation_error(resp).await);
        }
        Ok(())
    }
}
