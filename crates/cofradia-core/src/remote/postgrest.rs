//! PostgREST-backed remote store (the hosted backend's REST interface).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, RemoteStore};
use crate::error::{Error, Result};
use crate::network::LatencyProbe;
use crate::util::{error_excerpt, is_http_url, non_blank};

/// SQLSTATE codes that mean the request itself is unacceptable.
const REJECTION_CODES: [&str; 8] = [
    "23502", // not_null_violation
    "23503", // foreign_key_violation
    "23505", // unique_violation
    "23514", // check_violation
    "22P02", // invalid_text_representation
    "42501", // insufficient_privilege
    "42P01", // undefined_table
    "PGRST204",
];

/// HTTP client for the `/rest/v1` table endpoints.
#[derive(Clone)]
pub struct PostgrestStore {
    base_url: String,
    api_key: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for PostgrestStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PostgrestStore")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl PostgrestStore {
    /// Builds a client for the backend at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = normalize_base_url(&base_url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            base_url,
            api_key: non_blank(api_key),
            timeout,
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, resource: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, resource.trim_matches('/'))
    }

    fn request(&self, method: Method, resource: &str) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .request(method, self.table_url(resource))
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(api_key) = &self.api_key {
            request = request.header("apikey", api_key).bearer_auth(api_key);
        }
        request
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<Value, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|error| transport_error(&error, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| transport_error(&error, self.timeout))?;

        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        serde_json::from_str(&body).map_err(|error| {
            RemoteError::Unclassified(format!("invalid response body from backend: {error}"))
        })
    }

    async fn record_exists(
        &self,
        resource: &str,
        record_id: &str,
    ) -> std::result::Result<bool, RemoteError> {
        let rows = self
            .send(
                self.request(Method::GET, resource)
                    .query(&[("id", format!("eq.{record_id}")), ("select", "id".to_string())]),
            )
            .await?;
        Ok(!is_empty_rows(&rows))
    }
}

#[async_trait]
impl RemoteStore for PostgrestStore {
    async fn create(
        &self,
        resource: &str,
        payload: &Value,
    ) -> std::result::Result<Value, RemoteError> {
        // Upsert on the primary key, so replaying a create is harmless.
        let rows = self
            .send(
                self.request(Method::POST, resource)
                    .header("Prefer", "return=representation,resolution=merge-duplicates")
                    .json(payload),
            )
            .await?;
        Ok(first_row(rows))
    }

    async fn update(
        &self,
        resource: &str,
        record_id: &str,
        payload: &Value,
        base_version: Option<&str>,
    ) -> std::result::Result<Value, RemoteError> {
        let rows = self
            .send(
                self.request(Method::PATCH, resource)
                    .query(&record_filter(record_id, base_version))
                    .header("Prefer", "return=representation")
                    .json(payload),
            )
            .await?;

        if is_empty_rows(&rows) {
            return Err(RemoteError::Conflict(format!(
                "record {record_id} in {resource} was deleted or modified remotely"
            )));
        }
        Ok(first_row(rows))
    }

    async fn delete(
        &self,
        resource: &str,
        record_id: &str,
        base_version: Option<&str>,
    ) -> std::result::Result<(), RemoteError> {
        let rows = self
            .send(
                self.request(Method::DELETE, resource)
                    .query(&record_filter(record_id, base_version))
                    .header("Prefer", "return=representation"),
            )
            .await?;

        // Nothing deleted under a version filter: either already gone (fine)
        // or changed since the mutation was queued (conflict).
        if is_empty_rows(&rows)
            && base_version.is_some()
            && self.record_exists(resource, record_id).await?
        {
            return Err(RemoteError::Conflict(format!(
                "record {record_id} in {resource} was modified remotely"
            )));
        }
        Ok(())
    }
}

/// Reachability probe against the backend root.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = normalize_base_url(&url.into())?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("failed to build HTTP client: {error}")))?;
        Ok(Self {
            url,
            timeout,
            client,
        })
    }
}

#[async_trait]
impl LatencyProbe for HttpProbe {
    async fn probe(&self) -> std::result::Result<Duration, RemoteError> {
        let started = Instant::now();
        // Any HTTP answer, even an error status, proves the link works.
        self.client
            .head(&self.url)
            .send()
            .await
            .map_err(|error| transport_error(&error, self.timeout))?;
        Ok(started.elapsed())
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorBody {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let url = non_blank(Some(raw.to_string()))
        .ok_or_else(|| Error::InvalidInput("remote URL must not be empty".to_string()))?;
    if is_http_url(&url) {
        Ok(url.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "remote URL must include http:// or https://".to_string(),
        ))
    }
}

fn record_filter(record_id: &str, base_version: Option<&str>) -> Vec<(&'static str, String)> {
    let mut filter = vec![("id", format!("eq.{record_id}"))];
    if let Some(base_version) = base_version {
        filter.push(("updated_at", format!("eq.{base_version}")));
    }
    filter
}

fn is_empty_rows(rows: &Value) -> bool {
    matches!(rows, Value::Array(items) if items.is_empty())
}

fn first_row(rows: Value) -> Value {
    match rows {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    }
}

fn transport_error(error: &reqwest::Error, timeout: Duration) -> RemoteError {
    if error.is_timeout() {
        RemoteError::Timeout(timeout)
    } else if error.is_connect() || error.is_request() || error.is_body() {
        RemoteError::Network(error.to_string())
    } else {
        RemoteError::Unclassified(error.to_string())
    }
}

/// Map a non-success response to the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> RemoteError {
    let parsed = serde_json::from_str::<PostgrestErrorBody>(body).unwrap_or_default();
    let message = describe(&parsed, status, body);

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return RemoteError::Network(message);
    }

    if let Some(code) = parsed.code.as_deref() {
        if REJECTION_CODES.contains(&code) {
            return RemoteError::Rejected {
                code: Some(code.to_string()),
                message,
            };
        }
    }

    match status {
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => RemoteError::Conflict(message),
        _ if status.is_client_error() => RemoteError::Rejected {
            code: parsed.code,
            message,
        },
        _ => RemoteError::Unclassified(message),
    }
}

fn describe(parsed: &PostgrestErrorBody, status: StatusCode, body: &str) -> String {
    let mut message = parsed
        .message
        .clone()
        .unwrap_or_else(|| error_excerpt(body));
    if message.is_empty() {
        message = format!("HTTP {}", status.as_u16());
    } else {
        message = format!("{} ({})", message.trim(), status.as_u16());
    }
    if let Some(details) = parsed.details.as_deref().or(parsed.hint.as_deref()) {
        message.push_str(": ");
        message.push_str(&error_excerpt(details));
    }
    message
}
