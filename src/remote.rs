//! Sync backend API client.
//!
//! Provides authenticated HTTP communication with the sync backend, used
//! for connectivity probing, per-table row CRUD, and the long-poll change
//! feed consumed by the realtime reconciler. A client constructed with
//! [`RemoteClient::disabled`] performs no network IO at all; the store runs
//! local-only in that mode.

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::info;

/// Default timeout for API requests (30 seconds).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout used specifically for the lightweight connectivity probe.
const CONNECTIVITY_TIMEOUT: Duration = Duration::from_secs(10);

/// Long-poll requests are held open server-side; allow generously.
const POLL_TIMEOUT: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// URL normalisation
// ---------------------------------------------------------------------------

/// Normalise the backend URL:
/// - strip trailing slashes
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_base_url(url: &str) -> String {
    let mut url = url.trim().to_string();

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }

    url
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Convert a `reqwest::Error` into a user-friendly message.
fn friendly_error(url: &str, err: &reqwest::Error) -> String {
    if err.is_connect() {
        return format!("Cannot reach sync backend at {url}");
    }
    if err.is_timeout() {
        return format!("Connection to {url} timed out");
    }
    if err.is_builder() {
        return format!("Invalid sync backend URL: {url}");
    }
    format!("Network error communicating with {url}: {err}")
}

/// Convert an HTTP status code into a user-friendly message.
fn status_error(status: StatusCode) -> String {
    match status.as_u16() {
        401 => "API key is invalid or expired".to_string(),
        403 => "Terminal not authorized".to_string(),
        404 => "Sync backend endpoint not found".to_string(),
        s if s >= 500 => format!("Sync backend server error (HTTP {s})"),
        s => format!("Unexpected response from sync backend (HTTP {s})"),
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Result of a connectivity probe.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ConnectivityResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level mutation from the change feed. Delete events still carry
/// the full row so the reconciler can read the primary key.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub row: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangeBatch {
    #[serde(default)]
    pub events: Vec<ChangeEvent>,
    pub cursor: String,
}

pub struct RemoteClient {
    /// `None` means the client is disabled and every call is a no-op.
    base_url: Option<String>,
    api_key: String,
}

impl RemoteClient {
    pub fn new(base_url: &str, api_key: &str) -> RemoteClient {
        RemoteClient {
            base_url: Some(normalize_base_url(base_url)),
            api_key: api_key.trim().to_string(),
        }
    }

    /// A client that performs no network IO. Used when the terminal has no
    /// backend configured, and throughout the tests.
    pub fn disabled() -> RemoteClient {
        RemoteClient {
            base_url: None,
            api_key: String::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// Probe `/health` with a short timeout. Never errors; failure is a
    /// result, not an exception, because an unreachable backend is a normal
    /// operating mode.
    pub async fn check_connectivity(&self) -> ConnectivityResult {
        let Some(base) = &self.base_url else {
            return ConnectivityResult {
                success: false,
                latency_ms: None,
                error: Some("Sync backend not configured".to_string()),
            };
        };
        let health_url = format!("{base}/health");

        let client = match Client::builder().timeout(CONNECTIVITY_TIMEOUT).build() {
            Ok(c) => c,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(format!("Failed to create HTTP client: {e}")),
                };
            }
        };

        let start = Instant::now();

        let resp = match client
            .get(&health_url)
            .header("X-POS-API-Key", &self.api_key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                return ConnectivityResult {
                    success: false,
                    latency_ms: None,
                    error: Some(friendly_error(base, &e)),
                };
            }
        };

        let latency = start.elapsed().as_millis() as u64;
        let status = resp.status();

        if status.is_success() {
            info!(latency_ms = latency, "connectivity probe passed");
            ConnectivityResult {
                success: true,
                latency_ms: Some(latency),
                error: None,
            }
        } else {
            ConnectivityResult {
                success: false,
                latency_ms: Some(latency),
                error: Some(status_error(status)),
            }
        }
    }

    /// Perform an authenticated request. `path` includes the leading slash,
    /// e.g. `/rest/orders`.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, String> {
        let base = self
            .base_url
            .as_deref()
            .ok_or_else(|| "Sync backend not configured".to_string())?;
        let full_url = format!("{base}{path}");

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

        let mut req = client
            .request(method, &full_url)
            .header("X-POS-API-Key", &self.api_key)
            .header("Content-Type", "application/json");

        if let Some(b) = body {
            req = req.json(&b);
        }

        let resp = req.send().await.map_err(|e| friendly_error(base, &e))?;
        let status = resp.status();
        let body_text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            let detail = serde_json::from_str::<Value>(&body_text)
                .ok()
                .and_then(|v| {
                    v.get("error")
                        .or_else(|| v.get("message"))
                        .and_then(Value::as_str)
                        .map(|s| s.to_string())
                })
                .unwrap_or_else(|| status_error(status));
            return Err(format!("{detail} (HTTP {})", status.as_u16()));
        }

        if body_text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body_text).map_err(|e| format!("Invalid JSON from {path}: {e}"))
    }

    /// Fetch all rows of a table. Accepts either a bare array or a
    /// `{ "rows": [...] }` envelope.
    pub async fn fetch_rows(&self, table: &str) -> Result<Vec<Value>, String> {
        let body = self
            .request(Method::GET, &format!("/rest/{table}"), None, DEFAULT_TIMEOUT)
            .await?;
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Object(mut map) => match map.remove("rows") {
                Some(Value::Array(rows)) => Ok(rows),
                _ => Err(format!("Unexpected response shape from /rest/{table}")),
            },
            _ => Err(format!("Unexpected response shape from /rest/{table}")),
        }
    }

    /// Insert a row. Returns the stored row, which may carry a
    /// server-assigned primary key.
    pub async fn insert_row(&self, table: &str, row: Value) -> Result<Value, String> {
        self.request(
            Method::POST,
            &format!("/rest/{table}"),
            Some(row),
            DEFAULT_TIMEOUT,
        )
        .await
    }

    pub async fn update_row(&self, table: &str, id: &str, patch: Value) -> Result<(), String> {
        self.request(
            Method::PATCH,
            &format!("/rest/{table}/{id}"),
            Some(patch),
            DEFAULT_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    pub async fn delete_row(&self, table: &str, id: &str) -> Result<(), String> {
        self.request(
            Method::DELETE,
            &format!("/rest/{table}/{id}"),
            None,
            DEFAULT_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    /// Long-poll the change feed for one table. An empty cursor asks for
    /// changes from now on; the returned cursor is persisted by the caller
    /// and replayed across restarts.
    pub async fn poll_changes(&self, table: &str, cursor: &str) -> Result<ChangeBatch, String> {
        let body = self
            .request(
                Method::POST,
                &format!("/changes/{table}"),
                Some(json!({ "cursor": cursor })),
                POLL_TIMEOUT,
            )
            .await?;
        serde_json::from_value(body).map_err(|e| format!("Invalid change batch for {table}: {e}"))
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_variants() {
        assert_eq!(
            normalize_base_url("https://sync.example.com/"),
            "https://sync.example.com"
        );
        assert_eq!(
            normalize_base_url("sync.example.com"),
            "https://sync.example.com"
        );
        assert_eq!(
            normalize_base_url("localhost:8080///"),
            "http://localhost:8080"
        );
    }

    #[test]
    fn disabled_client_is_disabled() {
        assert!(!RemoteClient::disabled().is_enabled());
        assert!(RemoteClient::new("sync.example.com", "key").is_enabled());
    }

    #[tokio::test]
    async fn disabled_client_probe_reports_unconfigured() {
        let result = RemoteClient::disabled().check_connectivity().await;
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Sync backend not configured"));
    }

    #[test]
    fn change_batch_decodes() {
        let batch: ChangeBatch = serde_json::from_str(
            r#"{"events":[{"type":"insert","row":{"id":"a"}},{"type":"delete","row":{"id":"b"}}],"cursor":"42"}"#,
        )
        .unwrap();
        assert_eq!(batch.events.len(), 2);
        assert_eq!(batch.events[0].kind, ChangeKind::Insert);
        assert_eq!(batch.events[1].kind, ChangeKind::Delete);
        assert_eq!(batch.cursor, "42");
    }
}
