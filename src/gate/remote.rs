//! Remote override document: fetch and tolerant parsing.
//!
//! ```json
//! { "Message": "optional text",
//!   "Features": [ { "Id": "AutoPause", "Enabled": false, "Reason": "maintenance" } ] }
//! ```
//!
//! Entries are decoded one at a time so a malformed entry only drops
//! itself. Unknown ids are ignored.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::FeatureId;

/// Remote fields for one feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOverride {
    /// Remote enablement. Defaults to `true` when the entry omits it.
    pub enabled: bool,
    /// Optional operator-facing reason.
    pub reason: Option<String>,
}

/// Immutable result of the startup fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfigSnapshot {
    /// When the document was fetched. `None` for snapshots parsed offline.
    pub fetched_at: Option<DateTime<Utc>>,
    /// Free-text message from the document root.
    pub message: Option<String>,
    /// Remote entries by feature.
    pub features: HashMap<FeatureId, RemoteOverride>,
}

/// Document-level parse failures. Entry-level problems are skipped, not reported here.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Not JSON at all.
    #[error("remote document is not valid JSON: {0}")]
    Syntax(#[from] serde_json::Error),
    /// The root is not an object.
    #[error("remote document root must be an object")]
    NotAnObject,
    /// `Features` is present but not an array.
    #[error("remote document `Features` must be an array")]
    FeaturesNotArray,
}

/// Failures of the startup fetch.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// Transport-level failure (DNS, connect, body read).
    #[error("remote config request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-success HTTP status.
    #[error("remote config request returned HTTP {0}")]
    Status(reqwest::StatusCode),
    /// The overall fetch exceeded its budget.
    #[error("remote config fetch timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The body could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FeatureEntry {
    id: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    reason: Option<String>,
}

fn default_enabled() -> bool {
    true
}

/// Parse a remote document.
///
/// # Errors
///
/// Returns [`ParseError`] only for document-level problems.
pub fn parse_document(text: &str) -> Result<RemoteConfigSnapshot, ParseError> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let root = root.as_object().ok_or(ParseError::NotAnObject)?;

    let message = match root.get("Message") {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => {
            warn!(value = %other, "ignoring non-string remote `Message`");
            None
        }
    };

    let entries = match root.get("Features") {
        None | Some(serde_json::Value::Null) => &[][..],
        Some(serde_json::Value::Array(items)) => items.as_slice(),
        Some(_) => return Err(ParseError::FeaturesNotArray),
    };

    let mut features: HashMap<FeatureId, RemoteOverride> = HashMap::new();
    for (index, raw) in entries.iter().enumerate() {
        let entry: FeatureEntry = match serde_json::from_value(raw.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(index, error = %e, "skipping malformed remote feature entry");
                continue;
            }
        };
        let feature: FeatureId = match entry.id.parse() {
            Ok(feature) => feature,
            Err(_) => {
                debug!(id = %entry.id, "ignoring unknown remote feature id");
                continue;
            }
        };
        let incoming = RemoteOverride {
            enabled: entry.enabled,
            reason: entry.reason,
        };
        // A disabling entry outranks an enabling duplicate.
        match features.get(&feature) {
            Some(existing) if !existing.enabled && incoming.enabled => {}
            _ => {
                features.insert(feature, incoming);
            }
        }
    }

    Ok(RemoteConfigSnapshot {
        fetched_at: None,
        message,
        features,
    })
}

/// Fetch and parse the remote document with an overall time budget.
///
/// # Errors
///
/// Returns [`RemoteError`] on any transport, status, timeout or parse failure.
pub async fn fetch_snapshot(
    url: &url::Url,
    timeout: Duration,
) -> Result<RemoteConfigSnapshot, RemoteError> {
    let client = reqwest::Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()?;

    let request = async {
        let response = client.get(url.as_str()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }
        Ok::<String, RemoteError>(response.text().await?)
    };

    let body = tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| RemoteError::Timeout(timeout))??;

    let mut snapshot = parse_document(&body)?;
    snapshot.fetched_at = Some(Utc::now());
    Ok(snapshot)
}

/// Best-effort fetch. Any failure is logged and yields `None`.
pub async fn load_snapshot(url: &url::Url, timeout: Duration) -> Option<RemoteConfigSnapshot> {
    match fetch_snapshot(url, timeout).await {
        Ok(snapshot) => {
            info!(
                url = %url,
                entries = snapshot.features.len(),
                "remote config loaded"
            );
            Some(snapshot)
        }
        Err(e) => {
            warn!(url = %url, error = %e, "remote config unavailable, using local config only");
            None
        }
    }
}
