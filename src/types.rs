//! Core domain types for watchlog
//!
//! These types describe one check of a monitored target from the logging
//! pipeline's point of view.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Watch** | A monitored target: a UUID plus the URL currently being checked |
//! | **Check** | One attempt to fetch the watch and run change detection on it |
//! | **Fetch phase** | The network/browser part of a check |
//! | **Detection phase** | The content-diffing part of a check |
//! | **Event** | The durable record of one check in the fact table |
//! | **Dimension** | A deduplicated lookup value (host, proxy, browser connection, watch identity, error category) |
//! | **Terminal outcome** | The final success/failure verdict once all processing for a check has concluded |
//!
//! A watch's identity in storage is content-addressed: the uniqueness key is a
//! SHA-256 over `(uuid, url)`, so the same target re-checked at a new URL gets
//! a fresh identity row while the UUID keeps grouping its history.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ============================================
// Watch
// ============================================

/// The attributes of a monitored target at the moment a check starts.
///
/// Supplied by the host when wrapping a check unit; everything here is copied
/// from the host's own watch record, nothing is fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSpec {
    /// Host-assigned identifier, stable across URL changes
    pub uuid: Uuid,
    /// The URL in effect for this check
    pub url: String,
    /// Processor kind currently configured for the watch
    pub processor: Option<String>,
    /// Fetch backend label (e.g. "system", "html_webdriver")
    pub fetch_backend: String,
    /// Configured proxy selector: a named proxy key, or a literal endpoint URL
    pub proxy_key: Option<String>,
    /// Step script executed by browser-based fetchers; empty means none
    pub steps: Vec<serde_json::Value>,
}

impl WatchSpec {
    pub fn new(uuid: Uuid, url: impl Into<String>) -> Self {
        Self {
            uuid,
            url: url.into(),
            processor: None,
            fetch_backend: "system".to_string(),
            proxy_key: None,
            steps: Vec::new(),
        }
    }

    /// Content-addressed identity key: SHA-256 hex over `"{uuid}\n{url}"`.
    ///
    /// Recomputed on every resolve; a URL change therefore yields a new
    /// identity row rather than mutating the old one.
    pub fn identity_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.uuid.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Narrow view of the host's shared-settings store.
///
/// The only setting this core reads is the application-instance identifier
/// stamped onto every event row.
pub trait SettingsSource {
    /// Identifier of the application instance emitting events
    fn app_instance(&self) -> String;
}

// ============================================
// Phase summaries
// ============================================

/// What the fetch phase reported back on success.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// Response body length in bytes
    pub content_length: Option<i64>,
    /// HTTP-style status code
    pub status_code: Option<i32>,
    /// Browser connection endpoint actually used (CDP/WS/Selenium hub)
    pub browser_endpoint: Option<String>,
    /// Proxy endpoint actually used, as resolved by the fetcher
    pub proxy_endpoint: Option<String>,
}

/// What the detection phase reported back on success.
#[derive(Debug, Clone, Default)]
pub struct DetectionSummary {
    /// Whether a change was detected
    pub changed: bool,
    /// Content length fallback when the fetch phase did not report one
    pub content_length: Option<i64>,
}

// ============================================
// Statuses
// ============================================

/// Result status of a recorded event.
///
/// An event is written with one of the four initial statuses and may later be
/// overwritten exactly once, to `Success` or `Failed`, by the finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    /// Both phases completed without error
    Success,
    /// Fetch completed, detection never concluded
    Partial,
    /// Neither phase completed
    Incomplete,
    /// An error was observed
    Failed,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Success => "success",
            CheckStatus::Partial => "partial",
            CheckStatus::Incomplete => "incomplete",
            CheckStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(CheckStatus::Success),
            "partial" => Ok(CheckStatus::Partial),
            "incomplete" => Ok(CheckStatus::Incomplete),
            "failed" => Ok(CheckStatus::Failed),
            _ => Err(format!("unknown check status: {}", s)),
        }
    }
}

/// Terminal verdict applied by the finalizer once all processing concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Success,
    Failed,
}

impl TerminalOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalOutcome::Success => "success",
            TerminalOutcome::Failed => "failed",
        }
    }
}

// ============================================
// Event record
// ============================================

/// Everything captured about one check, handed to the event sink for the
/// initial durable write.
#[derive(Debug, Clone)]
pub struct CheckRecord {
    /// Application-instance identifier from the host's settings
    pub app_instance: String,
    /// The watch as it looked when the check started
    pub watch: WatchSpec,
    /// Proxy endpoint actually used, if the fetcher reported one
    pub proxy_endpoint: Option<String>,
    /// Browser connection endpoint actually used
    pub browser_endpoint: Option<String>,
    /// Whether the fetch phase ran to completion
    pub fetch_complete: bool,
    /// Whether the detection phase ran to completion
    pub detection_complete: bool,
    /// Wall-clock duration from wrap to record, in milliseconds
    pub duration_ms: i64,
    /// Response body length in bytes
    pub content_length: Option<i64>,
    /// HTTP-style status code
    pub status_code: Option<i32>,
    /// Normalized error category (deduplicated in its own table)
    pub error_category: Option<String>,
    /// Free-text error detail (stored as-is, bounded by config)
    pub error_detail: Option<String>,
}

impl CheckRecord {
    /// Initial result status, by precedence: any observed error wins, then
    /// how far the check got.
    pub fn status(&self) -> CheckStatus {
        if self.error_category.is_some() {
            CheckStatus::Failed
        } else if self.fetch_complete && self.detection_complete {
            CheckStatus::Success
        } else if self.fetch_complete {
            CheckStatus::Partial
        } else {
            CheckStatus::Incomplete
        }
    }
}

/// Split a watch's proxy configuration into the `(key, endpoint)` pair the
/// proxy dimension is keyed on.
///
/// Hosts store either a named selector ("europe-frankfurt") or a literal URL
/// in the same field; a value that looks like a URL is an endpoint with no
/// key, and it overrides whatever endpoint the fetcher observed.
pub(crate) fn classify_proxy(
    configured_key: Option<&str>,
    observed_endpoint: Option<&str>,
) -> (Option<String>, Option<String>) {
    let mut key = configured_key
        .map(str::to_owned)
        .filter(|k| !k.is_empty());
    let mut endpoint = observed_endpoint
        .map(str::to_owned)
        .filter(|e| !e.is_empty());

    if let Some(k) = key.as_deref() {
        if k.starts_with("http://") || k.starts_with("https://") || k.starts_with("socks") {
            endpoint = key.take();
        }
    }

    (key, endpoint)
}
