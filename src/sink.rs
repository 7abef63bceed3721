//! Event sink boundary
//!
//! `EventSink` is the narrow interface the interception layer talks to:
//! record a check, then record its terminal outcome. `RequestLogger` is the
//! storage-backed implementation and the crate's never-raise boundary:
//! every failure past this point is caught, logged with the watch identity,
//! and converted to "did nothing". A host whose storage is unconfigured or
//! unreachable gets an inert logger and pays nothing per check.

use crate::config::Config;
use crate::store::Store;
use crate::types::{CheckRecord, TerminalOutcome};
use async_trait::async_trait;
use std::time::Duration;

/// Identifier of a recorded event, used to finalize it later.
pub type EventId = i64;

/// Narrow interface between check interception and event storage.
///
/// Implementations must never raise: a failed write is reported as `None`
/// and otherwise swallowed.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Durably record one check. Returns the event id, or `None` if nothing
    /// was recorded.
    async fn record_check(&self, record: CheckRecord) -> Option<EventId>;

    /// Overwrite a recorded event's result with its terminal outcome.
    async fn record_outcome(&self, event_id: EventId, outcome: TerminalOutcome);
}

struct LoggerInner {
    store: Store,
    hostname: String,
    op_timeout: Duration,
    error_detail_max_chars: usize,
}

/// Storage-backed event sink.
///
/// Construct once per process with [`RequestLogger::connect`] and share it
/// across check workers; the pooled connection inside is the only shared
/// state. There is no teardown; the pool lives until process exit.
pub struct RequestLogger {
    inner: Option<LoggerInner>,
}

impl RequestLogger {
    /// Connect to the configured storage backend.
    ///
    /// This never fails: missing configuration or an unreachable database
    /// yields an inert logger, reported once here rather than per event.
    pub async fn connect(config: &Config) -> Self {
        let Some(url) = config.storage.database_url() else {
            tracing::error!(
                backend = config.storage.backend.as_str(),
                "request logging is not configured (no usable connection settings); \
                 checks will not be recorded"
            );
            return Self { inner: None };
        };

        match Store::connect(&url, &config.storage).await {
            Ok(store) => {
                tracing::info!(
                    backend = config.storage.backend.as_str(),
                    pool_size = config.storage.pool_size,
                    "request logging initialized"
                );
                Self {
                    inner: Some(LoggerInner {
                        store,
                        hostname: config.record.node_hostname(),
                        op_timeout: Duration::from_millis(config.storage.op_timeout_ms),
                        error_detail_max_chars: config.record.error_detail_max_chars,
                    }),
                }
            }
            Err(err) => {
                tracing::error!(
                    backend = config.storage.backend.as_str(),
                    error = %err,
                    "failed to initialize request logging; checks will not be recorded"
                );
                Self { inner: None }
            }
        }
    }

    /// A logger that records nothing, for hosts that disable logging.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Whether this logger actually writes anywhere.
    pub fn is_active(&self) -> bool {
        self.inner.is_some()
    }

    /// The store behind this logger, when active.
    pub fn store(&self) -> Option<&Store> {
        self.inner.as_ref().map(|inner| &inner.store)
    }
}

#[async_trait]
impl EventSink for RequestLogger {
    async fn record_check(&self, mut record: CheckRecord) -> Option<EventId> {
        let inner = self.inner.as_ref()?;

        if let Some(detail) = record.error_detail.as_mut() {
            truncate_chars(detail, inner.error_detail_max_chars);
        }

        let write = inner.store.record_event(&inner.hostname, &record);
        match tokio::time::timeout(inner.op_timeout, write).await {
            Ok(Ok(event_id)) => {
                tracing::debug!(watch = %record.watch.uuid, event_id, "recorded check event");
                Some(event_id)
            }
            Ok(Err(err)) => {
                tracing::error!(
                    watch = %record.watch.uuid,
                    error = %err,
                    "failed to record check event"
                );
                None
            }
            Err(_) => {
                tracing::error!(
                    watch = %record.watch.uuid,
                    timeout_ms = inner.op_timeout.as_millis() as u64,
                    "timed out recording check event"
                );
                None
            }
        }
    }

    async fn record_outcome(&self, event_id: EventId, outcome: TerminalOutcome) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };

        let write = inner.store.finalize_event(event_id, outcome);
        match tokio::time::timeout(inner.op_timeout, write).await {
            Ok(Ok(true)) => {
                tracing::debug!(event_id, outcome = outcome.as_str(), "finalized check event");
            }
            Ok(Ok(false)) => {
                tracing::warn!(event_id, "no event row to finalize");
            }
            Ok(Err(err)) => {
                tracing::error!(event_id, error = %err, "failed to finalize check event");
            }
            Err(_) => {
                tracing::error!(
                    event_id,
                    timeout_ms = inner.op_timeout.as_millis() as u64,
                    "timed out finalizing check event"
                );
            }
        }
    }
}

/// Truncate a string to at most `max` characters, on a char boundary.
fn truncate_chars(s: &mut String, max: usize) {
    if let Some((index, _)) = s.char_indices().nth(max) {
        s.truncate(index);
    }
}
