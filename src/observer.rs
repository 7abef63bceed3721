//! Check interception
//!
//! `LoggedCheck` wraps the host's per-check execution unit and observes its
//! two phases without changing their behavior: callers see the same return
//! values and the same errors, with event logging as the only side effect.
//!
//! State machine: **pending** → **fetched** → **detected**. The event row
//! is written exactly once per check: when the detection phase concludes
//! (either way), or immediately when the fetch phase fails, since a failed
//! fetch normally ends the check. The host's unconditional cleanup hook then
//! calls [`LoggedCheck::conclude`], which finalizes the row by the id
//! retained at record time; if the host cancelled the check before anything
//! was recorded, `conclude` first records whatever was captured so far.

use crate::sink::{EventId, EventSink};
use crate::types::{
    CheckRecord, DetectionSummary, FetchSummary, SettingsSource, TerminalOutcome, WatchSpec,
};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// An upstream failure the interception layer can categorize.
pub trait CheckFailure: fmt::Display {
    /// Short, stable error-kind label; this is the deduplicated dimension
    /// value, while the full rendering becomes the free-text detail.
    fn category(&self) -> String;
}

/// The host's per-check execution unit: fetch the target, then run change
/// detection over the fetched content.
#[async_trait]
pub trait CheckUnit: Send {
    type Error: CheckFailure + Send;

    /// Fetch phase: retrieve the monitored target.
    async fn fetch(&mut self) -> Result<FetchSummary, Self::Error>;

    /// Detection phase: diff the fetched content against history.
    async fn detect(&mut self) -> Result<DetectionSummary, Self::Error>;
}

/// Where the wrapped check currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckPhase {
    /// Created, nothing observed yet
    Pending,
    /// Fetch phase returned successfully
    Fetched,
    /// Detection phase returned successfully
    Detected,
}

impl CheckPhase {
    pub fn fetch_complete(self) -> bool {
        matches!(self, CheckPhase::Fetched | CheckPhase::Detected)
    }

    pub fn detection_complete(self) -> bool {
        matches!(self, CheckPhase::Detected)
    }
}

/// Transparent wrapper that logs a check unit's lifecycle.
pub struct LoggedCheck<U> {
    inner: U,
    watch: WatchSpec,
    app_instance: String,
    sink: Arc<dyn EventSink>,
    started: Instant,
    phase: CheckPhase,
    changed: bool,
    content_length: Option<i64>,
    status_code: Option<i32>,
    browser_endpoint: Option<String>,
    proxy_endpoint: Option<String>,
    error_category: Option<String>,
    error_detail: Option<String>,
    recorded: bool,
    event_id: Option<EventId>,
}

impl<U: CheckUnit> LoggedCheck<U> {
    /// Wrap a check unit before it runs.
    pub fn new(
        inner: U,
        watch: WatchSpec,
        settings: &dyn SettingsSource,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner,
            watch,
            app_instance: settings.app_instance(),
            sink,
            started: Instant::now(),
            phase: CheckPhase::Pending,
            changed: false,
            content_length: None,
            status_code: None,
            browser_endpoint: None,
            proxy_endpoint: None,
            error_category: None,
            error_detail: None,
            recorded: false,
            event_id: None,
        }
    }

    /// The wrapped unit
    pub fn inner(&self) -> &U {
        &self.inner
    }

    /// The wrapped unit, mutably
    pub fn inner_mut(&mut self) -> &mut U {
        &mut self.inner
    }

    /// Unwrap, discarding the logging state
    pub fn into_inner(self) -> U {
        self.inner
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> CheckPhase {
        self.phase
    }

    /// Whether the detection phase reported a change
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Id of the recorded event, once the initial write happened
    pub fn event_id(&self) -> Option<EventId> {
        self.event_id
    }

    fn capture_failure(&mut self, err: &U::Error) {
        // A later failure never overrides the one captured first
        if self.error_category.is_none() {
            self.error_category = Some(err.category());
            self.error_detail = Some(err.to_string());
        }
    }

    /// Write the event row, exactly once per check.
    async fn record_event(&mut self) {
        if self.recorded {
            return;
        }
        self.recorded = true;

        let record = CheckRecord {
            app_instance: self.app_instance.clone(),
            watch: self.watch.clone(),
            proxy_endpoint: self.proxy_endpoint.clone(),
            browser_endpoint: self.browser_endpoint.clone(),
            fetch_complete: self.phase.fetch_complete(),
            detection_complete: self.phase.detection_complete(),
            duration_ms: self.started.elapsed().as_millis() as i64,
            content_length: self.content_length,
            status_code: self.status_code,
            error_category: self.error_category.clone(),
            error_detail: self.error_detail.clone(),
        };

        self.event_id = self.sink.record_check(record).await;
    }

    /// Host cleanup hook, called unconditionally after all processing.
    ///
    /// Records the captured state if the check never got far enough to be
    /// recorded (cancellation, early teardown), then applies the terminal
    /// outcome to the retained event id. Safe to call when nothing was ever
    /// recorded; never raises.
    pub async fn conclude(&mut self, failure: Option<&(dyn fmt::Display + Send + Sync)>) {
        if let Some(failure) = failure {
            tracing::debug!(watch = %self.watch.uuid, failure = %failure, "check concluded with failure");
        }

        if !self.recorded {
            self.record_event().await;
        }

        if let Some(event_id) = self.event_id {
            let outcome = if failure.is_some() {
                TerminalOutcome::Failed
            } else {
                TerminalOutcome::Success
            };
            self.sink.record_outcome(event_id, outcome).await;
        }
    }
}

#[async_trait]
impl<U: CheckUnit> CheckUnit for LoggedCheck<U> {
    type Error = U::Error;

    async fn fetch(&mut self) -> Result<FetchSummary, Self::Error> {
        match self.inner.fetch().await {
            Ok(summary) => {
                self.phase = CheckPhase::Fetched;
                self.content_length = summary.content_length;
                self.status_code = summary.status_code;
                self.browser_endpoint = summary.browser_endpoint.clone();
                self.proxy_endpoint = summary.proxy_endpoint.clone();
                Ok(summary)
            }
            Err(err) => {
                self.capture_failure(&err);
                // A failed fetch ends the check; record now, then hand the
                // original error back unchanged.
                self.record_event().await;
                Err(err)
            }
        }
    }

    async fn detect(&mut self) -> Result<DetectionSummary, Self::Error> {
        match self.inner.detect().await {
            Ok(summary) => {
                self.phase = CheckPhase::Detected;
                self.changed = summary.changed;
                if self.content_length.is_none() {
                    self.content_length = summary.content_length;
                }
                self.record_event().await;
                Ok(summary)
            }
            Err(err) => {
                self.capture_failure(&err);
                self.record_event().await;
                Err(err)
            }
        }
    }
}
