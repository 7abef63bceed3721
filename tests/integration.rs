//! Integration tests for the watchlog pipeline
//!
//! These drive the public surface end-to-end against temporary SQLite
//! databases: wrap a fake check unit, run its phases, conclude, and then
//! assert on the rows the store actually holds.

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, Statement};
use std::fmt;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use watchlog::store::Store;
use watchlog::{
    CheckFailure, CheckRecord, CheckUnit, Config, DetectionSummary, FetchSummary, LoggedCheck,
    RequestLogger, SettingsSource, StorageBackend, WatchSpec,
};

// ============================================
// Test fixtures
// ============================================

#[derive(Debug)]
struct HostFailure {
    category: &'static str,
    message: String,
}

impl fmt::Display for HostFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl CheckFailure for HostFailure {
    fn category(&self) -> String {
        self.category.to_string()
    }
}

/// Stand-in for the host's per-check execution unit.
struct HostCheck {
    fetch_result: Result<FetchSummary, HostFailure>,
    detect_result: Result<DetectionSummary, HostFailure>,
}

impl HostCheck {
    fn succeeding() -> Self {
        Self {
            fetch_result: Ok(FetchSummary {
                content_length: Some(4096),
                status_code: Some(200),
                browser_endpoint: None,
                proxy_endpoint: None,
            }),
            detect_result: Ok(DetectionSummary {
                changed: false,
                content_length: None,
            }),
        }
    }

    fn timing_out(message: &str) -> Self {
        Self {
            fetch_result: Err(HostFailure {
                category: "ReadTimeout",
                message: message.to_string(),
            }),
            detect_result: Ok(DetectionSummary::default()),
        }
    }
}

#[async_trait]
impl CheckUnit for HostCheck {
    type Error = HostFailure;

    async fn fetch(&mut self) -> Result<FetchSummary, HostFailure> {
        std::mem::replace(&mut self.fetch_result, Ok(FetchSummary::default()))
    }

    async fn detect(&mut self) -> Result<DetectionSummary, HostFailure> {
        std::mem::replace(&mut self.detect_result, Ok(DetectionSummary::default()))
    }
}

struct HostSettings;

impl SettingsSource for HostSettings {
    fn app_instance(&self) -> String {
        "instance-1".to_string()
    }
}

fn sqlite_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Sqlite;
    config.storage.sqlite_path = Some(dir.path().join("watchlog.db"));
    config
}

async fn scalar(store: &Store, sql: &str) -> i64 {
    let row = store
        .connection()
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            sql.to_string(),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get("", "n").unwrap()
}

async fn text(store: &Store, sql: &str) -> Option<String> {
    let row = store
        .connection()
        .query_one(Statement::from_string(
            DatabaseBackend::Sqlite,
            sql.to_string(),
        ))
        .await
        .unwrap()
        .unwrap();
    row.try_get("", "v").unwrap()
}

async fn run_check(
    logger: &Arc<RequestLogger>,
    unit: HostCheck,
    watch: WatchSpec,
) -> (Option<i64>, Option<String>) {
    let mut check = LoggedCheck::new(unit, watch, &HostSettings, logger.clone());
    let outcome = async {
        check.fetch().await?;
        check.detect().await
    }
    .await;
    let failure = outcome.err().map(|e| e.to_string());
    check
        .conclude(failure.as_ref().map(|message| message as _))
        .await;
    (check.event_id(), failure)
}

// ============================================
// Scenarios
// ============================================

#[tokio::test]
async fn test_successful_check_end_to_end() {
    let dir = TempDir::new().unwrap();
    let logger = Arc::new(RequestLogger::connect(&sqlite_config(&dir)).await);
    assert!(logger.is_active());

    let uuid = Uuid::new_v4();
    let (event_id, failure) = run_check(
        &logger,
        HostCheck::succeeding(),
        WatchSpec::new(uuid, "https://a.example/x"),
    )
    .await;
    assert!(failure.is_none());
    assert!(event_id.is_some());

    let store = logger.store().unwrap();
    assert_eq!(scalar(store, "SELECT COUNT(*) AS n FROM hosts").await, 1);
    assert_eq!(
        scalar(store, "SELECT COUNT(*) AS n FROM watch_identities").await,
        1
    );
    assert_eq!(
        scalar(store, "SELECT use_count AS n FROM watch_identities").await,
        1
    );
    assert_eq!(scalar(store, "SELECT COUNT(*) AS n FROM check_events").await, 1);
    assert_eq!(
        text(store, "SELECT result AS v FROM check_events").await.as_deref(),
        Some("success")
    );
    assert_eq!(
        scalar(
            store,
            "SELECT COUNT(*) AS n FROM check_events \
             WHERE proxy_id IS NULL AND browser_connection_id IS NULL AND error_category_id IS NULL"
        )
        .await,
        1
    );

    // Same target, same URL, checked again: identity row reused, counter
    // bumped, a second event appended.
    let (second_id, _) = run_check(
        &logger,
        HostCheck::succeeding(),
        WatchSpec::new(uuid, "https://a.example/x"),
    )
    .await;
    assert_ne!(event_id, second_id);

    assert_eq!(
        scalar(store, "SELECT COUNT(*) AS n FROM watch_identities").await,
        1
    );
    assert_eq!(
        scalar(store, "SELECT use_count AS n FROM watch_identities").await,
        2
    );
    assert_eq!(scalar(store, "SELECT COUNT(*) AS n FROM check_events").await, 2);
    assert_eq!(
        scalar(store, "SELECT COUNT(DISTINCT watch_id) AS n FROM check_events").await,
        1
    );
}

#[tokio::test]
async fn test_fetch_timeout_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut config = sqlite_config(&dir);
    config.record.error_detail_max_chars = 24;
    let logger = Arc::new(RequestLogger::connect(&config).await);

    let long_message = "connection to https://slow.example timed out after 30000 ms waiting for headers";
    let (event_id, failure) = run_check(
        &logger,
        HostCheck::timing_out(long_message),
        WatchSpec::new(Uuid::new_v4(), "https://slow.example/page"),
    )
    .await;

    // The original failure came back to the caller
    assert_eq!(failure.as_deref(), Some(long_message));
    assert!(event_id.is_some());

    let store = logger.store().unwrap();
    assert_eq!(
        text(store, "SELECT result AS v FROM check_events").await.as_deref(),
        Some("failed")
    );
    assert_eq!(
        text(store, "SELECT label AS v FROM error_categories").await.as_deref(),
        Some("ReadTimeout")
    );
    assert_eq!(
        scalar(store, "SELECT occurrence_count AS n FROM error_categories").await,
        1
    );

    // Detail is stored truncated to the configured bound
    let detail = text(store, "SELECT error_detail AS v FROM check_events")
        .await
        .unwrap();
    assert_eq!(detail.chars().count(), 24);
    assert!(long_message.starts_with(&detail));
}

#[tokio::test]
async fn test_url_change_preserves_history() {
    let dir = TempDir::new().unwrap();
    let logger = Arc::new(RequestLogger::connect(&sqlite_config(&dir)).await);
    let uuid = Uuid::new_v4();

    run_check(
        &logger,
        HostCheck::succeeding(),
        WatchSpec::new(uuid, "https://a.example/x"),
    )
    .await;
    run_check(
        &logger,
        HostCheck::succeeding(),
        WatchSpec::new(uuid, "https://a.example/y"),
    )
    .await;

    let store = logger.store().unwrap();
    assert_eq!(
        scalar(store, "SELECT COUNT(*) AS n FROM watch_identities").await,
        2
    );
    assert_eq!(
        scalar(
            store,
            &format!(
                "SELECT COUNT(*) AS n FROM watch_identities WHERE watch_uuid = '{}'",
                uuid
            )
        )
        .await,
        2
    );
    // Counters are independent per identity row
    assert_eq!(
        scalar(store, "SELECT MAX(use_count) AS n FROM watch_identities").await,
        1
    );
    assert_eq!(
        scalar(store, "SELECT COUNT(DISTINCT watch_id) AS n FROM check_events").await,
        2
    );
}

#[tokio::test]
async fn test_disabled_logging_is_transparent() {
    let logger: Arc<RequestLogger> = Arc::new(RequestLogger::disabled());

    let (event_id, failure) = run_check(
        &logger,
        HostCheck::succeeding(),
        WatchSpec::new(Uuid::new_v4(), "https://a.example/x"),
    )
    .await;
    assert_eq!(event_id, None);
    assert!(failure.is_none());

    // And the failure path still hands the error back unchanged
    let (event_id, failure) = run_check(
        &logger,
        HostCheck::timing_out("boom"),
        WatchSpec::new(Uuid::new_v4(), "https://a.example/x"),
    )
    .await;
    assert_eq!(event_id, None);
    assert_eq!(failure.as_deref(), Some("boom"));
}

#[tokio::test]
async fn test_concurrent_checks_share_dimension_rows() {
    let dir = TempDir::new().unwrap();
    let mut config = sqlite_config(&dir);
    // A single pooled connection serializes the writers; correctness under
    // true cross-connection races is covered by the resolver tests.
    config.storage.pool_size = 1;

    let url = config.storage.database_url().unwrap();
    let store = Arc::new(Store::connect(&url, &config.storage).await.unwrap());

    let uuid = Uuid::new_v4();
    let mut handles = Vec::new();
    for worker in 0..6 {
        let store = store.clone();
        let watch = WatchSpec::new(uuid, "https://a.example/x");
        handles.push(tokio::spawn(async move {
            let record = CheckRecord {
                app_instance: "instance-1".to_string(),
                watch,
                proxy_endpoint: None,
                browser_endpoint: None,
                fetch_complete: true,
                detection_complete: true,
                duration_ms: worker,
                content_length: Some(100),
                status_code: Some(200),
                error_category: None,
                error_detail: None,
            };
            store.record_event("worker-shared", &record).await.unwrap()
        }));
    }

    let mut event_ids = Vec::new();
    for handle in handles {
        event_ids.push(handle.await.unwrap());
    }
    event_ids.sort_unstable();
    event_ids.dedup();
    assert_eq!(event_ids.len(), 6, "every check gets its own event row");

    assert_eq!(scalar(&store, "SELECT COUNT(*) AS n FROM hosts").await, 1);
    assert_eq!(
        scalar(&store, "SELECT COUNT(*) AS n FROM watch_identities").await,
        1
    );
    assert_eq!(
        scalar(&store, "SELECT use_count AS n FROM watch_identities").await,
        6
    );
    assert_eq!(scalar(&store, "SELECT COUNT(*) AS n FROM check_events").await, 6);
}

#[tokio::test]
async fn test_detection_failure_records_partial_metrics() {
    let dir = TempDir::new().unwrap();
    let logger = Arc::new(RequestLogger::connect(&sqlite_config(&dir)).await);

    let unit = HostCheck {
        fetch_result: Ok(FetchSummary {
            content_length: Some(512),
            status_code: Some(200),
            browser_endpoint: Some("ws://chrome:3000".to_string()),
            proxy_endpoint: None,
        }),
        detect_result: Err(HostFailure {
            category: "FilterNotFound",
            message: "css filter matched nothing".to_string(),
        }),
    };

    let (event_id, failure) = run_check(
        &logger,
        unit,
        WatchSpec::new(Uuid::new_v4(), "https://a.example/x"),
    )
    .await;
    assert!(event_id.is_some());
    assert_eq!(failure.as_deref(), Some("css filter matched nothing"));

    let store = logger.store().unwrap();
    // Error precedence: the event is failed even though fetch completed
    assert_eq!(
        text(store, "SELECT result AS v FROM check_events").await.as_deref(),
        Some("failed")
    );
    assert_eq!(
        text(store, "SELECT label AS v FROM error_categories").await.as_deref(),
        Some("FilterNotFound")
    );
    // The browser connection observed during fetch was normalized
    assert_eq!(
        text(store, "SELECT connection_url AS v FROM browser_connections")
            .await
            .as_deref(),
        Some("ws://chrome:3000")
    );
    assert_eq!(
        scalar(store, "SELECT COUNT(*) AS n FROM check_events WHERE browser_connection_id IS NOT NULL")
            .await,
        1
    );
}
