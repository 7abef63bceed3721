//! Event write path
//!
//! The fact table is written in two phases. Phase one inserts the event row
//! inside a single transaction that also covers the dimension resolutions,
//! and returns the generated id. Phase two, finalize, runs later in its
//! own transaction and overwrites the result column by id. An unknown id at
//! finalize time is a no-op, not an error: the initial write may never have
//! happened (logging disabled, or the insert itself failed).

use crate::error::Result;
use crate::payload;
use crate::store::dimensions::{
    resolve_browser_connection, resolve_error_category, resolve_host, resolve_proxy, resolve_watch,
};
use crate::store::schema::CheckEvents;
use crate::store::{exec, insert_returning_id, Store};
use crate::types::{classify_proxy, CheckRecord, TerminalOutcome};
use chrono::Utc;
use sea_orm::sea_query::{Expr, ExprTrait, Query};
use sea_orm::TransactionTrait;

impl Store {
    /// Record one check as a normalized event row.
    ///
    /// Resolves all applicable dimensions and inserts the fact row in one
    /// transaction; dimension counter bumps therefore roll back together
    /// with a failed event insert.
    pub async fn record_event(&self, hostname: &str, record: &CheckRecord) -> Result<i64> {
        let txn = self.connection().begin().await?;

        let now = Utc::now().naive_utc();
        let today = Utc::now().date_naive();

        let host_id = resolve_host(&txn, hostname, now).await?;
        let watch_id = resolve_watch(&txn, &record.watch, now).await?;

        let (proxy_key, proxy_endpoint) = classify_proxy(
            record.watch.proxy_key.as_deref(),
            record.proxy_endpoint.as_deref(),
        );
        let proxy_id = match proxy_endpoint.as_deref() {
            Some(endpoint) => Some(
                resolve_proxy(&txn, proxy_key.as_deref().unwrap_or(""), endpoint, now).await?,
            ),
            None => None,
        };

        let browser_connection_id = match record.browser_endpoint.as_deref() {
            Some(url) if !url.is_empty() => Some(
                resolve_browser_connection(&txn, url, &record.watch.fetch_backend, now).await?,
            ),
            _ => None,
        };

        let error_category_id = match record.error_category.as_deref() {
            Some(label) if !label.is_empty() => {
                Some(resolve_error_category(&txn, label, now).await?)
            }
            _ => None,
        };

        // The payload is fully assembled before the insert; a script that
        // fails to encode degrades to an event without one.
        let (steps_blob, steps_count) = match payload::encode_steps(&record.watch.steps) {
            Ok(Some(encoded)) => (Some(encoded.blob), encoded.count),
            Ok(None) => (None, 0),
            Err(err) => {
                tracing::warn!(
                    watch = %record.watch.uuid,
                    error = %err,
                    "failed to encode step script, storing event without it"
                );
                (None, 0)
            }
        };

        let mut insert = Query::insert()
            .into_table(CheckEvents::Table)
            .columns([
                CheckEvents::AppInstance,
                CheckEvents::HostId,
                CheckEvents::WatchId,
                CheckEvents::EventDate,
                CheckEvents::EventTs,
                CheckEvents::ProxyId,
                CheckEvents::BrowserConnectionId,
                CheckEvents::Steps,
                CheckEvents::StepsCount,
                CheckEvents::Result,
                CheckEvents::DurationMs,
                CheckEvents::ContentLength,
                CheckEvents::StatusCode,
                CheckEvents::ErrorCategoryId,
                CheckEvents::ErrorDetail,
            ])
            .values_panic([
                record.app_instance.clone().into(),
                host_id.into(),
                watch_id.into(),
                today.into(),
                now.into(),
                proxy_id.into(),
                browser_connection_id.into(),
                steps_blob.into(),
                steps_count.into(),
                record.status().as_str().into(),
                record.duration_ms.into(),
                record.content_length.into(),
                record.status_code.into(),
                error_category_id.into(),
                record.error_detail.clone().into(),
            ])
            .to_owned();

        let event_id = insert_returning_id(&txn, &mut insert).await?;
        txn.commit().await?;

        Ok(event_id)
    }

    /// Overwrite a recorded event's result with its terminal outcome.
    ///
    /// Returns whether a row was updated; `false` means the id was unknown.
    pub async fn finalize_event(&self, event_id: i64, outcome: TerminalOutcome) -> Result<bool> {
        let txn = self.connection().begin().await?;

        let update = Query::update()
            .table(CheckEvents::Table)
            .value(CheckEvents::Result, outcome.as_str())
            .and_where(Expr::col(CheckEvents::Id).eq(event_id))
            .to_owned();
        let result = exec(&txn, &update).await?;

        txn.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
