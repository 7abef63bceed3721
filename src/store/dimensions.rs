//! Dimension resolvers
//!
//! Five get-or-create resolvers, one per lookup table. Each runs on the
//! caller's open transaction and returns the row id for a natural key,
//! creating the row on first sighting or bumping its seen-timestamp and
//! counter on a repeat.
//!
//! Concurrency is settled at the database: when two workers race to create
//! the same new key, the insert runs inside a savepoint so the loser's
//! uniqueness violation can be rolled back and retried as a lookup without
//! poisoning the outer transaction.

use crate::error::{Error, Result};
use crate::store::schema::{
    BrowserConnections, ErrorCategories, Hosts, ProxyEndpoints, WatchIdentities,
};
use crate::store::{exec, insert_returning_id, is_unique_violation, query_one};
use crate::types::WatchSpec;
use chrono::NaiveDateTime;
use sea_orm::sea_query::{Expr, ExprTrait, InsertStatement, Query};
use sea_orm::{ConnectionTrait, TransactionTrait};

/// Insert a new dimension row inside a savepoint, so a lost creation race
/// surfaces as a clean unique-violation the caller can degrade to a lookup.
async fn insert_dimension<C>(conn: &C, mut stmt: InsertStatement) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    let savepoint = conn.begin().await?;
    match insert_returning_id(&savepoint, &mut stmt).await {
        Ok(id) => {
            savepoint.commit().await?;
            Ok(id)
        }
        Err(err) => {
            if let Err(rollback_err) = savepoint.rollback().await {
                tracing::debug!(error = %rollback_err, "savepoint rollback failed");
            }
            Err(err)
        }
    }
}

// ============================================
// Hosts
// ============================================

/// Resolve the emitting host's dimension row. Hosts carry no usage counter,
/// only seen-timestamps.
pub(crate) async fn resolve_host<C>(conn: &C, hostname: &str, now: NaiveDateTime) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    if let Some(id) = touch_host(conn, hostname, now).await? {
        return Ok(id);
    }

    let insert = Query::insert()
        .into_table(Hosts::Table)
        .columns([Hosts::Hostname, Hosts::FirstSeen, Hosts::LastSeen])
        .values_panic([hostname.into(), now.into(), now.into()])
        .to_owned();

    match insert_dimension(conn, insert).await {
        Ok(id) => Ok(id),
        Err(err) if is_unique_violation(&err) => touch_host(conn, hostname, now)
            .await?
            .ok_or_else(|| Error::Storage("host row missing after conflict".to_string())),
        Err(err) => Err(err),
    }
}

async fn touch_host<C>(conn: &C, hostname: &str, now: NaiveDateTime) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let select = Query::select()
        .column(Hosts::Id)
        .from(Hosts::Table)
        .and_where(Expr::col(Hosts::Hostname).eq(hostname))
        .limit(1)
        .to_owned();

    let Some(row) = query_one(conn, &select).await? else {
        return Ok(None);
    };
    let id: i64 = row.try_get("", "id")?;

    let update = Query::update()
        .table(Hosts::Table)
        .value(Hosts::LastSeen, now)
        .and_where(Expr::col(Hosts::Id).eq(id))
        .to_owned();
    exec(conn, &update).await?;

    Ok(Some(id))
}

// ============================================
// Proxy endpoints
// ============================================

/// Resolve a proxy endpoint row. `key` uses the empty string for "endpoint
/// only, no named key"; callers short-circuit before here when no endpoint is
/// in play at all.
pub(crate) async fn resolve_proxy<C>(
    conn: &C,
    key: &str,
    endpoint: &str,
    now: NaiveDateTime,
) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    if let Some(id) = touch_proxy(conn, key, endpoint, now).await? {
        return Ok(id);
    }

    let insert = Query::insert()
        .into_table(ProxyEndpoints::Table)
        .columns([
            ProxyEndpoints::ProxyKey,
            ProxyEndpoints::Endpoint,
            ProxyEndpoints::FirstSeen,
            ProxyEndpoints::LastSeen,
            ProxyEndpoints::UseCount,
        ])
        .values_panic([
            key.into(),
            endpoint.into(),
            now.into(),
            now.into(),
            1i64.into(),
        ])
        .to_owned();

    match insert_dimension(conn, insert).await {
        Ok(id) => Ok(id),
        Err(err) if is_unique_violation(&err) => touch_proxy(conn, key, endpoint, now)
            .await?
            .ok_or_else(|| Error::Storage("proxy row missing after conflict".to_string())),
        Err(err) => Err(err),
    }
}

async fn touch_proxy<C>(
    conn: &C,
    key: &str,
    endpoint: &str,
    now: NaiveDateTime,
) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let select = Query::select()
        .column(ProxyEndpoints::Id)
        .from(ProxyEndpoints::Table)
        .and_where(Expr::col(ProxyEndpoints::ProxyKey).eq(key))
        .and_where(Expr::col(ProxyEndpoints::Endpoint).eq(endpoint))
        .limit(1)
        .to_owned();

    let Some(row) = query_one(conn, &select).await? else {
        return Ok(None);
    };
    let id: i64 = row.try_get("", "id")?;

    let update = Query::update()
        .table(ProxyEndpoints::Table)
        .value(ProxyEndpoints::LastSeen, now)
        .value(
            ProxyEndpoints::UseCount,
            Expr::col(ProxyEndpoints::UseCount).add(1),
        )
        .and_where(Expr::col(ProxyEndpoints::Id).eq(id))
        .to_owned();
    exec(conn, &update).await?;

    Ok(Some(id))
}

// ============================================
// Browser connections
// ============================================

/// Resolve a browser connection row, keyed on the endpoint URL plus the
/// fetch backend that used it.
pub(crate) async fn resolve_browser_connection<C>(
    conn: &C,
    connection_url: &str,
    fetch_backend: &str,
    now: NaiveDateTime,
) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    if let Some(id) = touch_browser_connection(conn, connection_url, fetch_backend, now).await? {
        return Ok(id);
    }

    let insert = Query::insert()
        .into_table(BrowserConnections::Table)
        .columns([
            BrowserConnections::ConnectionUrl,
            BrowserConnections::FetchBackend,
            BrowserConnections::FirstSeen,
            BrowserConnections::LastSeen,
            BrowserConnections::UseCount,
        ])
        .values_panic([
            connection_url.into(),
            fetch_backend.into(),
            now.into(),
            now.into(),
            1i64.into(),
        ])
        .to_owned();

    match insert_dimension(conn, insert).await {
        Ok(id) => Ok(id),
        Err(err) if is_unique_violation(&err) => {
            touch_browser_connection(conn, connection_url, fetch_backend, now)
                .await?
                .ok_or_else(|| {
                    Error::Storage("browser connection row missing after conflict".to_string())
                })
        }
        Err(err) => Err(err),
    }
}

async fn touch_browser_connection<C>(
    conn: &C,
    connection_url: &str,
    fetch_backend: &str,
    now: NaiveDateTime,
) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let select = Query::select()
        .column(BrowserConnections::Id)
        .from(BrowserConnections::Table)
        .and_where(Expr::col(BrowserConnections::ConnectionUrl).eq(connection_url))
        .and_where(Expr::col(BrowserConnections::FetchBackend).eq(fetch_backend))
        .limit(1)
        .to_owned();

    let Some(row) = query_one(conn, &select).await? else {
        return Ok(None);
    };
    let id: i64 = row.try_get("", "id")?;

    let update = Query::update()
        .table(BrowserConnections::Table)
        .value(BrowserConnections::LastSeen, now)
        .value(
            BrowserConnections::UseCount,
            Expr::col(BrowserConnections::UseCount).add(1),
        )
        .and_where(Expr::col(BrowserConnections::Id).eq(id))
        .to_owned();
    exec(conn, &update).await?;

    Ok(Some(id))
}

// ============================================
// Watch identities
// ============================================

/// Resolve the watch's identity row for its current URL.
///
/// The uniqueness key is the content-addressed hash over `(uuid, url)`,
/// recomputed here on every call: a URL change resolves to a fresh row and
/// the old one keeps its history. The processor tag is overwritten on every
/// resolve; only the latest value is kept per identity.
pub(crate) async fn resolve_watch<C>(conn: &C, watch: &WatchSpec, now: NaiveDateTime) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    let identity_hash = watch.identity_hash();

    if let Some(id) = touch_watch(conn, &identity_hash, watch.processor.as_deref(), now).await? {
        return Ok(id);
    }

    let insert = Query::insert()
        .into_table(WatchIdentities::Table)
        .columns([
            WatchIdentities::IdentityHash,
            WatchIdentities::WatchUuid,
            WatchIdentities::WatchUrl,
            WatchIdentities::Processor,
            WatchIdentities::FirstSeen,
            WatchIdentities::LastSeen,
            WatchIdentities::UseCount,
        ])
        .values_panic([
            identity_hash.clone().into(),
            watch.uuid.to_string().into(),
            watch.url.clone().into(),
            watch.processor.clone().into(),
            now.into(),
            now.into(),
            1i64.into(),
        ])
        .to_owned();

    match insert_dimension(conn, insert).await {
        Ok(id) => Ok(id),
        Err(err) if is_unique_violation(&err) => {
            touch_watch(conn, &identity_hash, watch.processor.as_deref(), now)
                .await?
                .ok_or_else(|| Error::Storage("watch row missing after conflict".to_string()))
        }
        Err(err) => Err(err),
    }
}

async fn touch_watch<C>(
    conn: &C,
    identity_hash: &str,
    processor: Option<&str>,
    now: NaiveDateTime,
) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let select = Query::select()
        .column(WatchIdentities::Id)
        .from(WatchIdentities::Table)
        .and_where(Expr::col(WatchIdentities::IdentityHash).eq(identity_hash))
        .limit(1)
        .to_owned();

    let Some(row) = query_one(conn, &select).await? else {
        return Ok(None);
    };
    let id: i64 = row.try_get("", "id")?;

    let update = Query::update()
        .table(WatchIdentities::Table)
        .value(WatchIdentities::LastSeen, now)
        .value(WatchIdentities::Processor, processor.map(str::to_owned))
        .value(
            WatchIdentities::UseCount,
            Expr::col(WatchIdentities::UseCount).add(1),
        )
        .and_where(Expr::col(WatchIdentities::Id).eq(id))
        .to_owned();
    exec(conn, &update).await?;

    Ok(Some(id))
}

// ============================================
// Error categories
// ============================================

/// Resolve an error category row by its label.
pub(crate) async fn resolve_error_category<C>(
    conn: &C,
    label: &str,
    now: NaiveDateTime,
) -> Result<i64>
where
    C: ConnectionTrait + TransactionTrait,
{
    if let Some(id) = touch_error_category(conn, label, now).await? {
        return Ok(id);
    }

    let insert = Query::insert()
        .into_table(ErrorCategories::Table)
        .columns([
            ErrorCategories::Label,
            ErrorCategories::FirstSeen,
            ErrorCategories::LastSeen,
            ErrorCategories::OccurrenceCount,
        ])
        .values_panic([label.into(), now.into(), now.into(), 1i64.into()])
        .to_owned();

    match insert_dimension(conn, insert).await {
        Ok(id) => Ok(id),
        Err(err) if is_unique_violation(&err) => touch_error_category(conn, label, now)
            .await?
            .ok_or_else(|| Error::Storage("error category row missing after conflict".to_string())),
        Err(err) => Err(err),
    }
}

async fn touch_error_category<C>(conn: &C, label: &str, now: NaiveDateTime) -> Result<Option<i64>>
where
    C: ConnectionTrait,
{
    let select = Query::select()
        .column(ErrorCategories::Id)
        .from(ErrorCategories::Table)
        .and_where(Expr::col(ErrorCategories::Label).eq(label))
        .limit(1)
        .to_owned();

    let Some(row) = query_one(conn, &select).await? else {
        return Ok(None);
    };
    let id: i64 = row.try_get("", "id")?;

    let update = Query::update()
        .table(ErrorCategories::Table)
        .value(ErrorCategories::LastSeen, now)
        .value(
            ErrorCategories::OccurrenceCount,
            Expr::col(ErrorCategories::OccurrenceCount).add(1),
        )
        .and_where(Expr::col(ErrorCategories::Id).eq(id))
        .to_owned();
    exec(conn, &update).await?;

    Ok(Some(id))
}
