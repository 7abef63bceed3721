//! Schema bootstrap
//!
//! Six tables: five dimension tables keyed on their natural uniqueness
//! constraint, plus the `check_events` fact table referencing them. The
//! schema is created idempotently on first connection; migrations beyond
//! that are an external concern.
//!
//! Everything is built through the sea-query builders so the same
//! definitions render correctly for SQLite, PostgreSQL and MySQL. The one
//! hand-written type is the event timestamp on MySQL, which needs
//! `DATETIME(3)` to keep millisecond precision.

use crate::error::Result;
use sea_orm::sea_query::{
    Alias, ColumnDef, ForeignKey, Index, IndexCreateStatement, MysqlQueryBuilder,
    PostgresQueryBuilder, SqliteQueryBuilder, Table, TableCreateStatement,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, Statement};
use sea_orm::DeriveIden;

#[derive(DeriveIden)]
pub enum Hosts {
    Table,
    Id,
    Hostname,
    FirstSeen,
    LastSeen,
}

#[derive(DeriveIden)]
pub enum ProxyEndpoints {
    Table,
    Id,
    ProxyKey,
    Endpoint,
    FirstSeen,
    LastSeen,
    UseCount,
}

#[derive(DeriveIden)]
pub enum BrowserConnections {
    Table,
    Id,
    ConnectionUrl,
    FetchBackend,
    FirstSeen,
    LastSeen,
    UseCount,
}

#[derive(DeriveIden)]
pub enum WatchIdentities {
    Table,
    Id,
    IdentityHash,
    WatchUuid,
    WatchUrl,
    Processor,
    FirstSeen,
    LastSeen,
    UseCount,
}

#[derive(DeriveIden)]
pub enum ErrorCategories {
    Table,
    Id,
    Label,
    FirstSeen,
    LastSeen,
    OccurrenceCount,
}

#[derive(DeriveIden)]
pub enum CheckEvents {
    Table,
    Id,
    AppInstance,
    HostId,
    WatchId,
    EventDate,
    EventTs,
    ProxyId,
    BrowserConnectionId,
    Steps,
    StepsCount,
    Result,
    DurationMs,
    ContentLength,
    StatusCode,
    ErrorCategoryId,
    ErrorDetail,
}

/// Create all tables and indexes if the schema is not present yet.
pub(crate) async fn bootstrap(conn: &DatabaseConnection) -> Result<()> {
    let backend = conn.get_database_backend();

    if schema_present(conn).await? {
        tracing::debug!("schema already present, skipping bootstrap");
        return Ok(());
    }

    tracing::info!(backend = ?backend, "creating watchlog schema");

    for table in table_statements(backend) {
        conn.execute_unprepared(&build_table(backend, &table)).await?;
    }

    for index in index_statements() {
        if let Err(err) = conn.execute_unprepared(&build_index(backend, &index)).await {
            // A concurrent writer may have bootstrapped between our presence
            // check and here; a pre-existing index is not a failure.
            if is_already_exists(&err) {
                continue;
            }
            return Err(err.into());
        }
    }

    Ok(())
}

/// Check whether the fact table exists on this connection's database.
async fn schema_present(conn: &DatabaseConnection) -> Result<bool> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = 'check_events'"
        }
        DatabaseBackend::MySql => {
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = 'check_events'"
        }
        _ => "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'check_events'",
    };

    let row = conn.query_one(Statement::from_string(backend, sql)).await?;
    Ok(row.is_some())
}

fn is_already_exists(err: &DbErr) -> bool {
    let message = err.to_string();
    message.contains("already exists") || message.contains("Duplicate key name")
}

fn build_table(backend: DatabaseBackend, stmt: &TableCreateStatement) -> String {
    match backend {
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

fn build_index(backend: DatabaseBackend, stmt: &IndexCreateStatement) -> String {
    match backend {
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

/// Millisecond-precision event timestamp; MySQL needs the precision spelled out.
fn event_ts_column(backend: DatabaseBackend) -> ColumnDef {
    let mut col = ColumnDef::new(CheckEvents::EventTs);
    match backend {
        DatabaseBackend::MySql => col.custom(Alias::new("DATETIME(3)")),
        _ => col.timestamp(),
    };
    col.not_null();
    col
}

/// Compressed-blob column for the step script.
fn steps_column(backend: DatabaseBackend) -> ColumnDef {
    let mut col = ColumnDef::new(CheckEvents::Steps);
    match backend {
        DatabaseBackend::Postgres => col.custom(Alias::new("BYTEA")),
        _ => col.custom(Alias::new("BLOB")),
    };
    col.null();
    col
}

fn table_statements(backend: DatabaseBackend) -> Vec<TableCreateStatement> {
    vec![
        Table::create()
            .table(Hosts::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(Hosts::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(Hosts::Hostname)
                    .string_len(255)
                    .not_null()
                    .unique_key(),
            )
            .col(ColumnDef::new(Hosts::FirstSeen).timestamp().not_null())
            .col(ColumnDef::new(Hosts::LastSeen).timestamp().not_null())
            .to_owned(),
        Table::create()
            .table(ProxyEndpoints::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ProxyEndpoints::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            // Empty string encodes "no key"; composite-unique over a NULL
            // column would not deduplicate on any of the three backends.
            .col(
                ColumnDef::new(ProxyEndpoints::ProxyKey)
                    .string_len(128)
                    .not_null()
                    .default(""),
            )
            .col(
                ColumnDef::new(ProxyEndpoints::Endpoint)
                    .string_len(512)
                    .not_null(),
            )
            .col(ColumnDef::new(ProxyEndpoints::FirstSeen).timestamp().not_null())
            .col(ColumnDef::new(ProxyEndpoints::LastSeen).timestamp().not_null())
            .col(
                ColumnDef::new(ProxyEndpoints::UseCount)
                    .big_integer()
                    .not_null()
                    .default(0),
            )
            .to_owned(),
        Table::create()
            .table(BrowserConnections::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(BrowserConnections::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(BrowserConnections::ConnectionUrl)
                    .string_len(512)
                    .not_null(),
            )
            .col(
                ColumnDef::new(BrowserConnections::FetchBackend)
                    .string_len(64)
                    .not_null(),
            )
            .col(
                ColumnDef::new(BrowserConnections::FirstSeen)
                    .timestamp()
                    .not_null(),
            )
            .col(
                ColumnDef::new(BrowserConnections::LastSeen)
                    .timestamp()
                    .not_null(),
            )
            .col(
                ColumnDef::new(BrowserConnections::UseCount)
                    .big_integer()
                    .not_null()
                    .default(0),
            )
            .to_owned(),
        Table::create()
            .table(WatchIdentities::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(WatchIdentities::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(WatchIdentities::IdentityHash)
                    .char_len(64)
                    .not_null()
                    .unique_key(),
            )
            .col(
                ColumnDef::new(WatchIdentities::WatchUuid)
                    .string_len(36)
                    .not_null(),
            )
            .col(
                ColumnDef::new(WatchIdentities::WatchUrl)
                    .string_len(2048)
                    .not_null(),
            )
            .col(ColumnDef::new(WatchIdentities::Processor).string_len(64).null())
            .col(
                ColumnDef::new(WatchIdentities::FirstSeen)
                    .timestamp()
                    .not_null(),
            )
            .col(
                ColumnDef::new(WatchIdentities::LastSeen)
                    .timestamp()
                    .not_null(),
            )
            .col(
                ColumnDef::new(WatchIdentities::UseCount)
                    .big_integer()
                    .not_null()
                    .default(0),
            )
            .to_owned(),
        Table::create()
            .table(ErrorCategories::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(ErrorCategories::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(ErrorCategories::Label)
                    .string_len(128)
                    .not_null()
                    .unique_key(),
            )
            .col(
                ColumnDef::new(ErrorCategories::FirstSeen)
                    .timestamp()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ErrorCategories::LastSeen)
                    .timestamp()
                    .not_null(),
            )
            .col(
                ColumnDef::new(ErrorCategories::OccurrenceCount)
                    .big_integer()
                    .not_null()
                    .default(0),
            )
            .to_owned(),
        Table::create()
            .table(CheckEvents::Table)
            .if_not_exists()
            .col(
                ColumnDef::new(CheckEvents::Id)
                    .big_integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(
                ColumnDef::new(CheckEvents::AppInstance)
                    .string_len(64)
                    .not_null(),
            )
            .col(ColumnDef::new(CheckEvents::HostId).big_integer().not_null())
            .col(ColumnDef::new(CheckEvents::WatchId).big_integer().not_null())
            // The date duplicates the timestamp on purpose: it is the
            // partition/pruning key for the analytics indexes below.
            .col(ColumnDef::new(CheckEvents::EventDate).date().not_null())
            .col(&mut event_ts_column(backend))
            .col(ColumnDef::new(CheckEvents::ProxyId).big_integer().null())
            .col(
                ColumnDef::new(CheckEvents::BrowserConnectionId)
                    .big_integer()
                    .null(),
            )
            .col(&mut steps_column(backend))
            .col(
                ColumnDef::new(CheckEvents::StepsCount)
                    .integer()
                    .not_null()
                    .default(0),
            )
            .col(ColumnDef::new(CheckEvents::Result).string_len(32).not_null())
            .col(ColumnDef::new(CheckEvents::DurationMs).integer().null())
            .col(ColumnDef::new(CheckEvents::ContentLength).integer().null())
            .col(ColumnDef::new(CheckEvents::StatusCode).integer().null())
            .col(
                ColumnDef::new(CheckEvents::ErrorCategoryId)
                    .big_integer()
                    .null(),
            )
            .col(ColumnDef::new(CheckEvents::ErrorDetail).text().null())
            .foreign_key(
                ForeignKey::create()
                    .name("fk_check_events_host")
                    .from(CheckEvents::Table, CheckEvents::HostId)
                    .to(Hosts::Table, Hosts::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_check_events_watch")
                    .from(CheckEvents::Table, CheckEvents::WatchId)
                    .to(WatchIdentities::Table, WatchIdentities::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_check_events_proxy")
                    .from(CheckEvents::Table, CheckEvents::ProxyId)
                    .to(ProxyEndpoints::Table, ProxyEndpoints::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_check_events_browser")
                    .from(CheckEvents::Table, CheckEvents::BrowserConnectionId)
                    .to(BrowserConnections::Table, BrowserConnections::Id),
            )
            .foreign_key(
                ForeignKey::create()
                    .name("fk_check_events_error")
                    .from(CheckEvents::Table, CheckEvents::ErrorCategoryId)
                    .to(ErrorCategories::Table, ErrorCategories::Id),
            )
            .to_owned(),
    ]
}

fn index_statements() -> Vec<IndexCreateStatement> {
    vec![
        Index::create()
            .name("uk_proxy_endpoint")
            .table(ProxyEndpoints::Table)
            .col(ProxyEndpoints::ProxyKey)
            .col(ProxyEndpoints::Endpoint)
            .unique()
            .to_owned(),
        Index::create()
            .name("uk_browser_connection")
            .table(BrowserConnections::Table)
            .col(BrowserConnections::ConnectionUrl)
            .col(BrowserConnections::FetchBackend)
            .unique()
            .to_owned(),
        Index::create()
            .name("idx_watch_identities_uuid")
            .table(WatchIdentities::Table)
            .col(WatchIdentities::WatchUuid)
            .to_owned(),
        // Query-pattern indexes for the fact table
        Index::create()
            .name("idx_check_events_date_app")
            .table(CheckEvents::Table)
            .col(CheckEvents::EventDate)
            .col(CheckEvents::AppInstance)
            .col(CheckEvents::EventTs)
            .to_owned(),
        Index::create()
            .name("idx_check_events_watch_date")
            .table(CheckEvents::Table)
            .col(CheckEvents::WatchId)
            .col(CheckEvents::EventDate)
            .to_owned(),
        Index::create()
            .name("idx_check_events_host_date")
            .table(CheckEvents::Table)
            .col(CheckEvents::HostId)
            .col(CheckEvents::EventDate)
            .to_owned(),
        Index::create()
            .name("idx_check_events_proxy_date")
            .table(CheckEvents::Table)
            .col(CheckEvents::ProxyId)
            .col(CheckEvents::EventDate)
            .to_owned(),
        Index::create()
            .name("idx_check_events_analytics")
            .table(CheckEvents::Table)
            .col(CheckEvents::EventDate)
            .col(CheckEvents::AppInstance)
            .col(CheckEvents::HostId)
            .col(CheckEvents::Result)
            .col(CheckEvents::DurationMs)
            .to_owned(),
    ]
}
