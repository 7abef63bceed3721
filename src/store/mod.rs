//! Storage layer for watchlog
//!
//! This module provides the relational storage adapter:
//! - Backend selection by connection URL (SQLite, PostgreSQL, MySQL)
//! - Connection pooling with bounded acquire timeouts
//! - Idempotent schema bootstrap
//! - Get-or-create dimension resolvers and the two-phase event write
//!
//! Statements are composed with the sea-query builders and rendered per
//! dialect, following the same pattern for every call: build, bind, run.

pub mod dimensions;
pub mod events;
pub mod schema;

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use sea_orm::sea_query::{
    Alias, InsertStatement, MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter,
    SqliteQueryBuilder,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, ExecResult,
    QueryResult, SqlErr, Statement,
};
use std::time::Duration;

/// Handle to the relational store: a pooled connection plus the dialect it
/// speaks. Constructed once per process, injected where needed, never torn
/// down before exit.
pub struct Store {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
}

impl Store {
    /// Connect, apply pool settings, and bootstrap the schema.
    pub async fn connect(url: &str, config: &StorageConfig) -> Result<Self> {
        let mut options = ConnectOptions::new(url.to_owned());
        options
            .max_connections(config.pool_size)
            .min_connections(0)
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .acquire_timeout(Duration::from_millis(config.acquire_timeout_ms))
            .test_before_acquire(true)
            .sqlx_logging(false);

        let conn = Database::connect(options).await?;
        let backend = conn.get_database_backend();

        if backend == DatabaseBackend::Sqlite {
            // WAL keeps concurrent check workers from tripping over the
            // single-writer lock on every insert.
            conn.execute_unprepared("PRAGMA journal_mode = WAL").await?;
            conn.execute_unprepared("PRAGMA synchronous = NORMAL").await?;
            conn.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }

        schema::bootstrap(&conn).await?;

        Ok(Self { conn, backend })
    }

    /// The underlying pooled connection (for host integrations and tests)
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Which dialect this store speaks
    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }
}

/// Render a query statement for the connection's dialect and wrap it for
/// execution.
pub(crate) fn build_stmt<S>(backend: DatabaseBackend, stmt: &S) -> Statement
where
    S: QueryStatementWriter,
{
    let (sql, values) = match backend {
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    };
    Statement::from_sql_and_values(backend, sql, values)
}

pub(crate) async fn exec<C, S>(conn: &C, stmt: &S) -> Result<ExecResult>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    Ok(conn.execute(build_stmt(backend, stmt)).await?)
}

pub(crate) async fn query_one<C, S>(conn: &C, stmt: &S) -> Result<Option<QueryResult>>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    Ok(conn.query_one(build_stmt(backend, stmt)).await?)
}

/// Run an insert and return the generated `id`.
///
/// PostgreSQL reports no last-insert id through the driver, so the statement
/// grows a `RETURNING id` clause there; MySQL and SQLite use the session's
/// last-insert id.
pub(crate) async fn insert_returning_id<C>(conn: &C, stmt: &mut InsertStatement) -> Result<i64>
where
    C: ConnectionTrait,
{
    if conn.get_database_backend() == DatabaseBackend::Postgres {
        stmt.returning_col(Alias::new("id"));
        let row = query_one(conn, &*stmt)
            .await?
            .ok_or_else(|| Error::Storage("insert returned no row".to_string()))?;
        Ok(row.try_get("", "id")?)
    } else {
        let result = exec(conn, &*stmt).await?;
        Ok(result.last_insert_id() as i64)
    }
}

/// Whether an error is a uniqueness-constraint conflict, the expected
/// outcome when two workers race to create the same dimension row.
pub(crate) fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
        }
        _ => false,
    }
}
