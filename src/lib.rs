//! # watchlog
//!
//! Normalized request logging for monitored-target checks.
//!
//! watchlog records one event per check attempt into a relational store
//! (SQLite, PostgreSQL or MySQL), keeping repetitive attributes (hostnames,
//! proxy endpoints, browser connections, watch identity, error categories)
//! deduplicated in dimension tables instead of repeated on every row.
//!
//! This library provides:
//! - A transparent check wrapper that observes the fetch and detection
//!   phases and re-raises upstream failures unchanged
//! - Get-or-create dimension resolvers that are safe under concurrent
//!   workers racing on the same new value
//! - A two-phase event write: insert at check completion, finalize by id
//!   from the host's cleanup hook
//! - Silent degradation: logging failures never reach the host's check
//!   pipeline, and an unconfigured store makes the whole crate inert
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use watchlog::{Config, LoggedCheck, RequestLogger};
//! # use watchlog::{CheckUnit, SettingsSource, WatchSpec};
//! # async fn run<U: CheckUnit, S: SettingsSource>(unit: U, watch: WatchSpec, settings: S) {
//! let config = Config::resolve();
//! let logger: Arc<RequestLogger> = Arc::new(RequestLogger::connect(&config).await);
//!
//! // Per check: wrap, run both phases, then finalize from the cleanup path.
//! let mut check = LoggedCheck::new(unit, watch, &settings, logger.clone());
//! let outcome = async {
//!     check.fetch().await?;
//!     check.detect().await
//! }
//! .await;
//! let failure = outcome.err().map(|e| e.to_string());
//! check.conclude(failure.as_ref().map(|message| message as _)).await;
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, StorageBackend, StorageConfig};
pub use error::{Error, Result};
pub use observer::{CheckFailure, CheckPhase, CheckUnit, LoggedCheck};
pub use sink::{EventId, EventSink, RequestLogger};
pub use store::Store;
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod observer;
pub mod payload;
pub mod sink;
pub mod store;
pub mod types;
