//! Shared client-side query engine for REST APIs with paginated
//! collection endpoints.
//!
//! Provides token-based authentication with single-flight refresh, a
//! rate-limit-aware HTTP layer, a schema-free document model with
//! memoized on-demand properties, and a builder-configured query
//! pipeline that hides pagination, filtering, and enrichment from the
//! consumer.
//!
//! # Modules
//!
//! - [`auth`] — Token lifecycle: exchange, expiry tracking, single-flight refresh, revocation.
//! - [`cache`] — Per-connection response cache keyed by cache name and request identity.
//! - [`connection`] — Authenticated endpoint handle executing [`ApiRequest`](connection::ApiRequest)s.
//! - [`document`] — Order-preserving [`Document`]/[`Value`] model with lazy property slots.
//! - [`error`] — Typed error hierarchy ([`Error`]) for all library operations.
//! - [`lazy`] — On-demand property resolution with configurable failure policies.
//! - [`paging`] — Pagination cursor and protocol strategies (offset/limit, start/limit).
//! - [`path`] — Dotted-path evaluation over documents and `${path}` template expansion.
//! - [`preprocess`] — Per-document filters and enrichers run before delivery.
//! - [`query`] — The [`QueryBuilder`]/[`Query`] pipeline and pagination loop.
//! - [`retry`] — Rate-limit retry policy with header-driven backoff.
//! - [`transport`] — The [`HttpTransport`](transport::HttpTransport) seam and its reqwest implementation.
//!
//! # Quick Start
//!
//! ```ignore
//! use restq::connection::Connection;
//! use restq::paging::OffsetLimit;
//! use restq::preprocess::{FieldFilter, MatchMode};
//! use restq::query::Query;
//! use std::sync::Arc;
//!
//! let conn = Arc::new(
//!     Connection::builder("https://ssc.example.com/api/v1")
//!         .credentials("auditor", "secret")
//!         .token_endpoint("tokens")
//!         .build()?,
//! );
//! let releases = Query::builder(conn)
//!     .append_path("projectVersions")
//!     .paging(OffsetLimit)
//!     .pre_processor(FieldFilter::new("committed", true, MatchMode::Include))
//!     .build()?
//!     .get_all()?;
//! ```

#![warn(missing_docs)]

pub mod auth;
pub mod cache;
pub mod connection;
pub mod document;
pub mod error;
pub mod lazy;
pub mod paging;
pub mod path;
pub mod preprocess;
pub mod query;
pub mod retry;
pub mod transport;

pub use document::{Document, DocumentList, Value};
pub use error::{Error, Result};
pub use query::{Query, QueryBuilder};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the guard if a holder panicked. All state
/// behind our mutexes stays consistent across panics (writes are single
/// assignments), so poisoning never invalidates it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
