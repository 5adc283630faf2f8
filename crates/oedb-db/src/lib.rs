//! Storage layer for the oedb event database.
//!
//! This crate composes parameterized queries against `PostgreSQL`/`PostGIS`,
//! which owns the spatial index, geometry algebra, interval overlap tests,
//! and transaction isolation.
//!
//! # Modules
//!
//! - [`postgres`] -- connection pool configuration and migrations
//! - [`temporal`] -- absolute/relative time token resolution
//! - [`predicate`] -- typed search predicates compiled to parameterized SQL
//! - [`geometry`] -- content-addressable geometry storage
//! - [`repository`] -- event search and mutation with secret authorization
//! - [`error`] -- the storage error taxonomy

pub mod error;
pub mod geometry;
pub mod postgres;
pub mod predicate;
pub mod repository;
pub mod temporal;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use postgres::{PostgresConfig, PostgresPool};
pub use predicate::{ExternalIdKey, GeomMode, SearchPredicate, SpatialFilter};
pub use repository::{
    EventRepository, EventRow, RecentWhatSummary, StatsSummary, WriteOutcome,
};
pub use temporal::{TimeBound, TimeRange};
