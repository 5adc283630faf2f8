//! Shared type definitions for the oedb event database.
//!
//! This crate is the single source of truth for types used across the oedb
//! workspace: the event identifier, the GeoJSON write body, and the
//! open-ended tag map.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for event identifiers
//! - [`feature`] -- GeoJSON Feature write body and the tag map alias

pub mod feature;
pub mod ids;

// Re-export all public types at crate root for convenience.
pub use feature::{TagMap, WriteBody};
pub use ids::EventId;
