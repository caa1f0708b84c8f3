//! # Data Model
//!
//! Canonical record types shared by every stage of the pipeline.
//!
//! - **`disaster`**: the [`DisasterEvent`] record and its closed enums.
//! - **`filter`**: [`EventFilter`], the AND-combined predicate set used by
//!   queries, storage and live sessions.

/// The canonical event record and its enums.
pub mod disaster;
/// Optional, AND-combined record predicates.
pub mod filter;

pub use disaster::{Category, DisasterEvent, ParseEnumError, SeverityLevel, SourceKind};
pub use filter::{EventFilter, DEFAULT_LIMIT, MAX_LIMIT};
