//! # Connections Module
//!
//! This module holds the persistence collaborator the pipeline writes to and
//! queries from. The pipeline only ever sees the [`DisasterStore`] trait; the
//! concrete backend is chosen once at startup.
//!
//! ## Contained Modules:
//!
//! - **`store`**: the [`DisasterStore`] contract and [`StoreError`].
//! - **`memory_store`**: process-local backend used without a database and in tests.
//! - **`db_postgres`**: `deadpool-postgres` backend (feature `postgres`).

/// The storage contract shared by every backend.
pub mod store;

/// In-memory backend.
pub mod memory_store;

/// Module for PostgreSQL database connection pooling and management.
#[cfg(feature = "postgres")]
pub mod db_postgres;

pub use memory_store::MemoryStore;
pub use store::{DisasterStore, StoreError};

#[cfg(feature = "postgres")]
pub use db_postgres::PostgresStore;
