//! # Data Retrieval Module
//!
//! A centralized location for the HTTP client every feed adapter shares.
//!
//! ## Contained Modules:
//!
//! - **`ky_http`**: `ApiClient`, built on `reqwest` and `reqwest-middleware`,
//!   with a request timeout and optional transient-retry middleware.
//!
//! Source adapters only deal with parsing; status checks, timeouts and
//! error typing live here.

/// Shared HTTP client for feed polling.
pub mod ky_http;

pub use ky_http::{ApiClient, ApiResponse, ClientOptions, FetchError};
