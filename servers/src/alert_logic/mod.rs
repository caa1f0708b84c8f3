pub mod config;
pub mod downstream;
pub mod geojson;
pub mod query;
pub mod rate_limit;
pub mod state;
