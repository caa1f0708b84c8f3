use crate::alert_logic::config::Config;
use crate::alert_logic::rate_limit::RateLimiter;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lib_alerts::connections::{DisasterStore, MemoryStore, PostgresStore, StoreError};
use lib_alerts::core::{LedgerError, Pipeline, PipelineError, PoolError};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    // Currently open WebSocket sessions
    clients: Arc<AtomicUsize>,
    // Shared by every REST request; None when limiting is off
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline, clients: Arc::new(AtomicUsize::new(0)), rate_limiter: None }
    }

    /// Limits the REST API to `per_sec` requests per second across all
    /// clients. 0 turns limiting off.
    pub fn with_rate_limit(mut self, per_sec: u32) -> Self {
        self.rate_limiter = RateLimiter::per_second(per_sec);
        self
    }

    pub fn rate_limiter(&self) -> Option<Arc<RateLimiter>> {
        self.rate_limiter.clone()
    }

    pub fn client_connected(&self) -> usize {
        self.clients.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn client_disconnected(&self) -> usize {
        self.clients.fetch_sub(1, Ordering::Relaxed).saturating_sub(1)
    }

    pub fn clients(&self) -> usize {
        self.clients.load(Ordering::Relaxed)
    }
}

/// PostgreSQL when a database URL is configured, in-memory otherwise.
pub async fn open_store(config: &Config) -> Result<Arc<dyn DisasterStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.db_max_connections.unwrap_or(8)).await?;
            info!("Using PostgreSQL storage");
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, records are kept in memory only");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// # Application Error
///
/// Failures surfaced by the HTTP handlers, mapped onto status codes and JSON
/// error bodies.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("invalid request body: {0}")]
    BadRequest(String),
    #[error("rate limit exceeded")]
    RateLimited,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_json) = match &self {
            AppError::Store(StoreError::NotFound(id)) => {
                (StatusCode::NOT_FOUND, json!({ "error_type": "NotFound", "message": format!("no disaster with id {id}") }))
            }
            AppError::Store(e) | AppError::Ledger(LedgerError::Store(e)) => {
                error!("Storage error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({ "error_type": "StorageError", "message": "failed to fetch disasters", "detail": e.to_string() }),
                )
            }
            AppError::Pipeline(PipelineError::Pool(PoolError::Closed)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "error_type": "ShuttingDown", "message": "the pipeline is shutting down" }),
            ),
            AppError::Pipeline(e) => {
                error!("Pipeline error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error_type": "PipelineError", "message": e.to_string() }),
                )
            }
            AppError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                json!({ "error_type": "InvalidRequestBody", "message": "request body is not valid", "detail": detail }),
            ),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error_type": "RateLimited", "error": "rate limit exceeded" }),
            ),
        };
        (status, Json(error_json)).into_response()
    }
}
