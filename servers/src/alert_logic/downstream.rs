use crate::alert_logic::geojson::{Feature, FeatureCollection, GEOJSON_CONTENT_TYPE};
use crate::alert_logic::query::DisasterQuery;
use crate::alert_logic::rate_limit::limit_requests;
use crate::alert_logic::state::{AppError, AppState};
use anyhow::Context;
use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use lib_alerts::core::{EventSink, SinkError};
use lib_alerts::models::{Category, DisasterEvent, EventFilter, SeverityLevel, SourceKind};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub async fn run(addr: SocketAddr, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    info!("Downstream server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Downstream server shutting down.");
        })
        .await
        .context("downstream server failed")?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let mut api = Router::new()
        .route("/api/disasters", get(list_handler))
        .route("/api/disasters/ack", post(ack_handler))
        .route("/api/disasters/{id}", get(get_handler))
        .route("/api/debug/inject", post(inject_handler));
    if let Some(limiter) = state.rate_limiter() {
        api = api.route_layer(middleware::from_fn_with_state(limiter, limit_requests));
    }

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .merge(api)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.pipeline.stats();
    let body = json!({
        "subscribers": state.pipeline.broadcaster().subscriber_count(),
        "clients": state.clients(),
        "persisted": stats.persisted,
        "broadcast": stats.broadcast,
        "duplicates": stats.duplicates,
        "failed": stats.failed,
    });
    match state.pipeline.store().ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok", "pipeline": body }))),
        Err(e) => {
            warn!("Health check: storage unavailable: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "detail": e.to_string(), "pipeline": body })),
            )
        }
    }
}

async fn list_handler(
    State(state): State<AppState>,
    Query(query): Query<DisasterQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = query.into_filter();
    let events = state.pipeline.query().list(&filter).await?;
    debug!(count = events.len(), ?filter, "listed disasters");
    let collection: FeatureCollection = events.into_iter().collect();
    Ok(([(header::CONTENT_TYPE, GEOJSON_CONTENT_TYPE)], Json(collection)))
}

async fn get_handler(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, AppError> {
    let event = state.pipeline.query().get(&id).await?;
    Ok(([(header::CONTENT_TYPE, GEOJSON_CONTENT_TYPE)], Json(Feature::from(event))))
}

#[derive(Debug, Deserialize)]
struct AckRequest {
    ids: Vec<String>,
}

async fn ack_handler(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, AppError> {
    let request: AckRequest = serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;
    let acknowledged = state.pipeline.ledger().mark_delivered(&request.ids).await?;
    Ok(Json(json!({ "acknowledged_count": acknowledged })))
}

/// Optional overrides for a synthetic record. An empty body injects a
/// magnitude 7.5 red-alert earthquake near Tokyo.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InjectRequest {
    id: Option<String>,
    #[serde(rename = "type")]
    category: Option<Category>,
    title: Option<String>,
    description: Option<String>,
    magnitude: Option<f64>,
    alert_level: Option<SeverityLevel>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    country: Option<String>,
    timestamp: Option<DateTime<Utc>>,
}

impl InjectRequest {
    fn into_event(self) -> DisasterEvent {
        let now = Utc::now();
        let native_id = self.id.unwrap_or_else(|| format!("test-{}", now.timestamp_nanos_opt().unwrap_or_default()));
        let category = self.category.unwrap_or(Category::Earthquake);
        let magnitude = self.magnitude.unwrap_or(7.5);
        DisasterEvent {
            title: self.title.unwrap_or_else(|| format!("Test {category} - M{magnitude}")),
            description: self.description.unwrap_or_else(|| "Injected test disaster".to_string()),
            magnitude,
            severity_level: self.alert_level.unwrap_or(SeverityLevel::Red),
            latitude: self.latitude.unwrap_or(35.6762),
            longitude: self.longitude.unwrap_or(139.6503),
            event_time: self.timestamp.unwrap_or(now),
            country: self.country.unwrap_or_else(|| "Japan".to_string()),
            ..DisasterEvent::new(SourceKind::Manual, &native_id, category)
        }
    }
}

async fn inject_handler(State(state): State<AppState>, body: Bytes) -> Result<impl IntoResponse, AppError> {
    let request: InjectRequest = if body.is_empty() {
        InjectRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };
    let event = request.into_event();
    let id = event.id.clone();
    let accepted = state.pipeline.inject(event).await?;
    info!(id = %id, accepted, "Injected test disaster");
    Ok(Json(json!({ "id": id, "accepted": accepted })))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<DisasterQuery>,
) -> impl IntoResponse {
    let filter = query.into_filter();
    ws.on_upgrade(move |socket| handle_socket(socket, state, filter))
}

#[derive(Serialize)]
struct ServerMessage<'a> {
    r#type: &'static str,
    data: &'a DisasterEvent,
}

/// Streams session records to the client as JSON text frames.
struct WsSink {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl EventSink for WsSink {
    async fn deliver(&mut self, event: &DisasterEvent) -> Result<(), SinkError> {
        let frame = serde_json::to_string(&ServerMessage { r#type: "disaster", data: event })
            .map_err(|e| SinkError(e.to_string()))?;
        self.sender.send(Message::Text(frame.into())).await.map_err(|e| SinkError(e.to_string()))
    }
}

async fn handle_socket(socket: WebSocket, state: AppState, filter: EventFilter) {
    let session = state.pipeline.open_session(filter);
    let session_id = session.id();
    let open = state.client_connected();
    info!("Client {} connected ({} open)", session_id, open);

    let (sender, mut receiver) = socket.split();
    let cancel = state.pipeline.cancel_token().child_token();

    // The client only ever talks to close the stream.
    let reader_cancel = cancel.clone();
    let reader = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        reader_cancel.cancel();
    });

    let mut sink = WsSink { sender };
    match session.run(&mut sink, cancel.clone()).await {
        Ok(summary) => info!(
            "Client {} session closed: {:?}, {} delivered, {} filtered out",
            session_id, summary.reason, summary.delivered, summary.discarded
        ),
        Err(e) => warn!("Client {} session failed: {}", session_id, e),
    }

    cancel.cancel();
    reader.abort();
    let _ = sink.sender.close().await;

    let open = state.client_disconnected();
    info!("Client {} disconnected ({} open)", session_id, open);
}
