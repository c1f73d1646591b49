//! REST API for the scoreboard UI
//!
//! Exposes the sync engine to the UI layer: connection control, match data
//! updates, overlay show/hide and status, input remapping and team logos.
//! Logo files are served statically under `/logos`.
//! Default port: 8126

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::drivers::KnownInput;
use crate::error::OpResult;
use crate::logos::LOGO_URL_DIR;
use crate::scoring::Side;
use crate::snapshot::MatchSnapshot;
use crate::sync::{ConnectionStatus, OverlayStatus, RemapTarget, SyncEngine};

/// Default API port
pub const DEFAULT_API_PORT: u16 = 8126;

/// Shared state for API handlers
pub struct ApiState {
    pub engine: SyncEngine,
    /// Broadcast channel for connection status changes
    pub status_tx: broadcast::Sender<ConnectionStatus>,
}

impl ApiState {
    pub fn new(engine: SyncEngine) -> Arc<Self> {
        let (status_tx, _) = broadcast::channel(16);
        let tx = status_tx.clone();
        engine.connection().on_status(Box::new(move |status| {
            // Best-effort broadcast (ignore if no subscribers)
            let _ = tx.send(status);
        }));
        Arc::new(Self { engine, status_tx })
    }
}

/// Request body for connect / test-connection
#[derive(Debug, Deserialize)]
pub struct EndpointRequest {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatchQuery {
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Deserialize)]
pub struct LogoRequest {
    pub base64: String,
}

#[derive(Debug, Serialize)]
pub struct LogoResponse {
    pub path: String,
}

/// Configured input with its live overlay status
#[derive(Debug, Serialize)]
pub struct InputSummary {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    pub overlay_layer: u8,
    #[serde(flatten)]
    pub overlay: OverlayStatus,
}

/// API error response
#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn bad_request(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.to_string(),
        }
    }

    fn not_found(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    let mut router = Router::new()
        .route("/api/health", get(health_check))
        .route("/api/status", get(get_status))
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/api/test-connection", post(test_connection))
        .route("/api/match", post(update_match))
        .route("/api/match/load", post(load_match))
        .route("/api/inputs", get(list_inputs))
        .route("/api/inputs/:id/overlay", get(get_overlay))
        .route("/api/inputs/:id/show", post(show_overlay))
        .route("/api/inputs/:id/hide", post(hide_overlay))
        .route("/api/inputs/:id/remap", post(remap_input))
        .route("/api/vmix/inputs", get(list_vmix_inputs))
        .route("/api/logos/:slot", put(save_logo).delete(remove_logo))
        .route("/api/teams/swap", post(swap_teams))
        .route("/api/ws/status", get(status_ws));

    if let Some(logos) = state.engine.logos() {
        router = router.nest_service(
            &format!("/{}", LOGO_URL_DIR),
            ServeDir::new(logos.dir().to_path_buf()),
        );
    }

    router.layer(CorsLayer::permissive()).with_state(state)
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// GET /api/status - Committed connection status
async fn get_status(State(state): State<Arc<ApiState>>) -> Json<ConnectionStatus> {
    Json(state.engine.connection_status())
}

/// POST /api/connect - Connect to vMix and persist the endpoint
async fn connect(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<EndpointRequest>,
) -> Json<OpResult> {
    Json(state.engine.connect(&req.host, req.port).await)
}

/// POST /api/disconnect
async fn disconnect(State(state): State<Arc<ApiState>>) -> Json<OpResult> {
    Json(state.engine.disconnect().await)
}

/// POST /api/test-connection - Probe an endpoint without connecting
async fn test_connection(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<EndpointRequest>,
) -> Json<OpResult> {
    Json(state.engine.test_connection(&req.host, req.port).await)
}

/// POST /api/match?force=bool - Queue a new state snapshot
async fn update_match(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MatchQuery>,
    Json(snapshot): Json<Value>,
) -> StatusCode {
    state
        .engine
        .update_match_data(MatchSnapshot::new(snapshot), query.force);
    StatusCode::ACCEPTED
}

/// POST /api/match/load - A stored state record was opened; logos are reconciled
async fn load_match(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<MatchQuery>,
    Json(snapshot): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state
        .engine
        .load_match(snapshot, query.force)
        .await
        .map_err(|e| ApiError::bad_request(format!("{:#}", e)))?;
    Ok(Json(snapshot.root().clone()))
}

/// GET /api/inputs - Configured inputs in display order
async fn list_inputs(State(state): State<Arc<ApiState>>) -> Json<Vec<InputSummary>> {
    let engine = &state.engine;
    let inputs = engine
        .store()
        .ordered_inputs()
        .into_iter()
        .map(|input| InputSummary {
            overlay: engine.overlay_status(&input.id),
            display_name: input.label().to_string(),
            enabled: input.enabled,
            overlay_layer: input.overlay_layer,
            id: input.id,
        })
        .collect();
    Json(inputs)
}

/// GET /api/inputs/:id/overlay - Overlay status of one input
async fn get_overlay(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<OverlayStatus>, ApiError> {
    if state.engine.store().input(&id).is_none() {
        return Err(ApiError::not_found(format!("Unknown input '{}'", id)));
    }
    Ok(Json(state.engine.overlay_status(&id)))
}

/// POST /api/inputs/:id/show
async fn show_overlay(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Json<OpResult> {
    Json(state.engine.show_overlay(&id).await)
}

/// POST /api/inputs/:id/hide
async fn hide_overlay(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Json<OpResult> {
    Json(state.engine.hide_overlay(&id).await)
}

/// POST /api/inputs/:id/remap - Point an input at another vMix input
async fn remap_input(
    Path(id): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(target): Json<RemapTarget>,
) -> Json<OpResult> {
    Json(state.engine.remap(&id, target).await)
}

/// GET /api/vmix/inputs - Inputs currently known to vMix
async fn list_vmix_inputs(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<KnownInput>>, ApiError> {
    state
        .engine
        .list_known_inputs()
        .await
        .map(Json)
        .map_err(ApiError::bad_request)
}

fn parse_slot(slot: &str) -> Result<Side, ApiError> {
    Side::parse(slot).ok_or_else(|| {
        ApiError::bad_request(format!("Invalid team slot '{}'. Use 'A' or 'B'.", slot))
    })
}

/// PUT /api/logos/:slot - Store a team logo
async fn save_logo(
    Path(slot): Path<String>,
    State(state): State<Arc<ApiState>>,
    Json(req): Json<LogoRequest>,
) -> Result<Json<LogoResponse>, ApiError> {
    let slot = parse_slot(&slot)?;
    let path = state
        .engine
        .save_logo(&req.base64, slot)
        .await
        .map_err(|e| ApiError::bad_request(format!("{:#}", e)))?;
    info!("Logo saved for team {}: {}", slot, path);
    Ok(Json(LogoResponse { path }))
}

/// DELETE /api/logos/:slot - Remove a team logo
async fn remove_logo(
    Path(slot): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<StatusCode, ApiError> {
    let slot = parse_slot(&slot)?;
    let logos = state
        .engine
        .logos()
        .ok_or_else(|| ApiError::bad_request("Logo storage is not configured"))?;
    logos
        .remove_logo(slot)
        .await
        .map_err(|e| ApiError::bad_request(format!("{:#}", e)))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/teams/swap - State after a side swap; logos are re-derived
async fn swap_teams(
    State(state): State<Arc<ApiState>>,
    Json(snapshot): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state
        .engine
        .on_teams_swapped(snapshot)
        .await
        .map_err(|e| ApiError::bad_request(format!("{:#}", e)))?;
    Ok(Json(snapshot.root().clone()))
}

/// GET /api/ws/status - WebSocket for connection status changes
async fn status_ws(ws: WebSocketUpgrade, State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let current = state.engine.connection_status();
    let rx = state.status_tx.subscribe();
    ws.on_upgrade(move |socket| handle_websocket(socket, current, rx))
}

async fn send_status(socket: &mut WebSocket, status: &ConnectionStatus) -> bool {
    match serde_json::to_string(status) {
        Ok(msg) => socket.send(Message::Text(msg)).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode status: {}", e);
            true
        },
    }
}

/// Handle WebSocket connection for status updates
async fn handle_websocket(
    mut socket: WebSocket,
    current: ConnectionStatus,
    mut rx: broadcast::Receiver<ConnectionStatus>,
) {
    debug!("WebSocket client connected for status updates");

    if !send_status(&mut socket, &current).await {
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(status) => {
                        if !send_status(&mut socket, &status).await {
                            debug!("WebSocket client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("WebSocket client lagged by {} messages", n);
                    }
                }
            }
            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client closed connection");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

/// Start the API server
pub async fn start_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("🌐 Starting control API on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
