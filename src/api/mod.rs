// HTTP API: lobby room lifecycle plus health/metrics.

pub mod ws;

use axum::{
    body::Body,
    extract::{Json, Path, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::engine::entities::Difficulty;
use crate::metrics;
use crate::rate_limit::ActionRateLimiter;
use crate::room::{RoomError, RoomRegistry};

// ── Request types ─────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub player_id: Option<String>,
    pub player_name: Option<String>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub vs_ai: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRequest {
    pub player_id: String,
    pub player_name: Option<String>,
}

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<RoomRegistry>,
    pub rate_limiter: ActionRateLimiter,
}

// ── Error helpers ─────────────────────────────────────────────────────

fn json_error(status: StatusCode, msg: &str) -> Response {
    (status, Json(json!({ "error": msg }))).into_response()
}

fn room_error(e: RoomError) -> Response {
    let status = match e {
        RoomError::NotFound => StatusCode::NOT_FOUND,
        RoomError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    json_error(status, &e.to_string())
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(registry: Arc<RoomRegistry>, rate_limiter: ActionRateLimiter) -> Router {
    let state = AppState {
        registry,
        rate_limiter,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/{id}/join", post(join_room))
        .route("/rooms/{id}/leave", post(leave_room))
        .route("/rooms/{id}/ready", post(ready_room))
        .route("/rooms/{id}/start", post(start_room))
        .route("/rooms/{id}/pause", post(pause_room))
        .route("/rooms/{id}/resume", post(resume_room))
        .route("/ws/rooms/{id}", get(ws::ws_room))
        .with_state(state)
}

/// Axum middleware that records per-request metrics (count and duration).
pub async fn metrics_middleware(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = metrics::normalize_path(req.uri().path());

    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let elapsed = start.elapsed().as_secs_f64();

    let status = response.status().as_u16().to_string();
    metrics::API_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();
    metrics::API_REQUEST_DURATION_SECONDS
        .with_label_values(&[&path])
        .observe(elapsed);

    response
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "skirmish-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    let body = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

async fn list_rooms(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "rooms": state.registry.list() }))
}

async fn create_room(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> impl IntoResponse {
    let room = state.registry.create_room(
        req.player_id,
        req.player_name,
        req.seed,
        req.difficulty,
        req.vs_ai,
    );
    (StatusCode::OK, Json(json!({ "room": room.info() }))).into_response()
}

async fn join_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Response {
    if req.player_id.is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "playerId is required");
    }
    match state.registry.join(&id, req.player_id, req.player_name) {
        Ok(room) => (StatusCode::OK, Json(json!({ "room": room.info() }))).into_response(),
        Err(e) => room_error(e),
    }
}

async fn leave_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Response {
    match state.registry.leave(&id, &req.player_id) {
        Ok(()) => {
            state.rate_limiter.forget(&req.player_id);
            let body = match state.registry.get(&id) {
                Some(room) => json!({ "room": room.info() }),
                None => json!({ "room": Value::Null }),
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => room_error(e),
    }
}

async fn ready_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Response {
    match state.registry.ready(&id, &req.player_id) {
        Ok(_) => match state.registry.get(&id) {
            Some(room) => (StatusCode::OK, Json(json!({ "room": room.info() }))).into_response(),
            None => json_error(StatusCode::NOT_FOUND, "Room not found"),
        },
        Err(e) => room_error(e),
    }
}

async fn start_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Response {
    match state.registry.start(&id, &req.player_id) {
        Ok(()) => match state.registry.get(&id) {
            Some(room) => (StatusCode::OK, Json(json!({ "room": room.info() }))).into_response(),
            None => json_error(StatusCode::NOT_FOUND, "Room not found"),
        },
        Err(e) => room_error(e),
    }
}

async fn pause_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Response {
    match state.registry.pause(&id, &req.player_id) {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => room_error(e),
    }
}

async fn resume_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<PlayerRequest>,
) -> Response {
    match state.registry.resume(&id, &req.player_id) {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))).into_response(),
        Err(e) => room_error(e),
    }
}
