use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::quantity::{Device, Quantity};
use crate::state::SharedState;
use crate::thresholds::Bounds;

const INDEX_HTML: &str = include_str!("ui/index.html");

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/thresholds", get(get_thresholds).post(post_thresholds))
        .route("/activate", post(activate))
        .route("/automatic", get(get_automatic).post(post_automatic))
        .route("/temp", get(|s: State<SharedState>| reading(s, Quantity::Temperature)))
        .route("/soil", get(|s: State<SharedState>| reading(s, Quantity::SoilHumidity)))
        .route("/co2", get(|s: State<SharedState>| reading(s, Quantity::Co2)))
        .route("/light", get(|s: State<SharedState>| reading(s, Quantity::Light)))
        .route("/water", get(|s: State<SharedState>| reading(s, Quantity::WaterLevel)))
        .route("/sensor/{quantity}", get(sensor_by_name))
        .route("/state/{device}", get(device_state))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    Json(st.to_status())
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

// ---------------------------------------------------------------------------
// Readings & device state
// ---------------------------------------------------------------------------

async fn reading(State(state): State<SharedState>, quantity: Quantity) -> Json<Value> {
    let value = state.write().await.read(quantity);
    Json(json!({ "value": value }))
}

async fn sensor_by_name(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Response {
    match name.parse::<Quantity>() {
        Ok(quantity) => reading(State(state), quantity).await.into_response(),
        Err(e) => error(StatusCode::NOT_FOUND, e.to_string()),
    }
}

/// Unknown devices read as off, same as the firmware always did.
async fn device_state(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Json<Value> {
    let st = state.read().await;
    Json(json!({ "value": st.actuators.get_by_name(&name) }))
}

// ---------------------------------------------------------------------------
// Manual control
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct ActivateRequest {
    device: String,
    state: bool,
}

async fn activate(State(state): State<SharedState>, body: Bytes) -> Response {
    if body.is_empty() {
        return error(StatusCode::BAD_REQUEST, "empty body");
    }
    let req: ActivateRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")),
    };
    let device: Device = match req.device.parse() {
        Ok(device) => device,
        Err(e) => return error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let changed = state.write().await.record_manual(device, req.state);
    Json(json!({
        "status": "updated",
        "device": device,
        "state": req.state,
        "changed": changed,
    }))
    .into_response()
}

#[derive(Deserialize)]
struct AutomaticRequest {
    enabled: bool,
}

async fn get_automatic(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "enabled": state.read().await.automatic }))
}

async fn post_automatic(State(state): State<SharedState>, body: Bytes) -> Response {
    let req: AutomaticRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")),
    };
    state.write().await.record_automatic(req.enabled);
    Json(json!({ "enabled": req.enabled })).into_response()
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

async fn get_thresholds(State(state): State<SharedState>) -> Json<Map<String, Value>> {
    let st = state.read().await;
    let body = st
        .thresholds
        .list()
        .into_iter()
        .map(|(q, t)| (q.as_str().to_string(), json!(Bounds::from(t))))
        .collect();
    Json(body)
}

/// Why a single key of a threshold update was not applied.
fn check_entry(key: &str, value: &Value) -> Result<(Quantity, Bounds), String> {
    let quantity = key.parse::<Quantity>().map_err(|e| e.to_string())?;
    let bounds: Bounds = serde_json::from_value(value.clone())
        .map_err(|e| format!("expected {{\"min\": int, \"max\": int}}: {e}"))?;
    if bounds.min > bounds.max {
        return Err(format!("min ({}) is greater than max ({})", bounds.min, bounds.max));
    }
    Ok((quantity, bounds))
}

/// Applies every valid key; 207 when at least one key was rejected.
async fn post_thresholds(State(state): State<SharedState>, body: Bytes) -> Response {
    if body.is_empty() {
        return error(StatusCode::BAD_REQUEST, "empty body");
    }
    let doc: Value = match serde_json::from_slice(&body) {
        Ok(doc) => doc,
        Err(e) => return error(StatusCode::BAD_REQUEST, format!("invalid JSON: {e}")),
    };
    let Some(entries) = doc.as_object() else {
        return error(StatusCode::BAD_REQUEST, "expected a JSON object");
    };

    let mut applied = Vec::new();
    let mut rejected = Map::new();
    let mut st = state.write().await;
    for (key, value) in entries {
        match check_entry(key, value) {
            Ok((quantity, bounds)) => {
                st.record_threshold(quantity, bounds);
                applied.push(quantity);
            }
            Err(reason) => {
                tracing::warn!(%key, %reason, "threshold update rejected");
                rejected.insert(key.clone(), Value::String(reason));
            }
        }
    }

    let status = if rejected.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(json!({ "applied": applied, "rejected": rejected }))).into_response()
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: SharedState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "web ui listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
