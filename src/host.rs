//! HTTP surface: one POST route per registered call kind plus a health probe.

use std::{sync::Arc, time::Instant};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};

use crate::{ids::IdentifierCache, services::ServiceRegistry};

pub struct AppState {
    pub started_at: Instant,
    pub registry: ServiceRegistry,
    pub ids: Arc<IdentifierCache>,
}

impl AppState {
    pub fn new(registry: ServiceRegistry, ids: Arc<IdentifierCache>) -> Self {
        Self {
            started_at: Instant::now(),
            registry,
            ids,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/hop/{kind}", post(hop_handler))
        .with_state(state)
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "at": now_iso(),
        "uptimeSec": state.started_at.elapsed().as_secs(),
        "inFlight": state.ids.in_flight(),
    }))
}

pub async fn hop_handler(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(handler) = state.registry.get(&kind) else {
        tracing::debug!(kind = %kind, "request for unknown service");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown service: {kind}") })),
        );
    };

    let response = if body.iter().all(u8::is_ascii_whitespace) {
        handler.handle(Value::Null).await
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => handler.handle(value).await,
            Err(error) => handler.failure(&format!("invalid request payload: {error}")),
        }
    };

    (StatusCode::OK, Json(response))
}

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}
