use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::channel::{ChannelManager, TagWriter};
use crate::tags::engine::TagEngine;
use crate::tags::structures::{TagSnapshot, ValueVariant};
use crate::triggers::dispatcher::TriggerDispatcher;

#[derive(Clone)]
pub struct SharedAppState {
    pub tag_engine: TagEngine,
    pub channels: Arc<ChannelManager>,
    pub dispatcher: Arc<TriggerDispatcher>,
    pub start_time: tokio::time::Instant,
}

#[derive(Deserialize)]
pub struct WriteRequest {
    pub value: ValueVariant,
}

#[derive(Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    pub driver_type: String,
    pub connected: bool,
    pub tag_count: usize,
}

pub fn create_api_routes() -> Router<SharedAppState> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/tags", get(get_tags))
        .route("/api/tags/:name", get(get_tag).put(write_tag))
        .route("/api/devices", get(get_devices))
        .route("/api/triggers", get(get_triggers))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "PLC Gateway Running"
}

async fn stats(State(state): State<SharedAppState>) -> impl IntoResponse {
    let uptime = state.start_time.elapsed().as_secs();
    let connected = state
        .channels
        .connection_status()
        .await
        .into_iter()
        .filter(|(_, connected)| *connected)
        .count();
    Json(json!({
        "uptime_seconds": uptime,
        "tag_count": state.tag_engine.len(),
        "driver_count": state.channels.channels().len(),
        "connected_drivers": connected,
        "trigger_count": state.dispatcher.trigger_count(),
        "dispatched": state.dispatcher.dispatched_count(),
    }))
}

async fn get_tags(State(state): State<SharedAppState>) -> Json<Vec<TagSnapshot>> {
    Json(state.tag_engine.get_all_tags())
}

async fn get_tag(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.tag_engine.get_tag(&name) {
        Some(tag) => (StatusCode::OK, Json(json!(TagSnapshot::from(tag.as_ref())))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Tag '{}' not found", name) })),
        ),
    }
}

async fn write_tag(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
    Json(request): Json<WriteRequest>,
) -> impl IntoResponse {
    if state.tag_engine.get_tag(&name).is_none() {
        warn!("Write to unknown tag '{}' rejected", name);
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Tag '{}' not found", name) })),
        );
    }
    info!("API write to '{}': {}", name, request.value);
    match state.channels.write_tag(&name, request.value).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Err(e) => {
            warn!("Write to '{}' failed: {}", name, e);
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": e.to_string() })),
            )
        }
    }
}

async fn get_devices(State(state): State<SharedAppState>) -> Json<Vec<DeviceInfo>> {
    let mut devices = Vec::new();
    for channel in state.channels.channels() {
        let config = channel.driver().config();
        devices.push(DeviceInfo {
            id: config.id.clone(),
            name: config.name.clone(),
            address: config.address.clone(),
            driver_type: config.driver_type.clone(),
            connected: channel.driver().check_status().await.is_ok(),
            tag_count: channel.tag_names().count(),
        });
    }
    Json(devices)
}

async fn get_triggers(State(state): State<SharedAppState>) -> impl IntoResponse {
    Json(state.dispatcher.trigger_states())
}
