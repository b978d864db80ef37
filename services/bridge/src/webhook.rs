use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use std::collections::HashMap;

use crate::state::AppState;

fn stream_twiml(ws_url: &str) -> Response {
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response><Connect><Stream url="{ws_url}"/></Connect></Response>"#
    );
    ([("content-type", "text/xml")], body).into_response()
}

fn duration_cap(params: &HashMap<String, String>) -> i32 {
    params
        .get("duration_cap_sec")
        .and_then(|v| v.parse().ok())
        .unwrap_or(60)
}

/// `POST /incoming-call/:scenario` — telephony provider's voice webhook for a
/// built-in scenario (spec §4.5: "direct the provider to the media-stream
/// WebSocket").
pub async fn incoming_call(
    State(state): State<AppState>,
    Path(scenario): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let cap = duration_cap(&params);
    let ws_url = format!(
        "{}/media-stream/{scenario}?duration_cap_sec={cap}",
        state.config.public_ws_url
    );
    stream_twiml(&ws_url)
}

/// `POST /incoming-custom-call/:id` — same, for a caller-authored scenario.
pub async fn incoming_custom_call(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let cap = duration_cap(&params);
    let ws_url = format!(
        "{}/media-stream-custom/{id}?duration_cap_sec={cap}",
        state.config.public_ws_url
    );
    stream_twiml(&ws_url)
}
