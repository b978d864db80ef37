use std::collections::HashMap;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::{IntoResponse, Response},
};
use models::CustomScenario;

use crate::{session, state::AppState};

fn duration_cap(params: &HashMap<String, String>) -> i32 {
    params
        .get("duration_cap_sec")
        .and_then(|v| v.parse().ok())
        .unwrap_or(60)
}

/// `GET /media-stream/:scenario` — built-in scenario, no database lookup
/// needed to resolve it.
pub async fn media_stream(
    State(state): State<AppState>,
    Path(scenario): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let cap = duration_cap(&params);
    let resolved = match scenario::resolve(&scenario, uuid::Uuid::nil(), None) {
        Ok(resolved) => resolved,
        Err(error) => {
            tracing::warn!(%error, %scenario, "unresolvable builtin scenario on media-stream upgrade");
            return axum::http::StatusCode::NOT_FOUND.into_response();
        }
    };

    let Ok(permit) = state.call_semaphore.clone().try_acquire_owned() else {
        tracing::warn!("concurrent call limit reached, rejecting media-stream upgrade");
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let db = state.db.clone();
    let config = state.config.clone();
    upgrade.on_upgrade(move |socket| async move {
        session::run(socket, resolved, cap, db, config, permit).await;
    })
}

/// `GET /media-stream-custom/:id` — caller-authored scenario; the id itself
/// carries the owning caller (spec §4.1), so the lookup is keyed by id alone.
pub async fn media_stream_custom(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let cap = duration_cap(&params);
    let Some(owner) = scenario::custom_id_owner(&id) else {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    };

    let row = sqlx::query_as::<_, CustomScenario>("SELECT * FROM custom_scenarios WHERE id = $1")
        .bind(&id)
        .fetch_optional(&state.db)
        .await;
    let row = match row {
        Ok(row) => row,
        Err(error) => {
            tracing::error!(%error, %id, "failed to load custom scenario for media-stream upgrade");
            return axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let resolved = match scenario::resolve(&id, owner, row) {
        Ok(resolved) => resolved,
        Err(error) => {
            tracing::warn!(%error, %id, "unresolvable custom scenario on media-stream upgrade");
            return axum::http::StatusCode::NOT_FOUND.into_response();
        }
    };

    let Ok(permit) = state.call_semaphore.clone().try_acquire_owned() else {
        tracing::warn!("concurrent call limit reached, rejecting media-stream upgrade");
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    };

    let db = state.db.clone();
    let config = state.config.clone();
    upgrade.on_upgrade(move |socket| async move {
        session::run(socket, resolved, cap, db, config, permit).await;
    })
}
