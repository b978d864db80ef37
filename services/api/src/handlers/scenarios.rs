use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use dto::{CustomScenarioPatch, CustomScenarioRequest, CustomScenarioResponse};
use models::CustomScenario;

use authn::AuthUser;

use crate::{error::ApiError, state::AppState};

fn to_response(row: CustomScenario) -> CustomScenarioResponse {
    CustomScenarioResponse {
        id: row.id,
        persona: row.persona,
        prompt: row.prompt,
        voice: row.voice.as_str().to_string(),
        temperature: row.temperature,
    }
}

pub async fn create(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<CustomScenarioRequest>,
) -> Result<Json<CustomScenarioResponse>, ApiError> {
    let created = scenario::create_custom(
        claims.sub,
        body.persona,
        body.prompt,
        &body.voice,
        body.temperature,
        Utc::now(),
    )?;

    sqlx::query(
        "INSERT INTO custom_scenarios (id, owner, persona, prompt, voice, temperature, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(&created.id)
    .bind(created.owner)
    .bind(&created.persona)
    .bind(&created.prompt)
    .bind(created.voice)
    .bind(created.temperature)
    .bind(created.created_at)
    .execute(&state.db)
    .await?;

    Ok(Json(to_response(created)))
}

/// `GET /realtime/custom-scenario` — `scenario::list_for` owns the
/// owner-filter and ordering; this handler only loads the table.
pub async fn list(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<Vec<CustomScenarioResponse>>, ApiError> {
    let table = sqlx::query_as::<_, CustomScenario>("SELECT * FROM custom_scenarios")
        .fetch_all(&state.db)
        .await?;
    let owned = scenario::list_for(claims.sub, &table);
    Ok(Json(owned.into_iter().map(to_response).collect()))
}

pub async fn get(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<CustomScenarioResponse>, ApiError> {
    let row = load_one(&state, &id).await?;
    let owned = scenario::get_owned(&id, claims.sub, row)?;
    Ok(Json(to_response(owned)))
}

pub async fn update(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<CustomScenarioPatch>,
) -> Result<Json<CustomScenarioResponse>, ApiError> {
    let existing = load_one(&state, &id).await?;
    let updated = scenario::update(
        &id,
        claims.sub,
        existing,
        patch.persona,
        patch.prompt,
        patch.voice,
        patch.temperature,
    )?;

    sqlx::query(
        "UPDATE custom_scenarios SET persona = $2, prompt = $3, voice = $4, temperature = $5 \
         WHERE id = $1",
    )
    .bind(&updated.id)
    .bind(&updated.persona)
    .bind(&updated.prompt)
    .bind(updated.voice)
    .bind(updated.temperature)
    .execute(&state.db)
    .await?;

    Ok(Json(to_response(updated)))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Path(id): Path<String>,
) -> Result<(), ApiError> {
    let existing = load_one(&state, &id).await?;
    scenario::delete(&id, claims.sub, existing)?;
    sqlx::query("DELETE FROM custom_scenarios WHERE id = $1")
        .bind(&id)
        .execute(&state.db)
        .await?;
    Ok(())
}

async fn load_one(state: &AppState, id: &str) -> Result<Option<CustomScenario>, ApiError> {
    if !scenario::is_custom_id(id) {
        return Ok(None);
    }
    let row = sqlx::query_as::<_, CustomScenario>("SELECT * FROM custom_scenarios WHERE id = $1")
        .bind(id)
        .fetch_optional(&state.db)
        .await?;
    Ok(row)
}
