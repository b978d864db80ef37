use axum::{extract::State, Json};
use chrono::Utc;
use dto::{MakeCallRequest, MakeCallResponse, ScheduleCallRequest, UsageStatsResponse};
use models::{CallStatus, CustomScenario};
use telephony::{CreateCallParams, DispatchError};
use uuid::Uuid;

use authn::AuthUser;

use crate::{error::ApiError, state::AppState, usage_store};

fn webhook_path(scenario_ref: &str, duration_cap_sec: i32) -> String {
    if scenario::is_custom_id(scenario_ref) {
        format!("/incoming-custom-call/{scenario_ref}?duration_cap_sec={duration_cap_sec}")
    } else {
        format!("/incoming-call/{scenario_ref}?duration_cap_sec={duration_cap_sec}")
    }
}

/// Spec §4.6 step 1: the user's first active, voice-capable number if they
/// have one provisioned, else the system number (consumer tier always falls
/// through to this).
async fn select_caller_id(
    db: &sqlx::PgPool,
    owner: Uuid,
    system_phone_number: &str,
) -> Result<String, sqlx::Error> {
    let own_number: Option<String> = sqlx::query_scalar(
        "SELECT e164 FROM user_phone_numbers \
         WHERE owner = $1 AND active = true AND voice_capable = true \
         ORDER BY is_primary DESC, provisioned_at ASC LIMIT 1",
    )
    .bind(owner)
    .fetch_optional(db)
    .await?;
    Ok(own_number.unwrap_or_else(|| system_phone_number.to_string()))
}

async fn resolve_for_dispatch(
    state: &AppState,
    caller: Uuid,
    scenario_ref: &str,
) -> Result<(), ApiError> {
    let custom_row = if scenario::is_custom_id(scenario_ref) {
        sqlx::query_as::<_, CustomScenario>("SELECT * FROM custom_scenarios WHERE id = $1")
            .bind(scenario_ref)
            .fetch_optional(&state.db)
            .await?
    } else {
        None
    };
    scenario::resolve(scenario_ref, caller, custom_row)?;
    Ok(())
}

/// `POST /mobile/make-call` (spec §4.6): check permission, dispatch, then
/// commit the usage counters — in that order, and only the dispatcher
/// commits (§4.6/§9).
pub async fn make_call(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<MakeCallRequest>,
) -> Result<Json<MakeCallResponse>, ApiError> {
    resolve_for_dispatch(&state, claims.sub, &body.scenario).await?;
    let caller_id = select_caller_id(&state.db, claims.sub, &state.system_phone_number).await?;

    let mut tx = state.db.begin().await?;
    let existing = usage_store::load_for_update(&mut tx, claims.sub).await?;
    let rolled = usage::roll_windows(&existing, Utc::now());

    let decision = usage::check_permission(&rolled, state.development_mode)
        .map_err(ApiError::PolicyDenied)?;
    usage_store::persist(&mut tx, &rolled).await?;

    let status_callback = format!("{}/call-end-webhook", state.public_url);
    let url = format!(
        "{}{}",
        state.public_url,
        webhook_path(&body.scenario, decision.duration_cap_sec)
    );

    let dispatched = state
        .telephony
        .create_call(CreateCallParams {
            to: body.phone_number.clone(),
            from: caller_id,
            url,
            status_callback,
            time_limit_sec: (decision.duration_cap_sec + 5) as u32,
            record: true,
        })
        .await
        .map_err(|err| match err {
            DispatchError::Transport(msg) | DispatchError::Rejected(msg) => {
                ApiError::Unexpected(anyhow::anyhow!("dispatch failed: {msg}"))
            }
        })?;

    let committed = usage::commit(&rolled, decision);
    usage_store::persist(&mut tx, &committed).await?;

    sqlx::query(
        "INSERT INTO call_records \
         (id, owner, provider_call_id, e164, scenario_ref, status, usage_source, duration_cap_sec, started_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::new_v4())
    .bind(claims.sub)
    .bind(&dispatched.provider_call_id)
    .bind(&body.phone_number)
    .bind(&body.scenario)
    .bind(CallStatus::Initiated)
    .bind(decision.source)
    .bind(decision.duration_cap_sec)
    .bind(Utc::now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(Json(MakeCallResponse {
        call_sid: dispatched.provider_call_id,
        status: "initiated".to_string(),
        duration_limit: decision.duration_cap_sec,
        usage_stats: UsageStatsResponse {
            tier: committed.tier.as_str().to_string(),
            trial_calls_remaining: committed.trial_calls_remaining,
            calls_this_week: committed.calls_this_week,
            calls_this_month: committed.calls_this_month,
            calls_total: committed.calls_total,
            duration_this_week_sec: committed.duration_this_week_sec,
            duration_this_month_sec: committed.duration_this_month_sec,
            addon_calls: committed.addon_calls,
        },
    }))
}

/// `POST /mobile/schedule-call` (spec §4.4): creation only, no permission
/// check at creation time — permission is re-checked by the scheduler tick.
pub async fn schedule_call(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    Json(body): Json<ScheduleCallRequest>,
) -> Result<Json<Uuid>, ApiError> {
    resolve_for_dispatch(&state, claims.sub, &body.scenario).await?;

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO scheduled_calls (id, owner, e164, scenario_ref, due_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(id)
    .bind(claims.sub)
    .bind(&body.phone_number)
    .bind(&body.scenario)
    .bind(body.scheduled_time)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;

    Ok(Json(id))
}
