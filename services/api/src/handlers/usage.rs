use axum::{extract::State, Json};
use chrono::Utc;
use dto::{CheckPermissionResponse, UsageStatsResponse};

use authn::AuthUser;

use crate::{error::ApiError, state::AppState, usage_store};

pub async fn check_permission(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<CheckPermissionResponse>, ApiError> {
    let limits = usage_store::load(&state.db, claims.sub).await?;
    let rolled = usage::roll_windows(&limits, Utc::now());

    match usage::check_permission(&rolled, state.development_mode) {
        Ok(decision) => Ok(Json(CheckPermissionResponse {
            can_make_call: true,
            status: decision.source.status_label().to_string(),
            duration_limit: decision.duration_cap_sec,
        })),
        Err(reason) => Err(ApiError::PolicyDenied(reason)),
    }
}

pub async fn usage_stats(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<Json<UsageStatsResponse>, ApiError> {
    let limits = usage_store::load(&state.db, claims.sub).await?;
    let rolled = usage::roll_windows(&limits, Utc::now());

    Ok(Json(UsageStatsResponse {
        tier: rolled.tier.as_str().to_string(),
        trial_calls_remaining: rolled.trial_calls_remaining,
        calls_this_week: rolled.calls_this_week,
        calls_this_month: rolled.calls_this_month,
        calls_total: rolled.calls_total,
        duration_this_week_sec: rolled.duration_this_week_sec,
        duration_this_month_sec: rolled.duration_this_month_sec,
        addon_calls: rolled.addon_calls,
    }))
}
