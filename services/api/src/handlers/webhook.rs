use axum::{extract::State, Form};
use chrono::Utc;
use models::{CallRecord, ProviderCallStatus};

use crate::{error::ApiError, state::AppState, usage_store};

/// `POST /call-end-webhook` (C7, spec §4.7): stateless, parallel-safe,
/// idempotent on `provider_call_id`. Not behind bearer auth — the provider
/// calls this directly.
pub async fn call_end(
    State(state): State<AppState>,
    Form(body): Form<dto::CallEndWebhook>,
) -> Result<(), ApiError> {
    let Some(provider_status) = ProviderCallStatus::parse(&body.call_status) else {
        tracing::warn!(status = %body.call_status, "unrecognized provider call status, ignoring");
        return Ok(());
    };

    let mut tx = state.db.begin().await?;

    let Some(record) =
        sqlx::query_as::<_, CallRecord>("SELECT * FROM call_records WHERE provider_call_id = $1 FOR UPDATE")
            .bind(&body.call_sid)
            .fetch_optional(&mut *tx)
            .await?
    else {
        tracing::warn!(call_sid = %body.call_sid, "call-end webhook for unknown call");
        return Ok(());
    };

    if record.status.is_terminal() {
        // Already finalized, possibly by the bridge's post-session fallback
        // write; nothing left to do (idempotent).
        tx.commit().await?;
        return Ok(());
    }

    if usage_store::already_counted(&mut tx, record.owner, &body.call_sid).await? {
        tx.commit().await?;
        return Ok(());
    }

    let new_status = provider_status.to_call_status();
    sqlx::query("UPDATE call_records SET status = $2, duration_sec = $3 WHERE id = $1")
        .bind(record.id)
        .bind(new_status)
        .bind(body.call_duration as i32)
        .execute(&mut *tx)
        .await?;

    let limits = usage_store::load_for_update(&mut tx, record.owner).await?;
    let rolled = usage::roll_windows(&limits, Utc::now());

    let counted = std::collections::HashSet::new();
    if let Some(updated) = usage::record(
        &rolled,
        record.usage_source,
        body.call_duration,
        record.duration_cap_sec as i64,
        &body.call_sid,
        &counted,
    ) {
        usage_store::persist(&mut tx, &updated).await?;
    } else {
        usage_store::persist(&mut tx, &rolled).await?;
    }
    usage_store::mark_counted(&mut tx, record.owner, &body.call_sid).await?;

    tx.commit().await?;
    Ok(())
}
