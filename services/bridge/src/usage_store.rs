//! The bridge's own thin slice of the usage ledger: just enough to run the
//! §4.5 exit-bullet-5 fallback (`finalize_call_record`) when the provider's
//! status callback never arrives. Mirrors `services/api/src/usage_store.rs`
//! since both services own the same tables but never share a Postgres pool.

use models::UsageLimits;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

pub async fn load_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<UsageLimits, sqlx::Error> {
    sqlx::query_as::<_, UsageLimits>("SELECT * FROM usage_limits WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_one(&mut **tx)
        .await
}

pub async fn persist(
    tx: &mut Transaction<'_, Postgres>,
    limits: &UsageLimits,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE usage_limits SET
            tier = $2, trial_calls_remaining = $3, week_anchor = $4, month_anchor = $5,
            calls_this_week = $6, calls_this_month = $7, calls_total = $8,
            duration_this_week_sec = $9, duration_this_month_sec = $10,
            addon_calls = $11, addon_expires = $12, subscription_status = $13, sub_end = $14
           WHERE user_id = $1"#,
    )
    .bind(limits.user_id)
    .bind(limits.tier)
    .bind(limits.trial_calls_remaining)
    .bind(limits.week_anchor)
    .bind(limits.month_anchor)
    .bind(limits.calls_this_week)
    .bind(limits.calls_this_month)
    .bind(limits.calls_total)
    .bind(limits.duration_this_week_sec)
    .bind(limits.duration_this_month_sec)
    .bind(limits.addon_calls)
    .bind(limits.addon_expires)
    .bind(&limits.subscription_status)
    .bind(limits.sub_end)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn already_counted(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    provider_call_id: &str,
) -> Result<bool, sqlx::Error> {
    let row = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM counted_call_ids WHERE user_id = $1 AND provider_call_id = $2",
    )
    .bind(user_id)
    .bind(provider_call_id)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row > 0)
}

pub async fn mark_counted(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
    provider_call_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO counted_call_ids (user_id, provider_call_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(user_id)
    .bind(provider_call_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
