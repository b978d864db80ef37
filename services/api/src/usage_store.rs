use chrono::Utc;
use models::UsageLimits;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// Fetch the user's usage row for update, lazily creating it on first access
/// (spec §3: "UsageLimits ... lazily initialized on first access"). Takes a
/// row-level lock so concurrent requests for the same user serialize
/// (spec §4.3/§5: "per-user mutex or row-level lock").
pub async fn load_for_update(
    tx: &mut Transaction<'_, Postgres>,
    user_id: Uuid,
) -> Result<UsageLimits, sqlx::Error> {
    if let Some(row) = sqlx::query_as::<_, UsageLimits>(
        "SELECT * FROM usage_limits WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(&mut **tx)
    .await?
    {
        return Ok(row);
    }

    let fresh = UsageLimits::new_trial(user_id, Utc::now());
    insert(tx, &fresh).await?;
    Ok(fresh)
}

/// Read-only snapshot for the usage-stats endpoint; no lock, matching spec
/// §4.3's "read-only inspections may be lock-free".
pub async fn load(
    db: &sqlx::Pool<Postgres>,
    user_id: Uuid,
) -> Result<UsageLimits, sqlx::Error> {
    if let Some(row) =
        sqlx::query_as::<_, UsageLimits>("SELECT * FROM usage_limits WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await?
    {
        return Ok(row);
    }
    Ok(UsageLimits::new_trial(user_id, Utc::now()))
}

async fn insert(tx: &mut Transaction<'_, Postgres>, limits: &UsageLimits) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO usage_limits
            (user_id, tier, trial_calls_remaining, week_anchor, month_anchor,
             calls_this_week, calls_this_month, calls_total,
             duration_this_week_sec, duration_this_month_sec,
             addon_calls, addon_expires, subscription_status, sub_end)
           VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
           ON CONFLICT (user_id) DO NOTHING"#,
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
