//! Scheduler (C4, spec §4.4): a single tick loop that dispatches due
//! `ScheduledCall` rows, earliest-due-first, serialized, with no
//! intra-tick parallelism and no retry on a lost permission check.

mod config;
mod usage_store;

use std::time::Duration;

use chrono::Utc;
use models::{CallStatus, CustomScenario, ScheduledCall};
use sqlx::postgres::PgPoolOptions;
use telephony::{CreateCallParams, ProviderTelephonyClient, TelephonyClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use config::Config;

const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to postgres");

    let telephony = ProviderTelephonyClient::new(
        config.telephony_api_base.clone(),
        config.telephony_account_sid.clone(),
        config.telephony_auth_token.clone(),
    );

    tracing::info!("scheduler starting, tick every {:?}", TICK_INTERVAL);
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    loop {
        interval.tick().await;
        if let Err(error) = run_tick(&pool, &telephony, &config).await {
            tracing::error!(%error, "scheduler tick failed");
        }
    }
}

/// Spec §4.6 step 1: the user's first active, voice-capable number if they
/// have one provisioned, else the system number.
async fn select_caller_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    owner: Uuid,
    system_phone_number: &str,
) -> Result<String, sqlx::Error> {
    let own_number: Option<String> = sqlx::query_scalar(
        "SELECT e164 FROM user_phone_numbers \
         WHERE owner = $1 AND active = true AND voice_capable = true \
         ORDER BY is_primary DESC, provisioned_at ASC LIMIT 1",
    )
    .bind(owner)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(own_number.unwrap_or_else(|| system_phone_number.to_string()))
}

fn webhook_path(scenario_ref: &str, duration_cap_sec: i32) -> String {
    if scenario::is_custom_id(scenario_ref) {
        format!("/incoming-custom-call/{scenario_ref}?duration_cap_sec={duration_cap_sec}")
    } else {
        format!("/incoming-call/{scenario_ref}?duration_cap_sec={duration_cap_sec}")
    }
}

/// One tick: claim every due row, earliest-`due_at`-first (ties by id), and
/// dispatch each serially. A row whose permission has since lapsed is
/// dropped with a `failed` `CallRecord`; it is never retried (spec §9 open
/// question (c)).
async fn run_tick(
    pool: &sqlx::Pool<sqlx::Postgres>,
    telephony: &ProviderTelephonyClient,
    config: &Config,
) -> anyhow::Result<()> {
    let due: Vec<ScheduledCall> = sqlx::query_as(
        "SELECT * FROM scheduled_calls WHERE due_at <= $1 ORDER BY due_at ASC, id ASC",
    )
    .bind(Utc::now())
    .fetch_all(pool)
    .await?;

    for call in due {
        if let Err(error) = dispatch_one(pool, telephony, config, &call).await {
            tracing::error!(%error, call_id = %call.id, "failed to dispatch scheduled call");
        }
    }

    Ok(())
}

async fn dispatch_one(
    pool: &sqlx::Pool<sqlx::Postgres>,
    telephony: &ProviderTelephonyClient,
    config: &Config,
    call: &ScheduledCall,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    // Claim the row first so a crash mid-dispatch never double-fires it.
    let claimed = sqlx::query("DELETE FROM scheduled_calls WHERE id = $1")
        .bind(call.id)
        .execute(&mut *tx)
        .await?;
    if claimed.rows_affected() == 0 {
        tx.commit().await?;
        return Ok(());
    }

    let custom_row = if scenario::is_custom_id(&call.scenario_ref) {
        sqlx::query_as::<_, CustomScenario>("SELECT * FROM custom_scenarios WHERE id = $1")
            .bind(&call.scenario_ref)
            .fetch_optional(&mut *tx)
            .await?
    } else {
        None
    };
    if let Err(error) = scenario::resolve(&call.scenario_ref, call.owner, custom_row) {
        tracing::warn!(%error, call_id = %call.id, "scheduled call scenario no longer resolves");
        insert_failed_record(&mut tx, call, None).await?;
        tx.commit().await?;
        return Ok(());
    }

    let limits = usage_store::load_for_update(&mut tx, call.owner).await?;
    let rolled = usage::roll_windows(&limits, Utc::now());

    let decision = match usage::check_permission(&rolled, config.development_mode) {
        Ok(decision) => decision,
        Err(reason) => {
            tracing::info!(call_id = %call.id, ?reason, "permission lost by tick time, dropping");
            usage_store::persist(&mut tx, &rolled).await?;
            insert_failed_record(&mut tx, call, None).await?;
            tx.commit().await?;
            return Ok(());
        }
    };
    usage_store::persist(&mut tx, &rolled).await?;

    let caller_id = select_caller_id(&mut tx, call.owner, &config.system_phone_number).await?;

    let status_callback = format!("{}/call-end-webhook", config.public_url);
    let url = format!(
        "{}{}",
        config.public_url,
        webhook_path(&call.scenario_ref, decision.duration_cap_sec)
    );

    let dispatched = telephony
        .create_call(CreateCallParams {
            to: call.e164.clone(),
            from: caller_id,
            url,
            status_callback,
            time_limit_sec: (decision.duration_cap_sec + 5) as u32,
            record: true,
        })
        .await;

    match dispatched {
        Ok(dispatched) => {
            let committed = usage::commit(&rolled, decision);
            usage_store::persist(&mut tx, &committed).await?;
            sqlx::query(
                "INSERT INTO call_records \
                 (id, owner, provider_call_id, e164, scenario_ref, status, usage_source, duration_cap_sec, started_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
            )
            .bind(Uuid::new_v4())
            .bind(call.owner)
            .bind(&dispatched.provider_call_id)
            .bind(&call.e164)
            .bind(&call.scenario_ref)
            .bind(CallStatus::Initiated)
            .bind(decision.source)
            .bind(decision.duration_cap_sec)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        Err(error) => {
            tracing::warn!(%error, call_id = %call.id, "telephony dispatch failed");
            insert_failed_record(&mut tx, call, Some(decision.source)).await?;
        }
    }

    tx.commit().await?;
    Ok(())
}

async fn insert_failed_record(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    call: &ScheduledCall,
    usage_source: Option<models::UsageSource>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO call_records \
         (id, owner, provider_call_id, e164, scenario_ref, status, usage_source, duration_cap_sec, started_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(Uuid::new_v4())
    .bind(call.owner)
    .bind(format!("scheduled-failed-{}", call.id))
    .bind(&call.e164)
    .bind(&call.scenario_ref)
    .bind(CallStatus::Failed)
    .bind(usage_source.unwrap_or(models::UsageSource::DevelopmentMode))
    .bind(0)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;
    Ok(())
}
