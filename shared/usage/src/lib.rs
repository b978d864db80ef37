//! Usage Engine (C3), spec §4.3.
//!
//! Pure functions over `UsageLimits` values; the caller (a service holding
//! the Postgres pool) is responsible for the per-user serialization and for
//! deciding which of the two writes below to actually persist:
//!
//! - [`roll_windows`] / [`check_permission`] run on every permission check;
//!   only the *write* paths (make-call, scheduler tick) persist the rolled
//!   result, per §4.3 "reads compute the rolled values without persisting".
//! - [`commit`] increments call counts and is called exactly once, by the
//!   dispatcher, after a confirmed provider dispatch (§4.6, §9 design note —
//!   this spec fixes the increment to happen only on confirmed dispatch).
//! - [`record`] increments duration counters after a call ends, idempotent
//!   on the provider call id (§4.7).

use chrono::{DateTime, Duration, Utc};
use models::{Decision, DenyReason, Tier, UsageLimits, UsageSource};

const WEEK: i64 = 7;
const MONTH: i64 = 30;

/// Roll the week/month windows and expire addon calls if due. Pure: returns
/// a new value, never mutates `limits` in place, so a read path can call
/// this without committing anything.
pub fn roll_windows(limits: &UsageLimits, now: DateTime<Utc>) -> UsageLimits {
    let mut rolled = limits.clone();

    let week_elapsed = now.signed_duration_since(rolled.week_anchor);
    if week_elapsed >= Duration::days(WEEK) {
        let whole_windows = week_elapsed.num_days() / WEEK;
        rolled.week_anchor += Duration::days(whole_windows * WEEK);
        rolled.calls_this_week = 0;
        rolled.duration_this_week_sec = 0;
    }

    let month_elapsed = now.signed_duration_since(rolled.month_anchor);
    if month_elapsed >= Duration::days(MONTH) {
        let whole_windows = month_elapsed.num_days() / MONTH;
        rolled.month_anchor += Duration::days(whole_windows * MONTH);
        rolled.calls_this_month = 0;
        rolled.duration_this_month_sec = 0;
    }

    if let Some(expires) = rolled.addon_expires {
        if expires <= now {
            rolled.addon_calls = 0;
            rolled.addon_expires = None;
        }
    }

    rolled
}

/// Evaluate spec §4.3's ordered decision steps against an already-rolled
/// `UsageLimits`. Does not mutate anything; see [`commit`] for the write.
pub fn check_permission(
    rolled: &UsageLimits,
    development_mode: bool,
) -> Result<Decision, DenyReason> {
    if development_mode {
        return Ok(Decision {
            source: UsageSource::DevelopmentMode,
            duration_cap_sec: 300,
        });
    }

    if rolled.tier == Tier::Trial && rolled.trial_calls_remaining > 0 {
        return Ok(Decision {
            source: UsageSource::Trial,
            duration_cap_sec: Tier::Trial.caps().per_call_cap_sec,
        });
    }

    if rolled.tier == Tier::Basic && rolled.calls_this_week < Tier::Basic.caps().weekly_cap.unwrap()
    {
        return Ok(Decision {
            source: UsageSource::Basic,
            duration_cap_sec: Tier::Basic.caps().per_call_cap_sec,
        });
    }

    if rolled.tier == Tier::Premium
        && rolled.calls_this_month < Tier::Premium.caps().monthly_cap.unwrap()
    {
        return Ok(Decision {
            source: UsageSource::Premium,
            duration_cap_sec: Tier::Premium.caps().per_call_cap_sec,
        });
    }

    if rolled.addon_calls > 0 {
        let cap = match rolled.tier {
            Tier::Cancelled => 60,
            tier => tier.caps().per_call_cap_sec,
        };
        return Ok(Decision {
            source: UsageSource::Addon,
            duration_cap_sec: cap,
        });
    }

    Err(match rolled.tier {
        Tier::Trial => DenyReason::TrialExhausted,
        Tier::Basic => DenyReason::WeeklyLimit,
        Tier::Premium => DenyReason::MonthlyLimit,
        Tier::Cancelled => DenyReason::SubscriptionRequired,
    })
}

/// Upgrade options shown alongside a policy deny (spec §6/§8 scenario 2).
pub struct UpgradeOption {
    pub plan: &'static str,
    pub price: &'static str,
    pub calls: &'static str,
    pub product_id: &'static str,
}

pub fn upgrade_options() -> &'static [UpgradeOption] {
    &[
        UpgradeOption {
            plan: "basic",
            price: "$4.99",
            calls: "5/week",
            product_id: "speech_assistant_basic_weekly",
        },
        UpgradeOption {
            plan: "premium",
            price: "$25.00",
            calls: "30/month",
            product_id: "speech_assistant_premium_monthly",
        },
    ]
}

/// Increment call counts for a confirmed dispatch (spec §4.6). The sole
/// caller is the Call Dispatcher, exactly once per successfully-placed call.
pub fn commit(rolled: &UsageLimits, decision: Decision) -> UsageLimits {
    let mut committed = rolled.clone();
    committed.calls_total += 1;
    match decision.source {
        UsageSource::DevelopmentMode => {}
        UsageSource::Trial => committed.trial_calls_remaining -= 1,
        UsageSource::Basic => committed.calls_this_week += 1,
        UsageSource::Premium => committed.calls_this_month += 1,
        UsageSource::Addon => committed.addon_calls -= 1,
    }
    committed
}

/// Increment duration counters once a call ends (spec §4.7). Returns `None`
/// if `provider_call_id` has already been counted (idempotency, spec §4.3's
/// "set of already-counted call ids kept per user").
pub fn record(
    rolled: &UsageLimits,
    source: UsageSource,
    actual_seconds: i64,
    duration_cap_sec: i64,
    provider_call_id: &str,
    already_counted: &std::collections::HashSet<String>,
) -> Option<UsageLimits> {
    if already_counted.contains(provider_call_id) {
        return None;
    }
    let mut updated = rolled.clone();
    let counted = actual_seconds.min(duration_cap_sec).max(0) as i32;
    match source {
        UsageSource::Basic => updated.duration_this_week_sec += counted,
        UsageSource::Premium => updated.duration_this_month_sec += counted,
        UsageSource::Trial | UsageSource::Addon | UsageSource::DevelopmentMode => {
            updated.duration_this_week_sec += counted;
        }
    }
    Some(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn base(now: DateTime<Utc>) -> UsageLimits {
        UsageLimits::new_trial(Uuid::new_v4(), now)
    }

    #[test]
    fn trial_permits_until_exhausted() {
        let now = Utc::now();
        let mut limits = base(now);
        limits.trial_calls_remaining = 1;
        let decision = check_permission(&limits, false).unwrap();
        assert_eq!(decision.source, UsageSource::Trial);
        assert_eq!(decision.duration_cap_sec, 60);

        limits.trial_calls_remaining = 0;
        let deny = check_permission(&limits, false).unwrap_err();
        assert_eq!(deny, DenyReason::TrialExhausted);
    }

    #[test]
    fn development_mode_bypasses_everything() {
        let now = Utc::now();
        let mut limits = base(now);
        limits.trial_calls_remaining = 0;
        let decision = check_permission(&limits, true).unwrap();
        assert_eq!(decision.source, UsageSource::DevelopmentMode);
        assert_eq!(decision.duration_cap_sec, 300);
    }

    #[test]
    fn week_rollover_resets_counters_and_advances_anchor() {
        let anchor = Utc::now() - Duration::days(8);
        let mut limits = base(anchor);
        limits.tier = Tier::Basic;
        limits.week_anchor = anchor;
        limits.calls_this_week = 5;
        limits.duration_this_week_sec = 300;

        let rolled = roll_windows(&limits, Utc::now());
        assert_eq!(rolled.calls_this_week, 0);
        assert_eq!(rolled.duration_this_week_sec, 0);
        assert!(rolled.week_anchor > anchor);

        let decision = check_permission(&rolled, false).unwrap();
        assert_eq!(decision.source, UsageSource::Basic);
    }

    #[test]
    fn addon_is_the_fallback_after_tier_caps_are_spent() {
        let now = Utc::now();
        let mut limits = base(now);
        limits.tier = Tier::Basic;
        limits.calls_this_week = 5;
        limits.addon_calls = 2;
        let decision = check_permission(&limits, false).unwrap();
        assert_eq!(decision.source, UsageSource::Addon);
        assert_eq!(decision.duration_cap_sec, 60);
    }

    #[test]
    fn expired_addon_is_cleared_on_roll() {
        let now = Utc::now();
        let mut limits = base(now);
        limits.addon_calls = 3;
        limits.addon_expires = Some(now - Duration::seconds(1));
        let rolled = roll_windows(&limits, now);
        assert_eq!(rolled.addon_calls, 0);
        assert_eq!(rolled.addon_expires, None);
    }

    #[test]
    fn cancelled_tier_with_no_addon_requires_subscription() {
        let now = Utc::now();
        let mut limits = base(now);
        limits.tier = Tier::Cancelled;
        limits.trial_calls_remaining = 0;
        let deny = check_permission(&limits, false).unwrap_err();
        assert_eq!(deny, DenyReason::SubscriptionRequired);
    }

    #[test]
    fn commit_decrements_trial_and_increments_total() {
        let now = Utc::now();
        let limits = base(now);
        let decision = Decision {
            source: UsageSource::Trial,
            duration_cap_sec: 60,
        };
        let committed = commit(&limits, decision);
        assert_eq!(committed.trial_calls_remaining, 2);
        assert_eq!(committed.calls_total, 1);
    }

    #[test]
    fn record_is_idempotent_per_provider_call_id() {
        let now = Utc::now();
        let mut limits = base(now);
        limits.tier = Tier::Basic;
        let mut counted = std::collections::HashSet::new();

        let updated = record(&limits, UsageSource::Basic, 42, 60, "CA1", &counted).unwrap();
        assert_eq!(updated.duration_this_week_sec, 42);
        counted.insert("CA1".to_string());
        limits = updated;

        let again = record(&limits, UsageSource::Basic, 42, 60, "CA1", &counted);
        assert!(again.is_none());
    }

    #[test]
    fn record_caps_duration_at_the_source_cap() {
        let now = Utc::now();
        let limits = base(now);
        let counted = std::collections::HashSet::new();
        let updated = record(&limits, UsageSource::Trial, 999, 60, "CA2", &counted).unwrap();
        assert_eq!(updated.duration_this_week_sec, 60);
    }
}
