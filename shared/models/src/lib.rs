//! Persisted domain entities (spec §3). No I/O here — each service owns its
//! own `sqlx::Pool<Postgres>` and maps rows into these plain structs, the way
//! the teacher's `pbx`/`api` services already did for `CallFlow`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Voice {
    Ash,
    Coral,
    Shimmer,
    Alloy,
    Echo,
    Ballad,
    Sage,
    Verse,
}

impl Voice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Ash => "ash",
            Voice::Coral => "coral",
            Voice::Shimmer => "shimmer",
            Voice::Alloy => "alloy",
            Voice::Echo => "echo",
            Voice::Ballad => "ballad",
            Voice::Sage => "sage",
            Voice::Verse => "verse",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "ash" => Voice::Ash,
            "coral" => Voice::Coral,
            "shimmer" => Voice::Shimmer,
            "alloy" => Voice::Alloy,
            "echo" => Voice::Echo,
            "ballad" => Voice::Ballad,
            "sage" => Voice::Sage,
            "verse" => Voice::Verse,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Trial,
    Basic,
    Premium,
    Cancelled,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Trial => "trial",
            Tier::Basic => "basic",
            Tier::Premium => "premium",
            Tier::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiated,
    InProgress,
    Completed,
    Failed,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallStatus::Completed | CallStatus::Failed)
    }
}

/// A provider call-status string we accept on the status callback (spec
/// §4.7: "Accept only CallStatus=completed|failed|no-answer|busy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCallStatus {
    Completed,
    Failed,
    NoAnswer,
    Busy,
}

impl ProviderCallStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        Some(match raw {
            "completed" => ProviderCallStatus::Completed,
            "failed" => ProviderCallStatus::Failed,
            "no-answer" => ProviderCallStatus::NoAnswer,
            "busy" => ProviderCallStatus::Busy,
            _ => return None,
        })
    }

    /// How the accepted provider status maps onto our stored `CallStatus`.
    pub fn to_call_status(self) -> CallStatus {
        match self {
            ProviderCallStatus::Completed => CallStatus::Completed,
            ProviderCallStatus::Failed | ProviderCallStatus::NoAnswer | ProviderCallStatus::Busy => {
                CallStatus::Failed
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub credential_hash: String,
    pub created_at: DateTime<Utc>,
    pub display_name: Option<String>,
    pub voice_preference: Option<Voice>,
}

/// Built-in, process-wide scenario constant (spec §3, §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub id: &'static str,
    pub persona: &'static str,
    pub prompt: &'static str,
    pub voice: Voice,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CustomScenario {
    pub id: String,
    pub owner: Uuid,
    pub persona: String,
    pub prompt: String,
    pub voice: Voice,
    pub temperature: f32,
    pub created_at: DateTime<Utc>,
}

/// A scenario reference is either a built-in id or a caller-owned custom id
/// — a closed sum (spec §9: "no open inheritance needed"), so callers match
/// on it instead of re-deriving the distinction from string prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioId {
    Builtin(String),
    Custom(String),
}

impl ScenarioId {
    /// Custom ids are distinguished purely by their `custom_` prefix (spec
    /// §4.1) — no database lookup needed to classify one.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("custom_") {
            ScenarioId::Custom(raw.to_string())
        } else {
            ScenarioId::Builtin(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ScenarioId::Builtin(s) | ScenarioId::Custom(s) => s,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, ScenarioId::Custom(_))
    }
}

/// A scenario resolved from either namespace — the value the bridge needs to
/// seed a model session (spec §4.1 "Why").
#[derive(Debug, Clone)]
pub struct ResolvedScenario {
    pub id: String,
    pub persona: String,
    pub prompt: String,
    pub voice: Voice,
    pub temperature: f32,
}

impl From<&Scenario> for ResolvedScenario {
    fn from(s: &Scenario) -> Self {
        ResolvedScenario {
            id: s.id.to_string(),
            persona: s.persona.to_string(),
            prompt: s.prompt.to_string(),
            voice: s.voice,
            temperature: s.temperature,
        }
    }
}

impl From<CustomScenario> for ResolvedScenario {
    fn from(s: CustomScenario) -> Self {
        ResolvedScenario {
            id: s.id,
            persona: s.persona,
            prompt: s.prompt,
            voice: s.voice,
            temperature: s.temperature,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UsageLimits {
    pub user_id: Uuid,
    pub tier: Tier,
    pub trial_calls_remaining: i32,
    pub week_anchor: DateTime<Utc>,
    pub month_anchor: DateTime<Utc>,
    pub calls_this_week: i32,
    pub calls_this_month: i32,
    pub calls_total: i32,
    pub duration_this_week_sec: i32,
    pub duration_this_month_sec: i32,
    pub addon_calls: i32,
    pub addon_expires: Option<DateTime<Utc>>,
    pub subscription_status: String,
    pub sub_end: Option<DateTime<Utc>>,
}

impl UsageLimits {
    /// Defaults for a brand new user (spec §3: "lazily initialized on first
    /// access").
    pub fn new_trial(user_id: Uuid, now: DateTime<Utc>) -> Self {
        UsageLimits {
            user_id,
            tier: Tier::Trial,
            trial_calls_remaining: 3,
            week_anchor: now,
            month_anchor: now,
            calls_this_week: 0,
            calls_this_month: 0,
            calls_total: 0,
            duration_this_week_sec: 0,
            duration_this_month_sec: 0,
            addon_calls: 0,
            addon_expires: None,
            subscription_status: "none".to_string(),
            sub_end: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ScheduledCall {
    pub id: Uuid,
    pub owner: Uuid,
    pub e164: String,
    pub scenario_ref: String,
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CallRecord {
    pub id: Uuid,
    pub owner: Uuid,
    pub provider_call_id: String,
    pub e164: String,
    pub scenario_ref: String,
    pub status: CallStatus,
    pub usage_source: UsageSource,
    pub duration_cap_sec: i32,
    pub started_at: DateTime<Utc>,
    pub duration_sec: Option<i32>,
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserPhoneNumber {
    pub owner: Uuid,
    pub e164: String,
    pub provider_sid: String,
    pub voice_capable: bool,
    pub sms_capable: bool,
    pub active: bool,
    pub is_primary: bool,
    pub provisioned_at: DateTime<Utc>,
}

/// Where a permitted call's allowance came from (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum UsageSource {
    DevelopmentMode,
    Trial,
    Basic,
    Premium,
    Addon,
}

impl UsageSource {
    /// The `status` string a permission check reports for this source
    /// (spec §8 scenario 1: `{..., status: "trial_call_available", ...}`).
    pub fn status_label(&self) -> &'static str {
        match self {
            UsageSource::DevelopmentMode => "development_mode_call_available",
            UsageSource::Trial => "trial_call_available",
            UsageSource::Basic => "basic_call_available",
            UsageSource::Premium => "premium_call_available",
            UsageSource::Addon => "addon_call_available",
        }
    }
}

/// The outcome of a pre-call permission check, deferred for the dispatcher to
/// `commit` only after a confirmed provider dispatch (spec §4.3, §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub source: UsageSource,
    pub duration_cap_sec: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    TrialExhausted,
    WeeklyLimit,
    MonthlyLimit,
    SubscriptionRequired,
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::TrialExhausted => "trial_exhausted",
            DenyReason::WeeklyLimit => "weekly_limit",
            DenyReason::MonthlyLimit => "monthly_limit",
            DenyReason::SubscriptionRequired => "subscription_required",
        }
    }
}

/// Per-tier caps (spec §4.3 table). `None` means "no cap of that kind".
pub struct TierCaps {
    pub weekly_cap: Option<i32>,
    pub monthly_cap: Option<i32>,
    pub per_call_cap_sec: i32,
}

pub const TRIAL_CAPS: TierCaps = TierCaps {
    weekly_cap: None,
    monthly_cap: None,
    per_call_cap_sec: 60,
};
pub const BASIC_CAPS: TierCaps = TierCaps {
    weekly_cap: Some(5),
    monthly_cap: None,
    per_call_cap_sec: 60,
};
pub const PREMIUM_CAPS: TierCaps = TierCaps {
    weekly_cap: None,
    monthly_cap: Some(30),
    per_call_cap_sec: 120,
};

impl Tier {
    pub fn caps(&self) -> &'static TierCaps {
        match self {
            Tier::Trial => &TRIAL_CAPS,
            Tier::Basic => &BASIC_CAPS,
            Tier::Premium => &PREMIUM_CAPS,
            Tier::Cancelled => &BASIC_CAPS,
        }
    }
}
