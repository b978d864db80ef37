//! Wire-level types shared across services: the telephony-provider WebSocket
//! protocol, the real-time model protocol, and the HTTP request/response
//! bodies exchanged with mobile clients. Nothing here owns business logic —
//! see the `scenario` and `usage` crates for that.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer JWT payload. `sub` is the authenticated user's id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthClaims {
    pub sub: Uuid,
    pub exp: usize,
    pub iat: usize,
}

// ---------------------------------------------------------------------
// Telephony-provider WebSocket frames (provider <-> bridge), see spec §6.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyInFrame {
    Start { start: StreamStart },
    Media { media: MediaPayload },
    Mark { mark: MarkPayload },
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamStart {
    #[serde(rename = "streamSid")]
    pub stream_sid: String,
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(default, rename = "customParameters")]
    pub custom_parameters: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaPayload {
    pub timestamp: Option<String>,
    /// Base64-encoded G.711 mu-law audio.
    pub payload: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkPayload {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutFrame {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutMediaPayload,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: OutMarkPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct OutMediaPayload {
    pub payload: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutMarkPayload {
    pub name: String,
}

// ---------------------------------------------------------------------
// Real-time model WebSocket frames (bridge <-> model), see spec §4.5/§6.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ModelClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionUpdate },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseCreateBody>,
    },
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseCreateBody {
    pub instructions: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    pub instructions: String,
    pub voice: String,
    pub temperature: f32,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub modalities: Vec<String>,
    pub turn_detection: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ModelServerEvent {
    #[serde(rename = "response.audio.delta")]
    ResponseAudioDelta { delta: String, item_id: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "error")]
    Error { error: ModelErrorBody },
    /// Catch-all for events we don't act on (item creation, transcript
    /// deltas, rate-limit notices, ...); dropping unknown variants would
    /// break `serde(tag = ...)` deserialization on any future payload.
    #[serde(other)]
    Unhandled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelErrorBody {
    #[serde(default)]
    pub message: String,
}

// ---------------------------------------------------------------------
// HTTP payloads, see spec §6.
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MakeCallRequest {
    pub phone_number: String,
    pub scenario: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleCallRequest {
    pub phone_number: String,
    pub scenario: String,
    pub scheduled_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MakeCallResponse {
    pub call_sid: String,
    pub status: String,
    pub duration_limit: i32,
    pub usage_stats: UsageStatsResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckPermissionResponse {
    pub can_make_call: bool,
    pub status: String,
    pub duration_limit: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageStatsResponse {
    pub tier: String,
    pub trial_calls_remaining: i32,
    pub calls_this_week: i32,
    pub calls_this_month: i32,
    pub calls_total: i32,
    pub duration_this_week_sec: i32,
    pub duration_this_month_sec: i32,
    pub addon_calls: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpgradeOption {
    pub plan: String,
    pub price: String,
    pub calls: String,
    pub product_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PolicyDeniedResponse {
    pub error: String,
    pub message: String,
    pub upgrade_options: Vec<UpgradeOption>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomScenarioRequest {
    pub persona: String,
    pub prompt: String,
    pub voice: String,
    pub temperature: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomScenarioPatch {
    pub persona: Option<String>,
    pub prompt: Option<String>,
    pub voice: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CustomScenarioResponse {
    pub id: String,
    pub persona: String,
    pub prompt: String,
    pub voice: String,
    pub temperature: f32,
}

/// Telephony-provider status callback, form-encoded in production.
#[derive(Debug, Clone, Deserialize)]
pub struct CallEndWebhook {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallDuration")]
    pub call_duration: i64,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}
