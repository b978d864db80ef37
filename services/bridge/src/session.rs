//! The media bridge session (C5, spec §4.5): four cooperating tasks per call
//! under one cancellation signal — inbound relay, outbound relay (which also
//! owns barge-in, so the clear write is guaranteed to precede the next model
//! delta on the wire), a duration watchdog, and a supervisor that owns
//! teardown and the post-session accounting fallback.
//!
//! Grounded on the teacher's media service UDP relay (`Relay::new`,
//! services/media/src/main.rs): spawn the hot forwarding loop off the
//! connection-accepting task, log and drop on recv error, ignore send errors
//! on a peer that may already be gone.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as TelephonyMessage, WebSocket};
use chrono::Utc;
use dto::{
    MarkPayload, MediaPayload, ModelClientEvent, ModelServerEvent, OutMediaPayload,
    ResponseCreateBody, SessionUpdate, TelephonyInFrame, TelephonyOutFrame,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use models::{CallRecord, CallStatus, ResolvedScenario};
use sqlx::{Pool, Postgres};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex, OwnedSemaphorePermit};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message as ModelMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::Config;
use crate::usage_store;

const WRITE_STALL: Duration = Duration::from_secs(5);
/// Spec §4.5: once the caller speaks over a playing response, ignore further
/// `speech_started` events for this long before re-arming barge-in.
const INTERRUPT_COOLDOWN: Duration = Duration::from_millis(500);
/// Spec §4.5 failure semantics: drain whatever audio is already in flight
/// before cancelling on a model `error` event.
const ERROR_DRAIN: Duration = Duration::from_secs(1);
/// Spec §4.5: once this close to the duration cap, inject one wrap-up turn.
const WRAP_UP_WINDOW: Duration = Duration::from_secs(30);

type ModelStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ModelTx = Arc<Mutex<SplitSink<ModelStream, ModelMessage>>>;
type TelephonyTx = Arc<Mutex<SplitSink<WebSocket, TelephonyMessage>>>;

/// Run one call's bridge session to completion. Never panics the caller;
/// every failure path logs and falls through to teardown. `_permit` bounds
/// total concurrent calls (spec §5) and is held until this function returns.
pub async fn run(
    telephony_socket: WebSocket,
    scenario: ResolvedScenario,
    duration_cap_sec: i32,
    db: Pool<Postgres>,
    config: Arc<Config>,
    _permit: OwnedSemaphorePermit,
) {
    let session_start = Instant::now();
    let (telephony_tx, mut telephony_rx) = telephony_socket.split();
    let telephony_tx: TelephonyTx = Arc::new(Mutex::new(telephony_tx));

    // Twilio always opens with a `start` frame before any media; block on it
    // so the rest of the session has the stream sid and call sid available.
    let Some((stream_sid, call_sid)) = await_stream_start(&mut telephony_rx).await else {
        tracing::warn!("telephony socket closed before start frame");
        return;
    };

    let model_stream = match connect_model(&config).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(%error, %stream_sid, "failed to connect to realtime model");
            return;
        }
    };
    let (model_tx, model_rx) = model_stream.split();
    let model_tx: ModelTx = Arc::new(Mutex::new(model_tx));

    if let Err(error) = send_session_update(&model_tx, &scenario).await {
        tracing::error!(%error, %stream_sid, "failed to prime model session");
        return;
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn(inbound_relay(
        telephony_rx,
        model_tx.clone(),
        cancel_rx.clone(),
        cancel_tx.clone(),
    ));
    tasks.spawn(outbound_relay(
        model_rx,
        model_tx.clone(),
        telephony_tx.clone(),
        stream_sid.clone(),
        session_start,
        cancel_rx.clone(),
        cancel_tx.clone(),
    ));
    tasks.spawn(duration_watchdog(
        duration_cap_sec,
        model_tx.clone(),
        cancel_tx.clone(),
    ));

    // Supervisor: wait for the first task to finish (call ended, cap hit,
    // peer closed, transport error), then cancel the rest.
    let _ = tasks.join_next().await;
    let _ = cancel_tx.send(true);
    while tasks.join_next().await.is_some() {}

    tracing::info!(%stream_sid, %call_sid, "bridge session ended");
    let elapsed_sec = session_start.elapsed().as_secs() as i64;
    finalize_call_record(&db, &call_sid, elapsed_sec).await;
}

async fn await_stream_start(telephony_rx: &mut SplitStream<WebSocket>) -> Option<(String, String)> {
    while let Some(Ok(msg)) = telephony_rx.next().await {
        if let TelephonyMessage::Text(text) = msg {
            if let Ok(TelephonyInFrame::Start { start }) = serde_json::from_str(&text) {
                return Some((start.stream_sid, start.call_sid));
            }
        }
    }
    None
}

async fn connect_model(config: &Config) -> anyhow::Result<ModelStream> {
    let mut request = config.model_ws_url.as_str().into_client_request()?;
    request.headers_mut().insert(
        "Authorization",
        format!("Bearer {}", config.model_api_key).parse()?,
    );
    request.headers_mut().insert("OpenAI-Beta", "realtime=v1".parse()?);
    let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
}

async fn send_session_update(model_tx: &ModelTx, scenario: &ResolvedScenario) -> anyhow::Result<()> {
    let event = ModelClientEvent::SessionUpdate {
        session: SessionUpdate {
            instructions: format!("You are {}. {}", scenario.persona, scenario.prompt),
            voice: scenario.voice.as_str().to_string(),
            temperature: scenario.temperature,
            input_audio_format: "g711_ulaw".to_string(),
            output_audio_format: "g711_ulaw".to_string(),
            modalities: vec!["audio".to_string(), "text".to_string()],
            turn_detection: scenario::vad_policy_for(&scenario.id, None)?.to_json(),
        },
    };
    let payload = serde_json::to_string(&event)?;
    model_tx.lock().await.send(ModelMessage::Text(payload)).await?;
    Ok(())
}

/// Task 1 (inbound relay): telephony audio in -> model input buffer (spec
/// §4.5 "relay caller audio to the model"). Never logs the audio payload
/// itself (§4.5).
async fn inbound_relay(
    mut telephony_rx: SplitStream<WebSocket>,
    model_tx: ModelTx,
    mut cancel_rx: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
) {
    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    return;
                }
            }
            frame = telephony_rx.next() => {
                let Some(Ok(msg)) = frame else {
                    let _ = cancel_tx.send(true);
                    return;
                };
                let TelephonyMessage::Text(text) = msg else { continue };
                match serde_json::from_str::<TelephonyInFrame>(&text) {
                    Ok(TelephonyInFrame::Media { media }) => {
                        if forward_audio(&model_tx, media).await.is_err() {
                            let _ = cancel_tx.send(true);
                            return;
                        }
                    }
                    Ok(TelephonyInFrame::Stop) => {
                        let _ = cancel_tx.send(true);
                        return;
                    }
                    Ok(TelephonyInFrame::Mark { mark: MarkPayload { .. } }) | Ok(TelephonyInFrame::Start { .. }) => {}
                    Err(error) => tracing::warn!(%error, "unparseable telephony frame"),
                }
            }
        }
    }
}

async fn forward_audio(model_tx: &ModelTx, media: MediaPayload) -> anyhow::Result<()> {
    let event = ModelClientEvent::InputAudioAppend { audio: media.payload };
    let payload = serde_json::to_string(&event)?;
    tokio::time::timeout(WRITE_STALL, model_tx.lock().await.send(ModelMessage::Text(payload)))
        .await
        .map_err(|_| anyhow::anyhow!("model write stalled past {:?}", WRITE_STALL))??;
    Ok(())
}

/// Task 2 (outbound relay): model audio out -> telephony stream. Also owns
/// barge-in (spec §4.5) directly inline, since the ordering guarantee
/// ("clear happens-before the next model-delta write") only holds if both
/// writes come from the same task serialized against the same read loop.
async fn outbound_relay(
    mut model_rx: SplitStream<ModelStream>,
    model_tx: ModelTx,
    telephony_tx: TelephonyTx,
    stream_sid: String,
    session_start: Instant,
    mut cancel_rx: watch::Receiver<bool>,
    cancel_tx: watch::Sender<bool>,
) {
    let mut last_assistant_item_id: Option<String> = None;
    let mut last_interrupt: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    return;
                }
            }
            frame = model_rx.next() => {
                let Some(Ok(msg)) = frame else {
                    let _ = cancel_tx.send(true);
                    return;
                };
                let ModelMessage::Text(text) = msg else { continue };
                let Ok(event) = serde_json::from_str::<ModelServerEvent>(&text) else {
                    tracing::warn!("unparseable model frame");
                    continue;
                };
                match event {
                    ModelServerEvent::ResponseAudioDelta { delta, item_id } => {
                        last_assistant_item_id = Some(item_id);
                        let frame = TelephonyOutFrame::Media {
                            stream_sid: stream_sid.clone(),
                            media: OutMediaPayload { payload: delta },
                        };
                        if write_telephony(&telephony_tx, frame).await.is_err() {
                            let _ = cancel_tx.send(true);
                            return;
                        }
                    }
                    ModelServerEvent::SpeechStarted => {
                        handle_barge_in(
                            &model_tx,
                            &telephony_tx,
                            &stream_sid,
                            session_start,
                            &mut last_assistant_item_id,
                            &mut last_interrupt,
                        )
                        .await;
                    }
                    ModelServerEvent::Error { error } => {
                        tracing::warn!(message = %error.message, "model reported an error, draining before cancel");
                        drain_then_cancel(&mut model_rx, &telephony_tx, &stream_sid, &cancel_tx).await;
                        return;
                    }
                    ModelServerEvent::ResponseDone | ModelServerEvent::Unhandled => {}
                }
            }
        }
    }
}

/// Clear whatever audio is already queued on the telephony leg and truncate
/// the model's in-flight item, in that order, so the clear write precedes
/// any later delta write on the same connections (spec §4.5 Invariant 5).
/// No-op if no response is in flight, or if the last interrupt was handled
/// under `INTERRUPT_COOLDOWN` ago.
async fn handle_barge_in(
    model_tx: &ModelTx,
    telephony_tx: &TelephonyTx,
    stream_sid: &str,
    session_start: Instant,
    last_assistant_item_id: &mut Option<String>,
    last_interrupt: &mut Option<Instant>,
) {
    let now = Instant::now();
    if let Some(last) = last_interrupt {
        if now.duration_since(*last) < INTERRUPT_COOLDOWN {
            return;
        }
    }
    let Some(item_id) = last_assistant_item_id.take() else {
        return;
    };

    let clear = TelephonyOutFrame::Clear { stream_sid: stream_sid.to_string() };
    if write_telephony(telephony_tx, clear).await.is_err() {
        return;
    }

    let audio_end_ms = now.duration_since(session_start).as_millis() as u64;
    let truncate = ModelClientEvent::ConversationItemTruncate {
        item_id,
        content_index: 0,
        audio_end_ms,
    };
    if let Ok(payload) = serde_json::to_string(&truncate) {
        let _ = model_tx.lock().await.send(ModelMessage::Text(payload)).await;
    }
    *last_interrupt = Some(now);
}

/// Spec §4.5 failure semantics: on a model `error`, keep forwarding whatever
/// audio is already in flight for up to `ERROR_DRAIN`, then cancel.
async fn drain_then_cancel(
    model_rx: &mut SplitStream<ModelStream>,
    telephony_tx: &TelephonyTx,
    stream_sid: &str,
    cancel_tx: &watch::Sender<bool>,
) {
    let deadline = Instant::now() + ERROR_DRAIN;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let Ok(Some(Ok(msg))) = tokio::time::timeout(remaining, model_rx.next()).await else {
            break;
        };
        let ModelMessage::Text(text) = msg else { continue };
        let Ok(ModelServerEvent::ResponseAudioDelta { delta, .. }) =
            serde_json::from_str::<ModelServerEvent>(&text)
        else {
            continue;
        };
        let frame = TelephonyOutFrame::Media {
            stream_sid: stream_sid.to_string(),
            media: OutMediaPayload { payload: delta },
        };
        if write_telephony(telephony_tx, frame).await.is_err() {
            break;
        }
    }
    let _ = cancel_tx.send(true);
}

async fn write_telephony(telephony_tx: &TelephonyTx, frame: TelephonyOutFrame) -> anyhow::Result<()> {
    let payload = serde_json::to_string(&frame)?;
    tokio::time::timeout(
        WRITE_STALL,
        telephony_tx.lock().await.send(TelephonyMessage::Text(payload)),
    )
    .await
    .map_err(|_| anyhow::anyhow!("telephony write stalled past {:?}", WRITE_STALL))??;
    Ok(())
}

/// Task 3 (duration watchdog): hard ceiling on call length, independent of
/// the telephony provider's own `TimeLimit` (spec §4.5/§4.6: the provider
/// cuts the call a few seconds after this to give the bridge room to close
/// gracefully). Injects one wrap-up turn when the cap is `WRAP_UP_WINDOW`
/// away (spec §4.5).
async fn duration_watchdog(duration_cap_sec: i32, model_tx: ModelTx, cancel_tx: watch::Sender<bool>) {
    let cap = Duration::from_secs(duration_cap_sec.max(0) as u64);
    let start = Instant::now();
    let mut wrapped_up = false;
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        ticker.tick().await;
        let elapsed = start.elapsed();
        if elapsed >= cap {
            let _ = cancel_tx.send(true);
            return;
        }
        if !wrapped_up && cap - elapsed <= WRAP_UP_WINDOW {
            wrapped_up = true;
            let event = ModelClientEvent::ResponseCreate {
                response: Some(ResponseCreateBody {
                    instructions: "The call is about to end. Wrap up the conversation naturally \
                                   and say goodbye."
                        .to_string(),
                }),
            };
            if let Ok(payload) = serde_json::to_string(&event) {
                let _ = model_tx.lock().await.send(ModelMessage::Text(payload)).await;
            }
        }
    }
}

/// Supervisor's teardown step: only finalize the `CallRecord` if the status
/// callback hasn't already made it terminal (spec §4.5), matched by
/// `provider_call_id` (the `start` frame's `callSid`), and roll the duration
/// into the usage ledger exactly once (spec §4.5 exit bullet 5, mirroring
/// `services/api/src/handlers/webhook.rs`'s idempotency pattern).
async fn finalize_call_record(db: &Pool<Postgres>, provider_call_id: &str, elapsed_sec: i64) {
    let mut tx = match db.begin().await {
        Ok(tx) => tx,
        Err(error) => {
            tracing::warn!(%error, %provider_call_id, "post-session fallback failed to open transaction");
            return;
        }
    };

    let record = match sqlx::query_as::<_, CallRecord>(
        "SELECT * FROM call_records WHERE provider_call_id = $1 FOR UPDATE",
    )
    .bind(provider_call_id)
    .fetch_optional(&mut *tx)
    .await
    {
        Ok(Some(record)) => record,
        Ok(None) => {
            tracing::warn!(%provider_call_id, "post-session fallback for unknown call record");
            return;
        }
        Err(error) => {
            tracing::warn!(%error, %provider_call_id, "post-session fallback failed to load call record");
            return;
        }
    };

    if record.status.is_terminal() {
        let _ = tx.commit().await;
        return;
    }

    let duration_sec = elapsed_sec.min(record.duration_cap_sec as i64).max(0) as i32;

    if let Err(error) = sqlx::query("UPDATE call_records SET status = $2, duration_sec = $3 WHERE id = $1")
        .bind(record.id)
        .bind(CallStatus::Completed)
        .bind(duration_sec)
        .execute(&mut *tx)
        .await
    {
        tracing::warn!(%error, %provider_call_id, "post-session fallback write failed");
        return;
    }

    match usage_store::already_counted(&mut tx, record.owner, provider_call_id).await {
        Ok(true) => {
            let _ = tx.commit().await;
            return;
        }
        Ok(false) => {}
        Err(error) => {
            tracing::warn!(%error, %provider_call_id, "post-session fallback idempotency check failed");
            return;
        }
    }

    let limits = match usage_store::load_for_update(&mut tx, record.owner).await {
        Ok(limits) => limits,
        Err(error) => {
            tracing::warn!(%error, %provider_call_id, "post-session fallback failed to load usage limits");
            return;
        }
    };
    let rolled = usage::roll_windows(&limits, Utc::now());
    let counted = std::collections::HashSet::new();
    let to_persist = usage::record(
        &rolled,
        record.usage_source,
        duration_sec as i64,
        record.duration_cap_sec as i64,
        provider_call_id,
        &counted,
    )
    .unwrap_or(rolled);

    if let Err(error) = usage_store::persist(&mut tx, &to_persist).await {
        tracing::warn!(%error, %provider_call_id, "post-session fallback failed to persist usage limits");
        return;
    }
    if let Err(error) = usage_store::mark_counted(&mut tx, record.owner, provider_call_id).await {
        tracing::warn!(%error, %provider_call_id, "post-session fallback failed to mark call counted");
        return;
    }

    if let Err(error) = tx.commit().await {
        tracing::warn!(%error, %provider_call_id, "post-session fallback commit failed");
    }
}
