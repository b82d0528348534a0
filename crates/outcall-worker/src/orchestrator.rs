//! Call-lifecycle orchestration.
//!
//! One job is one logical task: parse the dial metadata, place the
//! outbound call leg, classify a failed dial from its SIP status, start
//! the conversational session, and decide who speaks first. Call state is
//! job-local; dial failure is terminal for the job and no session is
//! started after one.

use crate::config::Settings;
use crate::logging::log_call_event;
use crate::ProviderBundle;
use outcall_gateway::InferenceGateway;
use outcall_types::{CallOutcome, CallState, DialInfo, MetadataError};
use outcall_voice::{
    AgentSession, Assistant, DialError, OutboundCall, RoomEvent, RoomHandle, RoomInputOptions,
    SessionConfig, SessionEvent, Telephony, TurnDetector, UserState, VoiceError,
};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// How long an answered outbound call waits for the user to speak before
/// the agent greets first.
pub const DEFAULT_GREETING_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on flushing audio the transport buffered before session start.
const PRE_CONNECT_AUDIO_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway function probed once per job.
const GATEWAY_PROBE_FUNCTION: &str = "analyze_transcript";

/// Instruction override for the agent-greets-first branch of an outbound
/// call.
const OUTBOUND_GREETING: &str = "Greet the caller politely by saying hello. Remember that you \
     are an outbound caller: you are the one who called them. Greet them and wait for them to \
     respond. If a name is in the script, use it; otherwise just say hello.";

/// Instruction override for inbound/direct sessions, where the agent
/// always speaks first.
const INBOUND_GREETING: &str = "Say hello and ask how you can help today.";

/// Everything a job runs with. Built by the dispatch surface; tests build
/// it directly.
pub struct JobContext {
    pub job_id: String,
    /// Raw metadata payload, parsed once as [`DialInfo`].
    pub metadata: String,
    pub room: Arc<RoomHandle>,
    pub telephony: Arc<dyn Telephony>,
    pub providers: Arc<ProviderBundle>,
    pub gateway: Option<Arc<InferenceGateway>>,
    pub settings: Arc<Settings>,
    /// Job-local call state, shared with the disconnect watcher.
    pub call_state: Arc<Mutex<CallState>>,
    pub greeting_timeout: Duration,
}

/// Job-fatal failures.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Dial(#[from] DialError),

    #[error(transparent)]
    Voice(#[from] VoiceError),
}

/// What a completed job looked like.
pub struct JobReport {
    pub outbound: bool,
    /// True when the agent issued a greeting reply (inbound, or outbound
    /// after the silence timeout).
    pub greeted: bool,
    pub session: Arc<AgentSession>,
}

impl std::fmt::Debug for JobReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobReport")
            .field("outbound", &self.outbound)
            .field("greeted", &self.greeted)
            .finish_non_exhaustive()
    }
}

/// Runs one job to the point where the conversation is established.
///
/// The returned report keeps the session alive; the caller owns its
/// remaining lifetime (it normally ends when the room closes).
pub async fn run_job(ctx: JobContext) -> Result<JobReport, JobError> {
    let room_name = ctx.room.name().to_string();
    let dial_info = DialInfo::from_metadata(&ctx.metadata)?;
    info!(
        job_id = ctx.job_id.as_str(),
        room = room_name.as_str(),
        outbound = dial_info.is_outbound(),
        "job started"
    );

    if let Some(number) = dial_info.phone_number.clone() {
        spawn_disconnect_watcher(ctx.room.clone(), number.clone(), ctx.call_state.clone());

        log_call_event("CALL DIALING", Some(&number), None, Some(&room_name));
        let call = OutboundCall::new(
            room_name.clone(),
            ctx.settings.sip_trunk_id.clone(),
            number.clone(),
        );
        match ctx.telephony.dial(&call).await {
            Ok(participant) => {
                ctx.call_state.lock().expect("call state lock").started_at = Some(Instant::now());
                log_call_event("CALL ANSWERED", Some(&number), None, Some(&room_name));
                debug!(
                    participant = participant.identity.as_str(),
                    sip_call_id = participant.sip_call_id.as_deref().unwrap_or("-"),
                    "outbound call leg created"
                );
            }
            Err(err) => {
                log_dial_failure(&number, &room_name, &err);
                ctx.call_state.lock().expect("call state lock").failed = true;
                return Err(err.into());
            }
        }
    }

    probe_gateway(ctx.gateway.as_deref()).await;

    let assistant = Assistant::load(&ctx.settings.prompt_path, dial_info.prompt.as_deref())?;
    let session = Arc::new(AgentSession::new(SessionConfig {
        stt: ctx.providers.stt.clone(),
        tts: ctx.providers.tts.clone(),
        llm: ctx.providers.llm.clone(),
        vad: ctx.providers.vad.clone(),
        // Lightweight, fine to construct per call.
        turn_detector: TurnDetector::default(),
    }));

    // Subscribed before start so a user who speaks during the pre-connect
    // flush is not missed by the speak-first decision.
    let mut events = session.subscribe();
    spawn_metrics_watcher(session.subscribe(), ctx.job_id.clone());

    session
        .start(
            ctx.room.clone(),
            assistant,
            RoomInputOptions {
                pre_connect_audio: true,
                pre_connect_audio_timeout: PRE_CONNECT_AUDIO_TIMEOUT,
            },
        )
        .await?;

    let greeted = if dial_info.is_outbound() {
        wait_speak_first(&session, &mut events, ctx.greeting_timeout).await?
    } else {
        session.generate_reply(INBOUND_GREETING).await?;
        true
    };
    drop(events);

    info!(
        job_id = ctx.job_id.as_str(),
        greeted, "conversation established"
    );

    Ok(JobReport {
        outbound: dial_info.is_outbound(),
        greeted,
        session,
    })
}

/// Waits up to `timeout` for the user to start speaking.
///
/// Returns `false` when the user spoke first (the agent responds
/// reactively) and `true` when the timeout elapsed and exactly one
/// greeting reply was generated. The event receiver is dropped by the
/// caller on every exit path, which deregisters the listener.
async fn wait_speak_first(
    session: &AgentSession,
    events: &mut broadcast::Receiver<SessionEvent>,
    timeout: Duration,
) -> Result<bool, JobError> {
    let user_spoke = async {
        loop {
            match events.recv().await {
                Ok(SessionEvent::UserStateChanged {
                    state: UserState::Speaking,
                }) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                // Sender gone means no speech signal can ever arrive; let
                // the timeout decide.
                Err(broadcast::error::RecvError::Closed) => {
                    std::future::pending::<()>().await;
                }
            }
        }
    };

    match tokio::time::timeout(timeout, user_spoke).await {
        Ok(()) => {
            info!("user spoke first, agent will respond naturally");
            Ok(false)
        }
        Err(_) => {
            info!("user silence detected, agent will greet first");
            session.generate_reply(OUTBOUND_GREETING).await?;
            Ok(true)
        }
    }
}

/// Watches the room for the dialed participant leaving.
///
/// Job-scoped: the task captures this job's call state and nothing else.
/// Logs call completion (with duration when the answer time is known) at
/// most once, then exits.
fn spawn_disconnect_watcher(
    room: Arc<RoomHandle>,
    dialed_identity: String,
    state: Arc<Mutex<CallState>>,
) {
    let mut events = room.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RoomEvent::ParticipantDisconnected { identity }) => {
                    info!(
                        identity = identity.as_str(),
                        room = room.name(),
                        "participant disconnected"
                    );
                    if identity == dialed_identity {
                        let duration = {
                            let mut state = state.lock().expect("call state lock");
                            if state.failed {
                                break;
                            }
                            state.complete(Instant::now())
                        };
                        log_call_event(
                            "CALL COMPLETED",
                            Some(&dialed_identity),
                            duration,
                            Some(room.name()),
                        );
                        break;
                    }
                }
                Ok(RoomEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    });
}

/// Logs the structured failure block for a failed dial, including the SIP
/// classification and the status string reported outward.
fn log_dial_failure(number: &str, room_name: &str, err: &DialError) {
    log_call_event("CALL FAILED", Some(number), None, Some(room_name));
    match err {
        DialError::Provider {
            message,
            sip_status_code,
            sip_status,
        } => {
            error!(
                target: "outcall::call",
                sip_status_code = sip_status_code.as_deref().unwrap_or("-"),
                sip_status = sip_status.as_deref().unwrap_or("-"),
                "dial rejected by provider: {message}"
            );
            let outcome = CallOutcome::from_sip_status(sip_status_code.as_deref());
            warn!(target: "outcall::call", "REASON: {}", outcome.reason());
            info!(
                target: "outcall::call",
                webhook_status = outcome.webhook_status().as_str(),
                "call outcome classified"
            );
        }
        DialError::Unexpected(message) => {
            error!(target: "outcall::call", "unexpected dial error: {message}");
        }
    }
}

/// One fire-and-forget test inference per job; never job-fatal.
async fn probe_gateway(gateway: Option<&InferenceGateway>) {
    let Some(gateway) = gateway else {
        warn!(target: "outcall::gateway", "inference gateway unavailable; skipping probe");
        return;
    };

    let input = serde_json::json!({
        "messages": [{"role": "user", "content": "tell me a dad joke"}]
    });
    match gateway.infer(GATEWAY_PROBE_FUNCTION, input).await {
        Ok(response) => {
            debug!(target: "outcall::gateway", "gateway probe response: {response}");
        }
        Err(e) => warn!(target: "outcall::gateway", "gateway probe inference failed: {e}"),
    }
}

/// Logs per-reply metrics for the job's lifetime.
fn spawn_metrics_watcher(mut events: broadcast::Receiver<SessionEvent>, job_id: String) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::MetricsCollected { metrics }) => {
                    info!(
                        target: "outcall::metrics",
                        job_id = job_id.as_str(),
                        llm_ms = metrics.llm_ms,
                        tts_ms = metrics.tts_ms,
                        reply_chars = metrics.reply_chars,
                        "reply metrics collected"
                    );
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}
