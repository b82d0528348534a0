//! Outcall worker library: prewarm, dispatch surface, and orchestration.
//!
//! The worker eagerly constructs the heavy provider clients once per
//! process, then accepts jobs on a small HTTP surface. Each accepted job
//! runs as an independent task with isolated call state; the prewarmed
//! clients are shared read-only across all of them.

pub mod config;
pub mod logging;
pub mod orchestrator;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use config::Settings;
use orchestrator::{JobContext, DEFAULT_GREETING_TIMEOUT};
use outcall_gateway::InferenceGateway;
use outcall_types::{CallState, JobAccepted, JobRequest};
use outcall_voice::{
    LlmService, RoomEvent, RoomHandle, SharedSpeechDetector, SileroVad, SttService, Telephony,
    TtsService, VadConfig, VoiceError,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Heavy provider clients, constructed once at prewarm and shared across
/// jobs. Jobs only invoke them, never mutate shared fields.
pub struct ProviderBundle {
    pub stt: Arc<SttService>,
    pub tts: Arc<TtsService>,
    pub llm: Arc<LlmService>,
    pub vad: SharedSpeechDetector,
}

/// Eagerly constructs the provider clients. Failure here is fatal: a
/// worker without providers cannot take calls.
pub fn prewarm(settings: &Settings) -> Result<ProviderBundle, VoiceError> {
    info!("prewarming provider clients");
    let started = Instant::now();

    let vad = SileroVad::load_shared(&VadConfig::default())?;
    let stt = Arc::new(SttService::new(&settings.deepgram_api_key, "nova-3", "en"));
    let llm = Arc::new(LlmService::new(&settings.openai_api_key, "gpt-4.1-mini"));
    let tts = Arc::new(TtsService::new(
        &settings.elevenlabs_api_key,
        &settings.elevenlabs_voice_id,
        "eleven_flash_v2_5",
    ));

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "provider clients prewarmed"
    );
    Ok(ProviderBundle { stt, tts, llm, vad })
}

/// Attempts the inference gateway build. Never aborts worker startup: a
/// failure leaves the handle absent and the worker degrades to running
/// jobs without the gateway.
pub fn warm_gateway(settings: &Settings) -> Option<Arc<InferenceGateway>> {
    match InferenceGateway::build(&settings.gateway_config_path, &settings.storage_url()) {
        Ok(gateway) => {
            info!("inference gateway initialized at prewarm");
            Some(Arc::new(gateway))
        }
        Err(e) => {
            warn!("inference gateway initialization failed: {e}");
            None
        }
    }
}

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub telephony: Arc<dyn Telephony>,
    pub providers: Arc<ProviderBundle>,
    pub gateway: Option<Arc<InferenceGateway>>,
}

/// Builds the dispatch router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(dispatch_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check handler.
///
/// Returns `200 OK` with worker status, version, and the agent name used
/// for dispatch.
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "agent": state.settings.agent_name,
    }))
}

/// Accepts a job, creates its room, and spawns the orchestrator task.
async fn dispatch_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), (StatusCode, String)> {
    let job_id = Uuid::new_v4().to_string();
    let room_name = request.room_name.clone().unwrap_or_else(|| {
        format!(
            "call-{}-{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            &job_id[..8]
        )
    });

    if let Err(e) = state.telephony.ensure_room(&room_name).await {
        error!(room = room_name.as_str(), "failed to create room: {e}");
        return Err((StatusCode::BAD_GATEWAY, format!("failed to create room: {e}")));
    }

    let token = state
        .telephony
        .agent_token(&room_name, &state.settings.agent_name)
        .map_err(|e| {
            error!(room = room_name.as_str(), "failed to mint agent token: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to mint agent token: {e}"),
            )
        })?;
    debug!(
        room = room_name.as_str(),
        token_len = token.len(),
        "agent join token minted"
    );

    let room = Arc::new(RoomHandle::new(room_name.clone()));
    let ctx = JobContext {
        job_id: job_id.clone(),
        metadata: request.metadata,
        room,
        telephony: state.telephony.clone(),
        providers: state.providers.clone(),
        gateway: state.gateway.clone(),
        settings: state.settings.clone(),
        call_state: Arc::new(Mutex::new(CallState::default())),
        greeting_timeout: DEFAULT_GREETING_TIMEOUT,
    };

    tokio::spawn(run_and_log(ctx));

    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, room_name })))
}

/// Runs one job to completion and logs the outcome. After the
/// conversation is established the session is kept alive until the room
/// closes.
async fn run_and_log(ctx: JobContext) {
    let job_id = ctx.job_id.clone();
    let room = ctx.room.clone();
    match orchestrator::run_job(ctx).await {
        Ok(report) => {
            let mut events = room.subscribe();
            loop {
                match events.recv().await {
                    Ok(RoomEvent::Closed) | Err(broadcast::error::RecvError::Closed) => break,
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                }
            }
            report.session.close();
            info!(job_id = job_id.as_str(), "job finished");
        }
        Err(e) => {
            error!(job_id = job_id.as_str(), "job failed: {e}");
        }
    }
}
