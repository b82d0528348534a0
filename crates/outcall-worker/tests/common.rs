//! Shared fixtures for worker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use outcall_voice::{
    AudioFrame, DialError, DialedParticipant, LlmService, OutboundCall, RoomMeta, SpeechDetector,
    SttService, Telephony, TtsService, VoiceError,
};
use outcall_worker::config::Settings;
use outcall_worker::ProviderBundle;
use serde_json::{json, Value};
use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Counts hits against the stub provider endpoints.
#[derive(Clone, Default)]
pub struct StubState {
    pub llm_hits: Arc<AtomicUsize>,
    pub tts_hits: Arc<AtomicUsize>,
    pub stt_hits: Arc<AtomicUsize>,
}

async fn chat(State(state): State<StubState>) -> Json<Value> {
    state.llm_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": "Hello, this is the agent"}}]
    }))
}

async fn synthesize(State(state): State<StubState>, Path(_voice): Path<String>) -> Vec<u8> {
    state.tts_hits.fetch_add(1, Ordering::SeqCst);
    vec![9u8; 8]
}

async fn listen(State(state): State<StubState>) -> Json<Value> {
    state.stt_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "results": {"channels": [{"alternatives": [{"transcript": "hello"}]}]}
    }))
}

/// Serves OpenAI/ElevenLabs/Deepgram-shaped stubs on an ephemeral port.
pub async fn spawn_stub_providers() -> (String, StubState) {
    let state = StubState::default();
    let app = Router::new()
        .route("/chat/completions", post(chat))
        .route("/text-to-speech/{voice}", post(synthesize))
        .route("/listen", post(listen))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

/// Telephony mock: records calls and either answers or fails with a fixed
/// SIP status.
pub struct MockTelephony {
    pub dials: AtomicUsize,
    pub last_call: Mutex<Option<OutboundCall>>,
    fail_with: Option<(String, String)>,
}

impl MockTelephony {
    pub fn answering() -> Arc<Self> {
        Arc::new(Self {
            dials: AtomicUsize::new(0),
            last_call: Mutex::new(None),
            fail_with: None,
        })
    }

    pub fn failing(sip_status_code: &str, sip_status: &str) -> Arc<Self> {
        Arc::new(Self {
            dials: AtomicUsize::new(0),
            last_call: Mutex::new(None),
            fail_with: Some((sip_status_code.to_string(), sip_status.to_string())),
        })
    }
}

#[async_trait]
impl Telephony for MockTelephony {
    async fn ensure_room(&self, name: &str) -> Result<RoomMeta, VoiceError> {
        Ok(RoomMeta {
            name: name.to_string(),
            sid: "RM_test".to_string(),
        })
    }

    fn agent_token(&self, _room_name: &str, _identity: &str) -> Result<String, VoiceError> {
        Ok("test-token".to_string())
    }

    async fn dial(&self, call: &OutboundCall) -> Result<DialedParticipant, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        *self.last_call.lock().unwrap() = Some(call.clone());

        match &self.fail_with {
            Some((code, status)) => Err(DialError::Provider {
                message: "call could not be completed".to_string(),
                sip_status_code: Some(code.clone()),
                sip_status: Some(status.clone()),
            }),
            None => Ok(DialedParticipant {
                participant_id: "PA_test".to_string(),
                identity: call.participant_identity.clone(),
                sip_call_id: Some("SCL_test".to_string()),
            }),
        }
    }
}

/// Treats any non-zero sample as speech.
pub struct AmplitudeDetector;

impl SpeechDetector for AmplitudeDetector {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        frame.samples.iter().any(|s| *s != 0)
    }
}

pub fn voiced_frame() -> AudioFrame {
    AudioFrame {
        samples: vec![1000; 512],
        sample_rate: 16_000,
    }
}

/// Provider bundle backed by the stub endpoints and a scripted detector.
pub fn stub_providers(base_url: &str) -> Arc<ProviderBundle> {
    Arc::new(ProviderBundle {
        stt: Arc::new(SttService::new("test-key", "nova-3", "en").with_base_url(base_url)),
        tts: Arc::new(
            TtsService::new("test-key", "voice-1", "eleven_flash_v2_5").with_base_url(base_url),
        ),
        llm: Arc::new(LlmService::new("test-key", "gpt-4.1-mini").with_base_url(base_url)),
        vad: Arc::new(Mutex::new(AmplitudeDetector)),
    })
}

pub fn write_prompt(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Settings with safe test defaults and the given prompt document.
pub fn test_settings(prompt_path: PathBuf) -> Settings {
    Settings {
        environment: "development".to_string(),
        log_level: "INFO".to_string(),
        log_file: None,
        agent_name: "outcall-agent-test".to_string(),
        livekit_url: "ws://localhost:7880".to_string(),
        livekit_api_key: "devkey".to_string(),
        livekit_api_secret: "secret".to_string(),
        sip_trunk_id: "ST_test_trunk".to_string(),
        deepgram_api_key: String::new(),
        openai_api_key: String::new(),
        elevenlabs_api_key: String::new(),
        elevenlabs_voice_id: "voice-1".to_string(),
        gateway_config_path: PathBuf::from("/nonexistent/gateway.toml"),
        clickhouse_user: "chuser".to_string(),
        clickhouse_password: "chpassword".to_string(),
        clickhouse_host: "localhost".to_string(),
        clickhouse_port: 8123,
        clickhouse_database: "outcall".to_string(),
        prompt_path,
        host: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
        port: 0,
    }
}
