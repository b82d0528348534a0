use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use outcall_voice::{
    AgentSession, Assistant, AudioFrame, RoomHandle, RoomInputOptions, SessionConfig,
    SessionEvent, SpeechDetector, TurnDetector, UserState,
};
use outcall_voice::{LlmService, SttService, TtsService};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Counts hits against the stub provider endpoints.
#[derive(Clone, Default)]
struct StubState {
    llm_hits: Arc<AtomicUsize>,
    tts_hits: Arc<AtomicUsize>,
    stt_hits: Arc<AtomicUsize>,
}

async fn chat(State(state): State<StubState>) -> Json<Value> {
    state.llm_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "choices": [{"message": {"role": "assistant", "content": "Hello from the agent"}}]
    }))
}

async fn synthesize(State(state): State<StubState>, Path(_voice): Path<String>) -> Vec<u8> {
    state.tts_hits.fetch_add(1, Ordering::SeqCst);
    vec![7u8; 16]
}

async fn listen(State(state): State<StubState>) -> Json<Value> {
    state.stt_hits.fetch_add(1, Ordering::SeqCst);
    Json(json!({
        "results": {"channels": [{"alternatives": [{"transcript": "I would like a demo"}]}]}
    }))
}

async fn spawn_stub_providers() -> (String, StubState) {
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

/// Treats any non-zero sample as speech, so tests can script voice
/// activity without model inference.
struct AmplitudeDetector;

impl SpeechDetector for AmplitudeDetector {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        frame.samples.iter().any(|s| *s != 0)
    }
}

fn session_config(base_url: &str) -> SessionConfig {
    SessionConfig {
        stt: Arc::new(SttService::new("test-key", "nova-3", "en").with_base_url(base_url)),
        tts: Arc::new(
            TtsService::new("test-key", "voice-1", "eleven_flash_v2_5").with_base_url(base_url),
        ),
        llm: Arc::new(LlmService::new("test-key", "gpt-4.1-mini").with_base_url(base_url)),
        vad: Arc::new(Mutex::new(AmplitudeDetector)),
        turn_detector: TurnDetector::default(),
    }
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

fn voiced_frame() -> AudioFrame {
    AudioFrame {
        samples: vec![1000; 512],
        sample_rate: 16_000,
    }
}

fn silent_frame() -> AudioFrame {
    AudioFrame {
        samples: vec![0; 512],
        sample_rate: 16_000,
    }
}

#[tokio::test]
async fn generate_reply_synthesizes_and_publishes() {
    let (base_url, stub) = spawn_stub_providers().await;
    let room = Arc::new(RoomHandle::new("room-reply"));
    let mut audio_out = room.subscribe_audio_out();

    let session = AgentSession::new(session_config(&base_url));
    let mut events = session.subscribe();
    session
        .start(
            room.clone(),
            Assistant::new("You are a caller."),
            RoomInputOptions::default(),
        )
        .await
        .unwrap();

    let text = session.generate_reply("greet the caller").await.unwrap();
    assert_eq!(text, "Hello from the agent");
    assert_eq!(stub.llm_hits.load(Ordering::SeqCst), 1);
    assert_eq!(stub.tts_hits.load(Ordering::SeqCst), 1);

    let published = audio_out.recv().await.unwrap();
    assert_eq!(published.len(), 16);

    match next_event(&mut events).await {
        SessionEvent::AgentReplied { text } => assert_eq!(text, "Hello from the agent"),
        other => panic!("expected AgentReplied, got {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::MetricsCollected { metrics } => {
            assert_eq!(metrics.reply_chars, "Hello from the agent".len());
        }
        other => panic!("expected MetricsCollected, got {other:?}"),
    }

    let history = session.history();
    assert_eq!(history.last().unwrap().role, "assistant");
}

#[tokio::test]
async fn user_turn_is_transcribed_and_answered() {
    let (base_url, stub) = spawn_stub_providers().await;
    let room = Arc::new(RoomHandle::new("room-turn"));

    let session = AgentSession::new(session_config(&base_url));
    let mut events = session.subscribe();
    session
        .start(
            room.clone(),
            Assistant::new("You are a caller."),
            RoomInputOptions::default(),
        )
        .await
        .unwrap();

    let audio = room.audio_sender();
    audio.send(voiced_frame()).await.unwrap();

    match next_event(&mut events).await {
        SessionEvent::UserStateChanged { state } => assert_eq!(state, UserState::Speaking),
        other => panic!("expected Speaking, got {other:?}"),
    }

    // Exceed the minimum endpointing delay before the silence frame so the
    // turn is considered over.
    tokio::time::sleep(Duration::from_millis(300)).await;
    audio.send(silent_frame()).await.unwrap();

    match next_event(&mut events).await {
        SessionEvent::UserStateChanged { state } => assert_eq!(state, UserState::Listening),
        other => panic!("expected Listening, got {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::UserTurnCompleted { transcript } => {
            assert_eq!(transcript, "I would like a demo");
        }
        other => panic!("expected UserTurnCompleted, got {other:?}"),
    }
    match next_event(&mut events).await {
        SessionEvent::AgentReplied { text } => assert_eq!(text, "Hello from the agent"),
        other => panic!("expected AgentReplied, got {other:?}"),
    }

    assert_eq!(stub.stt_hits.load(Ordering::SeqCst), 1);
    assert_eq!(stub.llm_hits.load(Ordering::SeqCst), 1);

    let history = session.history();
    assert_eq!(history[0].role, "user");
    assert_eq!(history[0].content, "I would like a demo");
    assert_eq!(history[1].role, "assistant");
}

#[tokio::test]
async fn session_cannot_start_twice() {
    let (base_url, _stub) = spawn_stub_providers().await;
    let room = Arc::new(RoomHandle::new("room-double"));
    let session = AgentSession::new(session_config(&base_url));

    session
        .start(
            room.clone(),
            Assistant::new("base"),
            RoomInputOptions::default(),
        )
        .await
        .unwrap();
    let err = session
        .start(room, Assistant::new("base"), RoomInputOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already started"));
}

#[tokio::test]
async fn generate_reply_requires_a_started_session() {
    let (base_url, _stub) = spawn_stub_providers().await;
    let session = AgentSession::new(session_config(&base_url));
    let err = session.generate_reply("say hello").await.unwrap_err();
    assert!(err.to_string().contains("not started"));
}
