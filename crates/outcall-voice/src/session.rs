//! The conversational agent session.
//!
//! A session binds prewarmed provider clients to one room: inbound room
//! audio runs through voice-activity detection and turn endpointing, a
//! completed user turn is transcribed and answered, and synthesized agent
//! speech is published back to the room. Sessions are job-local; the
//! provider clients behind them are process-wide and shared.

use crate::error::VoiceError;
use crate::llm::{ChatMessage, LlmService};
use crate::prompt::Assistant;
use crate::room::{AudioFrame, RoomHandle};
use crate::stt::SttService;
use crate::tts::TtsService;
use crate::turn::{TurnDetector, TurnSignal};
use crate::vad::SharedSpeechDetector;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the session event broadcast channel.
const SESSION_EVENT_CAPACITY: usize = 64;

/// Everything a session needs from the prewarmed process state, plus the
/// per-call turn detector.
pub struct SessionConfig {
    pub stt: Arc<SttService>,
    pub tts: Arc<TtsService>,
    pub llm: Arc<LlmService>,
    pub vad: SharedSpeechDetector,
    pub turn_detector: TurnDetector,
}

/// Options applied when the session binds to its room.
#[derive(Debug, Clone)]
pub struct RoomInputOptions {
    /// Process audio the transport buffered before the session started.
    pub pre_connect_audio: bool,
    /// Bound on the pre-connect flush.
    pub pre_connect_audio_timeout: Duration,
}

impl Default for RoomInputOptions {
    fn default() -> Self {
        Self {
            pre_connect_audio: true,
            pre_connect_audio_timeout: Duration::from_secs(10),
        }
    }
}

/// Whether the far-end user is currently speaking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Speaking,
    Listening,
}

/// Latency and size measurements for one agent reply.
#[derive(Debug, Clone)]
pub struct ReplyMetrics {
    pub llm_ms: u64,
    pub tts_ms: u64,
    pub reply_chars: usize,
}

/// Events emitted over the session's broadcast channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    UserStateChanged { state: UserState },
    UserTurnCompleted { transcript: String },
    AgentReplied { text: String },
    MetricsCollected { metrics: ReplyMetrics },
}

#[derive(Default)]
struct TurnAudio {
    samples: Vec<i16>,
    sample_rate: u32,
}

struct SessionShared {
    stt: Arc<SttService>,
    tts: Arc<TtsService>,
    llm: Arc<LlmService>,
    vad: SharedSpeechDetector,
    turn: Mutex<TurnDetector>,
    assistant: Mutex<Option<Assistant>>,
    history: Mutex<Vec<ChatMessage>>,
    turn_audio: Mutex<TurnAudio>,
    room: Mutex<Option<Arc<RoomHandle>>>,
    events: broadcast::Sender<SessionEvent>,
    closed: AtomicBool,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    async fn feed(&self, frame: AudioFrame) {
        let voiced = self.vad.lock().expect("vad lock").is_speech(&frame);
        let (signal, speaking) = {
            let mut turn = self.turn.lock().expect("turn lock");
            let signal = turn.observe(voiced, Instant::now());
            (signal, turn.speaking())
        };

        if voiced || speaking {
            let mut buffer = self.turn_audio.lock().expect("turn audio lock");
            buffer.sample_rate = frame.sample_rate;
            buffer.samples.extend_from_slice(&frame.samples);
        }

        match signal {
            TurnSignal::UserStartedSpeaking => {
                self.emit(SessionEvent::UserStateChanged {
                    state: UserState::Speaking,
                });
            }
            TurnSignal::UserTurnEnded => {
                self.emit(SessionEvent::UserStateChanged {
                    state: UserState::Listening,
                });
                let (samples, sample_rate) = {
                    let mut buffer = self.turn_audio.lock().expect("turn audio lock");
                    let rate = buffer.sample_rate;
                    (std::mem::take(&mut buffer.samples), rate)
                };
                if let Err(e) = self.respond_to_turn(samples, sample_rate).await {
                    warn!("failed to respond to user turn: {e}");
                }
            }
            TurnSignal::None => {}
        }
    }

    async fn respond_to_turn(
        &self,
        samples: Vec<i16>,
        sample_rate: u32,
    ) -> Result<(), VoiceError> {
        if samples.is_empty() {
            return Ok(());
        }
        let transcript = self.stt.transcribe(&samples, sample_rate).await?;
        if transcript.is_empty() {
            return Ok(());
        }
        self.emit(SessionEvent::UserTurnCompleted {
            transcript: transcript.clone(),
        });
        self.history
            .lock()
            .expect("history lock")
            .push(ChatMessage::user(transcript));
        self.reply(None).await?;
        Ok(())
    }

    async fn reply(&self, instructions: Option<&str>) -> Result<String, VoiceError> {
        let messages = {
            let assistant = self.assistant.lock().expect("assistant lock");
            let assistant = assistant
                .as_ref()
                .ok_or_else(|| VoiceError::Session("session not started".into()))?;
            let mut messages = vec![ChatMessage::system(assistant.instructions())];
            messages.extend(self.history.lock().expect("history lock").iter().cloned());
            if let Some(instructions) = instructions {
                messages.push(ChatMessage::system(instructions));
            }
            messages
        };

        let llm_started = Instant::now();
        let text = self.llm.complete(&messages).await?;
        let llm_ms = llm_started.elapsed().as_millis() as u64;

        let tts_started = Instant::now();
        let audio = self.tts.synthesize(&text).await?;
        let tts_ms = tts_started.elapsed().as_millis() as u64;

        {
            let room = self.room.lock().expect("room lock");
            if let Some(room) = room.as_ref() {
                room.publish_audio(audio)?;
            }
        }

        self.history
            .lock()
            .expect("history lock")
            .push(ChatMessage::assistant(text.clone()));
        self.emit(SessionEvent::AgentReplied { text: text.clone() });
        self.emit(SessionEvent::MetricsCollected {
            metrics: ReplyMetrics {
                llm_ms,
                tts_ms,
                reply_chars: text.len(),
            },
        });
        Ok(text)
    }
}

/// A running conversational session.
pub struct AgentSession {
    shared: Arc<SessionShared>,
    started: AtomicBool,
    input_task: Mutex<Option<JoinHandle<()>>>,
}

impl AgentSession {
    pub fn new(config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        Self {
            shared: Arc::new(SessionShared {
                stt: config.stt,
                tts: config.tts,
                llm: config.llm,
                vad: config.vad,
                turn: Mutex::new(config.turn_detector),
                assistant: Mutex::new(None),
                history: Mutex::new(Vec::new()),
                turn_audio: Mutex::new(TurnAudio::default()),
                room: Mutex::new(None),
                events,
                closed: AtomicBool::new(false),
            }),
            started: AtomicBool::new(false),
            input_task: Mutex::new(None),
        }
    }

    /// Subscribes to session events. Dropping the receiver deregisters it.
    /// Subscribing before [`start`](Self::start) is allowed and guarantees
    /// no event is missed.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Binds the session to a room and starts consuming its audio.
    pub async fn start(
        &self,
        room: Arc<RoomHandle>,
        assistant: Assistant,
        options: RoomInputOptions,
    ) -> Result<(), VoiceError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(VoiceError::Session("session already started".into()));
        }
        let mut audio_rx = room.take_audio_receiver().ok_or_else(|| {
            VoiceError::Session("room audio input already claimed".into())
        })?;

        *self.shared.assistant.lock().expect("assistant lock") = Some(assistant);
        *self.shared.room.lock().expect("room lock") = Some(room.clone());

        if options.pre_connect_audio {
            // Flush whatever the transport buffered while the call was
            // connecting, bounded by the configured timeout.
            let deadline = Instant::now() + options.pre_connect_audio_timeout;
            let mut flushed = 0usize;
            while let Ok(frame) = audio_rx.try_recv() {
                self.shared.feed(frame).await;
                flushed += 1;
                if Instant::now() >= deadline {
                    warn!(
                        room = room.name(),
                        "pre-connect audio flush hit its deadline"
                    );
                    break;
                }
            }
            if flushed > 0 {
                debug!(frames = flushed, "flushed pre-connect audio");
            }
        }

        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            while let Some(frame) = audio_rx.recv().await {
                if shared.closed.load(Ordering::SeqCst) {
                    break;
                }
                shared.feed(frame).await;
            }
            debug!("session input loop ended");
        });
        *self.input_task.lock().expect("input task lock") = Some(handle);

        info!(room = room.name(), "agent session started");
        Ok(())
    }

    /// Generates one agent reply following the given instructions,
    /// synthesizes it, and publishes the audio to the room.
    pub async fn generate_reply(&self, instructions: &str) -> Result<String, VoiceError> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(VoiceError::Session("session not started".into()));
        }
        self.shared.reply(Some(instructions)).await
    }

    /// The assembled instructions the session is running with.
    pub fn instructions(&self) -> Option<String> {
        self.shared
            .assistant
            .lock()
            .expect("assistant lock")
            .as_ref()
            .map(|a| a.instructions().to_string())
    }

    /// Snapshot of the conversation so far.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.shared.history.lock().expect("history lock").clone()
    }

    /// Stops consuming room audio. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.input_task.lock().expect("input task lock").take() {
            handle.abort();
        }
        info!("agent session closed");
    }
}

impl Drop for AgentSession {
    fn drop(&mut self) {
        self.close();
    }
}
