//! Voice infrastructure for the Outcall worker.
//!
//! Integrates with LiveKit for call transport: rooms and agent join tokens
//! go through the LiveKit room service, and outbound SIP call legs are
//! placed through the SIP service. Speech-to-text, text-to-speech, and the
//! language model are thin clients over external providers; the worker
//! never reimplements them.
//!
//! The architecture separates concerns: the telephony layer places and
//! tears down call legs, the room is the transport session container the
//! legs join, and the agent session consumes room audio and produces agent
//! speech through the provider clients.

pub mod error;
pub mod llm;
pub mod prompt;
pub mod room;
pub mod session;
pub mod stt;
pub mod telephony;
pub mod tts;
pub mod turn;
pub mod vad;

pub use error::{DialError, VoiceError};
pub use llm::{ChatMessage, LlmService};
pub use prompt::Assistant;
pub use room::{AudioFrame, RoomEvent, RoomHandle};
pub use session::{
    AgentSession, ReplyMetrics, RoomInputOptions, SessionConfig, SessionEvent, UserState,
};
pub use stt::SttService;
pub use telephony::{
    DialedParticipant, LiveKitTelephony, OutboundCall, RoomMeta, Telephony, TelephonyConfig,
};
pub use tts::TtsService;
pub use turn::{TurnConfig, TurnDetector, TurnSignal};
pub use vad::{SharedSpeechDetector, SileroVad, SpeechDetector, VadConfig};
