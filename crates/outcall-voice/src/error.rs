use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("LiveKit API error: {0}")]
    LiveKit(#[from] livekit_api::access_token::AccessTokenError),

    #[error("room service error: {0}")]
    RoomService(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("VAD error: {0}")]
    Vad(String),

    #[error("failed to load agent instructions from {path:?}: {source}")]
    PromptLoad {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Failure placing an outbound call leg.
///
/// `Provider` is the structured failure reported by the telephony provider
/// and carries the SIP status metadata used for call-outcome
/// classification. `Unexpected` covers everything else that can go wrong
/// during a dial. Both are fatal for the job that issued the dial.
#[derive(Error, Debug)]
pub enum DialError {
    #[error("telephony provider rejected the call: {message}")]
    Provider {
        message: String,
        sip_status_code: Option<String>,
        sip_status: Option<String>,
    },

    #[error("unexpected dial failure: {0}")]
    Unexpected(String),
}

impl DialError {
    /// The SIP status code reported by the provider, if any.
    pub fn sip_status_code(&self) -> Option<&str> {
        match self {
            Self::Provider {
                sip_status_code, ..
            } => sip_status_code.as_deref(),
            Self::Unexpected(_) => None,
        }
    }

    /// The SIP status line reported by the provider, if any.
    pub fn sip_status(&self) -> Option<&str> {
        match self {
            Self::Provider { sip_status, .. } => sip_status.as_deref(),
            Self::Unexpected(_) => None,
        }
    }
}
