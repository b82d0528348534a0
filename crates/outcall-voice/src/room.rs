//! The room seam between the external call transport and the agent.
//!
//! The WebRTC/SIP media transport itself is provider territory; the worker
//! only needs the room's lifecycle signals and its audio in either
//! direction. `RoomHandle` models exactly that: the transport integration
//! feeds participant events and inbound audio in, the agent session reads
//! them and publishes synthesized speech back out.

use crate::error::VoiceError;
use std::sync::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

/// Capacity of the room event broadcast channel.
const EVENT_BROADCAST_CAPACITY: usize = 64;

/// Capacity of the inbound audio channel, in frames.
const AUDIO_IN_CAPACITY: usize = 256;

/// Capacity of the outbound audio broadcast channel.
const AUDIO_OUT_BROADCAST_CAPACITY: usize = 64;

/// A frame of PCM audio (s16le) received from or published to the room.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

/// Room lifecycle signals the orchestrator and session react to.
#[derive(Debug, Clone)]
pub enum RoomEvent {
    ParticipantConnected { identity: String },
    ParticipantDisconnected { identity: String },
    Closed,
}

/// Handle to the transport session container a call's participants join.
pub struct RoomHandle {
    name: String,
    events: broadcast::Sender<RoomEvent>,
    audio_in_tx: mpsc::Sender<AudioFrame>,
    audio_in_rx: Mutex<Option<mpsc::Receiver<AudioFrame>>>,
    audio_out: broadcast::Sender<Vec<u8>>,
}

impl RoomHandle {
    pub fn new(name: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (audio_in_tx, audio_in_rx) = mpsc::channel(AUDIO_IN_CAPACITY);
        let (audio_out, _) = broadcast::channel(AUDIO_OUT_BROADCAST_CAPACITY);
        Self {
            name: name.into(),
            events,
            audio_in_tx,
            audio_in_rx: Mutex::new(Some(audio_in_rx)),
            audio_out,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribes to room lifecycle events. Dropping the receiver
    /// deregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<RoomEvent> {
        self.events.subscribe()
    }

    /// Publishes a lifecycle event into the room. Called by the transport
    /// integration; a send with no live subscribers is not an error.
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }

    /// The sender the transport integration feeds inbound audio through.
    pub fn audio_sender(&self) -> mpsc::Sender<AudioFrame> {
        self.audio_in_tx.clone()
    }

    /// Claims the inbound audio stream. There is exactly one consumer (the
    /// agent session); a second claim returns `None`.
    pub fn take_audio_receiver(&self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.audio_in_rx.lock().expect("audio receiver lock").take()
    }

    /// Publishes synthesized agent speech to the room.
    pub fn publish_audio(&self, audio: Vec<u8>) -> Result<(), VoiceError> {
        debug!(
            room = self.name.as_str(),
            bytes = audio.len(),
            "publishing agent audio"
        );
        let _ = self.audio_out.send(audio);
        Ok(())
    }

    /// Subscribes to outbound agent audio. Used by the transport
    /// integration and by tests.
    pub fn subscribe_audio_out(&self) -> broadcast::Receiver<Vec<u8>> {
        self.audio_out.subscribe()
    }
}
