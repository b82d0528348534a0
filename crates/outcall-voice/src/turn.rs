//! Conversational turn endpointing.
//!
//! Decides when the user has started speaking and when their turn has
//! ended, from the per-frame voice-activity stream. The detector is cheap
//! and constructed fresh for every call; only the endpointing policy lives
//! here, the underlying activity model is external.

use std::time::{Duration, Instant};

/// Endpointing windows.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    /// Silence after speech required before the turn is considered over.
    pub min_endpointing_delay: Duration,
    /// Hard upper bound on how long the end-of-turn decision may trail the
    /// last voiced frame.
    pub max_endpointing_delay: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            min_endpointing_delay: Duration::from_millis(200),
            max_endpointing_delay: Duration::from_secs(3),
        }
    }
}

/// Signal produced by one observation step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSignal {
    None,
    UserStartedSpeaking,
    UserTurnEnded,
}

/// Per-call turn state machine.
#[derive(Debug)]
pub struct TurnDetector {
    config: TurnConfig,
    speaking: bool,
    last_voice: Option<Instant>,
}

impl TurnDetector {
    pub fn new(config: TurnConfig) -> Self {
        Self {
            config,
            speaking: false,
            last_voice: None,
        }
    }

    /// True while a user turn is in progress.
    pub fn speaking(&self) -> bool {
        self.speaking
    }

    /// Observes one frame's voice-activity verdict.
    pub fn observe(&mut self, voiced: bool, now: Instant) -> TurnSignal {
        if voiced {
            self.last_voice = Some(now);
            if !self.speaking {
                self.speaking = true;
                return TurnSignal::UserStartedSpeaking;
            }
            return TurnSignal::None;
        }

        if self.speaking {
            let silence = self
                .last_voice
                .map(|t| now.saturating_duration_since(t))
                .unwrap_or(Duration::ZERO);
            if silence >= self.config.min_endpointing_delay
                || silence >= self.config.max_endpointing_delay
            {
                self.speaking = false;
                return TurnSignal::UserTurnEnded;
            }
        }

        TurnSignal::None
    }
}

impl Default for TurnDetector {
    fn default() -> Self {
        Self::new(TurnConfig::default())
    }
}
