//! Voice activity detection over inbound room audio.
//!
//! The detection model itself is external (silero, via the
//! `voice_activity_detector` crate); this module wraps it behind a small
//! trait so sessions can be driven with scripted detectors in tests.

use crate::error::VoiceError;
use crate::room::AudioFrame;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use voice_activity_detector::VoiceActivityDetector;

/// Frame-level speech detection.
pub trait SpeechDetector: Send {
    /// True when the frame contains speech.
    fn is_speech(&mut self, frame: &AudioFrame) -> bool;
}

/// A detector shared across concurrent sessions. Locks are held per frame
/// and never across an await point.
pub type SharedSpeechDetector = Arc<Mutex<dyn SpeechDetector>>;

/// Tuning for the silero detector.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Shortest run of voiced audio treated as speech.
    pub min_speech_duration: Duration,
    /// Shortest silence that ends a speech segment.
    pub min_silence_duration: Duration,
    /// Audio retained before a detected speech onset.
    pub prefix_padding_duration: Duration,
    /// Probability above which a chunk counts as voiced.
    pub threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            min_speech_duration: Duration::from_millis(30),
            min_silence_duration: Duration::from_millis(200),
            prefix_padding_duration: Duration::from_millis(300),
            threshold: 0.5,
        }
    }
}

/// Silero-backed speech detector.
pub struct SileroVad {
    detector: VoiceActivityDetector,
    threshold: f32,
    chunk_size: usize,
}

impl SileroVad {
    /// Loads the detector. Called once per process at prewarm; the model
    /// is then shared behind a lock across jobs.
    pub fn load(config: &VadConfig) -> Result<Self, VoiceError> {
        let detector = VoiceActivityDetector::builder()
            .sample_rate(16_000)
            .chunk_size(512usize)
            .build()
            .map_err(|e| VoiceError::Vad(format!("failed to load silero detector: {e}")))?;

        Ok(Self {
            detector,
            threshold: config.threshold,
            chunk_size: 512,
        })
    }

    /// Loads the detector with default tuning and wraps it for sharing.
    pub fn load_shared(config: &VadConfig) -> Result<SharedSpeechDetector, VoiceError> {
        Ok(Arc::new(Mutex::new(Self::load(config)?)))
    }
}

impl SpeechDetector for SileroVad {
    fn is_speech(&mut self, frame: &AudioFrame) -> bool {
        let mut speech = false;
        for chunk in frame.samples.chunks(self.chunk_size) {
            let probability = self.detector.predict(chunk.iter().copied());
            if probability >= self.threshold {
                speech = true;
            }
        }
        speech
    }
}
