//! # Speech Backend
//!
//! The relay never recognizes or synthesizes speech itself. It talks to an
//! external speech service through the [`SpeechBackend`] trait:
//!
//! - **Recognition**: the backend reads a push stream of PCM audio until it is
//!   closed and resolves to exactly one [`RecognitionResult`]. Along the way it
//!   may report side-channel [`RecognitionEvent`]s.
//! - **Synthesis**: the backend turns text into a stream of audio bytes.
//!
//! On top of the trait sit the session types used by the handlers:
//! [`recognition::RecognitionSession`], [`synthesis::SynthesisSession`] and the
//! per-session state machine in [`session`].

pub mod azure;
pub mod recognition;
pub mod session;
pub mod synthesis;

use crate::audio::stream::AudioInputStream;
use crate::config::AppConfig;
use actix_web::web::Bytes;
use async_trait::async_trait;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use azure::AzureSpeechBackend;

/// Why a recognition attempt ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultReason {
    /// Speech was recognized; `text` holds the transcription.
    RecognizedSpeech,
    /// Audio was received but no speech could be matched.
    NoMatch,
}

/// A raw result as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionResult {
    pub reason: ResultReason,
    pub text: String,
}

impl RecognitionResult {
    pub fn recognized(text: impl Into<String>) -> Self {
        Self {
            reason: ResultReason::RecognizedSpeech,
            text: text.into(),
        }
    }

    pub fn no_match() -> Self {
        Self {
            reason: ResultReason::NoMatch,
            text: String::new(),
        }
    }
}

/// Side-channel events a backend may emit before its terminal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// A phrase finished recognizing (possibly without usable speech).
    Recognized(RecognitionResult),
}

/// Errors from the speech service.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("speech service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("speech service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("speech service rejected the request: {0}")]
    Rejected(String),
}

/// Audio produced by a synthesis request, streamed as it arrives.
pub type AudioByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BackendError>> + Send>>;

/// An external speech recognition/synthesis capability.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Short name used in logs and the health endpoint.
    fn name(&self) -> &str;

    /// Recognize one utterance from `audio`.
    ///
    /// Implementations read `audio` until it ends, may send any number of
    /// events on `events`, and resolve to the terminal result.
    async fn recognize_once(
        &self,
        audio: AudioInputStream,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<RecognitionResult, BackendError>;

    /// Synthesize `text` and stream back the encoded audio.
    async fn synthesize(&self, text: &str) -> Result<AudioByteStream, BackendError>;
}

/// Build the configured speech backend.
pub fn create_backend(config: &AppConfig) -> Result<Arc<dyn SpeechBackend>, BackendError> {
    let backend = AzureSpeechBackend::new(config.speech.clone(), config.audio.target_sample_rate)?;
    Ok(Arc::new(backend))
}
