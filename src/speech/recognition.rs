//! # Recognition Session
//!
//! One attempt to transcribe one audio stream. The backend's result and its
//! side-channel events are folded into a single awaitable
//! [`RecognitionOutcome`]: whichever of "pre-terminal event reporting no usable
//! speech" and "terminal result" is observed first decides the outcome.

use crate::audio::stream::AudioInputStream;
use crate::speech::{RecognitionEvent, RecognitionResult, ResultReason, SpeechBackend};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message reported when no usable speech was found.
pub const UNRECOGNIZABLE_MESSAGE: &str = "Speech unrecognizable.";
/// Message reported when the backend failed.
pub const INTERNAL_FAILURE_MESSAGE: &str = "Speech recognition failed due to internal error.";

/// Terminal result of a recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionOutcome {
    Success { text: String },
    NoMatch,
    InternalError,
}

impl RecognitionOutcome {
    /// Map a terminal backend result. Recognized speech with no text counts as no match.
    pub fn from_result(result: RecognitionResult) -> Self {
        match result.reason {
            ResultReason::RecognizedSpeech if !result.text.trim().is_empty() => {
                RecognitionOutcome::Success { text: result.text }
            }
            ResultReason::RecognizedSpeech | ResultReason::NoMatch => RecognitionOutcome::NoMatch,
        }
    }

    /// The outcome implied by a side-channel event, if the event is terminal.
    ///
    /// Any event without usable speech ends the session early as a no match;
    /// a successful recognition still waits for the terminal result.
    pub fn from_event(event: &RecognitionEvent) -> Option<Self> {
        match event {
            RecognitionEvent::Recognized(result) => match result.reason {
                ResultReason::RecognizedSpeech if !result.text.trim().is_empty() => None,
                ResultReason::RecognizedSpeech | ResultReason::NoMatch => {
                    Some(RecognitionOutcome::NoMatch)
                }
            },
        }
    }

    /// User-facing error text, `None` for success.
    pub fn error_message(&self) -> Option<&'static str> {
        match self {
            RecognitionOutcome::Success { .. } => None,
            RecognitionOutcome::NoMatch => Some(UNRECOGNIZABLE_MESSAGE),
            RecognitionOutcome::InternalError => Some(INTERNAL_FAILURE_MESSAGE),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecognitionOutcome::Success { .. } => "success",
            RecognitionOutcome::NoMatch => "no_match",
            RecognitionOutcome::InternalError => "internal_error",
        }
    }
}

/// A recognizer bound to one audio input stream.
///
/// Create it as soon as the audio source connects, before any audio is
/// written: chunks written before [`run`](Self::run) is polled are buffered in
/// the stream, never lost.
pub struct RecognitionSession {
    id: Uuid,
    backend: Arc<dyn SpeechBackend>,
    input: AudioInputStream,
}

impl RecognitionSession {
    pub fn new(id: Uuid, backend: Arc<dyn SpeechBackend>, input: AudioInputStream) -> Self {
        Self { id, backend, input }
    }

    /// Run recognition to completion and return the first observed outcome.
    pub async fn run(self) -> RecognitionOutcome {
        let RecognitionSession { id, backend, input } = self;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        debug!(session_id = %id, backend = backend.name(), "Recognition started");
        let recognize = backend.recognize_once(input, event_tx);
        tokio::pin!(recognize);

        let mut events_open = true;
        let outcome = loop {
            tokio::select! {
                biased;

                event = event_rx.recv(), if events_open => match event {
                    Some(event) => {
                        debug!(session_id = %id, ?event, "Recognition event");
                        if let Some(outcome) = RecognitionOutcome::from_event(&event) {
                            break outcome;
                        }
                    }
                    None => events_open = false,
                },

                result = &mut recognize => {
                    // Events sent before the result resolved were observed first.
                    let pending = std::iter::from_fn(|| event_rx.try_recv().ok())
                        .find_map(|event| RecognitionOutcome::from_event(&event));
                    if let Some(outcome) = pending {
                        break outcome;
                    }

                    match result {
                        Ok(result) => break RecognitionOutcome::from_result(result),
                        Err(err) => {
                            warn!(session_id = %id, error = %err, "Recognition failed");
                            break RecognitionOutcome::InternalError;
                        }
                    }
                }
            }
        };

        info!(session_id = %id, outcome = outcome.label(), "Recognition finished");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::stream::push_stream;
    use crate::testing::{RecognitionScript, ScriptedBackend};
    use actix_web::web::Bytes;

    async fn run_with(script: RecognitionScript, chunks: &[&'static [u8]]) -> (RecognitionOutcome, ScriptedBackend) {
        let backend = ScriptedBackend::new(script);
        let (mut push, input) = push_stream();
        let session = RecognitionSession::new(Uuid::new_v4(), Arc::new(backend.clone()), input);

        for chunk in chunks {
            push.write(Bytes::from_static(chunk)).unwrap();
        }
        push.close();

        (session.run().await, backend)
    }

    #[tokio::test]
    async fn test_success_outcome() {
        let (outcome, backend) =
            run_with(RecognitionScript::Recognize("hello there".into()), &[b"ab", b"cd"]).await;

        assert_eq!(outcome, RecognitionOutcome::Success { text: "hello there".into() });
        assert_eq!(backend.received().chunks.len(), 2);
        assert!(backend.received().closed);
    }

    #[tokio::test]
    async fn test_no_match_event_wins_over_terminal_success() {
        let (outcome, _) = run_with(
            RecognitionScript::NoMatchEventThenRecognize("too late".into()),
            &[b"xx"],
        )
        .await;
        assert_eq!(outcome, RecognitionOutcome::NoMatch);
    }

    #[tokio::test]
    async fn test_backend_failure_is_internal_error() {
        let (outcome, _) = run_with(RecognitionScript::Fail, &[b"xx"]).await;
        assert_eq!(outcome, RecognitionOutcome::InternalError);
        assert_eq!(outcome.error_message(), Some(INTERNAL_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn test_zero_chunks_never_succeeds() {
        let (outcome, backend) = run_with(RecognitionScript::TranscribeReceived, &[]).await;
        assert_eq!(outcome, RecognitionOutcome::NoMatch);
        assert!(backend.received().chunks.is_empty());
        assert!(backend.received().closed);
    }

    #[test]
    fn test_result_mapping() {
        assert_eq!(
            RecognitionOutcome::from_result(RecognitionResult::recognized("  ")),
            RecognitionOutcome::NoMatch
        );
        assert_eq!(
            RecognitionOutcome::from_event(&RecognitionEvent::Recognized(RecognitionResult::recognized(""))),
            Some(RecognitionOutcome::NoMatch)
        );
        assert_eq!(
            RecognitionOutcome::from_event(&RecognitionEvent::Recognized(RecognitionResult::recognized("ok"))),
            None
        );
        assert_eq!(RecognitionOutcome::NoMatch.error_message(), Some(UNRECOGNIZABLE_MESSAGE));
    }
}
