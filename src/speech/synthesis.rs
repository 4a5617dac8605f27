//! # Synthesis Session
//!
//! Turns one piece of text into audio frames for a consumer. Requests from a
//! single connection go through [`run_serial`], which handles them one at a
//! time in arrival order, so the audio of two requests never interleaves.

use crate::speech::SpeechBackend;
use actix_web::web::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Message sent to the client when synthesis fails.
pub const SYNTHESIS_FAILURE_MESSAGE: &str = "Speech synthesis failed due to internal error.";

/// What a synthesis request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SynthesisFrame {
    /// One chunk of encoded audio, in backend order.
    Audio(Bytes),
    /// The request failed; no further audio follows for it.
    Failed(String),
    /// Emitted once per request, after its last audio chunk or failure.
    Finished(SynthesisSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SynthesisSummary {
    pub chunks: usize,
    pub bytes: u64,
    pub failed: bool,
}

pub struct SynthesisSession {
    id: Uuid,
    backend: Arc<dyn SpeechBackend>,
    text: String,
}

impl SynthesisSession {
    pub fn new(backend: Arc<dyn SpeechBackend>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            text: text.into(),
        }
    }

    /// Synthesize and hand every frame to `emit` as it arrives.
    ///
    /// `emit` returns `false` once the consumer is gone, which stops the
    /// session early. Returns `None` in that case.
    pub async fn stream<F>(self, emit: &mut F) -> Option<SynthesisSummary>
    where
        F: FnMut(SynthesisFrame) -> bool,
    {
        let mut summary = SynthesisSummary::default();
        debug!(session_id = %self.id, chars = self.text.chars().count(), "Synthesis started");

        match self.backend.synthesize(&self.text).await {
            Ok(mut audio) => {
                while let Some(chunk) = audio.next().await {
                    match chunk {
                        Ok(chunk) => {
                            summary.chunks += 1;
                            summary.bytes += chunk.len() as u64;
                            if !emit(SynthesisFrame::Audio(chunk)) {
                                debug!(session_id = %self.id, "Synthesis consumer gone");
                                return None;
                            }
                        }
                        Err(err) => {
                            warn!(session_id = %self.id, error = %err, "Synthesis stream failed");
                            summary.failed = true;
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "Synthesis request failed");
                summary.failed = true;
            }
        }

        if summary.failed && !emit(SynthesisFrame::Failed(SYNTHESIS_FAILURE_MESSAGE.to_string())) {
            return None;
        }

        info!(
            session_id = %self.id,
            chunks = summary.chunks,
            bytes = summary.bytes,
            failed = summary.failed,
            "Synthesis finished"
        );
        emit(SynthesisFrame::Finished(summary)).then_some(summary)
    }
}

/// Process queued texts strictly one after another until the queue closes or
/// the consumer goes away.
pub async fn run_serial<F>(
    backend: Arc<dyn SpeechBackend>,
    mut requests: mpsc::UnboundedReceiver<String>,
    mut emit: F,
) where
    F: FnMut(SynthesisFrame) -> bool,
{
    while let Some(text) = requests.recv().await {
        let session = SynthesisSession::new(Arc::clone(&backend), text);
        if session.stream(&mut emit).await.is_none() {
            break;
        }
    }
}
