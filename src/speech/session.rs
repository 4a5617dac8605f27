//! # Recognition Session Lifecycle
//!
//! State machine shared by the WebSocket and upload STT paths:
//!
//! ```text
//! Created -> StreamingAudio -> Finalizing -> {Succeeded | NoMatch | InternalError} -> Closed
//! ```
//!
//! The lifecycle is the single gate for terminal delivery: only the first
//! call to [`SessionLifecycle::complete`] returns `true`, and a session closed
//! before any outcome (client went away) never reports one.

use crate::speech::recognition::RecognitionOutcome;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream and recognizer exist, no audio yet.
    Created,
    /// At least one chunk has been forwarded.
    StreamingAudio,
    /// End-of-input signalled, waiting for the backend.
    Finalizing,
    Succeeded,
    NoMatch,
    InternalError,
    /// Terminal. Re-entering is a no-op.
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::StreamingAudio => "streaming_audio",
            SessionState::Finalizing => "finalizing",
            SessionState::Succeeded => "succeeded",
            SessionState::NoMatch => "no_match",
            SessionState::InternalError => "internal_error",
            SessionState::Closed => "closed",
        }
    }
}

#[derive(Debug)]
pub struct SessionLifecycle {
    id: Uuid,
    state: SessionState,
    outcome_delivered: bool,
}

impl SessionLifecycle {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Created,
            outcome_delivered: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Record that audio arrived. Returns whether the session still accepts audio.
    pub fn on_audio(&mut self) -> bool {
        match self.state {
            SessionState::Created | SessionState::StreamingAudio => {
                self.state = SessionState::StreamingAudio;
                true
            }
            _ => false,
        }
    }

    /// Record end-of-input. Returns `true` on the transition into `Finalizing`.
    pub fn on_end_of_input(&mut self) -> bool {
        match self.state {
            SessionState::Created | SessionState::StreamingAudio => {
                self.state = SessionState::Finalizing;
                true
            }
            _ => false,
        }
    }

    /// Record the terminal outcome. Only the first outcome of a session that
    /// has not been closed is accepted; the caller must deliver it iff this
    /// returns `true`.
    pub fn complete(&mut self, outcome: &RecognitionOutcome) -> bool {
        if self.outcome_delivered || self.state == SessionState::Closed {
            return false;
        }

        self.outcome_delivered = true;
        self.state = match outcome {
            RecognitionOutcome::Success { .. } => SessionState::Succeeded,
            RecognitionOutcome::NoMatch => SessionState::NoMatch,
            RecognitionOutcome::InternalError => SessionState::InternalError,
        };
        true
    }

    /// Close the session. Returns `true` only on the first call.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        true
    }

    /// Whether an outcome was delivered (the session may already be closed).
    pub fn outcome_delivered(&self) -> bool {
        self.outcome_delivered
    }
}

impl Default for SessionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}
