//! # `/stt` WebSocket Handler
//!
//! One connection is one recognition session. The push stream and the
//! recognizer are created with the actor, before the first frame arrives.
//!
//! ## Frames in:
//! - **Binary**: raw PCM, written to the push stream in arrival order
//! - **Empty binary** or **Close**: end of input; the push stream is closed
//!   and the socket stays open until the result has been sent
//! - **Text**: ignored
//!
//! ## Frames out:
//! Exactly one JSON text frame with the outcome, followed by a normal close.
//! A client that drops the connection before that abandons the session: the
//! recognizer is cancelled and nothing is sent.

use super::{start_heartbeat, Heartbeat};
use crate::audio::stream::{push_stream, AudioPushStream, StreamError};
use crate::error::AppError;
use crate::speech::recognition::{RecognitionOutcome, RecognitionSession, INTERNAL_FAILURE_MESSAGE};
use crate::speech::session::SessionLifecycle;
use crate::state::{AppState, SessionKind, SessionPermit};
use actix::prelude::*;
use actix_web::web::Bytes;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// The single terminal message of a `/stt` session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SttReply {
    Ok { text: String },
    Error { error: String },
}

impl From<&RecognitionOutcome> for SttReply {
    fn from(outcome: &RecognitionOutcome) -> Self {
        match outcome {
            RecognitionOutcome::Success { text } => SttReply::Ok { text: text.clone() },
            other => SttReply::Error {
                error: other.error_message().unwrap_or(INTERNAL_FAILURE_MESSAGE).to_string(),
            },
        }
    }
}

pub struct SttWebSocket {
    lifecycle: SessionLifecycle,
    audio: AudioPushStream,
    session: Option<RecognitionSession>,
    recognition: Option<SpawnHandle>,
    state: web::Data<AppState>,
    _permit: SessionPermit,
    last_heartbeat: Instant,
}

impl SttWebSocket {
    pub fn new(state: web::Data<AppState>, permit: SessionPermit) -> Self {
        let lifecycle = SessionLifecycle::new();
        let (audio, input) = push_stream();
        let session = RecognitionSession::new(lifecycle.id(), state.backend.clone(), input);

        Self {
            lifecycle,
            audio,
            session: Some(session),
            recognition: None,
            state,
            _permit: permit,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_audio(&mut self, data: Bytes) {
        if !self.lifecycle.on_audio() {
            debug!(
                session_id = %self.lifecycle.id(),
                state = self.lifecycle.state().as_str(),
                "Dropping audio received after end of input"
            );
            return;
        }

        match self.audio.write(data) {
            Ok(()) => debug!(
                session_id = %self.lifecycle.id(),
                chunks = self.audio.chunks_written(),
                bytes = self.audio.bytes_written(),
                "Audio chunk forwarded"
            ),
            // The recognizer already finished; its outcome is on the way.
            Err(StreamError::Disconnected) => {
                debug!(session_id = %self.lifecycle.id(), "Recognizer no longer reading audio")
            }
            Err(StreamError::Closed) => {
                warn!(session_id = %self.lifecycle.id(), "Audio written to closed stream")
            }
        }
    }

    fn end_of_input(&mut self) {
        if self.lifecycle.on_end_of_input() {
            self.audio.close();
            info!(
                session_id = %self.lifecycle.id(),
                chunks = self.audio.chunks_written(),
                bytes = self.audio.bytes_written(),
                "End of audio input"
            );
        }
    }

    fn deliver(&mut self, outcome: RecognitionOutcome, ctx: &mut ws::WebsocketContext<Self>) {
        self.recognition = None;
        if !self.lifecycle.complete(&outcome) {
            return;
        }

        self.audio.close();
        self.state.record_recognition(&outcome);

        match serde_json::to_string(&SttReply::from(&outcome)) {
            Ok(json) => ctx.text(json),
            Err(err) => error!(session_id = %self.lifecycle.id(), error = %err, "Failed to encode reply"),
        }

        self.lifecycle.close();
        ctx.close(Some(ws::CloseCode::Normal.into()));
        ctx.stop();
    }

    /// Drop the session without reporting anything.
    fn abandon(&mut self, ctx: &mut ws::WebsocketContext<Self>) {
        if self.lifecycle.outcome_delivered() || !self.lifecycle.close() {
            return;
        }

        self.audio.close();
        if let Some(handle) = self.recognition.take() {
            ctx.cancel_future(handle);
        }
        self.state.record_abandoned_recognition();
        info!(session_id = %self.lifecycle.id(), "Recognition session abandoned");
    }
}

impl Heartbeat for SttWebSocket {
    fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }
}

impl Actor for SttWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(session_id = %self.lifecycle.id(), "STT WebSocket session opened");
        start_heartbeat(ctx);

        if let Some(session) = self.session.take() {
            let handle = ctx.spawn(
                session
                    .run()
                    .into_actor(self)
                    .map(|outcome, act, ctx| act.deliver(outcome, ctx)),
            );
            self.recognition = Some(handle);
        }
    }

    fn stopped(&mut self, ctx: &mut Self::Context) {
        self.abandon(ctx);
        debug!(
            session_id = %self.lifecycle.id(),
            state = self.lifecycle.state().as_str(),
            "STT WebSocket session closed"
        );
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for SttWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Binary(data)) if data.is_empty() => self.end_of_input(),
            Ok(ws::Message::Binary(data)) => self.handle_audio(data),
            Ok(ws::Message::Text(_)) => {
                warn!(session_id = %self.lifecycle.id(), "Ignoring text frame on /stt");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(session_id = %self.lifecycle.id(), ?reason, "Client closed audio stream");
                self.end_of_input();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(session_id = %self.lifecycle.id(), "Ignoring continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(session_id = %self.lifecycle.id(), error = %err, "WebSocket protocol error");
                self.abandon(ctx);
                ctx.stop();
            }
        }
    }

    /// The transport went away.
    fn finished(&mut self, ctx: &mut Self::Context) {
        self.abandon(ctx);
        ctx.stop();
    }
}

pub async fn stt_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let permit = state
        .try_acquire_session(SessionKind::WebSocketStt)
        .ok_or(AppError::Busy)?;

    debug!(peer = ?req.connection_info().peer_addr(), "STT WebSocket upgrade");
    ws::start(SttWebSocket::new(state, permit), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::testing::{
        client_frame, drive_websocket, RecognitionScript, ScriptedBackend, OPCODE_BINARY,
        OPCODE_CLOSE, OPCODE_TEXT,
    };
    use std::sync::Arc;

    fn actor(backend: &ScriptedBackend) -> (SttWebSocket, web::Data<AppState>) {
        let state = web::Data::new(AppState::new(AppConfig::default(), Arc::new(backend.clone())));
        let permit = state.try_acquire_session(SessionKind::WebSocketStt).unwrap();
        (SttWebSocket::new(state.clone(), permit), state)
    }

    #[actix_web::test]
    async fn test_chunks_forwarded_then_single_reply() {
        let backend = ScriptedBackend::new(RecognitionScript::TranscribeReceived);
        let (actor, state) = actor(&backend);

        let mut input: Vec<Bytes> = (0..3u8)
            .map(|i| client_frame(OPCODE_BINARY, &vec![i; 3200]))
            .collect();
        input.push(client_frame(OPCODE_BINARY, &[]));

        let frames = drive_websocket(actor, input, false, |frames| {
            frames.iter().any(|f| f.opcode == OPCODE_CLOSE)
        })
        .await;

        let received = backend.received();
        assert_eq!(received.chunks.len(), 3);
        assert!(received.chunks.iter().enumerate().all(|(i, c)| c.len() == 3200 && c[0] == i as u8));
        assert!(received.closed);

        let texts: Vec<_> = frames.iter().filter(|f| f.opcode == OPCODE_TEXT).collect();
        assert_eq!(texts.len(), 1);
        let reply: serde_json::Value = serde_json::from_slice(&texts[0].payload).unwrap();
        assert_eq!(reply, serde_json::json!({"status": "ok", "text": "9600 bytes"}));
        assert_eq!(frames.last().map(|f| f.opcode), Some(OPCODE_CLOSE));
        assert_eq!(state.get_metrics_snapshot().recognition.success, 1);
    }

    #[actix_web::test]
    async fn test_close_frame_ends_input_without_audio() {
        let backend = ScriptedBackend::new(RecognitionScript::TranscribeReceived);
        let (actor, _state) = actor(&backend);

        let input = vec![client_frame(OPCODE_CLOSE, &1000u16.to_be_bytes())];
        let frames = drive_websocket(actor, input, false, |frames| {
            frames.iter().any(|f| f.opcode == OPCODE_CLOSE)
        })
        .await;

        let texts: Vec<_> = frames.iter().filter(|f| f.opcode == OPCODE_TEXT).collect();
        assert_eq!(texts.len(), 1);
        let reply: serde_json::Value = serde_json::from_slice(&texts[0].payload).unwrap();
        assert_eq!(
            reply,
            serde_json::json!({"status": "error", "error": "Speech unrecognizable."})
        );
    }

    #[actix_web::test]
    async fn test_no_match_event_beats_late_success() {
        let backend = ScriptedBackend::new(RecognitionScript::NoMatchEventThenRecognize(
            "too late".into(),
        ));
        let (actor, state) = actor(&backend);

        let input = vec![
            client_frame(OPCODE_BINARY, &[7; 3200]),
            client_frame(OPCODE_BINARY, &[]),
        ];
        let frames = drive_websocket(actor, input, false, |frames| {
            frames.iter().any(|f| f.opcode == OPCODE_CLOSE)
        })
        .await;

        let texts: Vec<_> = frames.iter().filter(|f| f.opcode == OPCODE_TEXT).collect();
        assert_eq!(texts.len(), 1);
        let reply: serde_json::Value = serde_json::from_slice(&texts[0].payload).unwrap();
        assert_eq!(
            reply,
            serde_json::json!({"status": "error", "error": "Speech unrecognizable."})
        );

        let recognition = state.get_metrics_snapshot().recognition;
        assert_eq!(recognition.no_match, 1);
        assert_eq!(recognition.success, 0);
    }

    #[actix_web::test]
    async fn test_disconnect_abandons_session() {
        let backend = ScriptedBackend::new(RecognitionScript::Recognize("never sent".into()));
        let (actor, state) = actor(&backend);

        let input = vec![client_frame(OPCODE_BINARY, &[1, 2, 3, 4])];
        let frames = drive_websocket(actor, input, true, |_| false).await;

        assert!(frames.iter().all(|f| f.opcode != OPCODE_TEXT));
        let recognition = state.get_metrics_snapshot().recognition;
        assert_eq!(recognition.abandoned, 1);
        assert_eq!(recognition.success, 0);
        assert_eq!(state.active_sessions(), 0);
    }

    #[test]
    fn test_reply_shapes() {
        let ok = SttReply::from(&RecognitionOutcome::Success { text: "hi".into() });
        assert_eq!(serde_json::to_value(ok).unwrap(), serde_json::json!({"status": "ok", "text": "hi"}));

        let failed = SttReply::from(&RecognitionOutcome::InternalError);
        assert_eq!(
            serde_json::to_value(failed).unwrap(),
            serde_json::json!({
                "status": "error",
                "error": "Speech recognition failed due to internal error."
            })
        );
    }
}
