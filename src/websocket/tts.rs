//! # `/tts` WebSocket Handler
//!
//! Each text frame `{"data":{"text":"…"}}` queues one synthesis request.
//! A single worker per connection drains the queue in order and streams each
//! request's audio back as binary frames before starting the next one.

use super::{start_heartbeat, Heartbeat};
use crate::error::AppError;
use crate::speech::synthesis::{run_serial, SynthesisFrame};
use crate::state::{AppState, SessionKind, SessionPermit};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct TtsRequest {
    pub data: TtsRequestData,
}

#[derive(Debug, Deserialize)]
pub struct TtsRequestData {
    pub text: String,
}

/// A frame produced by the connection's synthesis worker.
#[derive(Message)]
#[rtype(result = "()")]
struct TtsFrame(SynthesisFrame);

pub struct TtsWebSocket {
    id: Uuid,
    requests: Option<mpsc::UnboundedSender<String>>,
    state: web::Data<AppState>,
    _permit: SessionPermit,
    last_heartbeat: Instant,
}

impl TtsWebSocket {
    pub fn new(state: web::Data<AppState>, permit: SessionPermit) -> Self {
        Self {
            id: Uuid::new_v4(),
            requests: None,
            state,
            _permit: permit,
            last_heartbeat: Instant::now(),
        }
    }

    fn handle_request(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let request = match serde_json::from_str::<TtsRequest>(text) {
            Ok(request) => request,
            Err(err) => {
                warn!(connection_id = %self.id, error = %err, "Invalid TTS request");
                send_error(ctx, &format!("Invalid request: {}", err));
                return;
            }
        };

        if request.data.text.trim().is_empty() {
            debug!(connection_id = %self.id, "Ignoring empty TTS request");
            return;
        }

        let queued = self
            .requests
            .as_ref()
            .map(|requests| requests.send(request.data.text).is_ok())
            .unwrap_or(false);
        if !queued {
            error!(connection_id = %self.id, "Synthesis worker is gone");
            ctx.stop();
        }
    }
}

fn send_error(ctx: &mut ws::WebsocketContext<TtsWebSocket>, message: &str) {
    ctx.text(json!({ "status": "error", "error": message }).to_string());
}

impl Heartbeat for TtsWebSocket {
    fn last_heartbeat(&self) -> Instant {
        self.last_heartbeat
    }
}

impl Actor for TtsWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection_id = %self.id, "TTS WebSocket session opened");
        start_heartbeat(ctx);

        let (tx, rx) = mpsc::unbounded_channel();
        self.requests = Some(tx);

        let addr = ctx.address();
        actix::spawn(run_serial(self.state.backend.clone(), rx, move |frame| {
            if !addr.connected() {
                return false;
            }
            addr.do_send(TtsFrame(frame));
            true
        }));
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Closing the queue ends the worker once its current request is done.
        self.requests.take();
        debug!(connection_id = %self.id, "TTS WebSocket session closed");
    }
}

impl Handler<TtsFrame> for TtsWebSocket {
    type Result = ();

    fn handle(&mut self, TtsFrame(frame): TtsFrame, ctx: &mut Self::Context) {
        match frame {
            SynthesisFrame::Audio(chunk) => ctx.binary(chunk),
            SynthesisFrame::Failed(message) => send_error(ctx, &message),
            SynthesisFrame::Finished(summary) => {
                self.state.record_synthesis(summary.bytes, summary.failed);
            }
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for TtsWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.handle_request(&text, ctx),
            Ok(ws::Message::Binary(_)) => {
                warn!(connection_id = %self.id, "Ignoring binary frame on /tts");
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection_id = %self.id, ?reason, "Client closed TTS socket");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection_id = %self.id, "Ignoring continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(connection_id = %self.id, error = %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

pub async fn tts_websocket(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, actix_web::Error> {
    let permit = state
        .try_acquire_session(SessionKind::WebSocketTts)
        .ok_or(AppError::Busy)?;

    debug!(peer = ?req.connection_info().peer_addr(), "TTS WebSocket upgrade");
    ws::start(TtsWebSocket::new(state, permit), &req, stream)
}
