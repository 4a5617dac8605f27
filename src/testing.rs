//! Test support: a scripted speech backend and a raw WebSocket frame driver.

use crate::audio::stream::AudioInputStream;
use crate::speech::{
    AudioByteStream, BackendError, RecognitionEvent, RecognitionResult, SpeechBackend,
};
use actix::{Actor, StreamHandler};
use actix_web::error::PayloadError;
use actix_web::web::Bytes;
use actix_web_actors::ws;
use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How the scripted backend answers a recognition request.
#[derive(Debug, Clone)]
pub enum RecognitionScript {
    /// Terminal result: recognized `text`.
    Recognize(String),
    /// Pre-terminal no-match event, then a no-match result.
    NoMatchEvent,
    /// Pre-terminal no-match event, then (racing) a successful result.
    NoMatchEventThenRecognize(String),
    /// Terminal backend failure.
    Fail,
    /// Recognize "<n> bytes" when audio arrived, otherwise report no match.
    TranscribeReceived,
}

/// What the backend observed.
#[derive(Debug, Default, Clone)]
pub struct Received {
    pub chunks: Vec<Bytes>,
    pub closed: bool,
    pub synthesized: Vec<String>,
}

impl Received {
    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(Bytes::len).sum()
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    script: RecognitionScript,
    received: Arc<Mutex<Received>>,
}

impl ScriptedBackend {
    pub fn new(script: RecognitionScript) -> Self {
        Self {
            script,
            received: Arc::new(Mutex::new(Received::default())),
        }
    }

    pub fn received(&self) -> Received {
        self.received.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn recognize_once(
        &self,
        mut audio: AudioInputStream,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> Result<RecognitionResult, BackendError> {
        while let Some(chunk) = audio.next().await {
            self.received.lock().unwrap().chunks.push(chunk);
        }
        self.received.lock().unwrap().closed = true;

        match &self.script {
            RecognitionScript::Recognize(text) => Ok(RecognitionResult::recognized(text.clone())),
            RecognitionScript::NoMatchEvent => {
                let _ = events.send(RecognitionEvent::Recognized(RecognitionResult::no_match()));
                Ok(RecognitionResult::no_match())
            }
            RecognitionScript::NoMatchEventThenRecognize(text) => {
                let _ = events.send(RecognitionEvent::Recognized(RecognitionResult::no_match()));
                Ok(RecognitionResult::recognized(text.clone()))
            }
            RecognitionScript::Fail => Err(BackendError::Rejected("scripted failure".into())),
            RecognitionScript::TranscribeReceived => {
                let total = self.received().total_bytes();
                if total == 0 {
                    let _ = events.send(RecognitionEvent::Recognized(RecognitionResult::no_match()));
                    Ok(RecognitionResult::no_match())
                } else {
                    Ok(RecognitionResult::recognized(format!("{} bytes", total)))
                }
            }
        }
    }

    /// Streams three chunks `"<text>#0"`, `"<text>#1"`, `"<text>#2"`,
    /// yielding between them. The text `"fail"` is rejected.
    async fn synthesize(&self, text: &str) -> Result<AudioByteStream, BackendError> {
        self.received.lock().unwrap().synthesized.push(text.to_string());
        if text == "fail" {
            return Err(BackendError::Rejected("scripted synthesis failure".into()));
        }

        let chunks: Vec<Bytes> = (0..3).map(|i| Bytes::from(format!("{}#{}", text, i))).collect();
        Ok(Box::pin(stream::iter(chunks).then(|chunk| async move {
            tokio::task::yield_now().await;
            Ok(chunk)
        })))
    }
}

pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_BINARY: u8 = 0x2;
pub const OPCODE_CLOSE: u8 = 0x8;

/// Encode a single masked client frame (zero mask key, FIN set).
pub fn client_frame(opcode: u8, payload: &[u8]) -> Bytes {
    let mut frame = vec![0x80 | opcode];
    match payload.len() {
        len if len < 126 => frame.push(0x80 | len as u8),
        len if len <= u16::MAX as usize => {
            frame.push(0x80 | 126);
            frame.extend_from_slice(&(len as u16).to_be_bytes());
        }
        len => {
            frame.push(0x80 | 127);
            frame.extend_from_slice(&(len as u64).to_be_bytes());
        }
    }
    frame.extend_from_slice(&[0, 0, 0, 0]);
    frame.extend_from_slice(payload);
    Bytes::from(frame)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFrame {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

/// Decode every complete unmasked server frame in `buf`.
pub fn parse_server_frames(buf: &[u8]) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    let mut pos = 0;

    while buf.len() >= pos + 2 {
        let opcode = buf[pos] & 0x0f;
        let (len, header) = match buf[pos + 1] & 0x7f {
            126 if buf.len() >= pos + 4 => {
                (u16::from_be_bytes([buf[pos + 2], buf[pos + 3]]) as usize, 4)
            }
            127 if buf.len() >= pos + 10 => {
                let mut len = [0u8; 8];
                len.copy_from_slice(&buf[pos + 2..pos + 10]);
                (u64::from_be_bytes(len) as usize, 10)
            }
            126 | 127 => break,
            len => (len as usize, 2),
        };

        if buf.len() < pos + header + len {
            break;
        }
        frames.push(ServerFrame {
            opcode,
            payload: buf[pos + header..pos + header + len].to_vec(),
        });
        pos += header + len;
    }

    frames
}

/// Run a WebSocket actor against pre-encoded client frames and collect what
/// it sends back, until `done` holds, the actor stops, or five seconds pass.
///
/// With `end_input` the input ends after the frames (the transport drops);
/// otherwise it stays open.
pub async fn drive_websocket<A, F>(
    actor: A,
    frames: Vec<Bytes>,
    end_input: bool,
    done: F,
) -> Vec<ServerFrame>
where
    A: Actor<Context = ws::WebsocketContext<A>> + StreamHandler<Result<ws::Message, ws::ProtocolError>>,
    F: Fn(&[ServerFrame]) -> bool,
{
    let input = stream::iter(frames.into_iter().map(Ok::<Bytes, PayloadError>));
    let input = if end_input {
        input.boxed_local()
    } else {
        input.chain(stream::pending()).boxed_local()
    };

    let mut output = Box::pin(ws::WebsocketContext::create(actor, input));
    let mut buf = Vec::new();
    let mut received = Vec::new();

    let _ = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(chunk) = output.next().await {
            buf.extend_from_slice(&chunk.unwrap());
            received = parse_server_frames(&buf);
            if done(&received) {
                break;
            }
        }
    })
    .await;

    received
}
