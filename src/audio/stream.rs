//! # Audio Push Stream
//!
//! A push-style audio input channel. The producer side ([`AudioPushStream`])
//! is owned by whoever receives audio from the client (a WebSocket actor or the
//! upload handler) and writes raw PCM chunks in arrival order. The consumer
//! side ([`AudioInputStream`]) is handed to the speech backend, which reads it
//! as an ordinary `Stream` until the producer closes it.
//!
//! ## Guarantees:
//! - Chunks are delivered in exactly the order they were written
//! - There is a single writer per stream (the producer is not `Clone`)
//! - `close` is idempotent, and writes after `close` are rejected

use actix_web::web::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A slice of raw PCM audio. Only its byte length carries any size information.
pub type AudioChunk = Bytes;

/// Errors returned when writing to an [`AudioPushStream`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The producer already signalled end-of-input.
    #[error("audio stream is closed")]
    Closed,

    /// The consumer went away (recognition finished or was cancelled).
    #[error("audio stream consumer is gone")]
    Disconnected,
}

/// Create a connected producer/consumer pair.
pub fn push_stream() -> (AudioPushStream, AudioInputStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        AudioPushStream {
            sender: Some(sender),
            chunks_written: 0,
            bytes_written: 0,
        },
        AudioInputStream {
            inner: UnboundedReceiverStream::new(receiver),
        },
    )
}

/// Producer half of an audio push stream.
#[derive(Debug)]
pub struct AudioPushStream {
    sender: Option<mpsc::UnboundedSender<AudioChunk>>,
    chunks_written: usize,
    bytes_written: usize,
}

impl AudioPushStream {
    /// Append one chunk to the stream.
    pub fn write(&mut self, chunk: impl Into<AudioChunk>) -> Result<(), StreamError> {
        let sender = self.sender.as_ref().ok_or(StreamError::Closed)?;
        let chunk = chunk.into();
        let len = chunk.len();

        sender.send(chunk).map_err(|_| StreamError::Disconnected)?;

        self.chunks_written += 1;
        self.bytes_written += len;
        Ok(())
    }

    /// Signal end-of-input. Returns `true` only for the call that actually closed the stream.
    pub fn close(&mut self) -> bool {
        self.sender.take().is_some()
    }

    pub fn chunks_written(&self) -> usize {
        self.chunks_written
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

/// Consumer half of an audio push stream. Yields chunks until the producer
/// closes (or is dropped), then ends.
#[derive(Debug)]
pub struct AudioInputStream {
    inner: UnboundedReceiverStream<AudioChunk>,
}

impl Stream for AudioInputStream {
    type Item = AudioChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
