//! # Upload Recognition Handler
//!
//! `POST /rest/stt` runs one recognition session over an uploaded WAV file.
//!
//! ## Request flow:
//! 1. **Admit**: take a session slot or answer 503
//! 2. **Read**: buffer the `audio` field, enforcing the upload size limit
//! 3. **Prepare**: store, normalize and re-parse the file on the blocking pool
//! 4. **Stream**: push the PCM in fixed-size chunks, then close the stream
//! 5. **Answer**: map the session outcome to a JSON response
//!
//! ## Key Rust Concepts:
//! - **`web::block`**: file I/O and resampling run off the async workers;
//!   `??` unwraps the pool error first, then the preparation error
//! - **`Bytes::slice`**: chunks share the PCM buffer instead of copying it

use crate::audio::processor::AudioProcessor;
use crate::audio::stream::push_stream;
use crate::audio::upload::prepare_upload;
use crate::error::{AppError, AppResult};
use crate::speech::recognition::{RecognitionOutcome, RecognitionSession};
use crate::speech::session::SessionLifecycle;
use crate::state::{AppState, SessionKind};
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde_json::json;
use tracing::{debug, info};

/// Name of the multipart field carrying the WAV file.
pub const AUDIO_FIELD: &str = "audio";

/// Recognize speech in an uploaded WAV file.
///
/// ## Endpoint: `POST /rest/stt`
///
/// ## Request:
/// Multipart form data with the WAV file in a field named `audio`. Any sample
/// rate, channel count and PCM bit depth is accepted; the file is rewritten
/// as 16 kHz mono 16-bit before recognition.
///
/// ## Response:
/// ```json
/// { "success": true, "text": "Hello world." }
/// ```
/// Failures answer 4xx/5xx with `{ "success": false, "error": "…" }`.
///
/// ## Rust Concepts:
/// - **`_permit`**: bound to a name so the slot is held until the handler
///   returns (a bare `_` would drop it immediately)
/// - **`AppResult`**: every `?` converts into an `AppError`, which renders
///   itself through `ResponseError`
pub async fn recognize_upload(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let _permit = state
        .try_acquire_session(SessionKind::UploadStt)
        .ok_or(AppError::Busy)?;

    let audio_bytes = read_audio_field(&mut payload, state.config.upload.max_bytes).await?;
    debug!(bytes = audio_bytes.len(), "Audio upload received");

    let dir = state.config.upload.dir.clone();
    let processor = AudioProcessor::new(state.config.audio.target_sample_rate);
    let prepared = web::block(move || prepare_upload(dir, &audio_bytes, processor)).await??;

    let mut lifecycle = SessionLifecycle::new();
    let (mut audio, input) = push_stream();
    let session = RecognitionSession::new(lifecycle.id(), state.backend.clone(), input);
    info!(
        session_id = %lifecycle.id(),
        source_sample_rate = prepared.source_sample_rate,
        sample_rate = prepared.format.sample_rate,
        pcm_bytes = prepared.pcm.len(),
        "Upload recognition session opened"
    );

    let chunk_bytes = state.config.audio.chunk_bytes;
    let mut offset = 0;
    while offset < prepared.pcm.len() && lifecycle.on_audio() {
        let end = (offset + chunk_bytes).min(prepared.pcm.len());
        // The recognizer only stops reading early once it already has an outcome.
        if audio.write(prepared.pcm.slice(offset..end)).is_err() {
            break;
        }
        offset = end;
    }
    lifecycle.on_end_of_input();
    audio.close();
    debug!(
        session_id = %lifecycle.id(),
        chunks = audio.chunks_written(),
        bytes = audio.bytes_written(),
        "Upload audio pushed"
    );

    let outcome = session.run().await;
    lifecycle.complete(&outcome);
    lifecycle.close();
    state.record_recognition(&outcome);

    // Removes the temporary file.
    drop(prepared);

    match outcome {
        RecognitionOutcome::Success { text } => Ok(HttpResponse::Ok().json(json!({
            "success": true,
            "text": text,
        }))),
        RecognitionOutcome::NoMatch => Err(AppError::Unrecognizable),
        RecognitionOutcome::InternalError => Err(AppError::RecognitionFailed),
    }
}

/// Read the `audio` field fully into memory, enforcing `max_bytes`.
///
/// Other fields are skipped. The limit is checked per chunk, so an oversized
/// upload is refused before it is fully buffered.
async fn read_audio_field(payload: &mut Multipart, max_bytes: usize) -> AppResult<Vec<u8>> {
    while let Some(item) = payload.next().await {
        let mut field: Field = item?;

        let is_audio = field
            .content_disposition()
            .and_then(|disposition| disposition.get_name())
            .map(|name| name == AUDIO_FIELD)
            .unwrap_or(false);
        if !is_audio {
            continue;
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk?;
            if bytes.len() + chunk.len() > max_bytes {
                return Err(AppError::PayloadTooLarge(max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(AppError::BadRequest("Audio file is empty".to_string()));
        }
        return Ok(bytes);
    }

    Err(AppError::BadRequest(format!(
        "No audio file provided in the '{}' field",
        AUDIO_FIELD
    )))
}
