//! # Uploaded Audio Files
//!
//! Request-scoped storage for an uploaded WAV file. The file lives in a
//! temporary location and is removed when the [`UploadedFile`] is dropped,
//! which ties its lifetime to the request that created it.
//!
//! All functions here do blocking file I/O and are meant to run on the
//! blocking thread pool (`web::block`).

use crate::audio::container::{self, WavError, WavFormat};
use crate::audio::processor::AudioProcessor;
use actix_web::web::Bytes;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Errors raised while preparing an upload for recognition.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("upload storage failed: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Wav(#[from] WavError),

    #[error("normalized audio has unexpected format: {0:?}")]
    UnexpectedFormat(WavFormat),
}

/// A transient, file-backed copy of one uploaded audio payload.
#[derive(Debug)]
pub struct UploadedFile {
    file: NamedTempFile,
}

impl UploadedFile {
    /// Persist `bytes` to a new temporary file, inside `dir` when given.
    pub fn create(dir: Option<&Path>, bytes: &[u8]) -> std::io::Result<Self> {
        let mut file = match dir {
            Some(dir) => tempfile::Builder::new()
                .prefix("upload-")
                .suffix(".wav")
                .tempfile_in(dir)?,
            None => tempfile::Builder::new()
                .prefix("upload-")
                .suffix(".wav")
                .tempfile()?,
        };
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn read_all(&mut self) -> std::io::Result<Vec<u8>> {
        let handle = self.file.as_file_mut();
        handle.seek(SeekFrom::Start(0))?;
        let mut bytes = Vec::new();
        handle.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Replace the file's contents in place.
    pub fn rewrite(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let handle = self.file.as_file_mut();
        handle.set_len(0)?;
        handle.seek(SeekFrom::Start(0))?;
        handle.write_all(bytes)?;
        handle.flush()
    }
}

/// An upload that has been normalized and parsed, ready to stream.
#[derive(Debug)]
pub struct PreparedUpload {
    /// Kept alive until the request finishes.
    pub file: UploadedFile,
    /// Header of the normalized file.
    pub format: WavFormat,
    /// Raw little-endian PCM payload.
    pub pcm: Bytes,
    /// Sample rate of the file as uploaded.
    pub source_sample_rate: u32,
}

/// Store, normalize and re-parse an uploaded WAV file.
///
/// The stored file is rewritten at the processor's target rate before it is
/// read back, so the PCM handed to the backend always comes from the
/// normalized file.
pub fn prepare_upload(
    dir: Option<PathBuf>,
    bytes: &[u8],
    processor: AudioProcessor,
) -> Result<PreparedUpload, UploadError> {
    let mut file = UploadedFile::create(dir.as_deref(), bytes)?;

    let decoded = container::decode(&file.read_all()?)?;
    let source_sample_rate = decoded.format.sample_rate;
    debug!(
        path = %file.path().display(),
        sample_rate = decoded.format.sample_rate,
        channels = decoded.format.channels,
        bits_per_sample = decoded.format.bits_per_sample,
        "Decoded uploaded WAV"
    );

    let normalized = processor.normalize(decoded);
    debug!(
        sample_rate = normalized.sample_rate,
        duration_secs = normalized.duration_seconds(),
        "Normalized uploaded audio"
    );
    let encoded = container::encode_pcm16(normalized.sample_rate, 1, &normalized.samples)?;
    file.rewrite(&encoded)?;

    let (format, pcm) = container::read_pcm16(&file.read_all()?)?;
    if format.sample_rate != processor.target_sample_rate()
        || format.channels != 1
        || format.bits_per_sample != 16
    {
        return Err(UploadError::UnexpectedFormat(format));
    }

    Ok(PreparedUpload {
        file,
        format,
        pcm,
        source_sample_rate,
    })
}
