//! # WAV Container Handling
//!
//! Reading and writing the RIFF/WAVE container around PCM audio. Decoding
//! accepts the common integer and float encodings and hands back interleaved
//! 16-bit samples; encoding always produces 16-bit integer PCM, which is what
//! the speech backend consumes.

use actix_web::web::Bytes;
use byteorder::{ByteOrder, LittleEndian};
use std::io::Cursor;
use wav::BitDepth;

/// `wFormatTag` for integer PCM.
pub const FORMAT_PCM: u16 = 0x0001;
/// `wFormatTag` for IEEE float PCM.
pub const FORMAT_IEEE_FLOAT: u16 = 0x0003;

/// Lowest sample rate accepted from an uploaded file.
pub const MIN_SAMPLE_RATE: u32 = 4_000;
/// Highest sample rate accepted from an uploaded file.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

/// Errors raised while reading or writing a WAV container.
#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("invalid WAV container: {0}")]
    Container(#[from] std::io::Error),

    #[error("unsupported WAV encoding: {0}")]
    Unsupported(String),
}

/// The format block of a WAV file, as read from its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl From<&wav::Header> for WavFormat {
    fn from(header: &wav::Header) -> Self {
        Self {
            audio_format: header.audio_format,
            channels: header.channel_count,
            sample_rate: header.sampling_rate,
            bits_per_sample: header.bits_per_sample,
        }
    }
}

/// A decoded WAV file: its original format plus interleaved 16-bit samples.
#[derive(Debug, Clone)]
pub struct DecodedWav {
    pub format: WavFormat,
    pub samples: Vec<i16>,
}

/// Decode a WAV file of any supported encoding into 16-bit samples.
///
/// 8-bit unsigned, 16-bit, 24-bit and 32-bit float data are accepted and
/// requantized to 16 bits. The channel layout and sample rate are preserved.
/// Rates outside [`MIN_SAMPLE_RATE`, `MAX_SAMPLE_RATE`] are rejected, since
/// resampling from them would grow a small file without bound.
pub fn decode(bytes: &[u8]) -> Result<DecodedWav, WavError> {
    let (header, data) = wav::read(&mut Cursor::new(bytes))?;
    let format = WavFormat::from(&header);

    if !matches!(format.audio_format, FORMAT_PCM | FORMAT_IEEE_FLOAT) {
        return Err(WavError::Unsupported(format!(
            "compressed format tag {:#06x}",
            format.audio_format
        )));
    }

    if format.channels == 0
        || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&format.sample_rate)
    {
        return Err(WavError::Unsupported(format!(
            "{} channel(s) at {} Hz",
            format.channels, format.sample_rate
        )));
    }

    let samples = match data {
        BitDepth::Eight(samples) => samples
            .into_iter()
            .map(|s| ((s as i16) - 128) << 8)
            .collect(),
        BitDepth::Sixteen(samples) => samples,
        BitDepth::TwentyFour(samples) => samples.into_iter().map(|s| (s >> 8) as i16).collect(),
        BitDepth::ThirtyTwoFloat(samples) => samples
            .into_iter()
            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect(),
        BitDepth::Empty => {
            return Err(WavError::Unsupported(format!(
                "format tag {:#06x} with {} bits per sample",
                format.audio_format, format.bits_per_sample
            )))
        }
    };

    Ok(DecodedWav { format, samples })
}

/// Encode interleaved 16-bit samples as a complete WAV file.
pub fn encode_pcm16(sample_rate: u32, channels: u16, samples: &[i16]) -> Result<Vec<u8>, WavError> {
    let header = wav::Header::new(FORMAT_PCM, channels, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::new());
    wav::write(header, &BitDepth::Sixteen(samples.to_vec()), &mut cursor)?;
    Ok(cursor.into_inner())
}

/// Parse a 16-bit PCM WAV file and return its header plus the raw
/// little-endian PCM payload. The header is reported as-is.
pub fn read_pcm16(bytes: &[u8]) -> Result<(WavFormat, Bytes), WavError> {
    let (header, data) = wav::read(&mut Cursor::new(bytes))?;
    let format = WavFormat::from(&header);

    match data {
        BitDepth::Sixteen(samples) => {
            let mut payload = vec![0u8; samples.len() * 2];
            LittleEndian::write_i16_into(&samples, &mut payload);
            Ok((format, Bytes::from(payload)))
        }
        _ => Err(WavError::Unsupported(format!(
            "expected 16-bit PCM, found {} bits per sample",
            format.bits_per_sample
        ))),
    }
}

/// Build a WAV header for a stream whose length is not known up front.
///
/// The RIFF and data chunk sizes are set to their maximum value, which
/// streaming consumers interpret as "read until end of input".
pub fn streaming_header(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Bytes {
    let block_align = channels * (bits_per_sample / 8);
    let byte_rate = sample_rate * block_align as u32;

    let mut header = [0u8; 44];
    header[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut header[4..8], u32::MAX);
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut header[16..20], 16);
    LittleEndian::write_u16(&mut header[20..22], FORMAT_PCM);
    LittleEndian::write_u16(&mut header[22..24], channels);
    LittleEndian::write_u32(&mut header[24..28], sample_rate);
    LittleEndian::write_u32(&mut header[28..32], byte_rate);
    LittleEndian::write_u16(&mut header[32..34], block_align);
    LittleEndian::write_u16(&mut header[34..36], bits_per_sample);
    header[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut header[40..44], u32::MAX);

    Bytes::copy_from_slice(&header)
}
