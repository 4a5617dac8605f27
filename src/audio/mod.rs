//! # Audio Handling
//!
//! Everything between raw bytes from a client and the push stream consumed
//! by the speech backend.
//!
//! ## Key Components:
//! - **stream**: Push-style audio input stream (single writer, ordered, closable)
//! - **container**: WAV container decoding/encoding and streaming headers
//! - **processor**: Downmix and resampling to the backend's input format
//! - **upload**: Request-scoped storage and normalization of uploaded files
//!
//! ## Backend Audio Format:
//! - **Sample Rate**: 16kHz by default (configurable as `audio.target_sample_rate`)
//! - **Bit Depth**: 16-bit PCM, little-endian signed integers
//! - **Channels**: Mono

pub mod container;
pub mod processor;
pub mod stream;
pub mod upload;
