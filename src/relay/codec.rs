//! # Codec Adapter
//!
//! Pure conversion functions between the browser's floating-point audio
//! samples and the 16-bit linear PCM the voice provider expects. No state,
//! no I/O - every function here is a plain data transformation.
//!
//! ## Audio Contract:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit signed PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian
//!
//! These are constants of the provider's voice leg (`audio/l16;rate=16000`),
//! not configuration. Frames that don't line up with the sample size are
//! rejected as decode errors rather than silently truncated.

use byteorder::{ByteOrder, LittleEndian};
use std::fmt;

/// Sample rate both legs operate at. Part of the provider contract.
pub const SAMPLE_RATE_HZ: u32 = 16_000;

/// Channel count. The voice leg is always mono.
pub const CHANNELS: u8 = 1;

/// Errors produced when decoding an inbound audio frame.
///
/// ## Rust Concepts:
/// - **enum**: Each variant is a distinct, matchable decode failure
/// - **Display**: Human-readable messages for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// PCM16 frames must contain whole 2-byte samples
    OddFrameLength(usize),
    /// Float frames must contain whole 4-byte samples
    RaggedFloatFrame(usize),
    /// Zero-length frames carry no audio and indicate a broken sender
    EmptyFrame,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::OddFrameLength(len) => {
                write!(f, "PCM16 frame length {} is not a multiple of 2", len)
            }
            CodecError::RaggedFloatFrame(len) => {
                write!(f, "float frame length {} is not a multiple of 4", len)
            }
            CodecError::EmptyFrame => write!(f, "audio frame is empty"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Convert floating-point samples in [-1.0, 1.0] to little-endian PCM16 bytes.
///
/// ## Conversion:
/// Each sample is clamped to [-1.0, 1.0], then scaled by 32767 (positive
/// side) or 32768 (negative side) and truncated to a signed 16-bit integer.
/// This asymmetric scaling uses the full i16 range and matches what the
/// browser leg produces from its `Float32Array` microphone buffers.
///
/// ## Returns:
/// Two bytes per input sample, in input order.
pub fn float_samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * 2];
    for (i, &sample) in samples.iter().enumerate() {
        let s = sample.clamp(-1.0, 1.0);
        let pcm = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        LittleEndian::write_i16(&mut out[i * 2..i * 2 + 2], pcm);
    }
    out
}

/// Convert little-endian PCM16 bytes back to floating-point samples.
///
/// ## Conversion:
/// Each signed 16-bit sample is divided by 32767, yielding values in
/// (slightly more than) [-1.0, 1.0]. Inverse of [`float_samples_to_pcm16`]
/// to within one quantization step.
///
/// ## Errors:
/// - [`CodecError::EmptyFrame`] for zero-length input
/// - [`CodecError::OddFrameLength`] when the byte count isn't a multiple of 2
pub fn pcm16_to_float_samples(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyFrame);
    }
    if bytes.len() % 2 != 0 {
        return Err(CodecError::OddFrameLength(bytes.len()));
    }

    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        let pcm = LittleEndian::read_i16(chunk);
        samples.push(pcm as f32 / 32767.0);
    }
    Ok(samples)
}

/// Decode a raw little-endian `f32` frame as sent by a float-mode browser leg.
///
/// ## When this is used:
/// Only when `relay.browser_float_samples` is enabled - browser clients that
/// ship their `Float32Array` buffers directly instead of converting to PCM16
/// client-side. The relay decodes here and re-encodes with
/// [`float_samples_to_pcm16`] before forwarding to the provider leg.
pub fn bytes_to_float_samples(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.is_empty() {
        return Err(CodecError::EmptyFrame);
    }
    if bytes.len() % 4 != 0 {
        return Err(CodecError::RaggedFloatFrame(bytes.len()));
    }

    let mut samples = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        samples.push(LittleEndian::read_f32(chunk));
    }
    Ok(samples)
}

/// Encode floating-point samples as a raw little-endian `f32` frame.
///
/// Used on the return path of a float-mode browser leg: provider PCM16 is
/// decoded with [`pcm16_to_float_samples`] and shipped to the browser in the
/// format its audio pipeline consumes directly.
pub fn float_samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = vec![0u8; samples.len() * 4];
    LittleEndian::write_f32_into(samples, &mut out);
    out
}
