//! Decoding of raw driver buffers into complex samples.
//!
//! LimeSuite hands us interleaved I/Q components in the format that was
//! negotiated when the stream was set up. This module turns those bytes into
//! [`Complex32`]s.

use std::fmt::Display;

use bytes::Buf;
use num_complex::Complex32;

/// Divisor used to map signed 16 bit components into [-1, 1).
const INT16_SCALE: f32 = 32768.0;

/// Wire format of the samples exchanged between LimeSuite and the host.
///
/// This only determines what travels over the bus. Samples delivered to the
/// callback are always [`Complex32`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 32 bit float per component, passed through unscaled.
    Float32,
    /// 16 bit signed integer per component, normalized by 32768.
    #[default]
    Int16,
    /// 12 bit samples. LimeSuite widens these into 16 bit containers before
    /// handing them to us, so they decode exactly like [`Self::Int16`].
    Int12,
}

impl SampleFormat {
    /// Number of bytes a single I or Q component takes in the receive buffer.
    pub fn bytes_per_component(&self) -> usize {
        match self {
            Self::Float32 => 4,
            Self::Int16 | Self::Int12 => 2,
        }
    }

    /// Number of bytes a complex sample takes in the receive buffer.
    pub fn bytes_per_sample(&self) -> usize {
        self.bytes_per_component() * 2
    }

    /// Number of bytes needed to hold `num_samples` complex samples.
    pub fn buffer_len(&self, num_samples: usize) -> usize {
        self.bytes_per_sample() * num_samples
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float32 => write!(f, "f32"),
            Self::Int16 => write!(f, "i16"),
            Self::Int12 => write!(f, "i12"),
        }
    }
}

/// Error returned when a buffer can't be decoded.
///
/// This is not a hardware hiccup. It means the driver reported more samples
/// than it actually wrote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("short buffer: {required} bytes required, but only {available} available")]
    ShortBuffer { required: usize, available: usize },
}

/// Decode `num_samples` complex samples from `buffer`.
///
/// Returns exactly `num_samples` samples, or an error if `buffer` is too short.
/// Trailing bytes are ignored.
pub fn decode_samples(
    buffer: &[u8],
    format: SampleFormat,
    num_samples: usize,
) -> Result<Vec<Complex32>, DecodeError> {
    let mut samples = Vec::with_capacity(num_samples);
    decode_samples_into(buffer, format, num_samples, &mut samples)?;
    Ok(samples)
}

/// Like [`decode_samples`], but appends to `output`.
///
/// Nothing is appended if decoding fails.
pub fn decode_samples_into(
    buffer: &[u8],
    format: SampleFormat,
    num_samples: usize,
    output: &mut Vec<Complex32>,
) -> Result<(), DecodeError> {
    let required = format.buffer_len(num_samples);
    if buffer.len() < required {
        return Err(DecodeError::ShortBuffer {
            required,
            available: buffer.len(),
        });
    }

    let mut buffer = &buffer[..required];
    output.reserve(num_samples);

    match format {
        SampleFormat::Float32 => {
            while buffer.has_remaining() {
                let re = buffer.get_f32_le();
                let im = buffer.get_f32_le();
                output.push(Complex32::new(re, im));
            }
        }
        SampleFormat::Int16 | SampleFormat::Int12 => {
            while buffer.has_remaining() {
                let re = buffer.get_i16_le();
                let im = buffer.get_i16_le();
                output.push(Complex32::new(
                    f32::from(re) / INT16_SCALE,
                    f32::from(im) / INT16_SCALE,
                ));
            }
        }
    }

    Ok(())
}
