//! Data-plane framing — binary sample frames for the streaming protocols
//!
//! One frame carries a block of float32 samples wrapped in a 16-byte
//! big-endian header:
//!
//! ```text
//! [timestamp: u64 BE] [seqno: u32 BE] [nsamples: u16 BE] [nchannels: u16 BE]
//! [sample_0 f32 BE] [sample_1 f32 BE] ...
//! ```
//!
//! Samples are channel-interleaved per time step:
//! `[c0t0, c1t0, ..., c(C-1)t0, c0t1, ...]`. Internal signal buffers are
//! column-per-channel (`Vec<Vec<f32>>`, one column per channel); the
//! [`interleave`]/[`deinterleave`] helpers convert between the two layouts.
//!
//! For outgoing ADC blocks all header fields are filled in; for incoming
//! DAC bursts the header is consumed but ignored
//! ([`DataFrame::payload_after_header`]).
//!
//! ## Example
//!
//! ```rust
//! use vao_core::frame::DataFrame;
//!
//! let frame = DataFrame::new(2667, 1, 2, vec![0.5, -0.5, 0.25, -0.25]);
//! let bytes = frame.to_bytes();
//! let parsed = DataFrame::from_bytes(&bytes).unwrap();
//! assert_eq!(parsed.timestamp, 2667);
//! assert_eq!(parsed.nsamples(), 2);
//! assert_eq!(parsed.samples, frame.samples);
//! ```

use thiserror::Error;

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 16;

/// Errors raised while decoding a data frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {0} bytes, need at least {HEADER_LEN}")]
    TooShort(usize),

    #[error("payload length {got} does not match header ({want} bytes expected)")]
    LengthMismatch { want: usize, got: usize },

    #[error("payload of {0} bytes is not a whole number of f32 samples")]
    Misaligned(usize),
}

/// One data-plane frame: header fields plus channel-interleaved samples.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    /// Timestamp of the first sample, in µs since the simulation epoch.
    pub timestamp: u64,
    /// Block sequence number (wraps).
    pub seqno: u32,
    /// Number of channels interleaved in the payload.
    pub nchannels: u16,
    /// Channel-interleaved samples; length is a multiple of `nchannels`.
    pub samples: Vec<f32>,
}

impl DataFrame {
    /// Create a frame. `samples.len()` must be a multiple of `nchannels`.
    pub fn new(timestamp: u64, seqno: u32, nchannels: u16, samples: Vec<f32>) -> Self {
        debug_assert!(nchannels > 0 && samples.len() % nchannels as usize == 0);
        Self {
            timestamp,
            seqno,
            nchannels,
            samples,
        }
    }

    /// Samples per channel in this frame.
    #[inline]
    pub fn nsamples(&self) -> u16 {
        (self.samples.len() / self.nchannels.max(1) as usize) as u16
    }

    /// Encode to wire bytes (big-endian header + big-endian f32 payload).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.samples.len() * 4);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.seqno.to_be_bytes());
        buf.extend_from_slice(&self.nsamples().to_be_bytes());
        buf.extend_from_slice(&self.nchannels.to_be_bytes());
        for &s in &self.samples {
            buf.extend_from_slice(&s.to_be_bytes());
        }
        buf
    }

    /// Decode a frame, validating the payload length against the header.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }
        let timestamp = u64::from_be_bytes(data[0..8].try_into().unwrap());
        let seqno = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let nsamples = u16::from_be_bytes(data[12..14].try_into().unwrap());
        let nchannels = u16::from_be_bytes(data[14..16].try_into().unwrap());
        let want = nsamples as usize * nchannels as usize * 4;
        let payload = &data[HEADER_LEN..];
        if payload.len() != want {
            return Err(FrameError::LengthMismatch {
                want,
                got: payload.len(),
            });
        }
        Ok(Self {
            timestamp,
            seqno,
            nchannels,
            samples: decode_f32s(payload)?,
        })
    }

    /// Decode the float payload of a DAC data packet, consuming (but
    /// ignoring) the 16-byte header.
    pub fn payload_after_header(data: &[u8]) -> Result<Vec<f32>, FrameError> {
        if data.len() < HEADER_LEN {
            return Err(FrameError::TooShort(data.len()));
        }
        decode_f32s(&data[HEADER_LEN..])
    }
}

fn decode_f32s(payload: &[u8]) -> Result<Vec<f32>, FrameError> {
    if payload.len() % 4 != 0 {
        return Err(FrameError::Misaligned(payload.len()));
    }
    Ok(payload
        .chunks_exact(4)
        .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Convert column-per-channel buffers into the channel-interleaved wire
/// layout. All columns must have equal length.
pub fn interleave(columns: &[Vec<f32>]) -> Vec<f32> {
    let nch = columns.len();
    if nch == 0 {
        return Vec::new();
    }
    let n = columns[0].len();
    debug_assert!(columns.iter().all(|c| c.len() == n));
    let mut out = Vec::with_capacity(n * nch);
    for t in 0..n {
        for col in columns {
            out.push(col[t]);
        }
    }
    out
}

/// Split a channel-interleaved buffer into column-per-channel buffers.
/// A trailing partial time step is dropped.
pub fn deinterleave(samples: &[f32], nchannels: usize) -> Vec<Vec<f32>> {
    if nchannels == 0 {
        return Vec::new();
    }
    let n = samples.len() / nchannels;
    let mut cols = vec![Vec::with_capacity(n); nchannels];
    for step in samples.chunks_exact(nchannels) {
        for (col, &s) in cols.iter_mut().zip(step) {
            col.push(s);
        }
    }
    cols
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout_is_big_endian() {
        let frame = DataFrame::new(0x0102030405060708, 0x0A0B0C0D, 1, vec![1.0]);
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[0..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(&bytes[12..14], &[0, 1]); // nsamples
        assert_eq!(&bytes[14..16], &[0, 1]); // nchannels
        // 1.0f32 big-endian
        assert_eq!(&bytes[16..20], &[0x3F, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_round_trip() {
        let frame = DataFrame::new(123_456, 7, 3, vec![0.5, -0.5, 0.25, 1.0, -1.0, 0.0]);
        let parsed = DataFrame::from_bytes(&frame.to_bytes()).unwrap();
        assert_eq!(parsed, frame);
        assert_eq!(parsed.nsamples(), 2);
    }

    #[test]
    fn test_too_short_rejected() {
        assert_eq!(
            DataFrame::from_bytes(&[0u8; 10]),
            Err(FrameError::TooShort(10))
        );
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut bytes = DataFrame::new(0, 0, 2, vec![0.0; 4]).to_bytes();
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            DataFrame::from_bytes(&bytes),
            Err(FrameError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_payload_after_header_ignores_header_fields() {
        // Garbage header, valid payload.
        let mut bytes = vec![0xFFu8; HEADER_LEN];
        bytes.extend_from_slice(&2.0f32.to_be_bytes());
        bytes.extend_from_slice(&(-2.0f32).to_be_bytes());
        let floats = DataFrame::payload_after_header(&bytes).unwrap();
        assert_eq!(floats, vec![2.0, -2.0]);
    }

    #[test]
    fn test_payload_misaligned_rejected() {
        let bytes = vec![0u8; HEADER_LEN + 5];
        assert_eq!(
            DataFrame::payload_after_header(&bytes),
            Err(FrameError::Misaligned(5))
        );
    }

    #[test]
    fn test_interleave_layout() {
        // Two channels, three time steps: wire order is per time step.
        let cols = vec![vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]];
        let flat = interleave(&cols);
        assert_eq!(flat, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(deinterleave(&flat, 2), cols);
    }

    #[test]
    fn test_deinterleave_drops_partial_step() {
        let cols = deinterleave(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(cols, vec![vec![1.0, 3.0], vec![2.0, 4.0]]);
    }
}
