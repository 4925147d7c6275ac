//! The 4-byte frame header shared by every codec.

use crate::error::{CodecError, CodecResult};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameHeader {
    /// Payload is compressed and has this many bytes.
    Compressed(usize),
    /// Payload is stored raw and has this many bytes.
    Raw(usize),
}

impl FrameHeader {
    /// Encodes the header as a signed little-endian length.
    #[must_use]
    pub fn encode(self) -> [u8; FRAME_HEADER_SIZE] {
        let value = match self {
            Self::Compressed(len) => len as i32,
            Self::Raw(len) => -(len as i32),
        };
        value.to_le_bytes()
    }

    /// Reads the header at the start of `frame`.
    ///
    /// A zero header is an empty raw payload, which is also what a
    /// zero-filled, never-written slot decodes to.
    ///
    /// # Errors
    ///
    /// Returns `Corrupted` if the frame is shorter than the header or the
    /// payload length runs past the end of the frame.
    pub fn decode(frame: &[u8]) -> CodecResult<Self> {
        let bytes: [u8; FRAME_HEADER_SIZE] = frame
            .get(..FRAME_HEADER_SIZE)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| CodecError::corrupted("frame shorter than header"))?;
        let value = i32::from_le_bytes(bytes);

        let header = if value > 0 {
            Self::Compressed(value as usize)
        } else {
            Self::Raw(value.unsigned_abs() as usize)
        };

        if FRAME_HEADER_SIZE + header.payload_len() > frame.len() {
            return Err(CodecError::corrupted(format!(
                "payload of {} bytes exceeds frame of {} bytes",
                header.payload_len(),
                frame.len()
            )));
        }

        Ok(header)
    }

    /// Returns the payload length following the header.
    #[must_use]
    pub const fn payload_len(self) -> usize {
        match self {
            Self::Compressed(len) | Self::Raw(len) => len,
        }
    }
}
