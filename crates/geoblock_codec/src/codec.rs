//! Block compressor and decompressor.

use crate::compression::Compression;
use crate::error::{CodecError, CodecResult};
use crate::frame::{FrameHeader, FRAME_HEADER_SIZE};
use flate2::{Compress, Decompress, FlushCompress, FlushDecompress, Status};

/// Compresses raw blocks into fixed slots and back.
///
/// A `BlockCodec` owns its scratch buffer and zlib stream state, so one
/// instance is reused for every block of a store instead of allocating
/// per call. It is not shared between threads; callers wrap it in a lock.
pub struct BlockCodec {
    compression: Compression,
    scratch: Vec<u8>,
    deflate: Option<Compress>,
    inflate: Option<Decompress>,
}

impl BlockCodec {
    /// Creates a codec for the given method.
    #[must_use]
    pub fn new(compression: Compression) -> Self {
        let (deflate, inflate) = match compression {
            Compression::Zlib => (
                Some(Compress::new(flate2::Compression::default(), true)),
                Some(Decompress::new(true)),
            ),
            _ => (None, None),
        };

        Self {
            compression,
            scratch: Vec::new(),
            deflate,
            inflate,
        }
    }

    /// Returns the compression method.
    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Frames `raw` into `out` and returns the number of bytes written,
    /// header included. Bytes of `out` past that length are zeroed.
    ///
    /// # Errors
    ///
    /// Returns `CompressionOverflow` without touching `out` if `raw` would
    /// not fit `out` stored raw.
    pub fn compress(&mut self, raw: &[u8], out: &mut [u8]) -> CodecResult<usize> {
        if raw.len() + FRAME_HEADER_SIZE > out.len() {
            return Err(CodecError::CompressionOverflow {
                len: raw.len(),
                capacity: out.len(),
            });
        }

        let compressed_len = if raw.len() >= self.compression.min_input_len() {
            self.compress_to_scratch(raw)?
        } else {
            None
        };

        let written = match compressed_len {
            Some(len) if len < raw.len() && FRAME_HEADER_SIZE + len <= out.len() => {
                out[..FRAME_HEADER_SIZE].copy_from_slice(&FrameHeader::Compressed(len).encode());
                out[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + len]
                    .copy_from_slice(&self.scratch[..len]);
                FRAME_HEADER_SIZE + len
            }
            _ => {
                out[..FRAME_HEADER_SIZE].copy_from_slice(&FrameHeader::Raw(raw.len()).encode());
                out[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + raw.len()].copy_from_slice(raw);
                FRAME_HEADER_SIZE + raw.len()
            }
        };

        out[written..].fill(0);
        Ok(written)
    }

    /// Decodes `frame` into `out` and returns the decoded length.
    ///
    /// `out` must be sized to the largest raw block the caller expects.
    ///
    /// # Errors
    ///
    /// Returns `OutputTooSmall` if the block does not fit `out`, and
    /// `Corrupted` or `Decompress` for malformed frames.
    pub fn decompress(&mut self, frame: &[u8], out: &mut [u8]) -> CodecResult<usize> {
        let header = FrameHeader::decode(frame)?;
        let payload = &frame[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + header.payload_len()];

        match header {
            FrameHeader::Raw(len) => {
                if len > out.len() {
                    return Err(CodecError::OutputTooSmall {
                        needed: len,
                        capacity: out.len(),
                    });
                }
                out[..len].copy_from_slice(payload);
                Ok(len)
            }
            FrameHeader::Compressed(_) => match self.compression {
                Compression::None => Err(CodecError::corrupted(
                    "compressed frame in a store without compression",
                )),
                Compression::Lz4 => lz4_flex::block::decompress_into(payload, out)
                    .map_err(|e| CodecError::decompress(e.to_string())),
                Compression::Zlib => self.inflate_into(payload, out),
            },
        }
    }

    /// Compresses into the scratch buffer. `None` means the method gave up.
    fn compress_to_scratch(&mut self, raw: &[u8]) -> CodecResult<Option<usize>> {
        match self.compression {
            Compression::None => Ok(None),
            Compression::Lz4 => {
                let bound = lz4_flex::block::get_maximum_output_size(raw.len());
                if self.scratch.len() < bound {
                    self.scratch.resize(bound, 0);
                }
                match lz4_flex::block::compress_into(raw, &mut self.scratch) {
                    Ok(len) => Ok(Some(len)),
                    Err(_) => Ok(None),
                }
            }
            Compression::Zlib => {
                let Some(deflate) = self.deflate.as_mut() else {
                    return Ok(None);
                };
                deflate.reset();
                self.scratch.clear();
                // Output bounded by the raw length: anything larger is stored raw.
                self.scratch.reserve(raw.len());
                let status = deflate
                    .compress_vec(raw, &mut self.scratch, FlushCompress::Finish)
                    .map_err(|e| CodecError::corrupted(e.to_string()))?;
                if status == Status::StreamEnd {
                    Ok(Some(self.scratch.len()))
                } else {
                    Ok(None)
                }
            }
        }
    }

    fn inflate_into(&mut self, payload: &[u8], out: &mut [u8]) -> CodecResult<usize> {
        let Some(inflate) = self.inflate.as_mut() else {
            return Err(CodecError::corrupted("zlib state missing"));
        };
        inflate.reset(true);

        let status = inflate
            .decompress(payload, out, FlushDecompress::Finish)
            .map_err(|e| CodecError::decompress(e.to_string()))?;
        let produced = inflate.total_out() as usize;

        match status {
            Status::StreamEnd => Ok(produced),
            _ if produced == out.len() => Err(CodecError::OutputTooSmall {
                needed: produced + 1,
                capacity: out.len(),
            }),
            _ => Err(CodecError::corrupted("truncated zlib stream")),
        }
    }
}

impl std::fmt::Debug for BlockCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCodec")
            .field("compression", &self.compression)
            .field("scratch_capacity", &self.scratch.capacity())
            .finish_non_exhaustive()
    }
}
