//! Transparent decoding of compressed backup blocks.
//!
//! Compressed blocks start with a 12-byte header: `magic(2) = 0xDAC0`,
//! `header_size(2)`, `compressed_size(4)`, `uncompressed_size(4)`, all
//! little-endian. Anything else is raw passthrough.
//!
//! The payload is an LZXPRESS-plain variant: groups of 32 items gated by a
//! 32-bit flags word, literal bytes for clear bits and 16-bit match
//! descriptors for set bits, with a 10/16/32-bit length escalation. The
//! DEFLATE fallbacks cover backups produced by tooling that swaps in a
//! standard codec.

use flate2::{Decompress, FlushDecompress, Status};
use tracing::{debug, warn};

use bakex_error::{BakError, Result};
use bakex_types::bytes::{u16_at, u32_at};

/// Compressed-block magic, little-endian `0xDAC0`.
pub const BLOCK_MAGIC: u16 = 0xDAC0;

/// Size of the fixed compressed-block header.
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Decoded compressed-block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub magic: u16,
    pub header_size: u16,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl BlockHeader {
    /// Parse the 12-byte header; `None` when the buffer is too short.
    #[must_use]
    pub fn parse(data: &[u8]) -> Option<Self> {
        Some(Self {
            magic: u16_at(data, 0)?,
            header_size: u16_at(data, 2)?,
            compressed_size: u32_at(data, 4)?,
            uncompressed_size: u32_at(data, 8)?,
        })
    }
}

/// Whether a buffer starts with a compressed-block header.
#[must_use]
pub fn is_compressed(data: &[u8]) -> bool {
    u16_at(data, 0) == Some(BLOCK_MAGIC)
}

/// The uncompressed size a block claims, or the input length for raw data.
#[must_use]
pub fn expected_size(data: &[u8]) -> usize {
    match BlockHeader::parse(data) {
        Some(hdr) if hdr.magic == BLOCK_MAGIC => hdr.uncompressed_size as usize,
        _ => data.len(),
    }
}

/// Block decompressor with passthrough for raw input.
#[derive(Debug, Default)]
pub struct Decompressor;

impl Decompressor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decode `src` into `dst`, returning the number of bytes written.
    ///
    /// Raw input (no magic) is copied through. For compressed blocks the
    /// LZ decoder runs first, then raw DEFLATE, then zlib-wrapped
    /// DEFLATE. Returns 0 when every method fails; the caller skips the
    /// chunk and keeps scanning.
    pub fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> usize {
        if !is_compressed(src) {
            let n = src.len().min(dst.len());
            dst[..n].copy_from_slice(&src[..n]);
            return n;
        }

        let Some(hdr) = BlockHeader::parse(src) else {
            return 0;
        };
        let header_size = hdr.header_size as usize;
        if header_size > src.len() {
            warn!(header_size, len = src.len(), "compressed block header exceeds input");
            return 0;
        }

        let mut payload = &src[header_size..];
        if payload.len() < hdr.compressed_size as usize {
            warn!(
                expected = hdr.compressed_size,
                got = payload.len(),
                "compressed block payload truncated"
            );
        } else {
            payload = &payload[..hdr.compressed_size as usize];
        }

        let n = lz_decompress(payload, dst);
        if n > 0 {
            return n;
        }

        let n = inflate(payload, dst, false);
        if n > 0 {
            return n;
        }
        let n = inflate(payload, dst, true);
        if n > 0 {
            return n;
        }

        warn!(
            compressed = hdr.compressed_size,
            uncompressed = hdr.uncompressed_size,
            "all decompression methods failed for block"
        );
        0
    }

    /// Decode into a fresh buffer sized from the block header.
    ///
    /// Raw input is copied; a compressed block that defeats every decoder
    /// is a decompression error.
    pub fn decompress(&self, src: &[u8]) -> Result<Vec<u8>> {
        if !is_compressed(src) {
            return Ok(src.to_vec());
        }
        let hdr = BlockHeader::parse(src)
            .ok_or_else(|| BakError::decompression("truncated block header"))?;
        let mut out = vec![0u8; hdr.uncompressed_size as usize];
        let n = self.decompress_into(src, &mut out);
        if n == 0 {
            return Err(BakError::decompression("all methods failed on block"));
        }
        out.truncate(n);
        Ok(out)
    }
}

/// LZXPRESS-plain decode. Returns bytes written, 0 on refusal.
///
/// Match copies are a forward byte loop on purpose: matches may overlap
/// their own output, and each output byte must see all prior writes.
fn lz_decompress(src: &[u8], dst: &mut [u8]) -> usize {
    if src.len() < 4 {
        return 0;
    }

    let mut si = 0usize;
    let mut di = 0usize;

    while si < src.len() && di < dst.len() {
        let Some(flags) = u32_at(src, si) else { break };
        si += 4;

        for bit in 0..32 {
            if si >= src.len() || di >= dst.len() {
                break;
            }
            if flags & (1u32 << bit) == 0 {
                dst[di] = src[si];
                di += 1;
                si += 1;
                continue;
            }

            let Some(desc) = u16_at(src, si) else {
                return di;
            };
            si += 2;

            let offset = usize::from(desc >> 3) + 1;
            let mut length = usize::from(desc & 0x07) + 3;

            // Length nibble 7 escalates: one byte, then 16, then 32 bits.
            if desc & 0x07 == 0x07 {
                let Some(&extra) = src.get(si) else { return di };
                si += 1;
                length = usize::from(extra) + 10;
                if extra == 0xFF {
                    let Some(ext16) = u16_at(src, si) else {
                        return di;
                    };
                    si += 2;
                    length = usize::from(ext16);
                    if ext16 == 0 {
                        let Some(ext32) = u32_at(src, si) else {
                            return di;
                        };
                        si += 4;
                        length = ext32 as usize;
                    }
                }
            }

            if offset > di {
                debug!(offset, position = di, "LZ match reaches before output start");
                return 0;
            }

            let mut copied = 0;
            while copied < length && di < dst.len() {
                dst[di] = dst[di - offset];
                di += 1;
                copied += 1;
            }
        }
    }

    di
}

/// DEFLATE fallback; `zlib_wrapped` selects the header variant.
fn inflate(src: &[u8], dst: &mut [u8], zlib_wrapped: bool) -> usize {
    let mut d = Decompress::new(zlib_wrapped);
    match d.decompress(src, dst, FlushDecompress::Finish) {
        Ok(Status::StreamEnd) => d.total_out() as usize,
        _ => 0,
    }
}
