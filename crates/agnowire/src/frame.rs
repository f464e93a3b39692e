//! # Frames
//!
//! ```text
//! [Seq: i32][Len: i32][Uncompressed: i32][Payload: Len]
//! ```
//!
//! All integers are big-endian. `Uncompressed` is zero for a raw payload, otherwise
//! the payload is a zlib stream that inflates to exactly that many bytes.

use std::io::Read;
use std::io::Write;

use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::error::Error;
use crate::error::Result;

pub const HEADER_LEN: usize = 12;

/// Payloads longer than this are compressed once compression is switched on.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub seq: i32,
    pub len: i32,
    pub uncompressed: i32,
}

impl FrameHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.seq.to_be_bytes());
        out[4..8].copy_from_slice(&self.len.to_be_bytes());
        out[8..12].copy_from_slice(&self.uncompressed.to_be_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self> {
        let field = |at: usize| i32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let header = Self { seq: field(0), len: field(4), uncompressed: field(8) };
        if header.len < 0 {
            return Err(Error::ProtocolViolation(format!("negative frame length {}", header.len)));
        }
        if header.uncompressed < 0 {
            return Err(Error::ProtocolViolation(format!(
                "negative uncompressed length {}",
                header.uncompressed
            )));
        }
        Ok(header)
    }

    pub fn is_compressed(&self) -> bool {
        self.uncompressed > 0
    }
}

pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(|e| Error::Compression(e.to_string()))?;
    encoder.finish().map_err(|e| Error::Compression(e.to_string()))
}

/// Inflates `data`, which must expand to exactly `expected` bytes.
pub fn decompress(data: &[u8], expected: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected.min(1 << 20));
    // One byte of slack so an oversized stream is detected instead of truncated.
    ZlibDecoder::new(data)
        .take(expected as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| Error::Compression(e.to_string()))?;
    if out.len() != expected {
        return Err(Error::ProtocolViolation(format!(
            "payload inflated to {} bytes, header promised {}",
            out.len(),
            expected
        )));
    }
    Ok(out)
}
