//! Classification bitmap: one bit per packet of a single source, routing
//! each packet to one of the two sender slots. Bit value 0 routes to the
//! primary interface, 1 to the secondary. Bits are packed LSB-first within
//! each byte.
//!
//! The engine only ever consumes the parsed, in-memory form. The on-disk
//! loader below reads the small binary format emitted by the companion
//! classifier tool: magic `RPCB`, a format version byte (currently 1), the
//! packet count as little-endian u32, the comment length as little-endian
//! u16 followed by that many bytes of UTF-8 comment, then
//! `ceil(count / 8)` bytes of packed bits.

use crate::error::{ReplayError, Result};
use std::fs;
use std::path::Path;

const MAGIC: &[u8; 4] = b"RPCB";
const VERSION: u8 = 1;

#[derive(Debug, Clone)]
pub struct RoutingBitmap {
    bits: Vec<u8>,
    count: u32,
    comment: String,
}

impl RoutingBitmap {
    pub fn new(bits: Vec<u8>, count: u32, comment: impl Into<String>) -> Result<Self> {
        if bits.len() * 8 < count as usize {
            return Err(ReplayError::config(format!(
                "bitmap too short: {} bytes cannot cover {count} packets",
                bits.len()
            )));
        }
        Ok(RoutingBitmap {
            bits,
            count,
            comment: comment.into(),
        })
    }

    /// Number of packets the bitmap classifies.
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    fn bit(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        let bit = (index % 8) as u8;
        self.bits[byte] >> bit & 1 == 1
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path.display().to_string();
        let raw = fs::read(path).map_err(|e| ReplayError::resource(&name, e.to_string()))?;
        Self::parse(&raw).map_err(|e| match e {
            ReplayError::Config { reason } => ReplayError::resource(&name, reason),
            other => other,
        })
    }

    fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < 11 || &raw[..4] != MAGIC {
            return Err(ReplayError::config("not a classification bitmap file"));
        }
        if raw[4] != VERSION {
            return Err(ReplayError::config(format!(
                "unsupported bitmap format version {}",
                raw[4]
            )));
        }
        let count = u32::from_le_bytes([raw[5], raw[6], raw[7], raw[8]]);
        let comment_len = u16::from_le_bytes([raw[9], raw[10]]) as usize;
        let bits_off = 11 + comment_len;
        let bits_len = count.div_ceil(8) as usize;
        if raw.len() < bits_off + bits_len {
            return Err(ReplayError::config("truncated classification bitmap file"));
        }
        let comment = String::from_utf8(raw[11..bits_off].to_vec())
            .map_err(|_| ReplayError::config("bitmap comment is not valid UTF-8"))?;
        RoutingBitmap::new(raw[bits_off..bits_off + bits_len].to_vec(), count, comment)
    }

    /// Serializes in the on-disk format. Used by the classifier tool and
    /// the tests.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(11 + self.comment.len() + self.bits.len());
        out.extend_from_slice(MAGIC);
        out.push(VERSION);
        out.extend_from_slice(&self.count.to_le_bytes());
        out.extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        out.extend_from_slice(self.comment.as_bytes());
        out.extend_from_slice(&self.bits[..self.count.div_ceil(8) as usize]);
        out
    }
}

/// Position of the next bit to consume. Advances with every packet of the
/// bound source and resets between sources and between loops.
#[derive(Debug, Clone, Copy, Default)]
pub struct BitmapCursor {
    index: u32,
}

impl BitmapCursor {
    pub fn reset(&mut self) {
        self.index = 0;
    }

    /// Consumes the next bit. `None` once the cursor has run past the
    /// classified packet count.
    pub fn advance(&mut self, bitmap: &RoutingBitmap) -> Option<bool> {
        if self.index >= bitmap.count() {
            return None;
        }
        let bit = bitmap.bit(self.index);
        self.index += 1;
        Some(bit)
    }
}
