//! ASTM Frame Assembly
//!
//! Push-based reassembly of ASTM E1381 frames from an arbitrarily-chunked
//! byte stream. The assembler owns nothing but its buffer: bytes go in via
//! [`AstmFrameAssembler::feed`], complete frames and bare control bytes come
//! out in arrival order. Chunk boundaries never affect the result, so a
//! stream fed one byte at a time yields exactly the frames of the whole
//! stream fed at once.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use labcom_link::error::{LinkError, Result};

use crate::checksum::{self, ACK, ENQ, EOT, ETB, ETX, NAK, STX};

/// Receive buffer cap. A stream that never produces a frame boundary is
/// reset at this size instead of growing without bound.
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Bytes after the ETX/ETB terminator: 2 checksum chars + CR + LF
const TRAILER_LEN: usize = 4;

/// One complete ASTM low-level frame, STX through LF inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AstmFrame {
    raw: Vec<u8>,
    /// Index of the ETX/ETB byte within `raw`
    term_pos: usize,
}

impl AstmFrame {
    /// Full frame bytes as received
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Frame sequence digit (cyclic 0-7) as transmitted
    pub fn seq(&self) -> u8 {
        self.raw[1]
    }

    /// Frame text, excluding STX and the sequence digit, up to the terminator
    pub fn payload(&self) -> &[u8] {
        &self.raw[2..self.term_pos]
    }

    /// True when the frame ends with ETX (last frame of a message),
    /// false for ETB intermediate frames.
    pub fn is_final(&self) -> bool {
        self.raw[self.term_pos] == ETX
    }

    /// Validate the transmitted checksum
    pub fn verify(&self) -> bool {
        checksum::verify(&self.raw)
    }
}

/// What the assembler hands back for each consumed unit of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AstmToken {
    /// A bare control byte (ENQ, EOT, ACK or NAK) seen outside a frame
    Control(u8),
    /// A structurally complete frame (checksum not yet validated)
    Frame(AstmFrame),
}

/// Per-connection ASTM frame assembler
#[derive(Debug, Default)]
pub struct AstmFrameAssembler {
    buffer: BytesMut,
}

impl AstmFrameAssembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Bytes currently buffered awaiting a frame boundary
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partially assembled input
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append a chunk and extract every token it completes.
    ///
    /// Incomplete trailing input stays buffered for the next call; the
    /// method never blocks and never loses data across calls.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<AstmToken>> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() > MAX_BUFFER_SIZE {
            let len = self.buffer.len();
            self.buffer.clear();
            warn!("ASTM buffer overflow, {}B discarded", len);
            return Err(LinkError::protocol(format!(
                "receive buffer exceeded {MAX_BUFFER_SIZE} bytes without a frame boundary"
            )));
        }

        let mut tokens = Vec::new();
        loop {
            match self.buffer.first() {
                None => break,
                Some(&b) if is_control(b) => {
                    self.buffer.advance(1);
                    trace!("ASTM control: 0x{:02X}", b);
                    tokens.push(AstmToken::Control(b));
                },
                Some(_) => {
                    let Some(frame) = self.try_extract_frame() else {
                        break;
                    };
                    tokens.push(AstmToken::Frame(frame));
                },
            }
        }
        Ok(tokens)
    }

    /// Pull one complete frame off the buffer front, or None while the
    /// frame is still partial. Bytes before STX are consumed with the
    /// frame, never on their own.
    fn try_extract_frame(&mut self) -> Option<AstmFrame> {
        let stx = self.buffer.iter().position(|&b| b == STX)?;
        let term = self.buffer[stx + 1..]
            .iter()
            .position(|&b| b == ETX || b == ETB)
            .map(|p| stx + 1 + p)?;
        // Frame trailer must be fully present
        if self.buffer.len() < term + 1 + TRAILER_LEN {
            return None;
        }

        let end = term + 1 + TRAILER_LEN;
        let raw = self.buffer[stx..end].to_vec();
        self.buffer.advance(end);

        trace!("ASTM frame: {}B", raw.len());
        Some(AstmFrame {
            term_pos: term - stx,
            raw,
        })
    }
}

fn is_control(b: u8) -> bool {
    matches!(b, ENQ | EOT | ACK | NAK)
}

// ============================================================================
// Tests
// ============================================================================
