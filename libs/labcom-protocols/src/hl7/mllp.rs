//! MLLP Envelope Assembly
//!
//! HL7 v2.x travels in MLLP envelopes: `VT(0x0B) <text> FS(0x1C) CR(0x0D)`.
//! Unlike ASTM there is no checksum and no multi-frame accumulation; every
//! envelope carries one whole message. Same push discipline as the ASTM
//! assembler: chunk boundaries never change the extracted envelopes.

use bytes::{Buf, BytesMut};
use tracing::{trace, warn};

use labcom_link::error::{LinkError, Result};

/// Start-of-block
pub const VT: u8 = 0x0B;
/// End-of-block
pub const FS: u8 = 0x1C;
const CR: u8 = 0x0D;

/// Receive buffer cap, matching the ASTM assembler
pub const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Per-connection MLLP envelope assembler
#[derive(Debug, Default)]
pub struct MllpAssembler {
    buffer: BytesMut,
}

impl MllpAssembler {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append a chunk and extract every complete envelope it finishes.
    ///
    /// Each returned item is the raw HL7 text with the envelope bytes
    /// stripped. Partial envelopes stay buffered.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() > MAX_BUFFER_SIZE {
            let len = self.buffer.len();
            self.buffer.clear();
            warn!("MLLP buffer overflow, {}B discarded", len);
            return Err(LinkError::protocol(format!(
                "receive buffer exceeded {MAX_BUFFER_SIZE} bytes without an envelope boundary"
            )));
        }

        let mut messages = Vec::new();
        while let Some(text) = self.try_extract_envelope() {
            messages.push(text);
        }
        Ok(messages)
    }

    fn try_extract_envelope(&mut self) -> Option<Vec<u8>> {
        let vt = self.buffer.iter().position(|&b| b == VT)?;
        let fs = self.buffer[vt + 1..]
            .iter()
            .position(|&b| b == FS)
            .map(|p| vt + 1 + p)?;
        // The trailing CR must have arrived before the envelope is whole
        if self.buffer.len() < fs + 2 || self.buffer[fs + 1] != CR {
            return None;
        }

        let text = self.buffer[vt + 1..fs].to_vec();
        self.buffer.advance(fs + 2);
        trace!("MLLP envelope: {}B", text.len());
        Some(text)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(text: &[u8]) -> Vec<u8> {
        let mut env = vec![VT];
        env.extend_from_slice(text);
        env.extend_from_slice(&[FS, CR]);
        env
    }

    const MESSAGE: &[u8] = b"MSH|^~\\&|BC-5380|Lab|LIS|Hosp|20240115||ORU^R01|1|P|2.3.1\rOBX|1|NM|WBC||6.5|10*9/L|4.0-10.0|N|||F";

    #[test]
    fn test_single_envelope() {
        let mut asm = MllpAssembler::new();
        let messages = asm.feed(&envelope(MESSAGE)).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], MESSAGE);
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn test_chunk_splitting_invariance() {
        let mut stream = envelope(MESSAGE);
        stream.extend(envelope(b"MSH|^~\\&|A|B|C|D|20240115||ACK|2|P|2.3.1"));

        let mut whole = MllpAssembler::new();
        let expected = whole.feed(&stream).unwrap();
        assert_eq!(expected.len(), 2);

        for chunk_size in [1, 2, 3, 7, 13] {
            let mut asm = MllpAssembler::new();
            let mut actual = Vec::new();
            for chunk in stream.chunks(chunk_size) {
                actual.extend(asm.feed(chunk).unwrap());
            }
            assert_eq!(actual, expected, "chunk size {chunk_size} diverged");
        }
    }

    #[test]
    fn test_envelope_waits_for_trailing_cr() {
        let env = envelope(MESSAGE);
        let mut asm = MllpAssembler::new();

        let messages = asm.feed(&env[..env.len() - 1]).unwrap();
        assert!(messages.is_empty());

        let messages = asm.feed(&env[env.len() - 1..]).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn test_noise_before_vt_skipped() {
        let mut stream = vec![0x00, CR];
        stream.extend(envelope(MESSAGE));
        let mut asm = MllpAssembler::new();
        let messages = asm.feed(&stream).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(asm.pending_len(), 0);
    }

    #[test]
    fn test_buffer_overflow_resets() {
        let mut asm = MllpAssembler::new();
        let junk = vec![b'x'; MAX_BUFFER_SIZE + 1];
        assert!(asm.feed(&junk).is_err());
        assert_eq!(asm.pending_len(), 0);
    }
}
