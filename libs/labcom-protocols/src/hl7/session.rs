//! HL7 Connection Driver
//!
//! MLLP has no handshake, so the driver is thin: every complete envelope
//! becomes one `Message` (or `ParseError`) event and nothing is written
//! back. Kept shape-compatible with the ASTM session so hosting tasks can
//! treat both protocols through one seam.

use std::sync::Arc;

use tracing::{debug, warn};

use labcom_link::error::Result;
use labcom_link::quality::QualityCounters;

use crate::astm::session::SessionOutput;
use crate::events::{DecodedMessage, LinkEventKind};
use crate::hl7::message;
use crate::hl7::mllp::MllpAssembler;

/// Per-connection HL7/MLLP driver
#[derive(Debug)]
pub struct Hl7Session {
    assembler: MllpAssembler,
    quality: Arc<QualityCounters>,
}

impl Hl7Session {
    pub fn new(quality: Arc<QualityCounters>) -> Self {
        Self {
            assembler: MllpAssembler::new(),
            quality,
        }
    }

    /// Drop any partially received envelope, e.g. across a reconnect
    pub fn reset(&mut self) {
        self.assembler.clear();
    }

    /// Feed received bytes; each completed envelope yields one event.
    pub fn process(&mut self, input: &[u8]) -> Result<SessionOutput> {
        let mut output = SessionOutput::default();
        for text in self.assembler.feed(input)? {
            match message::parse_message(&text) {
                Ok(msg) => {
                    debug!("HL7 message: {} OBX segment(s)", msg.obx.len());
                    self.quality.record_success();
                    output.events.push(LinkEventKind::Message {
                        message: DecodedMessage::Hl7(msg),
                    });
                },
                Err(e) => {
                    warn!("HL7 decode failed: {}", e);
                    self.quality.record_failure();
                    output.events.push(LinkEventKind::ParseError {
                        raw: String::from_utf8_lossy(&text).into_owned(),
                        detail: e.to_string(),
                    });
                },
            }
        }
        Ok(output)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hl7::mllp::{FS, VT};

    fn envelope(text: &[u8]) -> Vec<u8> {
        let mut env = vec![VT];
        env.extend_from_slice(text);
        env.extend_from_slice(&[FS, 0x0D]);
        env
    }

    #[test]
    fn test_envelope_becomes_message_event() {
        let quality = Arc::new(QualityCounters::new());
        let mut s = Hl7Session::new(Arc::clone(&quality));

        let out = s
            .process(&envelope(
                b"MSH|^~\\&|App|Fac|LIS|Hosp|20240115||ORU^R01|1|P|2.3.1\rOBX|1|NM|GLU||105||70-110|N",
            ))
            .unwrap();
        assert!(out.reply.is_empty());
        assert_eq!(out.events.len(), 1);
        match &out.events[0] {
            LinkEventKind::Message {
                message: DecodedMessage::Hl7(m),
            } => assert_eq!(m.obx.len(), 1),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(quality.snapshot().success_count, 1);
    }

    #[test]
    fn test_undecodable_envelope_preserves_raw() {
        let quality = Arc::new(QualityCounters::new());
        let mut s = Hl7Session::new(Arc::clone(&quality));

        let out = s.process(&envelope(b"PID|1||PID123")).unwrap();
        match &out.events[0] {
            LinkEventKind::ParseError { raw, .. } => assert_eq!(raw, "PID|1||PID123"),
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(quality.snapshot().failure_count, 1);
    }
}
