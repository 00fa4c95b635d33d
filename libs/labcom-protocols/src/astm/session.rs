//! ASTM Link State Machine
//!
//! Drives one ENQ..EOT session per connection. The session is pure with
//! respect to I/O: callers feed it the bytes they read and get back the
//! bytes to write (ACK/NAK) plus the events to publish. All socket and
//! serial handling stays with the hosting task.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use labcom_link::error::Result;
use labcom_link::quality::QualityCounters;

use crate::astm::frame::{AstmFrameAssembler, AstmToken};
use crate::astm::records;
use crate::checksum::{ACK, ENQ, EOT, NAK};
use crate::events::{DecodedMessage, LinkEventKind};

/// Link protocol state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Between sessions, waiting for ENQ
    Idle,
    /// Inside an ENQ..EOT session, accumulating frame payloads
    Receiving,
    /// Decoder fault; cleared by the next ENQ or `reset()`
    Error,
}

/// Result of feeding bytes into the session
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SessionOutput {
    /// Bytes the host must write back to the instrument (ACK/NAK replies)
    pub reply: Vec<u8>,
    /// Events to publish, in order
    pub events: Vec<LinkEventKind>,
}

/// Per-connection ASTM session driver
#[derive(Debug)]
pub struct AstmSession {
    assembler: AstmFrameAssembler,
    accumulation: Vec<u8>,
    state: SessionState,
    quality: Arc<QualityCounters>,
}

impl AstmSession {
    pub fn new(quality: Arc<QualityCounters>) -> Self {
        Self {
            assembler: AstmFrameAssembler::new(),
            accumulation: Vec::new(),
            state: SessionState::Idle,
            quality,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Enter the fault state: partial frames and the accumulation are
    /// dropped so nothing stale survives into the next session.
    fn mark_error(&mut self) {
        self.state = SessionState::Error;
        self.assembler.clear();
        self.accumulation.clear();
    }

    /// Return to idle after the supervisor rebuilt the link
    pub fn reset(&mut self) {
        self.assembler.clear();
        self.accumulation.clear();
        self.state = SessionState::Idle;
    }

    /// Feed received bytes through the state machine.
    ///
    /// # Returns
    /// The ACK/NAK bytes to send and the events this input completed.
    pub fn process(&mut self, input: &[u8]) -> Result<SessionOutput> {
        let mut output = SessionOutput::default();
        let tokens = match self.assembler.feed(input) {
            Ok(tokens) => tokens,
            Err(e) => {
                self.mark_error();
                return Err(e);
            },
        };

        for token in tokens {
            match token {
                AstmToken::Control(ENQ) => {
                    trace!("ENQ: session start");
                    self.accumulation.clear();
                    output.reply.push(ACK);
                    self.state = SessionState::Receiving;
                },
                AstmToken::Control(EOT) => {
                    trace!("EOT: session end, {}B accumulated", self.accumulation.len());
                    self.finalize(&mut output);
                    self.state = SessionState::Idle;
                },
                AstmToken::Control(b) => {
                    // ACK/NAK from the instrument concern our own
                    // transmissions, which this receiver never makes
                    trace!("Ignoring control byte 0x{:02X}", b);
                },
                AstmToken::Frame(frame) => {
                    if frame.verify() {
                        output.reply.push(ACK);
                        self.accumulation.extend_from_slice(frame.payload());
                        self.quality.record_success();
                        output.events.push(LinkEventKind::Frame {
                            payload: frame.payload().to_vec(),
                        });
                    } else {
                        // Keep the accumulation: the sender retransmits
                        // this exact frame after our NAK
                        warn!("Frame checksum mismatch, NAK sent");
                        output.reply.push(NAK);
                        self.quality.record_checksum_error();
                    }
                },
            }
        }
        Ok(output)
    }

    /// EOT arrived: decode whatever the session accumulated
    fn finalize(&mut self, output: &mut SessionOutput) {
        if self.accumulation.is_empty() {
            return;
        }
        match records::parse_message(&self.accumulation) {
            Ok(message) => {
                debug!(
                    "ASTM message: {} result(s), {} patient(s)",
                    message.results.len(),
                    message.patients.len()
                );
                output.events.push(LinkEventKind::Message {
                    message: DecodedMessage::Astm(message),
                });
            },
            Err(e) => {
                warn!("ASTM decode failed: {}", e);
                self.quality.record_failure();
                output.events.push(LinkEventKind::ParseError {
                    raw: String::from_utf8_lossy(&self.accumulation).into_owned(),
                    detail: e.to_string(),
                });
            },
        }
        self.accumulation.clear();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::{checksum, CR, ETX, LF, STX};

    fn build_frame(seq: u8, text: &[u8]) -> Vec<u8> {
        let mut frame = vec![STX, seq];
        frame.extend_from_slice(text);
        frame.push(ETX);
        let cs = checksum(&frame[1..]);
        frame.extend_from_slice(&cs);
        frame.extend_from_slice(&[CR, LF]);
        frame
    }

    fn session() -> (AstmSession, Arc<QualityCounters>) {
        let quality = Arc::new(QualityCounters::new());
        (AstmSession::new(Arc::clone(&quality)), quality)
    }

    fn message_events(output: &SessionOutput) -> Vec<&LinkEventKind> {
        output
            .events
            .iter()
            .filter(|e| matches!(e, LinkEventKind::Message { .. }))
            .collect()
    }

    #[test]
    fn test_happy_path_emits_one_message() {
        let (mut s, quality) = session();

        let out = s.process(&[ENQ]).unwrap();
        assert_eq!(out.reply, vec![ACK]);
        assert_eq!(s.state(), SessionState::Receiving);

        let out = s.process(&build_frame(b'1', b"H|\\^&\rR|1|^^^GLU|105||70-110|N\rL|1|N")).unwrap();
        assert_eq!(out.reply, vec![ACK]);
        assert!(matches!(out.events[0], LinkEventKind::Frame { .. }));

        let out = s.process(&[EOT]).unwrap();
        assert!(out.reply.is_empty());
        let messages = message_events(&out);
        assert_eq!(messages.len(), 1);
        match messages[0] {
            LinkEventKind::Message {
                message: DecodedMessage::Astm(m),
            } => {
                assert_eq!(m.results.len(), 1);
                assert_eq!(m.results[0].value.as_deref(), Some("105"));
            },
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(quality.snapshot().success_count, 1);
    }

    #[test]
    fn test_nak_then_retransmit_yields_single_message() {
        let (mut s, quality) = session();
        s.process(&[ENQ]).unwrap();

        let good = build_frame(b'1', b"H|\\^&\rR|1|^^^K|4.2\rL|1|N");
        let mut bad = good.clone();
        // Corrupt one payload byte so the transmitted checksum no longer matches
        bad[4] ^= 0x01;

        let out = s.process(&bad).unwrap();
        assert_eq!(out.reply, vec![NAK]);
        assert!(out.events.is_empty());

        // Instrument retransmits the identical frame with a valid checksum
        let out = s.process(&good).unwrap();
        assert_eq!(out.reply, vec![ACK]);

        let out = s.process(&[EOT]).unwrap();
        let messages = message_events(&out);
        assert_eq!(messages.len(), 1);
        match messages[0] {
            LinkEventKind::Message {
                message: DecodedMessage::Astm(m),
            } => {
                // Only the valid frame's payload made it into the session
                assert_eq!(m.results.len(), 1);
                assert_eq!(m.results[0].value.as_deref(), Some("4.2"));
            },
            other => panic!("unexpected event: {other:?}"),
        }

        let snap = quality.snapshot();
        assert_eq!(snap.checksum_error_count, 1);
        assert_eq!(snap.success_count, 1);
    }

    #[test]
    fn test_multi_frame_payloads_concatenate() {
        let (mut s, _) = session();
        s.process(&[ENQ]).unwrap();
        s.process(&build_frame(b'1', b"H|\\^&\r")).unwrap();
        s.process(&build_frame(b'2', b"R|1|^^^NA|141\r")).unwrap();
        s.process(&build_frame(b'3', b"L|1|N")).unwrap();

        let out = s.process(&[EOT]).unwrap();
        match &out.events[0] {
            LinkEventKind::Message {
                message: DecodedMessage::Astm(m),
            } => {
                assert!(m.header.is_some());
                assert_eq!(m.results.len(), 1);
                assert!(m.terminator.is_some());
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_eot_with_empty_accumulation_is_silent() {
        let (mut s, _) = session();
        let out = s.process(&[ENQ, EOT]).unwrap();
        assert_eq!(out.reply, vec![ACK]);
        assert!(out.events.is_empty());
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_enq_clears_stale_accumulation() {
        let (mut s, _) = session();
        s.process(&[ENQ]).unwrap();
        s.process(&build_frame(b'1', b"P|1|OLD")).unwrap();

        // New session before EOT: stale payload must not leak into it
        s.process(&[ENQ]).unwrap();
        s.process(&build_frame(b'1', b"H|\\^&\rP|1|NEW\rL|1|N")).unwrap();
        let out = s.process(&[EOT]).unwrap();
        match &out.events[0] {
            LinkEventKind::Message {
                message: DecodedMessage::Astm(m),
            } => {
                assert_eq!(m.patients.len(), 1);
                assert_eq!(m.patients[0].practice_patient_id.as_deref(), Some("NEW"));
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_error_state_and_reset() {
        let (mut s, _) = session();
        s.process(&[ENQ]).unwrap();
        s.mark_error();
        assert_eq!(s.state(), SessionState::Error);
        s.reset();
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[test]
    fn test_assembler_fault_drops_stale_accumulation() {
        use crate::astm::frame::MAX_BUFFER_SIZE;

        let (mut s, _) = session();
        s.process(&[ENQ]).unwrap();
        s.process(&build_frame(b'1', b"P|1|STALE")).unwrap();

        let junk = vec![b'x'; MAX_BUFFER_SIZE + 1];
        assert!(s.process(&junk).is_err());
        assert_eq!(s.state(), SessionState::Error);

        // The next ENQ opens a clean session; the pre-fault payload is gone
        s.process(&[ENQ]).unwrap();
        assert_eq!(s.state(), SessionState::Receiving);
        s.process(&build_frame(b'1', b"H|\\^&\rR|1|^^^K|4.2\rL|1|N")).unwrap();
        let out = s.process(&[EOT]).unwrap();
        match &out.events[0] {
            LinkEventKind::Message {
                message: DecodedMessage::Astm(m),
            } => {
                assert!(m.patients.is_empty());
                assert_eq!(m.results.len(), 1);
            },
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
