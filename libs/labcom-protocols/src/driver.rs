//! Protocol Driver Seam
//!
//! One enum the hosting task talks to regardless of the decoded protocol.
//! Modbus is deliberately absent: a master correlates requests it issued
//! itself, so it hangs off the connection differently (see
//! [`crate::modbus::master`]).

use std::sync::Arc;

use labcom_link::error::Result;
use labcom_link::quality::QualityCounters;

use crate::astm::session::{AstmSession, SessionOutput};
use crate::hl7::session::Hl7Session;

/// Message protocol spoken on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Astm,
    Hl7,
    Modbus,
}

/// A stream-decoding driver for one connection
#[derive(Debug)]
pub enum ProtocolDriver {
    Astm(AstmSession),
    Hl7(Hl7Session),
}

impl ProtocolDriver {
    /// Build the driver for a protocol, sharing the connection's counters.
    /// Returns None for Modbus, which is request/response driven.
    pub fn new(kind: ProtocolKind, quality: Arc<QualityCounters>) -> Option<Self> {
        match kind {
            ProtocolKind::Astm => Some(ProtocolDriver::Astm(AstmSession::new(quality))),
            ProtocolKind::Hl7 => Some(ProtocolDriver::Hl7(Hl7Session::new(quality))),
            ProtocolKind::Modbus => None,
        }
    }

    /// Feed received bytes, collecting replies to write and events to publish
    pub fn process(&mut self, input: &[u8]) -> Result<SessionOutput> {
        match self {
            ProtocolDriver::Astm(s) => s.process(input),
            ProtocolDriver::Hl7(s) => s.process(input),
        }
    }

    /// Drop partial input after a transport fault
    pub fn reset(&mut self) {
        match self {
            ProtocolDriver::Astm(s) => s.reset(),
            ProtocolDriver::Hl7(s) => s.reset(),
        }
    }
}
