//! Link Events
//!
//! The engine's entire contract with its collaborators (UI, persistence,
//! monitoring) is this event stream. Events are serde-serializable and
//! delivered over a per-connection `tokio::sync::mpsc` channel; nothing in
//! the core retains them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::astm::records::AstmMessage;
use crate::hl7::message::Hl7Message;

/// A decoded instrument message of either protocol family
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "protocol", rename_all = "lowercase")]
pub enum DecodedMessage {
    Astm(AstmMessage),
    Hl7(Hl7Message),
}

/// What happened on a link
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkEventKind {
    Connected,
    Disconnected,
    /// A checksum-valid frame was accepted into the current session
    Frame { payload: Vec<u8> },
    /// A complete message was decoded
    Message { message: DecodedMessage },
    /// A structurally complete session or envelope failed to decode;
    /// the raw text is preserved for the collaborator
    ParseError { raw: String, detail: String },
    /// Transport or protocol fault
    Error { detail: String },
    /// A polled Modbus slave answered
    PollResponse { slave: u8, payload: Vec<u8> },
    /// A polled Modbus slave failed to answer
    PollError { slave: u8, detail: String },
}

/// An event stamped with its owning instrument and receipt time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkEvent {
    pub instrument_id: String,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LinkEventKind,
}

impl LinkEvent {
    pub fn new(instrument_id: impl Into<String>, kind: LinkEventKind) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            at: Utc::now(),
            kind,
        }
    }
}

/// Sender half used by connection tasks
pub type EventSender = tokio::sync::mpsc::Sender<LinkEvent>;
/// Receiver half handed to the collaborator
pub type EventReceiver = tokio::sync::mpsc::Receiver<LinkEvent>;
