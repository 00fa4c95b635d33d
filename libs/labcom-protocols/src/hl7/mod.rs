//! HL7 v2.x over MLLP

pub mod message;
pub mod mllp;
pub mod session;

pub use message::{parse_message, Hl7Message};
pub use mllp::MllpAssembler;
pub use session::Hl7Session;
