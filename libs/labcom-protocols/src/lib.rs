//! LabLink Protocol Library
//!
//! Decoders and drivers for the protocols laboratory analyzers actually
//! speak on the wire.
//!
//! # Architecture
//!
//! - **checksum / modbus::crc**: pure integrity math (ASTM mod-256,
//!   Modbus CRC-16)
//! - **astm**: E1381 frame assembly, E1394 records, session state machine
//! - **hl7**: MLLP envelopes and v2.x segment decoding
//! - **modbus**: RTU codec plus the correlating master and poll scheduler
//! - **events**: the typed event stream collaborators consume
//!
//! Everything stream-shaped is push-based and I/O-free; the hosting task
//! owns the transport and feeds bytes in.

pub mod astm;
pub mod checksum;
pub mod driver;
pub mod events;
pub mod hl7;
pub mod modbus;
pub mod values;

// Re-export core types
pub use driver::{ProtocolDriver, ProtocolKind};
pub use events::{DecodedMessage, EventReceiver, EventSender, LinkEvent, LinkEventKind};
pub use values::{normalize_abnormal_flag, parse_reference_range, AbnormalFlag, ReferenceRange};
