//! Laboratory Instrument Communication Service
//!
//! Hosts supervised links to laboratory analyzers: ASTM E1381/E1394 and
//! HL7 v2.x stream decoding plus Modbus RTU polling, over serial and TCP
//! transports. Decoded messages and lifecycle changes surface as a single
//! merged event stream.

pub mod config;
pub mod logging;
pub mod runtime;

pub use config::{InstrumentConfig, LabsrvConfig};
pub use runtime::{ConnectionSupervisor, LinkRegistry};
