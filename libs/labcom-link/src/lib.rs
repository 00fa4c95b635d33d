//! LabLink Link Layer Library
//!
//! Transport and link-level building blocks for the instrument
//! communication engine.
//!
//! # Architecture
//!
//! This library provides:
//! - **Transport**: one async byte-stream type over serial, TCP (client or
//!   server role) and an in-process virtual port for tests
//! - **Configuration**: serde-backed transport configuration accepted from
//!   YAML or environment sources
//! - **Errors**: the `LinkError` type shared by every layer above
//! - **Quality**: lock-free per-connection data-quality counters

pub mod config;
pub mod error;
pub mod quality;
pub mod transport;

// Re-export core types
pub use config::{Parity, SerialConfig, StopBits, TcpConfig, TcpMode, TransportConfig};
pub use error::{LinkError, Result};
pub use quality::{QualityCounters, QualitySnapshot};
pub use transport::Transport;
