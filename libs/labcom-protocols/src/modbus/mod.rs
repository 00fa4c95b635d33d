//! Modbus RTU Master Protocol
//!
//! CRC framing, request/response codec and the correlating master with
//! its poll scheduler.

pub mod codec;
pub mod crc;
pub mod master;

pub use codec::{ModbusRequest, ModbusResponse};
pub use master::{ModbusMaster, ModbusMasterConfig, PollTarget};
