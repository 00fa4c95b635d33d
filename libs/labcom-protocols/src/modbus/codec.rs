//! Modbus RTU Codec
//!
//! Request frame construction and response frame decoding for the RTU
//! wire format `address(1) function(1) data(N) CRC16-LE(2)`. RTU has no
//! length prefix, so response boundaries are inferred from the function
//! code and byte-count field.

use labcom_link::error::{LinkError, Result};

use crate::modbus::crc;

/// Write-single-coil ON/OFF wire values
const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// A master-side Modbus request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModbusRequest {
    ReadCoils { address: u16, count: u16 },
    ReadDiscreteInputs { address: u16, count: u16 },
    ReadHoldingRegisters { address: u16, count: u16 },
    ReadInputRegisters { address: u16, count: u16 },
    WriteSingleCoil { address: u16, on: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleRegisters { address: u16, values: Vec<u16> },
}

impl ModbusRequest {
    pub fn function_code(&self) -> u8 {
        match self {
            ModbusRequest::ReadCoils { .. } => 0x01,
            ModbusRequest::ReadDiscreteInputs { .. } => 0x02,
            ModbusRequest::ReadHoldingRegisters { .. } => 0x03,
            ModbusRequest::ReadInputRegisters { .. } => 0x04,
            ModbusRequest::WriteSingleCoil { .. } => 0x05,
            ModbusRequest::WriteSingleRegister { .. } => 0x06,
            ModbusRequest::WriteMultipleRegisters { .. } => 0x10,
        }
    }
}

/// A decoded, CRC-valid response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusResponse {
    pub slave: u8,
    pub function: u8,
    /// Bytes after address + function code, before the CRC
    pub payload: Vec<u8>,
}

/// Build a complete RTU frame for `request`, CRC appended little-endian.
pub fn encode_request(slave: u8, request: &ModbusRequest) -> Result<Vec<u8>> {
    if slave == 0 || slave > 247 {
        return Err(LinkError::invalid_data(format!(
            "slave address {slave} outside 1-247"
        )));
    }

    let mut frame = vec![slave, request.function_code()];
    match request {
        ModbusRequest::ReadCoils { address, count }
        | ModbusRequest::ReadDiscreteInputs { address, count }
        | ModbusRequest::ReadHoldingRegisters { address, count }
        | ModbusRequest::ReadInputRegisters { address, count } => {
            frame.extend_from_slice(&address.to_be_bytes());
            frame.extend_from_slice(&count.to_be_bytes());
        },
        ModbusRequest::WriteSingleCoil { address, on } => {
            frame.extend_from_slice(&address.to_be_bytes());
            let value = if *on { COIL_ON } else { COIL_OFF };
            frame.extend_from_slice(&value.to_be_bytes());
        },
        ModbusRequest::WriteSingleRegister { address, value } => {
            frame.extend_from_slice(&address.to_be_bytes());
            frame.extend_from_slice(&value.to_be_bytes());
        },
        ModbusRequest::WriteMultipleRegisters { address, values } => {
            if values.is_empty() || values.len() > 123 {
                return Err(LinkError::invalid_data(format!(
                    "write of {} register(s) outside 1-123",
                    values.len()
                )));
            }
            frame.extend_from_slice(&address.to_be_bytes());
            frame.extend_from_slice(&(values.len() as u16).to_be_bytes());
            frame.push((values.len() * 2) as u8);
            for v in values {
                frame.extend_from_slice(&v.to_be_bytes());
            }
        },
    }

    let crc = crc::crc16(&frame);
    frame.push((crc & 0xFF) as u8);
    frame.push((crc >> 8) as u8);
    Ok(frame)
}

/// True when `function` is a code this codec can frame a response for
/// (including its exception form). Anything else at a frame boundary is
/// line noise or misalignment.
pub fn known_function(function: u8) -> bool {
    function & 0x80 != 0 || matches!(function, 0x01..=0x06 | 0x0F | 0x10)
}

/// Infer the total length of the response at the front of `buf`.
///
/// Returns None while too few bytes have arrived to know.
pub fn expected_response_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 2 {
        return None;
    }
    let function = buf[1];
    if function & 0x80 != 0 {
        // Exception: addr + fc + exception code + CRC
        return Some(5);
    }
    match function {
        // Reads carry a byte count at offset 2
        0x01..=0x04 => buf.get(2).map(|&count| 3 + count as usize + 2),
        // Write echoes are fixed length
        0x05 | 0x06 | 0x0F | 0x10 => Some(8),
        _ => None,
    }
}

/// Decode one complete RTU response frame.
///
/// Validates the CRC and turns exception responses into errors carrying
/// the standard exception name.
pub fn decode_response(frame: &[u8]) -> Result<ModbusResponse> {
    if frame.len() < 5 {
        return Err(LinkError::protocol(format!(
            "RTU response too short: {}B",
            frame.len()
        )));
    }
    if !crc::verify(frame) {
        return Err(LinkError::checksum("RTU response CRC mismatch"));
    }

    let slave = frame[0];
    let function = frame[1];
    if function & 0x80 != 0 {
        let code = frame[2];
        return Err(LinkError::protocol(format!(
            "Modbus exception 0x{code:02X} from slave {slave}: {}",
            exception_description(code)
        )));
    }

    Ok(ModbusResponse {
        slave,
        function,
        payload: frame[2..frame.len() - 2].to_vec(),
    })
}

/// Standard Modbus exception names
pub fn exception_description(code: u8) -> &'static str {
    match code {
        0x01 => "Illegal function",
        0x02 => "Illegal data address",
        0x03 => "Illegal data value",
        0x04 => "Slave device failure",
        0x05 => "Acknowledge",
        0x06 => "Slave device busy",
        0x08 => "Memory parity error",
        0x0A => "Gateway path unavailable",
        0x0B => "Gateway target device failed to respond",
        _ => "Unknown exception",
    }
}

// ============================================================================
// Tests
// ============================================================================
