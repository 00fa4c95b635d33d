//! Modbus CRC-16
//!
//! Polynomial 0xA001 (reflected 0x8005), initial value 0xFFFF, processed
//! bit-by-bit LSB-first. Appended little-endian to outgoing RTU frames and
//! checked on every inbound frame.

/// Calculate the CRC-16 of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Validate a complete RTU frame (payload + 2 trailing CRC bytes, LE).
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < 3 {
        return false;
    }
    let (body, tail) = frame.split_at(frame.len() - 2);
    let expected = crc16(body);
    tail[0] == (expected & 0xFF) as u8 && tail[1] == (expected >> 8) as u8
}

// ============================================================================
// Tests
// ============================================================================
