//! ASTM Frame Checksum
//!
//! Mod-256 additive checksum used by ASTM E1381 low-level frames. The
//! checksum covers every byte after STX up to and including the ETX or ETB
//! terminator, and travels as two uppercase ASCII hex digits right after
//! the terminator.

/// Frame control bytes (ASTM E1381)
pub const STX: u8 = 0x02;
pub const ETX: u8 = 0x03;
pub const EOT: u8 = 0x04;
pub const ENQ: u8 = 0x05;
pub const ACK: u8 = 0x06;
pub const CR: u8 = 0x0D;
pub const LF: u8 = 0x0A;
pub const NAK: u8 = 0x15;
pub const ETB: u8 = 0x17;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Sum the given bytes mod 256.
pub fn checksum_value(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Render the mod-256 checksum of `data` as two uppercase hex ASCII bytes.
///
/// # Arguments
/// * `data` - The byte range the checksum covers
///
/// # Returns
/// Two ASCII bytes, e.g. `[b'A', b'3']` for a sum of 0xA3
pub fn checksum(data: &[u8]) -> [u8; 2] {
    let sum = checksum_value(data);
    [HEX[(sum >> 4) as usize], HEX[(sum & 0x0F) as usize]]
}

/// Validate a complete ASTM frame against its transmitted checksum.
///
/// Locates STX and the first ETX/ETB after it, computes the checksum over
/// `[STX+1 ..= terminator]` and compares it with the two ASCII bytes that
/// follow the terminator. Returns false when either marker is missing or
/// fewer than two checksum characters remain.
pub fn verify(frame: &[u8]) -> bool {
    let Some(stx) = frame.iter().position(|&b| b == STX) else {
        return false;
    };
    let Some(term_offset) = frame[stx + 1..]
        .iter()
        .position(|&b| b == ETX || b == ETB)
    else {
        return false;
    };
    let term = stx + 1 + term_offset;
    if frame.len() < term + 3 {
        return false;
    }

    let expected = checksum(&frame[stx + 1..=term]);
    // Transmitted hex digits are compared case-insensitively; some
    // instruments send lowercase.
    frame[term + 1].eq_ignore_ascii_case(&expected[0])
        && frame[term + 2].eq_ignore_ascii_case(&expected[1])
}

// ============================================================================
// Tests
// ============================================================================
