//! Result Value Normalization
//!
//! Helpers shared by the ASTM and HL7 decoders: abnormal-flag token
//! normalization and numeric reference-range parsing. Instruments are
//! wildly inconsistent here, so everything is case-insensitive and
//! unrecognized input degrades to "not stated" rather than an error.

use serde::Serialize;

/// Normalized abnormal flag attached to a result value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AbnormalFlag {
    /// Within reference range
    N,
    /// Above reference range
    H,
    /// Below reference range
    L,
    /// Critically above reference range
    HH,
    /// Critically below reference range
    LL,
}

impl std::fmt::Display for AbnormalFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AbnormalFlag::N => "N",
            AbnormalFlag::H => "H",
            AbnormalFlag::L => "L",
            AbnormalFlag::HH => "HH",
            AbnormalFlag::LL => "LL",
        };
        f.write_str(s)
    }
}

/// Normalize an instrument abnormal-flag token.
///
/// Recognizes the usual spellings (`N`/`NORMAL`, `H`/`HIGH`/`>`,
/// `L`/`LOW`/`<`, `HH`/`CRITICAL HIGH`/`>>`, `LL`/`CRITICAL LOW`/`<<`).
/// Anything else maps to `None`.
pub fn normalize_abnormal_flag(token: &str) -> Option<AbnormalFlag> {
    match token.trim().to_ascii_uppercase().as_str() {
        "N" | "NORMAL" => Some(AbnormalFlag::N),
        "H" | "HIGH" | ">" => Some(AbnormalFlag::H),
        "L" | "LOW" | "<" => Some(AbnormalFlag::L),
        "HH" | "CRITICAL HIGH" | ">>" => Some(AbnormalFlag::HH),
        "LL" | "CRITICAL LOW" | "<<" => Some(AbnormalFlag::LL),
        _ => None,
    }
}

/// A reference range, numeric when the instrument sent `low-high`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReferenceRange {
    /// Range text exactly as transmitted
    pub raw: String,
    pub low: Option<f64>,
    pub high: Option<f64>,
}

/// Parse a reference-range field.
///
/// Only the `low-high` form is interpreted numerically; any other shape
/// (single bounds, ranges with units, free text) is carried raw.
pub fn parse_reference_range(raw: &str) -> ReferenceRange {
    let trimmed = raw.trim();
    let parts: Vec<&str> = trimmed.split('-').collect();
    if parts.len() == 2 {
        if let (Ok(low), Ok(high)) = (
            parts[0].trim().parse::<f64>(),
            parts[1].trim().parse::<f64>(),
        ) {
            return ReferenceRange {
                raw: trimmed.to_string(),
                low: Some(low),
                high: Some(high),
            };
        }
    }
    ReferenceRange {
        raw: trimmed.to_string(),
        low: None,
        high: None,
    }
}

// ============================================================================
// Tests
// ============================================================================
