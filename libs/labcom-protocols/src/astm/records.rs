//! ASTM E1394 Record Parsing
//!
//! Stateless decoding of an accumulated ASTM session text into typed
//! records. Record lines are dispatched on their first byte (H/P/O/R/L,
//! anything else is kept as unknown) and fields are positional, split on
//! the delimiter the header record declares.

use serde::Serialize;
use tracing::debug;

use labcom_link::error::{LinkError, Result};

use crate::values::{
    normalize_abnormal_flag, parse_reference_range, AbnormalFlag, ReferenceRange,
};

/// Default ASTM field delimiter when no header has declared one
const DEFAULT_DELIMITER: char = '|';

/// Message header record (H)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeaderRecord {
    /// Active field delimiter declared right after the record type
    pub delimiter: char,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub processing_id: Option<String>,
    pub version: Option<String>,
    pub timestamp: Option<String>,
}

/// Patient information record (P)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientRecord {
    pub seq: u32,
    pub practice_patient_id: Option<String>,
    pub lab_patient_id: Option<String>,
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
}

/// Test order record (O)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRecord {
    pub seq: u32,
    pub specimen_id: Option<String>,
    pub test_id: Option<String>,
    pub priority: Option<String>,
    pub requested_at: Option<String>,
}

/// Result record (R)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub seq: u32,
    pub test_id: Option<String>,
    pub value: Option<String>,
    pub units: Option<String>,
    pub reference_range: Option<ReferenceRange>,
    pub abnormal_flag: Option<AbnormalFlag>,
    pub status: Option<String>,
    pub completed_at: Option<String>,
}

/// Message terminator record (L)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TerminatorRecord {
    pub seq: u32,
    pub termination_code: Option<String>,
}

/// A fully decoded ASTM message
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct AstmMessage {
    pub header: Option<HeaderRecord>,
    pub patients: Vec<PatientRecord>,
    pub orders: Vec<OrderRecord>,
    pub results: Vec<ResultRecord>,
    pub terminator: Option<TerminatorRecord>,
    /// Record lines with an unrecognized type tag, kept verbatim
    pub unknown: Vec<String>,
    /// Cleaned session text the records were decoded from
    pub raw: String,
}

/// Decode one accumulated ENQ..EOT session into typed records.
///
/// Control bytes (code < 32) are treated as line breaks before
/// tokenization, so frame boundaries and stray CR/LF inside the
/// accumulation never affect record splitting. Fails only when the text
/// contains no record lines at all.
pub fn parse_message(text: &[u8]) -> Result<AstmMessage> {
    // Replace control bytes with line breaks, keep everything else as-is
    let cleaned: String = text
        .iter()
        .map(|&b| if b < 32 { '\n' } else { b as char })
        .collect();

    let mut message = AstmMessage {
        raw: cleaned.clone(),
        ..AstmMessage::default()
    };
    let mut delimiter = DEFAULT_DELIMITER;
    let mut record_count = 0usize;

    for line in cleaned.split('\n').map(str::trim).filter(|l| !l.is_empty()) {
        record_count += 1;
        match line.as_bytes()[0] {
            b'H' => {
                let header = parse_header(line);
                delimiter = header.delimiter;
                message.header = Some(header);
            },
            b'P' => message.patients.push(parse_patient(line, delimiter)),
            b'O' => message.orders.push(parse_order(line, delimiter)),
            b'R' => message.results.push(parse_result(line, delimiter)),
            b'L' => message.terminator = Some(parse_terminator(line, delimiter)),
            tag => {
                debug!("Unknown ASTM record type: {}", tag as char);
                message.unknown.push(line.to_string());
            },
        }
    }

    if record_count == 0 {
        return Err(LinkError::invalid_data("ASTM session contained no records"));
    }
    Ok(message)
}

/// Split a record line into positional fields
fn fields(line: &str, delimiter: char) -> Vec<&str> {
    line.split(delimiter).collect()
}

/// Field accessor: absent and empty fields are both `None`
fn field(fields: &[&str], index: usize) -> Option<String> {
    fields
        .get(index)
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Sequence numbers default to 1 when missing or unparseable
fn seq_field(fields: &[&str], index: usize) -> u32 {
    fields
        .get(index)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(1)
}

fn parse_header(line: &str) -> HeaderRecord {
    // The byte right after 'H' is the active field delimiter
    let delimiter = line.chars().nth(1).unwrap_or(DEFAULT_DELIMITER);
    let f = fields(line, delimiter);
    HeaderRecord {
        delimiter,
        sender_id: field(&f, 4),
        receiver_id: field(&f, 9),
        processing_id: field(&f, 11),
        version: field(&f, 12),
        timestamp: field(&f, 13),
    }
}

fn parse_patient(line: &str, delimiter: char) -> PatientRecord {
    let f = fields(line, delimiter);
    PatientRecord {
        seq: seq_field(&f, 1),
        practice_patient_id: field(&f, 2),
        lab_patient_id: field(&f, 3),
        name: field(&f, 5),
        birth_date: field(&f, 7),
        sex: field(&f, 8),
    }
}

fn parse_order(line: &str, delimiter: char) -> OrderRecord {
    let f = fields(line, delimiter);
    OrderRecord {
        seq: seq_field(&f, 1),
        specimen_id: field(&f, 2),
        test_id: field(&f, 4),
        priority: field(&f, 5),
        requested_at: field(&f, 6),
    }
}

fn parse_result(line: &str, delimiter: char) -> ResultRecord {
    let f = fields(line, delimiter);
    ResultRecord {
        seq: seq_field(&f, 1),
        test_id: field(&f, 2),
        value: field(&f, 3),
        units: field(&f, 4),
        reference_range: field(&f, 5).map(|r| parse_reference_range(&r)),
        abnormal_flag: field(&f, 6).and_then(|t| normalize_abnormal_flag(&t)),
        status: field(&f, 8),
        completed_at: field(&f, 12),
    }
}

fn parse_terminator(line: &str, delimiter: char) -> TerminatorRecord {
    let f = fields(line, delimiter);
    TerminatorRecord {
        seq: seq_field(&f, 1),
        termination_code: field(&f, 2),
    }
}

// ============================================================================
// Tests
// ============================================================================
