//! HL7 v2.x Segment Parsing
//!
//! Stateless decoding of one MLLP envelope's text into a typed message.
//! The field separator is whatever the instrument put as the 4th character
//! of MSH. Segments decode independently: a malformed PID/OBR/OBX is
//! logged and skipped, only a malformed MSH kills the message.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use labcom_link::error::{LinkError, Result};

use crate::values::{
    normalize_abnormal_flag, parse_reference_range, AbnormalFlag, ReferenceRange,
};

/// Message header segment (MSH)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MshSegment {
    pub field_separator: char,
    pub encoding_chars: Option<String>,
    pub sending_app: Option<String>,
    pub sending_facility: Option<String>,
    pub receiving_app: Option<String>,
    pub receiving_facility: Option<String>,
    pub timestamp: Option<String>,
    pub message_type: Option<String>,
    pub message_control_id: Option<String>,
    pub processing_id: Option<String>,
    pub version: Option<String>,
}

/// Patient identification segment (PID)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PidSegment {
    pub set_id: u32,
    pub patient_id: Option<String>,
    pub name: Option<String>,
    pub birth_date: Option<String>,
    pub sex: Option<String>,
}

/// Observation request segment (OBR)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObrSegment {
    pub set_id: u32,
    pub placer_order_number: Option<String>,
    pub filler_order_number: Option<String>,
    pub universal_service_id: Option<String>,
    pub observation_time: Option<String>,
}

/// Observation result segment (OBX)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObxSegment {
    pub set_id: u32,
    pub value_type: Option<String>,
    pub observation_id: Option<String>,
    pub value: Option<String>,
    pub units: Option<String>,
    pub reference_range: Option<ReferenceRange>,
    pub abnormal_flag: Option<AbnormalFlag>,
    pub status: Option<String>,
    pub observation_time: Option<String>,
}

/// One decoded HL7 message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hl7Message {
    pub msh: MshSegment,
    pub pid: Option<PidSegment>,
    pub obr: Vec<ObrSegment>,
    pub obx: Vec<ObxSegment>,
    pub raw: String,
    pub parsed_at: DateTime<Utc>,
}

/// Decode the text of one MLLP envelope.
///
/// # Arguments
/// * `text` - Raw HL7 text, segments separated by CR (LF tolerated)
///
/// # Returns
/// The typed message, or an error when MSH is missing or malformed.
pub fn parse_message(text: &[u8]) -> Result<Hl7Message> {
    let raw = String::from_utf8_lossy(text).into_owned();
    let segments: Vec<&str> = raw
        .split(['\r', '\n'])
        .map(str::trim_end)
        .filter(|s| !s.is_empty())
        .collect();

    let msh_line = segments
        .iter()
        .find(|s| s.starts_with("MSH"))
        .ok_or_else(|| LinkError::invalid_data("HL7 message has no MSH segment"))?;
    let msh = parse_msh(msh_line)?;
    let separator = msh.field_separator;

    let mut pid = None;
    let mut obr = Vec::new();
    let mut obx = Vec::new();

    for segment in &segments {
        let name = segment.get(..3).unwrap_or("");
        let parsed = match name {
            "MSH" => continue,
            "PID" => parse_pid(segment, separator).map(|seg| pid = Some(seg)),
            "OBR" => parse_obr(segment, separator).map(|seg| obr.push(seg)),
            "OBX" => parse_obx(segment, separator).map(|seg| obx.push(seg)),
            _ => {
                debug!("Skipping unhandled HL7 segment: {}", name);
                continue;
            },
        };
        // Per-segment failures never abort the message
        if let Err(e) = parsed {
            warn!("Skipping malformed {} segment: {}", name, e);
        }
    }

    // `segments` borrows `raw`, so the message is assembled only after the
    // loop is done with it
    Ok(Hl7Message {
        msh,
        pid,
        obr,
        obx,
        raw,
        parsed_at: Utc::now(),
    })
}

/// MSH is special: MSH-1 is the separator character itself, so field N
/// lives at token N-1 for every N >= 2.
fn parse_msh(line: &str) -> Result<MshSegment> {
    // "MSH" + separator + encoding chars is the minimum viable header
    let separator = line.chars().nth(3).ok_or_else(|| {
        LinkError::invalid_data("MSH segment too short to carry a field separator")
    })?;
    let f: Vec<&str> = line.split(separator).collect();

    Ok(MshSegment {
        field_separator: separator,
        encoding_chars: field(&f, 1),
        sending_app: field(&f, 2),
        sending_facility: field(&f, 3),
        receiving_app: field(&f, 4),
        receiving_facility: field(&f, 5),
        timestamp: field(&f, 6),
        message_type: field(&f, 8),
        message_control_id: field(&f, 9),
        processing_id: field(&f, 10),
        version: field(&f, 11),
    })
}

fn parse_pid(line: &str, separator: char) -> Result<PidSegment> {
    let f = split_segment(line, separator, 2)?;
    Ok(PidSegment {
        set_id: set_id(&f),
        patient_id: field(&f, 3).or_else(|| field(&f, 2)),
        name: field(&f, 5),
        birth_date: field(&f, 7),
        sex: field(&f, 8),
    })
}

fn parse_obr(line: &str, separator: char) -> Result<ObrSegment> {
    let f = split_segment(line, separator, 2)?;
    Ok(ObrSegment {
        set_id: set_id(&f),
        placer_order_number: field(&f, 2),
        filler_order_number: field(&f, 3),
        universal_service_id: field(&f, 4),
        observation_time: field(&f, 7),
    })
}

fn parse_obx(line: &str, separator: char) -> Result<ObxSegment> {
    let f = split_segment(line, separator, 4)?;
    Ok(ObxSegment {
        set_id: set_id(&f),
        value_type: field(&f, 2),
        observation_id: field(&f, 3),
        value: field(&f, 5),
        units: field(&f, 6),
        reference_range: field(&f, 7).map(|r| parse_reference_range(&r)),
        abnormal_flag: field(&f, 8).and_then(|t| normalize_abnormal_flag(&t)),
        status: field(&f, 11),
        observation_time: field(&f, 14),
    })
}

fn split_segment(line: &str, separator: char, min_fields: usize) -> Result<Vec<String>> {
    let f: Vec<String> = line.split(separator).map(str::to_string).collect();
    if f.len() < min_fields {
        return Err(LinkError::invalid_data(format!(
            "segment has {} field(s), expected at least {min_fields}",
            f.len()
        )));
    }
    Ok(f)
}

fn field(fields: &[impl AsRef<str>], index: usize) -> Option<String> {
    fields
        .get(index)
        .map(|s| s.as_ref().trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn set_id(fields: &[String]) -> u32 {
    fields
        .get(1)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(1)
}

// ============================================================================
// Tests
// ============================================================================
