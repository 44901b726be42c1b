//! Delimited lightning stroke text (USPLN/NAPLN, original and extended).
//!
//! Each one-minute packet starts with an ASCII header line
//! (`product,created,end`), followed by one comma-delimited line per
//! stroke. The original variant ends a stroke line with the stroke count;
//! the extended variant ends with the error-ellipse axes and orientation,
//! and may carry millisecond fractions on the stroke time. Header lines
//! recur throughout the file, one per packet.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::debug;

use crate::config::DecoderOptions;
use crate::constants::uspln;
use crate::error::{DecodeError, Result};
use crate::header::HeaderInfo;
use crate::record::{KeyFields, Record, RecordIndexEntry, Value};
use crate::scanner::{ScanOutcome, ScanReport, cancelled_err};
use crate::schema::{FieldDescriptor, FieldEncoding, Schema, SemanticType};
use crate::sniffer::FormatVariant;

static MAGIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(uspln::MAGIC).unwrap());
static MAGIC_OLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(uspln::MAGIC_OLD).unwrap());
static EXTENDED: LazyLock<Regex> = LazyLock::new(|| Regex::new(uspln::MAGIC_EX).unwrap());

pub fn is_header_line(line: &str) -> bool {
    MAGIC.is_match(line) || MAGIC_OLD.is_match(line)
}

pub fn is_extended_product(product: &str) -> bool {
    EXTENDED.is_match(product)
}

/// An amplitude of magnitude 999 flags a stroke the network detected but
/// could not measure; the stroke itself is valid.
pub fn amplitude_is_unmeasured(amplitude: f32) -> bool {
    amplitude.abs() == uspln::AMPLITUDE_UNMEASURED
}

/// Stroke time, ISO-8601 with optional fractional seconds, UTC.
pub fn parse_time(token: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.and_utc().timestamp())
}

pub fn schema(extended: bool) -> Schema {
    let mut fields = vec![
        FieldDescriptor::flat(
            "time",
            SemanticType::Time,
            FieldEncoding::TokenTime { index: 0 },
        ),
        FieldDescriptor::flat(
            "lat",
            SemanticType::Float64,
            FieldEncoding::TokenFloat64 { index: 1 },
        ),
        FieldDescriptor::flat(
            "lon",
            SemanticType::Float64,
            FieldEncoding::TokenFloat64 { index: 2 },
        ),
        FieldDescriptor::flat(
            "amplitude",
            SemanticType::Float32,
            FieldEncoding::TokenFloat32 { index: 3 },
        ),
    ];
    if extended {
        fields.push(FieldDescriptor::flat(
            "majorAxis",
            SemanticType::Float32,
            FieldEncoding::TokenFloat32 { index: 4 },
        ));
        fields.push(FieldDescriptor::flat(
            "minorAxis",
            SemanticType::Float32,
            FieldEncoding::TokenFloat32 { index: 5 },
        ));
        fields.push(FieldDescriptor::flat(
            "orientation",
            SemanticType::Int32,
            FieldEncoding::TokenInt32 { index: 6 },
        ));
    } else {
        fields.push(FieldDescriptor::flat(
            "strokeCount",
            SemanticType::Int32,
            FieldEncoding::TokenInt32 { index: 4 },
        ));
    }
    Schema { fields }
}

/// Strict stroke-line parse used for scan acceptance: every field must
/// parse, and the field count must match the variant.
pub fn parse_stroke(line: &str, extended: bool) -> std::result::Result<(Record, KeyFields), String> {
    let tokens: Vec<&str> = line.split(',').collect();
    let expected = if extended {
        uspln::FIELDS_EXTENDED
    } else {
        uspln::FIELDS_ORIGINAL
    };
    if tokens.len() != expected {
        return Err(format!(
            "expected {expected} fields, found {}",
            tokens.len()
        ));
    }

    let time = parse_time(tokens[0]).ok_or_else(|| format!("bad stroke time '{}'", tokens[0]))?;
    let lat = tokens[1]
        .parse::<f64>()
        .map_err(|_| format!("bad latitude '{}'", tokens[1]))?;
    let lon = tokens[2]
        .parse::<f64>()
        .map_err(|_| format!("bad longitude '{}'", tokens[2]))?;
    let amplitude = tokens[3]
        .parse::<f32>()
        .map_err(|_| format!("bad amplitude '{}'", tokens[3]))?;

    let mut fields = vec![
        ("time".to_string(), Value::Time(time)),
        ("lat".to_string(), Value::Float64(lat)),
        ("lon".to_string(), Value::Float64(lon)),
        ("amplitude".to_string(), Value::Float32(amplitude)),
    ];
    if extended {
        let major = tokens[4]
            .parse::<f32>()
            .map_err(|_| format!("bad major axis '{}'", tokens[4]))?;
        let minor = tokens[5]
            .parse::<f32>()
            .map_err(|_| format!("bad minor axis '{}'", tokens[5]))?;
        let orient = tokens[6]
            .parse::<i32>()
            .map_err(|_| format!("bad orientation '{}'", tokens[6]))?;
        fields.push(("majorAxis".to_string(), Value::Float32(major)));
        fields.push(("minorAxis".to_string(), Value::Float32(minor)));
        fields.push(("orientation".to_string(), Value::Int32(orient)));
    } else {
        let count = tokens[4]
            .parse::<i32>()
            .map_err(|_| format!("bad stroke count '{}'", tokens[4]))?;
        fields.push(("strokeCount".to_string(), Value::Int32(count)));
    }

    let keys = KeyFields {
        time: Some(time),
        lat: Some(lat),
        lon: Some(lon),
        ..KeyFields::default()
    };
    Ok((
        Record {
            fields,
            groups: Vec::new(),
        },
        keys,
    ))
}

/// Line-oriented scan. Header lines recur per packet and are skipped
/// wherever they appear; a malformed stroke line is dropped and counted,
/// resynchronization being simply the next line.
pub fn scan(file: &mut File, header: &HeaderInfo, options: &DecoderOptions) -> Result<ScanOutcome> {
    let extended = header.variant == FormatVariant::UsplnExtended;
    file.rewind()?;
    let mut reader = BufReader::new(file);

    let mut index = Vec::new();
    let mut first_record = None;
    let mut report = ScanReport::default();
    let mut offset = 0u64;
    let mut buf = Vec::new();

    loop {
        if let Some(err) = cancelled_err(options, index.len()) {
            return Err(err);
        }
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        let line_start = offset;
        offset += n as u64;

        let mut data_len = n;
        while data_len > 0 && (buf[data_len - 1] == b'\n' || buf[data_len - 1] == b'\r') {
            data_len -= 1;
        }
        if data_len == 0 {
            continue;
        }
        let text = String::from_utf8_lossy(&buf[..data_len]);
        if is_header_line(&text) {
            continue;
        }

        match parse_stroke(&text, extended) {
            Ok((record, key_fields)) => {
                index.push(RecordIndexEntry {
                    byte_offset: line_start,
                    byte_length: data_len as u32,
                    key_fields,
                });
                if first_record.is_none() {
                    first_record = Some(record);
                }
            }
            Err(reason) => {
                report.records_skipped += 1;
                debug!(offset = line_start, %reason, "dropped stroke line");
                if options.fail_fast {
                    return Err(DecodeError::record_decode(line_start, reason));
                }
            }
        }
    }

    report.records_indexed = index.len();
    Ok(ScanOutcome {
        index,
        first_record,
        report,
    })
}
