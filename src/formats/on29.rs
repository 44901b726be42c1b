//! Category-coded fixed-text station reports (NMC Office Note 29).
//!
//! A file is a sequence of blocks: a 60-byte ASCII date/time header, an
//! `X` fill run, then reports back to back. Every report starts with a
//! 40-byte identifying prefix whose last three digits declare the report
//! length in 10-byte words; category groups follow, each introduced by a
//! 10-byte sub-header `code(2) next(3) nlevels(2) nbytes(3)` where `next`
//! points at the following sub-header in 10-byte words from the report
//! start. `END RECORD` pads out physical blocks and `ENDOF FILE` closes a
//! block; another date/time header may follow it.

use std::collections::BTreeSet;
use std::fs::File;

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::{debug, warn};

use crate::buffer;
use crate::category::CategoryCodecRegistry;
use crate::config::DecoderOptions;
use crate::constants::{missing, on29};
use crate::error::{DecodeError, Result};
use crate::header::{HeaderInfo, parse_on29_block_time};
use crate::record::{CategoryGroup, KeyFields, Record, RecordIndexEntry, Value};
use crate::scanner::{ScanOutcome, ScanReport, ScanState, cancelled_err, read_at_most, read_exact_at};
use crate::schema::{FieldDescriptor, FieldEncoding, Schema, SemanticType};

/// Flat prefix layout shared by every report.
pub fn flat_schema() -> Schema {
    let fields = vec![
        FieldDescriptor::flat(
            "lat",
            SemanticType::Float32,
            FieldEncoding::AsciiFloat32 {
                offset: 0,
                width: 5,
                scale: 0.01,
                bias: 0.0,
            },
        ),
        FieldDescriptor::flat(
            "lon",
            SemanticType::Float32,
            FieldEncoding::AsciiFloat32 {
                offset: 5,
                width: 5,
                scale: -0.01,
                bias: 360.0,
            },
        ),
        FieldDescriptor::flat(
            "stationId",
            SemanticType::Text,
            FieldEncoding::AsciiText {
                offset: 10,
                width: 6,
            },
        ),
        FieldDescriptor::flat(
            "time",
            SemanticType::Time,
            FieldEncoding::ObsTimeHhmm {
                offset: 16,
                width: 4,
            },
        ),
        FieldDescriptor::flat(
            "reserved",
            SemanticType::Text,
            FieldEncoding::AsciiText {
                offset: 20,
                width: 7,
            },
        ),
        FieldDescriptor::flat(
            "reportType",
            SemanticType::Int16,
            FieldEncoding::AsciiInt16 {
                offset: 27,
                width: 3,
            },
        ),
        FieldDescriptor::flat(
            "elevation",
            SemanticType::Float32,
            FieldEncoding::AsciiFloat32 {
                offset: 30,
                width: 5,
                scale: 1.0,
                bias: 0.0,
            },
        ),
        FieldDescriptor::flat(
            "instType",
            SemanticType::Int16,
            FieldEncoding::AsciiInt16 {
                offset: 35,
                width: 2,
            },
        ),
    ];
    Schema { fields }
}

/// Validated report prefix.
#[derive(Debug, Clone)]
pub struct ReportPrefix {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub station_id: String,
    pub obs_hhmm: i64,
    /// Declared total report length in bytes, prefix included.
    pub report_len: usize,
}

/// Strict prefix parse used for scan acceptance. The positional numerics
/// must all be digits and the declared length must at least cover the
/// prefix itself; anything else means the scanner is not looking at a
/// report start.
pub fn parse_prefix(buf: &[u8]) -> std::result::Result<ReportPrefix, String> {
    if buf.len() < on29::PREFIX_LEN {
        return Err(format!("prefix truncated: {} of 40 bytes", buf.len()));
    }
    let lat_raw =
        buffer::try_ascii_f64(buf, 0, 5).ok_or("latitude field is not numeric")?;
    let lon_raw =
        buffer::try_ascii_f64(buf, 5, 5).ok_or("longitude field is not numeric")?;
    let obs_hhmm =
        buffer::try_ascii_i64(buf, 16, 4).ok_or("observation time is not numeric")?;
    let words =
        buffer::try_ascii_i64(buf, 37, 3).ok_or("report length is not numeric")?;

    let report_len = words as usize * on29::BLOCK_ALIGN;
    if report_len < on29::PREFIX_LEN {
        return Err(format!("declared length {report_len} shorter than the prefix"));
    }
    if report_len >= on29::MAX_REPORT_LEN {
        return Err(format!("declared length {report_len} exceeds the sane maximum"));
    }
    if !(0..=2459).contains(&obs_hhmm) {
        return Err(format!("observation time {obs_hhmm:04} out of range"));
    }

    Ok(ReportPrefix {
        lat: Some(0.01 * lat_raw),
        lon: Some(360.0 - 0.01 * lon_raw),
        station_id: buffer::ascii_text(buf, 10, 6).trim().to_string(),
        obs_hhmm,
        report_len,
    })
}

/// Resolve an HHMM observation time against the block reference date. The
/// minute digits encode six-minute units. An observation hour more than two
/// hours ahead of the reference hour belongs to the previous day.
pub fn obs_time_epoch(reference: DateTime<Utc>, hhmm: i64) -> Option<i64> {
    let hour = hhmm / 100;
    let minute = 6 * (hhmm % 100);
    if !(0..=24).contains(&hour) {
        return None;
    }
    let midnight = reference.date_naive().and_hms_opt(0, 0, 0)?;
    let mut t = midnight + Duration::minutes(hour * 60 + minute);
    if hour > reference.hour() as i64 + 2 {
        t -= Duration::days(1);
    }
    Some(t.and_utc().timestamp())
}

/// One category group located inside a report buffer.
#[derive(Debug, Clone, Copy)]
pub struct GroupRef {
    pub code: u8,
    pub count: usize,
    /// Offset of the first item, just past the 10-byte sub-header.
    pub items_offset: usize,
}

/// Walk the category sub-headers of a full report buffer. Stops at the
/// group whose `next` pointer reaches the end of the report, on a garbled
/// sub-header, or on a pointer that does not advance.
pub fn walk_categories(body: &[u8]) -> Vec<GroupRef> {
    let report_words = body.len() / on29::BLOCK_ALIGN;
    let mut groups = Vec::new();
    let mut pos = on29::PREFIX_LEN;
    loop {
        if pos + on29::CAT_HEADER_LEN > body.len() {
            break;
        }
        let Some(code) = buffer::try_ascii_i64(body, pos, 2) else {
            break;
        };
        let Some(next) = buffer::try_ascii_i64(body, pos + 2, 3) else {
            break;
        };
        let Some(count) = buffer::try_ascii_i64(body, pos + 5, 2) else {
            break;
        };
        if !(0..=255).contains(&code) || count < 0 {
            break;
        }
        groups.push(GroupRef {
            code: code as u8,
            count: count as usize,
            items_offset: pos + on29::CAT_HEADER_LEN,
        });
        if next as usize >= report_words {
            break;
        }
        let advanced = next as usize * on29::BLOCK_ALIGN;
        if advanced <= pos {
            break;
        }
        pos = advanced;
    }
    groups
}

/// Locate one category's items in a report buffer.
pub fn find_category(body: &[u8], code: u8) -> Option<(usize, usize)> {
    walk_categories(body)
        .into_iter()
        .find(|g| g.code == code)
        .map(|g| (g.items_offset, g.count))
}

/// Fully decode one report: prefix fields plus every registered category
/// group. Unknown codes are skipped here; the scan counts them.
fn decode_report(
    body: &[u8],
    offset: u64,
    reference: Option<DateTime<Utc>>,
    registry: &CategoryCodecRegistry,
) -> Result<Record> {
    let prefix = parse_prefix(body).map_err(|reason| DecodeError::record_decode(offset, reason))?;
    let time = reference
        .and_then(|r| obs_time_epoch(r, prefix.obs_hhmm))
        .unwrap_or(missing::TIME);

    let fields = vec![
        (
            "lat".to_string(),
            Value::Float32(prefix.lat.map_or(missing::FLOAT, |v| v as f32)),
        ),
        (
            "lon".to_string(),
            Value::Float32(prefix.lon.map_or(missing::FLOAT, |v| v as f32)),
        ),
        (
            "stationId".to_string(),
            Value::Text(prefix.station_id.clone()),
        ),
        ("time".to_string(), Value::Time(time)),
        (
            "reserved".to_string(),
            Value::Text(buffer::ascii_text(body, 20, 7)),
        ),
        (
            "reportType".to_string(),
            Value::Int16(buffer::ascii_i16(body, 27, 3)),
        ),
        (
            "elevation".to_string(),
            Value::Float32(buffer::ascii_f32(body, 30, 5, 1.0)),
        ),
        (
            "instType".to_string(),
            Value::Int16(buffer::ascii_i16(body, 35, 2)),
        ),
    ];

    let mut groups = Vec::new();
    for g in walk_categories(body) {
        if registry.lookup(g.code).is_none() {
            continue;
        }
        let items = registry.decode_items(g.code, body, g.items_offset, g.count, offset)?;
        groups.push(CategoryGroup {
            code: g.code,
            items,
        });
    }
    Ok(Record { fields, groups })
}

/// Block-structured scan with resynchronization. Sentinels and date/time
/// headers steer the walk; a position that is neither a sentinel nor a
/// plausible report prefix enters the resync state, advancing one 10-byte
/// word at a time until the structure lines up again.
pub fn scan(file: &mut File, header: &HeaderInfo, options: &DecoderOptions) -> Result<ScanOutcome> {
    let file_len = file.metadata()?.len();
    let registry = CategoryCodecRegistry::new();

    let mut index: Vec<RecordIndexEntry> = Vec::new();
    let mut first_record = None;
    let mut first_codes: Option<BTreeSet<u8>> = None;
    let mut report = ScanReport::default();
    let mut stations = BTreeSet::new();
    let mut reference = header.reference_time;
    let mut pos = header.data_start;
    let mut state = ScanState::Scanning;

    while state != ScanState::Done {
        if let Some(err) = cancelled_err(options, index.len()) {
            return Err(err);
        }
        if pos >= file_len {
            break;
        }

        if state == ScanState::Resync {
            pos += on29::BLOCK_ALIGN as u64;
            if !plausible_start(file, pos, file_len)? {
                continue;
            }
            state = ScanState::Scanning;
        }

        let word = read_at_most(file, pos, on29::BLOCK_ALIGN)?;
        if word.len() < on29::BLOCK_ALIGN {
            // trailing partial block
            break;
        }
        if word.as_slice() == on29::END_RECORD {
            pos += on29::BLOCK_ALIGN as u64;
            continue;
        }
        if word.as_slice() == on29::END_FILE {
            pos += on29::BLOCK_ALIGN as u64;
            pos = skip_fill(file, pos, file_len)?;
            if pos >= file_len {
                state = ScanState::Done;
                continue;
            }
            let block = read_at_most(file, pos, on29::HEADER_LEN)?;
            match parse_on29_block_time(&block) {
                Ok(t) => {
                    debug!(reference = %t, offset = pos, "new block header");
                    reference = Some(t);
                    pos += on29::HEADER_LEN as u64;
                    pos = skip_fill(file, pos, file_len)?;
                }
                Err(reason) => {
                    warn!(offset = pos, %reason, "bad block header, resynchronizing");
                    report.resync_events += 1;
                    state = ScanState::Resync;
                }
            }
            continue;
        }

        let prefix_buf = read_at_most(file, pos, on29::PREFIX_LEN)?;
        let prefix = match parse_prefix(&prefix_buf) {
            Ok(p) if pos + p.report_len as u64 <= file_len => p,
            Ok(p) => {
                let reason = format!(
                    "declared length {} runs past end of file",
                    p.report_len
                );
                if options.fail_fast {
                    return Err(DecodeError::record_decode(pos, reason));
                }
                debug!(offset = pos, %reason, "dropped report");
                report.records_skipped += 1;
                report.resync_events += 1;
                state = ScanState::Resync;
                continue;
            }
            Err(reason) => {
                if options.fail_fast {
                    return Err(DecodeError::record_decode(pos, reason));
                }
                debug!(offset = pos, %reason, "dropped report");
                report.records_skipped += 1;
                report.resync_events += 1;
                state = ScanState::Resync;
                continue;
            }
        };

        let body = read_exact_at(file, pos, prefix.report_len)?;
        let groups = walk_categories(&body);
        for g in &groups {
            if registry.lookup(g.code).is_none() {
                debug!(code = g.code, offset = pos, "unknown category code");
                report.unknown_categories += 1;
            }
        }
        if options.strict_categories
            && let Some(covered) = &first_codes
        {
            for g in &groups {
                if registry.lookup(g.code).is_some() && !covered.contains(&g.code) {
                    return Err(DecodeError::SchemaCoverage {
                        code: g.code,
                        offset: pos,
                    });
                }
            }
        }

        let time = reference.and_then(|r| obs_time_epoch(r, prefix.obs_hhmm));
        stations.insert(prefix.station_id.clone());
        index.push(RecordIndexEntry {
            byte_offset: pos,
            byte_length: prefix.report_len as u32,
            key_fields: KeyFields {
                station_id: Some(prefix.station_id),
                time,
                lat: prefix.lat,
                lon: prefix.lon,
                categories: groups.iter().map(|g| (g.code, g.count as u16)).collect(),
            },
        });

        if first_record.is_none() {
            first_record = Some(decode_report(&body, pos, reference, &registry)?);
            first_codes = Some(
                groups
                    .iter()
                    .filter(|g| registry.lookup(g.code).is_some())
                    .map(|g| g.code)
                    .collect(),
            );
        }
        pos += prefix.report_len as u64;
    }

    report.records_indexed = index.len();
    report.station_count = stations.len();
    Ok(ScanOutcome {
        index,
        first_record,
        report,
    })
}

/// Advance past a run of `X` fill bytes.
fn skip_fill(file: &mut File, mut pos: u64, file_len: u64) -> Result<u64> {
    const CHUNK: usize = 256;
    'outer: while pos < file_len {
        let chunk = read_at_most(file, pos, CHUNK)?;
        if chunk.is_empty() {
            break;
        }
        for b in &chunk {
            if *b != on29::FILL {
                break 'outer;
            }
            pos += 1;
        }
    }
    Ok(pos)
}

/// Resync acceptance test: a 10-byte sentinel or a parseable report prefix.
fn plausible_start(file: &mut File, pos: u64, file_len: u64) -> Result<bool> {
    if pos >= file_len {
        return Ok(false);
    }
    let word = read_at_most(file, pos, on29::BLOCK_ALIGN)?;
    if word.len() < on29::BLOCK_ALIGN {
        return Ok(false);
    }
    if word.as_slice() == on29::END_RECORD || word.as_slice() == on29::END_FILE {
        return Ok(true);
    }
    let prefix = read_at_most(file, pos, on29::PREFIX_LEN)?;
    Ok(match parse_prefix(&prefix) {
        Ok(p) => pos + p.report_len as u64 <= file_len,
        Err(_) => false,
    })
}
