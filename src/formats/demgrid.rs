//! Elevation raster rows with a sidecar header.
//!
//! The payload file is raw big-endian i16 samples, row-major, with no
//! embedded metadata at all; geometry comes from the companion `.hdr`
//! file parsed at header time. One logical record is one row of `NCOLS`
//! samples.

use std::fs::File;

use tracing::debug;

use crate::config::DecoderOptions;
use crate::constants::demgrid;
use crate::error::{DecodeError, Result};
use crate::header::HeaderInfo;
use crate::record::{CategoryGroup, KeyFields, Record, RecordIndexEntry, Value};
use crate::scanner::{ScanOutcome, ScanReport, cancelled_err, read_at_most};
use crate::schema::{FieldDescriptor, FieldEncoding, Schema, SemanticType};

/// One nested-sequence field per row; every row carries exactly `NCOLS`
/// samples, so the sequence is ragged only in type, never in practice.
pub fn schema(header: &HeaderInfo) -> Schema {
    let samples = header.grid.as_ref().map_or(0, |g| g.ncols);
    let sub = Schema {
        fields: vec![FieldDescriptor::flat(
            "value",
            SemanticType::Int16,
            FieldEncoding::BeInt16Scaled {
                offset: 0,
                scale: 1.0,
            },
        )],
    };
    Schema {
        fields: vec![FieldDescriptor {
            name: "elevation".to_string(),
            semantic_type: SemanticType::NestedSequence,
            encoding: FieldEncoding::GridRow { samples },
            sub_schema: Some(sub),
            category_code: None,
        }],
    }
}

/// Row-oriented scan: `NROWS` records of `NCOLS` samples, no sentinels, no
/// resynchronization. A short trailing row is dropped and counted.
pub fn scan(file: &mut File, header: &HeaderInfo, options: &DecoderOptions) -> Result<ScanOutcome> {
    let grid = header
        .grid
        .as_ref()
        .ok_or_else(|| DecodeError::invalid_argument("grid scan without sidecar geometry"))?;
    let row_len = grid.ncols * demgrid::SAMPLE_LEN;
    let file_len = file.metadata()?.len();

    let mut index: Vec<RecordIndexEntry> = Vec::new();
    let mut first_record = None;
    let mut report = ScanReport::default();
    let mut pos = 0u64;

    for row in 0..grid.nrows {
        if let Some(err) = cancelled_err(options, index.len()) {
            return Err(err);
        }
        if pos + row_len as u64 > file_len {
            let reason = format!(
                "row {row} truncated: {} of {row_len} bytes",
                file_len.saturating_sub(pos)
            );
            if options.fail_fast {
                return Err(DecodeError::record_decode(pos, reason));
            }
            debug!(offset = pos, %reason, "dropped grid row");
            report.records_skipped += grid.nrows - row;
            break;
        }
        index.push(RecordIndexEntry {
            byte_offset: pos,
            byte_length: row_len as u32,
            key_fields: KeyFields::default(),
        });
        if first_record.is_none() {
            let buf = read_at_most(file, pos, row_len)?;
            let items = buf
                .chunks_exact(demgrid::SAMPLE_LEN)
                .map(|c| vec![Value::Int16(i16::from_be_bytes([c[0], c[1]]))])
                .collect();
            first_record = Some(Record {
                fields: Vec::new(),
                groups: vec![CategoryGroup { code: 0, items }],
            });
        }
        pos += row_len as u64;
    }

    report.records_indexed = index.len();
    Ok(ScanOutcome {
        index,
        first_record,
        report,
    })
}
