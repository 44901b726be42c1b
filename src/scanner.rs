//! Single-pass record scanning.
//!
//! One sequential pass per opened file builds the index of record byte
//! extents and key fields without materializing record payloads. The scan
//! is a three-state machine: `Scanning` consumes well-formed records,
//! `Resync` advances through corrupt bytes until the next record-start
//! pattern or sentinel, `Done` is reached at end of file. I/O errors abort
//! the scan; per-record decode errors drop the record, bump a counter and
//! continue (unless fail-fast was requested).

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

use serde::Serialize;
use tracing::info;

use crate::config::DecoderOptions;
use crate::error::{DecodeError, Result};
use crate::formats;
use crate::header::HeaderInfo;
use crate::record::{Record, RecordIndexEntry};
use crate::sniffer::FormatVariant;

/// Scan-phase state, shared by the byte-oriented drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanState {
    Scanning,
    Resync,
    Done,
}

/// Aggregate counters for one completed scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub records_indexed: usize,
    /// Records dropped for structural or decode problems.
    pub records_skipped: usize,
    /// Corruption events that forced a resynchronization.
    pub resync_events: usize,
    /// Category groups skipped because no codec was registered.
    pub unknown_categories: usize,
    /// Distinct station identifiers observed (station-keyed formats).
    pub station_count: usize,
}

/// Everything the indexing phase produces.
#[derive(Debug)]
pub struct ScanOutcome {
    pub index: Vec<RecordIndexEntry>,
    /// The first accepted record, fully decoded; seeds the schema.
    pub first_record: Option<Record>,
    pub report: ScanReport,
}

/// Run the single indexing pass for an already-parsed header.
pub fn scan(file: &mut File, header: &HeaderInfo, options: &DecoderOptions) -> Result<ScanOutcome> {
    let outcome = match header.variant {
        FormatVariant::UsplnOriginal | FormatVariant::UsplnExtended => {
            formats::uspln::scan(file, header, options)
        }
        FormatVariant::NmcOn29 => formats::on29::scan(file, header, options),
        FormatVariant::NldnBinary => formats::nldn::scan(file, header, options),
        FormatVariant::DemGrid => formats::demgrid::scan(file, header, options),
    }?;

    debug_assert!(
        outcome
            .index
            .windows(2)
            .all(|w| w[0].byte_offset < w[1].byte_offset),
        "index offsets must be strictly increasing"
    );
    info!(
        records = outcome.report.records_indexed,
        skipped = outcome.report.records_skipped,
        resyncs = outcome.report.resync_events,
        "scan complete"
    );
    Ok(outcome)
}

/// Seek and read exactly `len` bytes at `offset`. The scan owns the file
/// exclusively, so no locking is needed here.
pub(crate) fn read_exact_at(file: &mut File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Like [`read_exact_at`] but tolerates a short tail: returns whatever is
/// available, which may be less than `len`.
pub(crate) fn read_at_most(file: &mut File, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    file.seek(SeekFrom::Start(offset))?;
    let mut filled = 0;
    while filled < len {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

pub(crate) fn cancelled_err(options: &DecoderOptions, records_indexed: usize) -> Option<DecodeError> {
    options
        .is_cancelled()
        .then_some(DecodeError::Cancelled { records_indexed })
}
