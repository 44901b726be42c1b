//! Error handling for observation archive decoding.
//!
//! Sniffing failures are a distinct, recoverable "not my format" signal;
//! header problems and I/O errors are fatal for the open; per-record
//! structural problems are recovered locally during scanning and only
//! surface as counters unless fail-fast mode is requested.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The byte prefix does not match any registered format.
    #[error("Unrecognized file format: {path}")]
    NotRecognized { path: PathBuf },

    #[error("Header parsing failed for file: {path} - {reason}")]
    HeaderParse { path: PathBuf, reason: String },

    /// The grid family requires a companion header file at a derived path.
    #[error("Required sidecar file is missing: {path}")]
    SidecarMissing { path: PathBuf },

    /// A single record failed to decode. Non-fatal at scan time unless
    /// fail-fast was requested; fatal at targeted-read time only when
    /// missing-value substitution is disabled.
    #[error("Record decoding failed at offset {offset}: {reason}")]
    RecordDecode { offset: u64, reason: String },

    /// A category code with no registered codec. The record's byte extent
    /// is still known, so the record stays indexed.
    #[error("Unknown category code {code} at offset {offset}")]
    UnknownCategoryCode { code: u8, offset: u64 },

    /// Strict-categories mode found a record whose category set is not
    /// covered by the schema derived from the first record.
    #[error("Record at offset {offset} carries category {code} absent from the derived schema")]
    SchemaCoverage { code: u8, offset: u64 },

    /// Caller misuse: out-of-range index, unknown projected field or zero
    /// stride.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    #[error("Scan cancelled after {records_indexed} records")]
    Cancelled { records_indexed: usize },
}

impl DecodeError {
    pub fn header_parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::HeaderParse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn record_decode(offset: u64, reason: impl Into<String>) -> Self {
        Self::RecordDecode {
            offset,
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;
