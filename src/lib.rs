//! Observation Archive Decoder
//!
//! A Rust library for decoding legacy record-oriented scientific
//! observation files: delimited lightning stroke text, category-coded
//! fixed-text station reports, fixed binary stroke batches and raw
//! elevation rasters with sidecar headers.
//!
//! This library provides tools for:
//! - Recognizing a file's format family from a short byte prefix
//! - Parsing the per-format header into reference metadata
//! - Building a record index in a single sequential pass, with
//!   resynchronization across corrupt regions
//! - Deriving a field schema from the first decoded record
//! - Targeted section reads: record ranges and strides projected onto a
//!   field subset, decoded into column-oriented buffers
//!
//! The pipeline runs once at [`Decoder::open`]; the resulting decoder is
//! immutable and shareable across threads.

pub mod buffer;
pub mod category;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod error;
pub mod formats;
pub mod header;
pub mod record;
pub mod scanner;
pub mod schema;
pub mod section;
pub mod sniffer;

// Re-export the types making up the public surface
pub use category::CategoryCodecRegistry;
pub use config::DecoderOptions;
pub use decoder::Decoder;
pub use error::{DecodeError, Result};
pub use header::{GridInfo, HeaderInfo};
pub use record::{CategoryGroup, KeyFields, Record, RecordIndexEntry, Value};
pub use scanner::ScanReport;
pub use schema::{FieldDescriptor, FieldEncoding, FieldId, Schema, SemanticType};
pub use section::{Column, ColumnData, DecodedSection, NestedColumn, RecordSelection};
pub use sniffer::{FormatVariant, sniff_file, sniff_prefix};
