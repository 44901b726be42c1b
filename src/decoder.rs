//! The decoding engine facade.
//!
//! `Decoder::open` runs the whole pipeline once: sniff, header parse,
//! single-pass scan, schema derivation. The result is immutable; targeted
//! reads only re-read record byte extents under a file lock, so a decoder
//! is shareable across threads.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use crate::category::CategoryCodecRegistry;
use crate::config::DecoderOptions;
use crate::error::{DecodeError, Result};
use crate::header::{self, HeaderInfo};
use crate::record::RecordIndexEntry;
use crate::scanner::{self, ScanReport};
use crate::schema::{FieldId, Schema, build_schema};
use crate::section::{self, DecodedSection, RecordSelection};
use crate::sniffer::{self, FormatVariant};

pub struct Decoder {
    path: PathBuf,
    file: Mutex<File>,
    header: HeaderInfo,
    schema: Schema,
    registry: CategoryCodecRegistry,
    index: Vec<RecordIndexEntry>,
    report: ScanReport,
    options: DecoderOptions,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("path", &self.path)
            .field("variant", &self.header.variant)
            .field("records", &self.index.len())
            .finish()
    }
}

impl Decoder {
    /// Open with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, DecoderOptions::default())
    }

    /// Sniff, parse the header, scan and derive the schema in one pass.
    pub fn open_with(path: impl AsRef<Path>, options: DecoderOptions) -> Result<Self> {
        let path = path.as_ref();
        let variant = sniffer::sniff_file(path)?;
        let mut file = File::open(path)?;
        let header = header::parse_header(path, &mut file, variant)?;
        let outcome = scanner::scan(&mut file, &header, &options)?;
        let registry = CategoryCodecRegistry::new();
        let schema = build_schema(
            header.variant,
            &header,
            outcome.first_record.as_ref(),
            &registry,
        );
        info!(
            path = %path.display(),
            variant = ?header.variant,
            records = outcome.index.len(),
            fields = schema.len(),
            "opened archive"
        );
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            header,
            schema,
            registry,
            index: outcome.index,
            report: outcome.report,
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn variant(&self) -> FormatVariant {
        self.header.variant
    }

    pub fn header(&self) -> &HeaderInfo {
        &self.header
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index(&self) -> &[RecordIndexEntry] {
        &self.index
    }

    pub fn record_count(&self) -> usize {
        self.index.len()
    }

    pub fn scan_report(&self) -> &ScanReport {
        &self.report
    }

    /// Read a section: the projected fields of the selected records,
    /// decoded into columns. Deterministic for a given selection and
    /// projection; an unreadable record yields missing values unless
    /// fail-fast was requested.
    pub fn read(
        &self,
        selection: RecordSelection,
        projection: &[FieldId],
    ) -> Result<DecodedSection> {
        selection.validate(self.index.len())?;
        for &id in projection {
            if id >= self.schema.len() {
                return Err(DecodeError::invalid_argument(format!(
                    "unknown field id {id}, schema has {} fields",
                    self.schema.len()
                )));
            }
        }

        let entries: Vec<&RecordIndexEntry> =
            selection.indices().map(|i| &self.index[i]).collect();
        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.read_extent(entry) {
                Ok(buf) => records.push((Some(buf), entry)),
                Err(err) => {
                    if self.options.fail_fast {
                        return Err(err);
                    }
                    warn!(
                        offset = entry.byte_offset,
                        %err,
                        "record unreadable, substituting missing values"
                    );
                    records.push((None, entry));
                }
            }
        }
        section::decode_section(
            &self.schema,
            &self.header,
            &self.registry,
            projection,
            &records,
        )
    }

    /// Read every field of the selected records.
    pub fn read_all(&self, selection: RecordSelection) -> Result<DecodedSection> {
        self.read(selection, &self.schema.all_fields())
    }

    /// Seek and read one record's byte extent; the lock spans both so
    /// concurrent readers cannot interleave position changes.
    fn read_extent(&self, entry: &RecordIndexEntry) -> Result<Vec<u8>> {
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        let mut buf = vec![0u8; entry.byte_length as usize];
        file.seek(SeekFrom::Start(entry.byte_offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }
}
