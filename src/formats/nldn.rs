//! Fixed binary lightning strokes (NLDN archive batches).
//!
//! A file is a sequence of batches: an 84-byte header carrying the `NLDN`
//! magic and a big-endian record count, then that many 28-byte stroke
//! records. Multi-batch files simply concatenate. All multi-byte integers
//! are big-endian.

use std::fs::File;

use tracing::{debug, warn};

use crate::buffer;
use crate::config::DecoderOptions;
use crate::constants::nldn;
use crate::error::{DecodeError, Result};
use crate::header::HeaderInfo;
use crate::record::{KeyFields, Record, RecordIndexEntry, Value};
use crate::scanner::{ScanOutcome, ScanReport, cancelled_err, read_at_most};
use crate::schema::{FieldDescriptor, FieldEncoding, Schema, SemanticType};

/// One stroke record, raw field values before scaling. The layout is the
/// 28-byte on-disk record: tsec(i32) nsec(i32) lat(i32) lon(i32) fill(i16)
/// sgnl(i16) fill(i16) multiplicity(i8) fill(i8) semi-major(i8)
/// eccentricity(i8) angle(i8) chi-square(i8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawStrokeRecord {
    pub tsec: i32,
    pub nsec: i32,
    pub lat: i32,
    pub lon: i32,
    pub fill1: i16,
    pub sgnl: i16,
    pub fill2: i16,
    pub multiplicity: i8,
    pub fill3: i8,
    pub semi_major: i8,
    pub eccentricity: i8,
    pub angle: i8,
    pub chi_square: i8,
}

impl RawStrokeRecord {
    /// Decode a 28-byte record buffer; `None` when it is short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < nldn::RECORD_LEN {
            return None;
        }
        Some(Self {
            tsec: buffer::be_i32(buf, 0)?,
            nsec: buffer::be_i32(buf, 4)?,
            lat: buffer::be_i32(buf, 8)?,
            lon: buffer::be_i32(buf, 12)?,
            fill1: buffer::be_i16(buf, 16)?,
            sgnl: buffer::be_i16(buf, 18)?,
            fill2: buffer::be_i16(buf, 20)?,
            multiplicity: buffer::i8_at(buf, 22)?,
            fill3: buffer::i8_at(buf, 23)?,
            semi_major: buffer::i8_at(buf, 24)?,
            eccentricity: buffer::i8_at(buf, 25)?,
            angle: buffer::i8_at(buf, 26)?,
            chi_square: buffer::i8_at(buf, 27)?,
        })
    }

    /// Encode back to the exact 28-byte on-disk form.
    pub fn encode(&self) -> [u8; nldn::RECORD_LEN] {
        let mut buf = [0u8; nldn::RECORD_LEN];
        buffer::put_be_i32(&mut buf, 0, self.tsec);
        buffer::put_be_i32(&mut buf, 4, self.nsec);
        buffer::put_be_i32(&mut buf, 8, self.lat);
        buffer::put_be_i32(&mut buf, 12, self.lon);
        buffer::put_be_i16(&mut buf, 16, self.fill1);
        buffer::put_be_i16(&mut buf, 18, self.sgnl);
        buffer::put_be_i16(&mut buf, 20, self.fill2);
        buf[22] = self.multiplicity as u8;
        buf[23] = self.fill3 as u8;
        buf[24] = self.semi_major as u8;
        buf[25] = self.eccentricity as u8;
        buf[26] = self.angle as u8;
        buf[27] = self.chi_square as u8;
        buf
    }
}

/// Fixed stroke layout; the scaling factors turn the stored integers into
/// degrees and kiloamps.
pub fn schema() -> Schema {
    let fields = vec![
        FieldDescriptor::flat(
            "time",
            SemanticType::Time,
            FieldEncoding::BeInt32Time { offset: 0 },
        ),
        FieldDescriptor::flat(
            "nanoseconds",
            SemanticType::Int32,
            FieldEncoding::BeInt32 { offset: 4 },
        ),
        FieldDescriptor::flat(
            "lat",
            SemanticType::Float64,
            FieldEncoding::BeInt32Scaled {
                offset: 8,
                scale: 0.001,
            },
        ),
        FieldDescriptor::flat(
            "lon",
            SemanticType::Float64,
            FieldEncoding::BeInt32Scaled {
                offset: 12,
                scale: 0.001,
            },
        ),
        FieldDescriptor::flat(
            "signalStrength",
            SemanticType::Float32,
            FieldEncoding::BeInt16Scaled {
                offset: 18,
                scale: 0.1,
            },
        ),
        FieldDescriptor::flat(
            "multiplicity",
            SemanticType::Int8,
            FieldEncoding::Int8 { offset: 22 },
        ),
        FieldDescriptor::flat(
            "semiMajorAxis",
            SemanticType::Int8,
            FieldEncoding::Int8 { offset: 24 },
        ),
        FieldDescriptor::flat(
            "eccentricity",
            SemanticType::Int8,
            FieldEncoding::Int8 { offset: 25 },
        ),
        FieldDescriptor::flat(
            "ellipseAngle",
            SemanticType::Int8,
            FieldEncoding::Int8 { offset: 26 },
        ),
        FieldDescriptor::flat(
            "chiSquared",
            SemanticType::Int8,
            FieldEncoding::Int8 { offset: 27 },
        ),
    ];
    Schema { fields }
}

fn decode_record(raw: &RawStrokeRecord) -> Record {
    Record {
        fields: vec![
            ("time".to_string(), Value::Time(raw.tsec as i64)),
            ("nanoseconds".to_string(), Value::Int32(raw.nsec)),
            ("lat".to_string(), Value::Float64(raw.lat as f64 * 0.001)),
            ("lon".to_string(), Value::Float64(raw.lon as f64 * 0.001)),
            (
                "signalStrength".to_string(),
                Value::Float32(raw.sgnl as f32 * 0.1),
            ),
            ("multiplicity".to_string(), Value::Int8(raw.multiplicity)),
            ("semiMajorAxis".to_string(), Value::Int8(raw.semi_major)),
            ("eccentricity".to_string(), Value::Int8(raw.eccentricity)),
            ("ellipseAngle".to_string(), Value::Int8(raw.angle)),
            ("chiSquared".to_string(), Value::Int8(raw.chi_square)),
        ],
        groups: Vec::new(),
    }
}

/// Batch-structured scan. The first batch header was consumed by the header
/// parse; subsequent batches repeat the 84-byte header. A header whose magic
/// does not match triggers a byte-wise search for the next magic token.
pub fn scan(file: &mut File, header: &HeaderInfo, options: &DecoderOptions) -> Result<ScanOutcome> {
    let file_len = file.metadata()?.len();

    let mut index: Vec<RecordIndexEntry> = Vec::new();
    let mut first_record = None;
    let mut report = ScanReport::default();
    let mut pos = header.data_start;
    let mut remaining = header.batch_count.unwrap_or(0) as u64;

    loop {
        if let Some(err) = cancelled_err(options, index.len()) {
            return Err(err);
        }
        if pos >= file_len {
            break;
        }

        if remaining == 0 {
            // next batch header, or trailing bytes
            let block = read_at_most(file, pos, nldn::HEADER_LEN)?;
            if block.len() < nldn::HEADER_LEN {
                if !block.is_empty() {
                    debug!(offset = pos, len = block.len(), "trailing partial header");
                }
                break;
            }
            if &block[..4] == nldn::MAGIC {
                let count = buffer::be_i32(&block, 4).filter(|c| *c >= 0);
                match count {
                    Some(c) => {
                        remaining = c as u64;
                        pos += nldn::HEADER_LEN as u64;
                        continue;
                    }
                    None => {
                        if options.fail_fast {
                            return Err(DecodeError::record_decode(
                                pos,
                                "negative batch record count",
                            ));
                        }
                    }
                }
            }
            // resync: search forward for the next magic token
            warn!(offset = pos, "batch header out of place, searching for magic");
            report.resync_events += 1;
            match find_magic(file, pos + 1, file_len)? {
                Some(found) => {
                    pos = found;
                    continue;
                }
                None => break,
            }
        }

        let buf = read_at_most(file, pos, nldn::RECORD_LEN)?;
        match RawStrokeRecord::decode(&buf) {
            Some(raw) => {
                index.push(RecordIndexEntry {
                    byte_offset: pos,
                    byte_length: nldn::RECORD_LEN as u32,
                    key_fields: KeyFields {
                        time: Some(raw.tsec as i64),
                        lat: Some(raw.lat as f64 * 0.001),
                        lon: Some(raw.lon as f64 * 0.001),
                        ..KeyFields::default()
                    },
                });
                if first_record.is_none() {
                    first_record = Some(decode_record(&raw));
                }
                pos += nldn::RECORD_LEN as u64;
                remaining -= 1;
            }
            None => {
                // truncated batch tail
                let reason = format!("record truncated: {} of 28 bytes", buf.len());
                if options.fail_fast {
                    return Err(DecodeError::record_decode(pos, reason));
                }
                debug!(offset = pos, %reason, "dropped stroke record");
                report.records_skipped += 1;
                break;
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

/// Byte-wise forward search for the next `NLDN` magic token.
fn find_magic(file: &mut File, mut pos: u64, file_len: u64) -> Result<Option<u64>> {
    const CHUNK: usize = 4096;
    while pos < file_len {
        let chunk = read_at_most(file, pos, CHUNK)?;
        if chunk.len() < nldn::MAGIC.len() {
            break;
        }
        if let Some(i) = chunk
            .windows(nldn::MAGIC.len())
            .position(|w| w == nldn::MAGIC)
        {
            return Ok(Some(pos + i as u64));
        }
        // overlap so a token split across chunks is still found
        pos += (chunk.len() - nldn::MAGIC.len() + 1) as u64;
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_raw() -> RawStrokeRecord {
        RawStrokeRecord {
            tsec: 1_097_527_442,
            nsec: 123_456_789,
            lat: 41_123,
            lon: -105_456,
            sgnl: -961,
            multiplicity: 3,
            semi_major: 5,
            eccentricity: 2,
            angle: 45,
            chi_square: 1,
            ..RawStrokeRecord::default()
        }
    }

    #[test]
    fn raw_record_round_trips_byte_exact() {
        let raw = sample_raw();
        let bytes = raw.encode();
        assert_eq!(bytes.len(), nldn::RECORD_LEN);
        assert_eq!(RawStrokeRecord::decode(&bytes), Some(raw));
    }

    #[test]
    fn short_buffer_does_not_decode() {
        let raw = sample_raw();
        let bytes = raw.encode();
        assert_eq!(RawStrokeRecord::decode(&bytes[..27]), None);
    }

    #[test]
    fn decoded_record_applies_scaling() {
        let record = decode_record(&sample_raw());
        assert_eq!(record.field("lat"), Some(&Value::Float64(41.123)));
        assert_eq!(record.field("lon"), Some(&Value::Float64(-105.456)));
        assert_eq!(
            record.field("signalStrength"),
            Some(&Value::Float32(-96.1))
        );
        assert_eq!(record.field("multiplicity"), Some(&Value::Int8(3)));
    }

    #[test]
    fn schema_names_every_exported_field() {
        let s = schema();
        for name in [
            "time",
            "nanoseconds",
            "lat",
            "lon",
            "signalStrength",
            "multiplicity",
            "semiMajorAxis",
            "eccentricity",
            "ellipseAngle",
            "chiSquared",
        ] {
            assert!(s.field_id(name).is_some(), "missing field {name}");
        }
    }
}
