//! Targeted section reads into column-oriented buffers.
//!
//! A section read takes a record selection (contiguous or strided) and a
//! field projection, re-reads only the selected byte extents and decodes
//! only the projected fields. Flat fields come back as one flat vector per
//! field; nested sequence fields come back ragged, a per-record count
//! vector plus concatenated child columns.

use crate::buffer;
use crate::category::CategoryCodecRegistry;
use crate::constants::missing;
use crate::error::{DecodeError, Result};
use crate::formats;
use crate::header::HeaderInfo;
use crate::record::{RecordIndexEntry, Value};
use crate::schema::{FieldDescriptor, FieldEncoding, FieldId, Schema, SemanticType};

/// Which records to read: `count` records starting at `start`, every
/// `stride`-th one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordSelection {
    pub start: usize,
    pub count: usize,
    pub stride: usize,
}

impl RecordSelection {
    pub fn contiguous(start: usize, count: usize) -> Self {
        Self {
            start,
            count,
            stride: 1,
        }
    }

    pub fn strided(start: usize, count: usize, stride: usize) -> Self {
        Self {
            start,
            count,
            stride,
        }
    }

    /// Record indices in selection order.
    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.count).map(move |i| self.start + i * self.stride)
    }

    pub(crate) fn validate(&self, total: usize) -> Result<()> {
        if self.stride == 0 {
            return Err(DecodeError::invalid_argument("stride must be at least 1"));
        }
        if self.count > 0 {
            let last = self.start + (self.count - 1) * self.stride;
            if last >= total {
                return Err(DecodeError::invalid_argument(format!(
                    "selection reaches record {last}, file has {total}"
                )));
            }
        }
        Ok(())
    }
}

/// One decoded column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// Column storage, one variant per exported scalar type plus the ragged
/// nested form.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    /// Seconds since the Unix epoch, UTC.
    Time(Vec<i64>),
    Nested(NestedColumn),
}

impl ColumnData {
    /// Number of record slots (for nested columns, records not items).
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int8(v) => v.len(),
            ColumnData::Int16(v) => v.len(),
            ColumnData::Int32(v) => v.len(),
            ColumnData::Float32(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Text(v) => v.len(),
            ColumnData::Time(v) => v.len(),
            ColumnData::Nested(n) => n.counts.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ragged nested output: `counts[i]` items for record `i`, child columns
/// holding the items of all selected records back to back.
#[derive(Debug, Clone, PartialEq)]
pub struct NestedColumn {
    pub counts: Vec<u32>,
    pub columns: Vec<Column>,
}

/// Result of one section read, columns in projection order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSection {
    pub columns: Vec<Column>,
}

impl DecodedSection {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Decode the projected fields of the given record buffers. A `None`
/// buffer is a record whose bytes could not be re-read; its slots are
/// filled with missing values.
pub(crate) fn decode_section(
    schema: &Schema,
    header: &HeaderInfo,
    registry: &CategoryCodecRegistry,
    projection: &[FieldId],
    records: &[(Option<Vec<u8>>, &RecordIndexEntry)],
) -> Result<DecodedSection> {
    let mut columns = Vec::with_capacity(projection.len());
    for &id in projection {
        let field = schema
            .get(id)
            .ok_or_else(|| DecodeError::invalid_argument(format!("unknown field id {id}")))?;
        columns.push(decode_column(field, header, registry, records)?);
    }
    Ok(DecodedSection { columns })
}

fn decode_column(
    field: &FieldDescriptor,
    header: &HeaderInfo,
    registry: &CategoryCodecRegistry,
    records: &[(Option<Vec<u8>>, &RecordIndexEntry)],
) -> Result<Column> {
    let data = match field.encoding {
        FieldEncoding::Nested { code } => {
            ColumnData::Nested(decode_nested(field, code, registry, records)?)
        }
        FieldEncoding::GridRow { samples } => {
            ColumnData::Nested(decode_grid_rows(samples, records))
        }
        _ => decode_flat(field, header, records),
    };
    Ok(Column {
        name: field.name.clone(),
        data,
    })
}

fn decode_flat(
    field: &FieldDescriptor,
    header: &HeaderInfo,
    records: &[(Option<Vec<u8>>, &RecordIndexEntry)],
) -> ColumnData {
    match field.semantic_type {
        SemanticType::Int8 => ColumnData::Int8(
            records
                .iter()
                .map(|(buf, _)| match (buf, field.encoding) {
                    (Some(b), FieldEncoding::Int8 { offset }) => {
                        buffer::i8_at(b, offset).unwrap_or(missing::BYTE)
                    }
                    _ => missing::BYTE,
                })
                .collect(),
        ),
        SemanticType::Int16 => ColumnData::Int16(
            records
                .iter()
                .map(|(buf, _)| match (buf, field.encoding) {
                    (Some(b), FieldEncoding::AsciiInt16 { offset, width }) => {
                        buffer::ascii_i16(b, offset, width)
                    }
                    _ => missing::SHORT,
                })
                .collect(),
        ),
        SemanticType::Int32 => ColumnData::Int32(
            records
                .iter()
                .map(|(buf, _)| match (buf, field.encoding) {
                    (Some(b), FieldEncoding::BeInt32 { offset }) => {
                        buffer::be_i32(b, offset).unwrap_or(missing::INT)
                    }
                    (Some(b), FieldEncoding::AsciiInt32 { offset, width }) => {
                        buffer::ascii_i32(b, offset, width)
                    }
                    (Some(b), FieldEncoding::TokenInt32 { index }) => token(b, index)
                        .and_then(|t| t.parse::<i32>().ok())
                        .unwrap_or(missing::INT),
                    _ => missing::INT,
                })
                .collect(),
        ),
        SemanticType::Float32 => ColumnData::Float32(
            records
                .iter()
                .map(|(buf, _)| match (buf, field.encoding) {
                    (
                        Some(b),
                        FieldEncoding::AsciiFloat32 {
                            offset,
                            width,
                            scale,
                            bias,
                        },
                    ) => buffer::try_ascii_f64(b, offset, width)
                        .map_or(missing::FLOAT, |v| bias + scale * v as f32),
                    (Some(b), FieldEncoding::BeInt16Scaled { offset, scale }) => {
                        buffer::be_i16(b, offset)
                            .map_or(missing::FLOAT, |v| v as f32 * scale)
                    }
                    (Some(b), FieldEncoding::TokenFloat32 { index }) => token(b, index)
                        .and_then(|t| t.parse::<f32>().ok())
                        .unwrap_or(missing::FLOAT),
                    _ => missing::FLOAT,
                })
                .collect(),
        ),
        SemanticType::Float64 => ColumnData::Float64(
            records
                .iter()
                .map(|(buf, _)| match (buf, field.encoding) {
                    (Some(b), FieldEncoding::BeInt32Scaled { offset, scale }) => {
                        buffer::be_i32(b, offset)
                            .map_or(missing::DOUBLE, |v| v as f64 * scale)
                    }
                    (Some(b), FieldEncoding::TokenFloat64 { index }) => token(b, index)
                        .and_then(|t| t.parse::<f64>().ok())
                        .unwrap_or(missing::DOUBLE),
                    _ => missing::DOUBLE,
                })
                .collect(),
        ),
        SemanticType::Text => ColumnData::Text(
            records
                .iter()
                .map(|(buf, _)| match (buf, field.encoding) {
                    (Some(b), FieldEncoding::AsciiText { offset, width }) => {
                        buffer::ascii_text(b, offset, width)
                    }
                    _ => String::new(),
                })
                .collect(),
        ),
        SemanticType::Time => ColumnData::Time(
            records
                .iter()
                .map(|(buf, entry)| match (buf, field.encoding) {
                    (Some(b), FieldEncoding::BeInt32Time { offset }) => {
                        buffer::be_i32(b, offset).map_or(missing::TIME, |v| v as i64)
                    }
                    (Some(b), FieldEncoding::TokenTime { index }) => token(b, index)
                        .and_then(|t| formats::uspln::parse_time(&t))
                        .unwrap_or(missing::TIME),
                    // resolved against the owning block's header during the
                    // scan; the file header is only a fallback
                    (Some(b), FieldEncoding::ObsTimeHhmm { offset, width }) => entry
                        .key_fields
                        .time
                        .or_else(|| {
                            header.reference_time.and_then(|r| {
                                buffer::try_ascii_i64(b, offset, width)
                                    .and_then(|hhmm| formats::on29::obs_time_epoch(r, hhmm))
                            })
                        })
                        .unwrap_or(missing::TIME),
                    _ => missing::TIME,
                })
                .collect(),
        ),
        SemanticType::NestedSequence => {
            // handled by decode_column
            ColumnData::Nested(NestedColumn {
                counts: Vec::new(),
                columns: Vec::new(),
            })
        }
    }
}

fn token(buf: &[u8], index: usize) -> Option<String> {
    let line = String::from_utf8_lossy(buf);
    line.trim_end()
        .split(',')
        .nth(index)
        .map(|t| t.to_string())
}

fn decode_nested(
    field: &FieldDescriptor,
    code: u8,
    registry: &CategoryCodecRegistry,
    records: &[(Option<Vec<u8>>, &RecordIndexEntry)],
) -> Result<NestedColumn> {
    let sub = field
        .sub_schema
        .as_ref()
        .ok_or_else(|| DecodeError::invalid_argument("nested field without a sub-schema"))?;
    let mut counts = Vec::with_capacity(records.len());
    let mut builders: Vec<ColumnData> = sub.fields.iter().map(empty_column).collect();

    for (buf, entry) in records {
        let Some(body) = buf else {
            counts.push(0);
            continue;
        };
        let Some((items_offset, count)) = formats::on29::find_category(body, code) else {
            counts.push(0);
            continue;
        };
        let items =
            registry.decode_items(code, body, items_offset, count, entry.byte_offset)?;
        counts.push(items.len() as u32);
        for item in items {
            for (builder, value) in builders.iter_mut().zip(item) {
                push_value(builder, value);
            }
        }
    }

    let columns = sub
        .fields
        .iter()
        .zip(builders)
        .map(|(f, data)| Column {
            name: f.name.clone(),
            data,
        })
        .collect();
    Ok(NestedColumn { counts, columns })
}

fn decode_grid_rows(
    samples: usize,
    records: &[(Option<Vec<u8>>, &RecordIndexEntry)],
) -> NestedColumn {
    let mut counts = Vec::with_capacity(records.len());
    let mut values = Vec::new();
    for (buf, _) in records {
        let Some(body) = buf else {
            counts.push(0);
            continue;
        };
        let row = body
            .chunks_exact(2)
            .take(samples)
            .map(|c| i16::from_be_bytes([c[0], c[1]]));
        let before = values.len();
        values.extend(row);
        counts.push((values.len() - before) as u32);
    }
    NestedColumn {
        counts,
        columns: vec![Column {
            name: "value".to_string(),
            data: ColumnData::Int16(values),
        }],
    }
}

fn empty_column(field: &FieldDescriptor) -> ColumnData {
    match field.semantic_type {
        SemanticType::Int8 => ColumnData::Int8(Vec::new()),
        SemanticType::Int16 => ColumnData::Int16(Vec::new()),
        SemanticType::Int32 => ColumnData::Int32(Vec::new()),
        SemanticType::Float32 => ColumnData::Float32(Vec::new()),
        SemanticType::Float64 => ColumnData::Float64(Vec::new()),
        SemanticType::Text => ColumnData::Text(Vec::new()),
        SemanticType::Time => ColumnData::Time(Vec::new()),
        SemanticType::NestedSequence => ColumnData::Nested(NestedColumn {
            counts: Vec::new(),
            columns: Vec::new(),
        }),
    }
}

fn push_value(data: &mut ColumnData, value: Value) {
    match (data, value) {
        (ColumnData::Int8(v), Value::Int8(x)) => v.push(x),
        (ColumnData::Int16(v), Value::Int16(x)) => v.push(x),
        (ColumnData::Int32(v), Value::Int32(x)) => v.push(x),
        (ColumnData::Float32(v), Value::Float32(x)) => v.push(x),
        (ColumnData::Float64(v), Value::Float64(x)) => v.push(x),
        (ColumnData::Text(v), Value::Text(x)) => v.push(x),
        (ColumnData::Time(v), Value::Time(x)) => v.push(x),
        // type drift between codec layout and sub-schema
        (ColumnData::Int8(v), _) => v.push(missing::BYTE),
        (ColumnData::Int16(v), _) => v.push(missing::SHORT),
        (ColumnData::Int32(v), _) => v.push(missing::INT),
        (ColumnData::Float32(v), _) => v.push(missing::FLOAT),
        (ColumnData::Float64(v), _) => v.push(missing::DOUBLE),
        (ColumnData::Text(v), _) => v.push(String::new()),
        (ColumnData::Time(v), _) => v.push(missing::TIME),
        (ColumnData::Nested(_), _) => {}
    }
}
