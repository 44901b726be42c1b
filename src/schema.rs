//! Derived field schema.
//!
//! The schema is derived once per opened file, from the first successfully
//! decoded record (plus header geometry for the raster family), and shared
//! read-only by every subsequent section read. Flat fields carry the byte
//! encoding needed to decode them straight out of a record buffer; nested
//! sequence fields carry a category code and a sub-schema derived from the
//! codec layout.
//!
//! The first record is assumed representative of the whole file. A category
//! code that first appears in a later record is invisible under the derived
//! schema (see `DecoderOptions::strict_categories` for the validating mode).

use serde::Serialize;

use crate::category::CategoryCodecRegistry;
use crate::formats;
use crate::header::HeaderInfo;
use crate::record::Record;
use crate::sniffer::FormatVariant;

/// Index of a field within its schema; the handle used for projections.
pub type FieldId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SemanticType {
    Int8,
    Int16,
    Int32,
    Float32,
    Float64,
    Text,
    /// Seconds since the Unix epoch, UTC.
    Time,
    /// Variable-count category-coded sub-sequence.
    NestedSequence,
}

/// How a field's bytes are laid out within one record.
#[derive(Debug, Clone, Copy, Serialize)]
pub enum FieldEncoding {
    /// Big-endian i32.
    BeInt32 { offset: usize },
    /// Big-endian i32 holding epoch seconds.
    BeInt32Time { offset: usize },
    /// Big-endian i32 scaled to f64.
    BeInt32Scaled { offset: usize, scale: f64 },
    /// Big-endian i16 scaled to f32.
    BeInt16Scaled { offset: usize, scale: f32 },
    /// Single signed byte.
    Int8 { offset: usize },
    /// Fixed-width ASCII digits, `bias + scale * value`.
    AsciiFloat32 {
        offset: usize,
        width: usize,
        scale: f32,
        bias: f32,
    },
    AsciiInt16 { offset: usize, width: usize },
    AsciiInt32 { offset: usize, width: usize },
    AsciiText { offset: usize, width: usize },
    /// HHMM observation time resolved against the header reference date.
    ObsTimeHhmm { offset: usize, width: usize },
    /// Standard-level pressure by item position (category 1 sub-field).
    MandatoryPressure,
    /// Comma-delimited token parsed as f64.
    TokenFloat64 { index: usize },
    /// Comma-delimited token parsed as f32.
    TokenFloat32 { index: usize },
    /// Comma-delimited token parsed as i32.
    TokenInt32 { index: usize },
    /// Comma-delimited ISO-8601 timestamp, optional fractional seconds.
    TokenTime { index: usize },
    /// The whole record is a row of big-endian i16 samples.
    GridRow { samples: usize },
    /// Category-coded nested sequence located by walking sub-headers.
    Nested { code: u8 },
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub semantic_type: SemanticType,
    pub encoding: FieldEncoding,
    /// Set for nested sequences and grid rows.
    pub sub_schema: Option<Schema>,
    /// Set for category-coded nested sequences.
    pub category_code: Option<u8>,
}

impl FieldDescriptor {
    pub fn flat(name: &str, semantic_type: SemanticType, encoding: FieldEncoding) -> Self {
        Self {
            name: name.to_string(),
            semantic_type,
            encoding,
            sub_schema: None,
            category_code: None,
        }
    }

    pub fn nested(name: &str, code: u8, sub_schema: Schema) -> Self {
        Self {
            name: name.to_string(),
            semantic_type: SemanticType::NestedSequence,
            encoding: FieldEncoding::Nested { code },
            sub_schema: Some(sub_schema),
            category_code: Some(code),
        }
    }
}

/// Ordered field list exported for a single opened file.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schema {
    pub fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn field_id(&self, name: &str) -> Option<FieldId> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn get(&self, id: FieldId) -> Option<&FieldDescriptor> {
        self.fields.get(id)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All field ids, for full-width projections.
    pub fn all_fields(&self) -> Vec<FieldId> {
        (0..self.fields.len()).collect()
    }
}

/// Derive the exported schema. Deterministic and pure: the flat layout is a
/// property of the format variant, the nested sequences come from the
/// category codes observed in the first accepted record, in record order.
pub fn build_schema(
    variant: FormatVariant,
    header: &HeaderInfo,
    first_record: Option<&Record>,
    registry: &CategoryCodecRegistry,
) -> Schema {
    match variant {
        FormatVariant::UsplnOriginal => formats::uspln::schema(false),
        FormatVariant::UsplnExtended => formats::uspln::schema(true),
        FormatVariant::NldnBinary => formats::nldn::schema(),
        FormatVariant::DemGrid => formats::demgrid::schema(header),
        FormatVariant::NmcOn29 => {
            let mut schema = formats::on29::flat_schema();
            if let Some(record) = first_record {
                for group in &record.groups {
                    if schema
                        .fields
                        .iter()
                        .any(|f| f.category_code == Some(group.code))
                    {
                        continue;
                    }
                    if let (Some(codec), Some(sub)) = (
                        registry.lookup(group.code),
                        registry.sub_schema(group.code),
                    ) {
                        schema
                            .fields
                            .push(FieldDescriptor::nested(codec.name, group.code, sub));
                    }
                }
            }
            schema
        }
    }
}
