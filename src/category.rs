//! Category codecs for the category-coded fixed-text family.
//!
//! Each category code identifies a fixed per-item layout: an ordered list of
//! named sub-fields with byte offsets, widths and scale factors. The
//! registry is built once and never mutated; the scanner uses it to measure
//! variable-count groups by pure arithmetic, the section reader to decode
//! them on demand.
//!
//! Layouts follow NMC Office Note 29: categories 1-8 are upper-air level
//! data, 51/52 are land and ship surface reports.

use crate::buffer;
use crate::constants::{missing, on29};
use crate::error::{DecodeError, Result};
use crate::record::Value;
use crate::schema::{FieldDescriptor, FieldEncoding, Schema, SemanticType};

/// How one sub-field of a category item is encoded.
#[derive(Debug, Clone, Copy)]
pub enum SubFieldKind {
    /// Fixed-width ASCII float, scaled.
    Float { width: usize, scale: f32 },
    /// Fixed-width ASCII short.
    Short { width: usize },
    /// Fixed-width ASCII int.
    Int { width: usize },
    /// Fixed-width character data, kept verbatim.
    Text { width: usize },
    /// Standard-level pressure looked up by item position (category 1 only).
    MandatoryPressure,
}

#[derive(Debug, Clone, Copy)]
pub struct SubField {
    pub name: &'static str,
    pub offset: usize,
    pub kind: SubFieldKind,
}

/// Fixed layout for one category code.
#[derive(Debug, Clone, Copy)]
pub struct CategoryCodec {
    pub code: u8,
    /// Exported name of the nested sequence field.
    pub name: &'static str,
    pub item_width: usize,
    pub fields: &'static [SubField],
}

const fn float(name: &'static str, offset: usize, width: usize, scale: f32) -> SubField {
    SubField {
        name,
        offset,
        kind: SubFieldKind::Float { width, scale },
    }
}

const fn short(name: &'static str, offset: usize, width: usize) -> SubField {
    SubField {
        name,
        offset,
        kind: SubFieldKind::Short { width },
    }
}

const fn int(name: &'static str, offset: usize, width: usize) -> SubField {
    SubField {
        name,
        offset,
        kind: SubFieldKind::Int { width },
    }
}

const fn text(name: &'static str, offset: usize, width: usize) -> SubField {
    SubField {
        name,
        offset,
        kind: SubFieldKind::Text { width },
    }
}

const CAT01: CategoryCodec = CategoryCodec {
    code: 1,
    name: "mandatoryLevels",
    item_width: 22,
    fields: &[
        SubField {
            name: "pressure",
            offset: 0,
            kind: SubFieldKind::MandatoryPressure,
        },
        float("geopotential", 0, 5, 1.0),
        float("temperature", 5, 4, 0.1),
        float("dewpoint", 9, 3, 0.1),
        short("windDir", 12, 3),
        short("windSpeed", 15, 3),
        text("quality", 18, 4),
    ],
};

const CAT02: CategoryCodec = CategoryCodec {
    code: 2,
    name: "tempDewpointLevels",
    item_width: 15,
    fields: &[
        float("pressure", 0, 5, 0.1),
        float("temperature", 5, 4, 0.1),
        float("dewpoint", 9, 3, 0.1),
        text("quality", 12, 3),
    ],
};

const CAT03: CategoryCodec = CategoryCodec {
    code: 3,
    name: "windPressureLevels",
    item_width: 13,
    fields: &[
        float("pressure", 0, 5, 0.1),
        short("windDir", 5, 3),
        short("windSpeed", 8, 3),
        text("quality", 11, 2),
    ],
};

const CAT04: CategoryCodec = CategoryCodec {
    code: 4,
    name: "windHeightLevels",
    item_width: 13,
    fields: &[
        float("geopotential", 0, 5, 1.0),
        short("windDir", 5, 3),
        short("windSpeed", 8, 3),
        text("quality", 11, 2),
    ],
};

const CAT05: CategoryCodec = CategoryCodec {
    code: 5,
    name: "tropopauseLevels",
    item_width: 22,
    fields: &[
        float("pressure", 0, 5, 0.1),
        float("temperature", 5, 4, 0.1),
        float("dewpoint", 9, 3, 0.1),
        short("windDir", 12, 3),
        short("windSpeed", 15, 3),
        text("quality", 18, 4),
    ],
};

const CAT07: CategoryCodec = CategoryCodec {
    code: 7,
    name: "cloudCover",
    item_width: 10,
    fields: &[
        float("pressure", 0, 5, 0.1),
        short("percentClouds", 5, 3),
        text("quality", 8, 2),
    ],
};

const CAT08: CategoryCodec = CategoryCodec {
    code: 8,
    name: "additionalData",
    item_width: 10,
    fields: &[
        int("data", 0, 5),
        short("table101Code", 5, 3),
        text("quality", 8, 2),
    ],
};

const CAT51: CategoryCodec = CategoryCodec {
    code: 51,
    name: "surfaceData",
    item_width: 60,
    fields: &[
        float("pressureSeaLevel", 0, 5, 1.0),
        float("pressureStation", 5, 5, 1.0),
        short("windDir", 10, 3),
        short("windSpeed", 13, 3),
        float("temperature", 16, 4, 0.1),
        float("dewpoint", 20, 3, 0.1),
        float("maxTemperature", 23, 4, 0.1),
        float("minTemperature", 27, 4, 0.1),
        text("quality", 31, 4),
        text("pastWeatherW2", 35, 1),
        text("horizontalVisibility", 36, 3),
        text("presentWeather", 39, 3),
        text("pastWeatherW1", 42, 2),
        text("cloudFractionN", 44, 2),
        text("cloudFractionNh", 46, 2),
        text("cloudCl", 48, 2),
        text("cloudBaseHeight", 50, 2),
        text("cloudCm", 52, 2),
        text("cloudCh", 54, 2),
        text("pressureTendencyChar", 56, 1),
        float("pressureTendency", 57, 3, 0.1),
    ],
};

const CAT52: CategoryCodec = CategoryCodec {
    code: 52,
    name: "shipSurfaceData",
    item_width: 40,
    fields: &[
        float("precip6Hours", 0, 4, 0.01),
        short("snowDepth", 4, 3),
        float("precip24Hours", 7, 4, 0.01),
        text("precipDuration", 11, 1),
        short("wavePeriod", 12, 2),
        short("waveHeight", 14, 2),
        text("waveDirection", 16, 2),
        short("swellPeriod", 18, 2),
        short("swellHeight", 20, 2),
        float("seaSurfaceTemp", 22, 4, 0.1),
        text("special", 26, 2),
        text("special2", 28, 2),
        text("shipCourse", 30, 1),
        text("shipSpeed", 31, 2),
        float("waterEquivalent", 33, 7, 0.001),
    ],
};

const CODECS: [&CategoryCodec; 9] = [
    &CAT01, &CAT02, &CAT03, &CAT04, &CAT05, &CAT07, &CAT08, &CAT51, &CAT52,
];

/// Code -> codec table, built once at decoder construction.
#[derive(Debug, Clone)]
pub struct CategoryCodecRegistry {
    codecs: Vec<&'static CategoryCodec>,
}

impl Default for CategoryCodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CategoryCodecRegistry {
    pub fn new() -> Self {
        Self {
            codecs: CODECS.to_vec(),
        }
    }

    pub fn lookup(&self, code: u8) -> Option<&'static CategoryCodec> {
        self.codecs.iter().find(|c| c.code == code).copied()
    }

    /// Byte extent of a `count`-item group, excluding the 10-byte sub-header.
    /// Lets the scanner measure groups without decoding them.
    pub fn byte_width(&self, code: u8, count: usize) -> Option<u32> {
        self.lookup(code)
            .map(|c| (c.item_width * count) as u32)
    }

    /// Decode `count` items of category `code` starting at `offset` in `buf`.
    /// Garbled numeric sub-fields become missing values; only an unknown
    /// code is an error.
    pub fn decode_items(
        &self,
        code: u8,
        buf: &[u8],
        offset: usize,
        count: usize,
        record_offset: u64,
    ) -> Result<Vec<Vec<Value>>> {
        let codec = self
            .lookup(code)
            .ok_or(DecodeError::UnknownCategoryCode {
                code,
                offset: record_offset,
            })?;
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            let base = offset + i * codec.item_width;
            items.push(decode_item(codec, buf, base, i));
        }
        Ok(items)
    }

    /// Exported sub-schema of one category, derived from its layout.
    pub fn sub_schema(&self, code: u8) -> Option<Schema> {
        let codec = self.lookup(code)?;
        let fields = codec
            .fields
            .iter()
            .map(|f| {
                let (semantic_type, encoding) = match f.kind {
                    SubFieldKind::Float { width, scale } => (
                        SemanticType::Float32,
                        FieldEncoding::AsciiFloat32 {
                            offset: f.offset,
                            width,
                            scale,
                            bias: 0.0,
                        },
                    ),
                    SubFieldKind::Short { width } => (
                        SemanticType::Int16,
                        FieldEncoding::AsciiInt16 {
                            offset: f.offset,
                            width,
                        },
                    ),
                    SubFieldKind::Int { width } => (
                        SemanticType::Int32,
                        FieldEncoding::AsciiInt32 {
                            offset: f.offset,
                            width,
                        },
                    ),
                    SubFieldKind::Text { width } => (
                        SemanticType::Text,
                        FieldEncoding::AsciiText {
                            offset: f.offset,
                            width,
                        },
                    ),
                    SubFieldKind::MandatoryPressure => {
                        (SemanticType::Float32, FieldEncoding::MandatoryPressure)
                    }
                };
                FieldDescriptor::flat(f.name, semantic_type, encoding)
            })
            .collect();
        Some(Schema { fields })
    }
}

/// Decode one item into values in layout order.
fn decode_item(codec: &CategoryCodec, buf: &[u8], base: usize, item_index: usize) -> Vec<Value> {
    codec
        .fields
        .iter()
        .map(|f| match f.kind {
            SubFieldKind::Float { width, scale } => {
                Value::Float32(buffer::ascii_f32(buf, base + f.offset, width, scale))
            }
            SubFieldKind::Short { width } => {
                Value::Int16(buffer::ascii_i16(buf, base + f.offset, width))
            }
            SubFieldKind::Int { width } => {
                Value::Int32(buffer::ascii_i32(buf, base + f.offset, width))
            }
            SubFieldKind::Text { width } => {
                Value::Text(buffer::ascii_text(buf, base + f.offset, width))
            }
            SubFieldKind::MandatoryPressure => Value::Float32(
                on29::MANDATORY_PRESSURE_LEVELS
                    .get(item_index)
                    .copied()
                    .unwrap_or(missing::FLOAT),
            ),
        })
        .collect()
}
