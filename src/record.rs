//! Decoded record values and the scan index.
//!
//! `RecordIndexEntry` is the unit of the scanner's index: one per logical
//! record, sorted by strictly increasing byte offset, immutable once the
//! indexing phase completes. `Record` is a fully decoded record; in the
//! steady state only the first accepted record of a file is ever fully
//! decoded this way (it seeds the schema), everything else is decoded on
//! demand through projections.

/// A single decoded scalar.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Float32(f32),
    Float64(f64),
    Text(String),
    /// Seconds since the Unix epoch, UTC.
    Time(i64),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int8(v) => Some(*v as f64),
            Value::Int16(v) => Some(*v as f64),
            Value::Int32(v) => Some(*v as f64),
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Time(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }
}

/// One variable-count group of sub-items sharing a category code.
#[derive(Debug, Clone)]
pub struct CategoryGroup {
    pub code: u8,
    /// One entry per item, values in the codec's field order.
    pub items: Vec<Vec<Value>>,
}

/// A fully decoded top-level record.
#[derive(Debug, Clone, Default)]
pub struct Record {
    /// Flat fields in source order.
    pub fields: Vec<(String, Value)>,
    /// Category-coded nested groups, in the order they appear in the record.
    pub groups: Vec<CategoryGroup>,
}

impl Record {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Key fields captured during the scan, kept small on purpose: enough to
/// group and locate records without re-reading the file.
#[derive(Debug, Clone, Default)]
pub struct KeyFields {
    pub station_id: Option<String>,
    /// Seconds since the Unix epoch, UTC.
    pub time: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Category code / item count pairs declared by the record, in order.
    pub categories: Vec<(u8, u16)>,
}

/// One entry per logical record in the single-pass index.
#[derive(Debug, Clone)]
pub struct RecordIndexEntry {
    pub byte_offset: u64,
    pub byte_length: u32,
    pub key_fields: KeyFields,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn as_f64_widens_numerics_and_rejects_text() {
        assert_eq!(Value::Int8(-9).as_f64(), Some(-9.0));
        assert_eq!(Value::Int16(-42).as_f64(), Some(-42.0));
        assert_eq!(Value::Int32(7).as_f64(), Some(7.0));
        assert_eq!(Value::Float32(1.5).as_f64(), Some(1.5));
        assert_eq!(Value::Float64(-0.25).as_f64(), Some(-0.25));
        assert_eq!(Value::Time(1_097_527_442).as_f64(), Some(1_097_527_442.0));
        assert_eq!(Value::Text("724691".to_string()).as_f64(), None);
    }
}
