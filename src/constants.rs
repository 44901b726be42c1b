//! Layout constants, magic tokens and missing-value sentinels.
//!
//! Byte offsets and widths documented here are the on-disk contracts of the
//! supported legacy formats. They are the single source of truth for the
//! sniffers, header parsers and codecs.

// =============================================================================
// Missing-value sentinels
// =============================================================================

/// Substituted when a fixed-width numeric field fails to parse ("overflow")
/// or when a per-record read fails under the substitution policy. The legacy
/// decoders silently zeroed such values; the sentinels make the substitution
/// explicit and auditable.
pub mod missing {
    pub const FLOAT: f32 = -99999.0;
    pub const DOUBLE: f64 = -99999.0;
    pub const INT: i32 = -99999;
    pub const SHORT: i16 = -9999;
    pub const BYTE: i8 = -99;
    pub const TIME: i64 = i64::MIN;
}

// =============================================================================
// USPLN/NAPLN delimited text
// =============================================================================

pub mod uspln {
    /// Product-name magic, current naming (`LIGHTNING-USPLN1`, `LIGHTNING-NAPLN1`).
    pub const MAGIC: &str = "^LIGHTNING-..PLN1";

    /// Product-name magic, legacy naming (`USPLN-LIGHTNING`, ...).
    pub const MAGIC_OLD: &str = "^..PLN-LIGHTNING";

    /// Extended-variant marker inside the product name.
    pub const MAGIC_EX: &str = "PLN1EX";

    /// Field counts per stroke line.
    pub const FIELDS_ORIGINAL: usize = 5;
    pub const FIELDS_EXTENDED: usize = 7;

    /// Amplitude magnitude reported when the network could not measure the
    /// stroke. Such strokes are valid records, not rejects.
    pub const AMPLITUDE_UNMEASURED: f32 = 999.0;
}

// =============================================================================
// NMC Office Note 29 category-coded fixed text
// =============================================================================

pub mod on29 {
    /// Fixed-size date/time header preceding each block of reports.
    pub const HEADER_LEN: usize = 60;

    /// Fixed-size identifying prefix of every report.
    pub const PREFIX_LEN: usize = 40;

    /// Category sub-header: code(2) next(3) nlevels(2) nbytes(3).
    pub const CAT_HEADER_LEN: usize = 10;

    /// All offsets inside a report are multiples of this.
    pub const BLOCK_ALIGN: usize = 10;

    /// 10-byte sentinels padding out physical blocks.
    pub const END_RECORD: &[u8; 10] = b"END RECORD";
    pub const END_FILE: &[u8; 10] = b"ENDOF FILE";

    /// Inter-block fill byte.
    pub const FILL: u8 = b'X';

    /// A report declaring this many bytes or more is treated as malformed.
    pub const MAX_REPORT_LEN: usize = 30000;

    /// Standard pressure levels (hPa) for category 1 items, by item position.
    pub const MANDATORY_PRESSURE_LEVELS: [f32; 20] = [
        1000.0, 850.0, 700.0, 500.0, 400.0, 300.0, 250.0, 200.0, 150.0, 100.0, 70.0, 50.0, 30.0,
        20.0, 10.0, 7.0, 5.0, 3.0, 2.0, 1.0,
    ];
}

// =============================================================================
// NLDN fixed binary
// =============================================================================

pub mod nldn {
    /// Literal magic token at the start of every batch header.
    pub const MAGIC: &[u8; 4] = b"NLDN";

    /// Batch header: magic(4) record-count(i32 BE) reserved(76).
    pub const HEADER_LEN: usize = 84;

    /// Stroke record stride.
    pub const RECORD_LEN: usize = 28;
}

// =============================================================================
// Elevation grid with sidecar header
// =============================================================================

pub mod demgrid {
    /// Payload extension recognized by the sniffer.
    pub const PAYLOAD_EXT: &str = "dem";

    /// Sidecar extension at the derived path.
    pub const SIDECAR_EXT: &str = "hdr";

    /// Bytes per elevation sample (big-endian i16).
    pub const SAMPLE_LEN: usize = 2;
}
