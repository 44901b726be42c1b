//! Header parsing for the supported format families.
//!
//! Consumes the fixed-size or line-based header at the front of a file and
//! extracts reference metadata: the reference timestamp, the resolved
//! format variant, and where the first data record starts. For the raster
//! family the header lives in a sidecar file at a derived path; a missing
//! sidecar is an explicit error, never a silent default.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::debug;

use crate::buffer;
use crate::constants::{demgrid, nldn, on29};
use crate::error::{DecodeError, Result};
use crate::sniffer::FormatVariant;

/// Raster geometry from the sidecar header.
#[derive(Debug, Clone)]
pub struct GridInfo {
    pub nrows: usize,
    pub ncols: usize,
    pub ulx_map: Option<f64>,
    pub uly_map: Option<f64>,
    pub xdim: Option<f64>,
    pub ydim: Option<f64>,
}

/// Reference metadata extracted from a file's header.
#[derive(Debug, Clone)]
pub struct HeaderInfo {
    pub variant: FormatVariant,
    /// Reference timestamp, where the format carries one.
    pub reference_time: Option<DateTime<Utc>>,
    /// Byte offset of the first data record.
    pub data_start: u64,
    /// Raster geometry (grid family only).
    pub grid: Option<GridInfo>,
    /// Declared record count of the first batch (binary family only).
    pub batch_count: Option<u32>,
}

impl HeaderInfo {
    /// Bare header for tests and schema derivation that needs no metadata.
    pub fn for_variant(variant: FormatVariant) -> Self {
        Self {
            variant,
            reference_time: None,
            data_start: 0,
            grid: None,
            batch_count: None,
        }
    }
}

/// Parse the header of an already-sniffed file. Advances `file` past the
/// header; on return the stream is positioned at `data_start`.
pub fn parse_header(path: &Path, file: &mut File, variant: FormatVariant) -> Result<HeaderInfo> {
    match variant {
        FormatVariant::UsplnOriginal | FormatVariant::UsplnExtended => {
            parse_uspln_header(path, file)
        }
        FormatVariant::NmcOn29 => parse_on29_header(path, file),
        FormatVariant::NldnBinary => parse_nldn_header(path, file),
        FormatVariant::DemGrid => parse_demgrid_header(path),
    }
}

// ---------------------------------------------------------------------------
// Delimited lightning text
// ---------------------------------------------------------------------------

fn parse_uspln_header(path: &Path, file: &mut File) -> Result<HeaderInfo> {
    let (line, consumed) = read_line(file)?;
    let line = String::from_utf8_lossy(&line);
    let mut tokens = line.trim_end().split(',');
    let product = tokens
        .next()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| DecodeError::header_parse(path, "empty header line"))?;
    let created = tokens
        .next()
        .ok_or_else(|| DecodeError::header_parse(path, "header missing creation timestamp"))?;
    let _end = tokens
        .next()
        .ok_or_else(|| DecodeError::header_parse(path, "header missing end timestamp"))?;

    // The product-name token, not the sniffed prefix, decides the variant.
    let variant = if crate::formats::uspln::is_extended_product(product) {
        FormatVariant::UsplnExtended
    } else {
        FormatVariant::UsplnOriginal
    };

    let reference_time = crate::formats::uspln::parse_time(created)
        .map(|secs| DateTime::from_timestamp(secs, 0).unwrap_or_default())
        .ok_or_else(|| {
            DecodeError::header_parse(path, format!("bad creation timestamp '{created}'"))
        })?;

    debug!(product, %reference_time, "parsed lightning text header");
    Ok(HeaderInfo {
        variant,
        reference_time: Some(reference_time),
        data_start: consumed,
        grid: None,
        batch_count: None,
    })
}

/// Read one header line including its terminator; returns the line bytes
/// (terminator stripped) and the number of bytes consumed.
fn read_line(file: &mut File) -> Result<(Vec<u8>, u64)> {
    let mut line = Vec::new();
    let mut consumed = 0u64;
    let mut byte = [0u8; 1];
    loop {
        let n = file.read(&mut byte)?;
        if n == 0 {
            break;
        }
        consumed += 1;
        if byte[0] == b'\n' {
            break;
        }
        if byte[0] != b'\r' {
            line.push(byte[0]);
        }
    }
    Ok((line, consumed))
}

// ---------------------------------------------------------------------------
// Category-coded fixed text
// ---------------------------------------------------------------------------

/// Parse the 60-byte date/time block header: HHMMYYMMDD in ASCII digits
/// with strict range checks, remainder unused.
pub fn parse_on29_block_time(block: &[u8]) -> std::result::Result<DateTime<Utc>, String> {
    if block.len() < on29::HEADER_LEN {
        return Err(format!(
            "header truncated: {} of {} bytes",
            block.len(),
            on29::HEADER_LEN
        ));
    }
    let hour = buffer::try_ascii_i64(block, 0, 2).ok_or("bad hour digits")?;
    let minute = buffer::try_ascii_i64(block, 2, 2).ok_or("bad minute digits")?;
    let year = buffer::try_ascii_i64(block, 4, 2).ok_or("bad year digits")?;
    let month = buffer::try_ascii_i64(block, 6, 2).ok_or("bad month digits")?;
    let day = buffer::try_ascii_i64(block, 8, 2).ok_or("bad day digits")?;

    if !(0..=24).contains(&hour) {
        return Err(format!("hour {hour} out of range"));
    }
    if !(0..=60).contains(&minute) {
        return Err(format!("minute {minute} out of range"));
    }
    if !(0..=12).contains(&month) {
        return Err(format!("month {month} out of range"));
    }
    if !(0..=31).contains(&day) {
        return Err(format!("day {day} out of range"));
    }

    let date = NaiveDate::from_ymd_opt(2000 + year as i32, month as u32, day as u32)
        .ok_or_else(|| format!("invalid date {year:02}{month:02}{day:02}"))?;
    let time = date
        .and_hms_opt(hour as u32 % 24, minute as u32 % 60, 0)
        .ok_or_else(|| format!("invalid time {hour:02}{minute:02}"))?;
    Ok(DateTime::from_naive_utc_and_offset(time, Utc))
}

fn parse_on29_header(path: &Path, file: &mut File) -> Result<HeaderInfo> {
    let mut block = [0u8; on29::HEADER_LEN];
    file.read_exact(&mut block)
        .map_err(|_| DecodeError::header_parse(path, "file shorter than the 60-byte header"))?;
    let reference_time = parse_on29_block_time(&block)
        .map_err(|reason| DecodeError::header_parse(path, reason))?;

    // Skip the inter-block fill run; the first non-fill byte starts the
    // first report.
    let mut data_start = on29::HEADER_LEN as u64;
    let mut byte = [0u8; 1];
    loop {
        let n = file.read(&mut byte)?;
        if n == 0 || byte[0] != on29::FILL {
            break;
        }
        data_start += 1;
    }

    debug!(%reference_time, data_start, "parsed fixed-text header");
    Ok(HeaderInfo {
        variant: FormatVariant::NmcOn29,
        reference_time: Some(reference_time),
        data_start,
        grid: None,
        batch_count: None,
    })
}

// ---------------------------------------------------------------------------
// Fixed binary
// ---------------------------------------------------------------------------

fn parse_nldn_header(path: &Path, file: &mut File) -> Result<HeaderInfo> {
    let mut block = [0u8; nldn::HEADER_LEN];
    file.read_exact(&mut block)
        .map_err(|_| DecodeError::header_parse(path, "file shorter than the 84-byte header"))?;
    if &block[..4] != nldn::MAGIC {
        return Err(DecodeError::header_parse(path, "missing NLDN magic token"));
    }
    let count = buffer::be_i32(&block, 4)
        .filter(|c| *c >= 0)
        .ok_or_else(|| DecodeError::header_parse(path, "negative batch record count"))?;

    debug!(count, "parsed binary batch header");
    Ok(HeaderInfo {
        variant: FormatVariant::NldnBinary,
        reference_time: None,
        data_start: nldn::HEADER_LEN as u64,
        grid: None,
        batch_count: Some(count as u32),
    })
}

// ---------------------------------------------------------------------------
// Elevation grid sidecar
// ---------------------------------------------------------------------------

fn parse_demgrid_header(path: &Path) -> Result<HeaderInfo> {
    let sidecar = sidecar_path(path).ok_or_else(|| DecodeError::SidecarMissing {
        path: path.with_extension(demgrid::SIDECAR_EXT),
    })?;

    let mut text = String::new();
    File::open(&sidecar)?.read_to_string(&mut text)?;

    let mut nrows = None;
    let mut ncols = None;
    let mut ulx_map = None;
    let mut uly_map = None;
    let mut xdim = None;
    let mut ydim = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        match key.to_ascii_uppercase().as_str() {
            "NROWS" => nrows = value.parse::<usize>().ok(),
            "NCOLS" => ncols = value.parse::<usize>().ok(),
            "ULXMAP" => ulx_map = value.parse::<f64>().ok(),
            "ULYMAP" => uly_map = value.parse::<f64>().ok(),
            "XDIM" => xdim = value.parse::<f64>().ok(),
            "YDIM" => ydim = value.parse::<f64>().ok(),
            "BYTEORDER" => {
                if !value.eq_ignore_ascii_case("M") {
                    return Err(DecodeError::header_parse(
                        &sidecar,
                        format!("unsupported byte order '{value}'"),
                    ));
                }
            }
            _ => {}
        }
    }

    let nrows = nrows
        .filter(|n| *n > 0)
        .ok_or_else(|| DecodeError::header_parse(&sidecar, "missing or invalid NROWS"))?;
    let ncols = ncols
        .filter(|n| *n > 0)
        .ok_or_else(|| DecodeError::header_parse(&sidecar, "missing or invalid NCOLS"))?;

    debug!(nrows, ncols, "parsed grid sidecar header");
    Ok(HeaderInfo {
        variant: FormatVariant::DemGrid,
        reference_time: None,
        data_start: 0,
        grid: Some(GridInfo {
            nrows,
            ncols,
            ulx_map,
            uly_map,
            xdim,
            ydim,
        }),
        batch_count: None,
    })
}

fn sidecar_path(path: &Path) -> Option<std::path::PathBuf> {
    let lower = path.with_extension(demgrid::SIDECAR_EXT);
    if lower.exists() {
        return Some(lower);
    }
    let upper = path.with_extension(demgrid::SIDECAR_EXT.to_ascii_uppercase());
    upper.exists().then_some(upper)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    #[test]
    fn on29_block_time_parses_and_range_checks() {
        let mut block = [b' '; 60];
        block[..10].copy_from_slice(b"1200070101");
        let t = parse_on29_block_time(&block).unwrap();
        assert_eq!(t.to_rfc3339(), "2007-01-01T12:00:00+00:00");

        block[..10].copy_from_slice(b"1261070101"); // minute 61
        assert!(parse_on29_block_time(&block).is_err());
        block[..10].copy_from_slice(b"1200071301"); // month 13
        assert!(parse_on29_block_time(&block).is_err());
        block[..10].copy_from_slice(b"1200070132"); // day 32
        assert!(parse_on29_block_time(&block).is_err());
    }

    #[test]
    fn uspln_header_resolves_variant_from_product_token() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "LIGHTNING-USPLN1EX,2004-10-11T20:45:02,2004-10-11T20:45:02"
        )
        .unwrap();
        file.flush().unwrap();
        let mut f = file.reopen().unwrap();
        f.rewind().unwrap();
        let info = parse_header(file.path(), &mut f, FormatVariant::UsplnOriginal).unwrap();
        assert_eq!(info.variant, FormatVariant::UsplnExtended);
        assert_eq!(info.data_start, 59);
        assert!(info.reference_time.is_some());
    }

    #[test]
    fn missing_sidecar_is_an_explicit_error() {
        let dir = tempfile::tempdir().unwrap();
        let dem = dir.path().join("tile.dem");
        std::fs::write(&dem, [0u8; 8]).unwrap();
        let mut f = File::open(&dem).unwrap();
        let err = parse_header(&dem, &mut f, FormatVariant::DemGrid).unwrap_err();
        assert!(matches!(err, DecodeError::SidecarMissing { .. }));
    }

    #[test]
    fn sidecar_geometry_is_required_and_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let dem = dir.path().join("tile.dem");
        std::fs::write(&dem, [0u8; 8]).unwrap();
        std::fs::write(
            dir.path().join("tile.hdr"),
            "BYTEORDER M\nNROWS 2\nNCOLS 2\nULXMAP -99.995\nULYMAP 40.0\nXDIM 0.01\nYDIM 0.01\n",
        )
        .unwrap();
        let mut f = File::open(&dem).unwrap();
        let info = parse_header(&dem, &mut f, FormatVariant::DemGrid).unwrap();
        let grid = info.grid.unwrap();
        assert_eq!((grid.nrows, grid.ncols), (2, 2));
        assert_eq!(grid.ulx_map, Some(-99.995));
    }
}
