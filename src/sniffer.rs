//! Format recognition from a short byte prefix.
//!
//! Pure function of the first bytes of a file (at most 64 for the binary
//! magics, the first line for the text formats). The sniffer never touches
//! stream position; callers seek back to offset 0 before scanning. The
//! path-aware wrapper adds the checks a bare prefix cannot decide, such as
//! the raster family's payload extension.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::buffer;
use crate::constants::{demgrid, nldn, uspln};
use crate::error::{DecodeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FormatVariant {
    /// Delimited lightning text, 5 fields per stroke, ends in stroke count.
    UsplnOriginal,
    /// Delimited lightning text, 7 fields per stroke, ends in ellipse angle.
    UsplnExtended,
    /// Category-coded fixed-text station reports (NMC Office Note 29).
    NmcOn29,
    /// Fixed binary lightning strokes, `NLDN` magic, 28-byte records.
    NldnBinary,
    /// Elevation raster rows with a mandatory `.hdr` sidecar.
    DemGrid,
}

static USPLN_MAGIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(uspln::MAGIC).unwrap());
static USPLN_MAGIC_OLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(uspln::MAGIC_OLD).unwrap());
static USPLN_EXTENDED: LazyLock<Regex> = LazyLock::new(|| Regex::new(uspln::MAGIC_EX).unwrap());

/// Number of prefix bytes the sniffer wants to look at.
pub const SNIFF_LEN: usize = 64;

/// Recognize a format from the first bytes of a file. Returns `None` when
/// no registered layout matches; the raster family cannot be recognized
/// from bytes alone and is handled by [`sniff_file`].
pub fn sniff_prefix(prefix: &[u8]) -> Option<FormatVariant> {
    if prefix.len() >= nldn::MAGIC.len() && &prefix[..nldn::MAGIC.len()] == nldn::MAGIC {
        return Some(FormatVariant::NldnBinary);
    }
    if let Some(variant) = sniff_uspln_line(prefix) {
        return Some(variant);
    }
    if looks_like_on29_header(prefix) {
        return Some(FormatVariant::NmcOn29);
    }
    None
}

/// Recognize a file on disk, applying the secondary structural checks the
/// prefix alone cannot decide.
pub fn sniff_file(path: &Path) -> Result<FormatVariant> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; SNIFF_LEN];
    let n = read_up_to(&mut file, &mut prefix)?;
    if let Some(variant) = sniff_prefix(&prefix[..n]) {
        return Ok(variant);
    }
    if path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(demgrid::PAYLOAD_EXT))
    {
        return Ok(FormatVariant::DemGrid);
    }
    Err(DecodeError::NotRecognized {
        path: path.to_path_buf(),
    })
}

fn read_up_to(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn sniff_uspln_line(prefix: &[u8]) -> Option<FormatVariant> {
    let end = prefix
        .iter()
        .position(|&b| b == b'\n' || b == b'\r')
        .unwrap_or(prefix.len());
    let line = std::str::from_utf8(&prefix[..end]).ok()?;
    if USPLN_MAGIC.is_match(line) || USPLN_MAGIC_OLD.is_match(line) {
        if USPLN_EXTENDED.is_match(line) {
            Some(FormatVariant::UsplnExtended)
        } else {
            Some(FormatVariant::UsplnOriginal)
        }
    } else {
        None
    }
}

/// The fixed-text header carries no magic; recognition is structural: ten
/// leading ASCII digits forming in-range date components.
fn looks_like_on29_header(prefix: &[u8]) -> bool {
    if prefix.len() < 10 || !prefix[..10].iter().all(u8::is_ascii_digit) {
        return false;
    }
    let hour = buffer::try_ascii_i64(prefix, 0, 2);
    let minute = buffer::try_ascii_i64(prefix, 2, 2);
    let month = buffer::try_ascii_i64(prefix, 6, 2);
    let day = buffer::try_ascii_i64(prefix, 8, 2);
    matches!(
        (hour, minute, month, day),
        (Some(h), Some(mi), Some(mo), Some(d))
            if (0..=24).contains(&h)
                && (0..=60).contains(&mi)
                && (1..=12).contains(&mo)
                && (1..=31).contains(&d)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_uspln_original_and_extended() {
        assert_eq!(
            sniff_prefix(b"LIGHTNING-USPLN1,2004-10-11T20:45:02,2004-10-11T20:45:02\n"),
            Some(FormatVariant::UsplnOriginal)
        );
        assert_eq!(
            sniff_prefix(b"LIGHTNING-USPLN1EX,2004-10-11T20:45:02,2004-10-11T20:45:02\n"),
            Some(FormatVariant::UsplnExtended)
        );
        assert_eq!(
            sniff_prefix(b"NAPLN-LIGHTNING,2004-10-11T20:45:02,2004-10-11T20:45:02\n"),
            Some(FormatVariant::UsplnOriginal)
        );
    }

    #[test]
    fn recognizes_nldn_magic() {
        let mut prefix = [0u8; 64];
        prefix[..4].copy_from_slice(b"NLDN");
        assert_eq!(sniff_prefix(&prefix), Some(FormatVariant::NldnBinary));
    }

    #[test]
    fn recognizes_on29_digit_header_with_legal_ranges() {
        assert_eq!(
            sniff_prefix(b"1200070101                                 "),
            Some(FormatVariant::NmcOn29)
        );
        // hour 91 is out of range
        assert_eq!(sniff_prefix(b"9100070101    "), None);
        // month 78 is out of range
        assert_eq!(sniff_prefix(b"1234567890    "), None);
    }

    #[test]
    fn garbage_is_not_recognized() {
        assert_eq!(sniff_prefix(b""), None);
        assert_eq!(sniff_prefix(b"\x00\x01\x02\x03garbage"), None);
        assert_eq!(sniff_prefix(b"GRIB2222222222"), None);
    }
}
