//! Integration tests for the decoding pipeline across all format families
//!
//! These tests build complete synthetic archive files on disk and run the
//! whole pipeline against them: sniffing, header parsing, the indexing
//! scan, schema derivation and targeted section reads.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use obs_decoder::constants::missing;
use obs_decoder::formats::nldn::RawStrokeRecord;
use obs_decoder::{
    ColumnData, DecodeError, Decoder, DecoderOptions, FormatVariant, RecordSelection,
    SemanticType, sniff_file,
};
use tempfile::TempDir;

/// Route scan/read diagnostics into the test harness output.
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn write_fixture(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = File::create(&path).unwrap();
    f.write_all(bytes).unwrap();
    path
}

// ---------------------------------------------------------------------------
// Delimited lightning text
// ---------------------------------------------------------------------------

fn uspln_extended_fixture() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        b"LIGHTNING-USPLN1EX,2004-10-11T20:45:02,2004-10-11T20:45:02\n",
    );
    out.extend_from_slice(b"2004-10-11T20:44:02,32.6785331,-105.4344587,-96.1,0.5,0.25,0\n");
    out.extend_from_slice(b"2004-10-11T20:44:05.123,21.2628231,-86.9596634,53.1,0.25,0.25,45\n");
    // packets repeat the header line mid-file
    out.extend_from_slice(
        b"LIGHTNING-USPLN1EX,2004-10-11T20:46:02,2004-10-11T20:46:02\n",
    );
    out.extend_from_slice(b"this line is not a stroke\n");
    out.extend_from_slice(b"2004-10-11T20:45:10,40.0,-100.0,12.5,1.0,0.5,90\n");
    out
}

/// Same packet shape without the corrupt line, for tests where fail-fast
/// must survive the scan.
fn uspln_extended_clean_fixture() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(
        b"LIGHTNING-USPLN1EX,2004-10-11T20:45:02,2004-10-11T20:45:02\n",
    );
    out.extend_from_slice(b"2004-10-11T20:44:02,32.6785331,-105.4344587,-96.1,0.5,0.25,0\n");
    out.extend_from_slice(b"2004-10-11T20:45:10,40.0,-100.0,12.5,1.0,0.5,90\n");
    out
}

#[test]
fn uspln_extended_end_to_end() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_fixture());

    assert_eq!(sniff_file(&path).unwrap(), FormatVariant::UsplnExtended);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.variant(), FormatVariant::UsplnExtended);
    assert_eq!(decoder.record_count(), 3);
    assert_eq!(decoder.scan_report().records_skipped, 1);

    let schema = decoder.schema();
    assert!(schema.field_id("majorAxis").is_some());
    assert!(schema.field_id("strokeCount").is_none());

    let projection = [
        schema.field_id("lat").unwrap(),
        schema.field_id("amplitude").unwrap(),
        schema.field_id("orientation").unwrap(),
    ];
    let section = decoder
        .read(RecordSelection::contiguous(0, 3), &projection)
        .unwrap();
    assert_eq!(
        section.column("lat").unwrap().data,
        ColumnData::Float64(vec![32.6785331, 21.2628231, 40.0])
    );
    assert_eq!(
        section.column("amplitude").unwrap().data,
        ColumnData::Float32(vec![-96.1, 53.1, 12.5])
    );
    assert_eq!(
        section.column("orientation").unwrap().data,
        ColumnData::Int32(vec![0, 45, 90])
    );

    // index offsets are strictly increasing
    let offsets: Vec<u64> = decoder.index().iter().map(|e| e.byte_offset).collect();
    assert!(offsets.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn uspln_read_is_idempotent_and_strides_work() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_fixture());
    let decoder = Decoder::open(&path).unwrap();

    let projection = [decoder.schema().field_id("lat").unwrap()];
    let sel = RecordSelection::strided(0, 2, 2);
    let first = decoder.read(sel, &projection).unwrap();
    let second = decoder.read(sel, &projection).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        first.column("lat").unwrap().data,
        ColumnData::Float64(vec![32.6785331, 40.0])
    );
}

#[test]
fn uspln_fail_fast_aborts_on_the_bad_line() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_fixture());
    let err = Decoder::open_with(&path, DecoderOptions::default().fail_fast(true)).unwrap_err();
    assert!(matches!(err, DecodeError::RecordDecode { .. }));
}

// ---------------------------------------------------------------------------
// Fixed binary stroke batches
// ---------------------------------------------------------------------------

fn nldn_header(count: i32) -> Vec<u8> {
    let mut h = vec![0u8; 84];
    h[..4].copy_from_slice(b"NLDN");
    h[4..8].copy_from_slice(&count.to_be_bytes());
    h
}

fn nldn_stroke(tsec: i32, lat: i32, lon: i32, sgnl: i16) -> [u8; 28] {
    RawStrokeRecord {
        tsec,
        nsec: 500,
        lat,
        lon,
        sgnl,
        multiplicity: 2,
        ..RawStrokeRecord::default()
    }
    .encode()
}

#[test]
fn nldn_batches_end_to_end() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut bytes = nldn_header(2);
    bytes.extend_from_slice(&nldn_stroke(1_097_527_442, 41_123, -105_456, -961));
    bytes.extend_from_slice(&nldn_stroke(1_097_527_443, 41_200, -105_500, 120));
    // a second batch follows immediately
    bytes.extend_from_slice(&nldn_header(1));
    bytes.extend_from_slice(&nldn_stroke(1_097_527_450, 42_000, -104_000, 55));
    let path = write_fixture(&dir, "strokes.bin", &bytes);

    assert_eq!(sniff_file(&path).unwrap(), FormatVariant::NldnBinary);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 3);
    assert_eq!(decoder.scan_report().records_skipped, 0);

    let schema = decoder.schema();
    let projection = [
        schema.field_id("lat").unwrap(),
        schema.field_id("signalStrength").unwrap(),
    ];
    let section = decoder
        .read(RecordSelection::contiguous(0, 3), &projection)
        .unwrap();
    assert_eq!(
        section.column("lat").unwrap().data,
        ColumnData::Float64(vec![41.123, 41.2, 42.0])
    );
    let ColumnData::Float32(sgnl) = &section.column("signalStrength").unwrap().data else {
        panic!("signalStrength column has the wrong type");
    };
    assert!((sgnl[0] + 96.1).abs() < 1e-4);
    assert!((sgnl[1] - 12.0).abs() < 1e-4);

    // key fields were captured during the scan
    assert_eq!(decoder.index()[2].key_fields.time, Some(1_097_527_450));
}

#[test]
fn nldn_truncated_tail_is_skipped_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut bytes = nldn_header(2);
    bytes.extend_from_slice(&nldn_stroke(100, 41_000, -105_000, 10));
    bytes.extend_from_slice(&[0u8; 13]); // half a record
    let path = write_fixture(&dir, "strokes.bin", &bytes);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 1);
    assert_eq!(decoder.scan_report().records_skipped, 1);
}

// ---------------------------------------------------------------------------
// Category-coded fixed text
// ---------------------------------------------------------------------------

/// 90-byte report: category 1 with two mandatory levels, the second item
/// truncated by the declared report length.
fn on29_report_cat1() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"03950"); // lat 39.50
    body.extend_from_slice(b"25500"); // lon 360 - 255.00
    body.extend_from_slice(b"724691");
    body.extend_from_slice(b"1200");
    body.extend_from_slice(b"       ");
    body.extend_from_slice(b"011");
    body.extend_from_slice(b"01625");
    body.extend_from_slice(b"00");
    body.extend_from_slice(b"009");
    body.extend_from_slice(b"0100902005");
    body.extend_from_slice(b"00138 015063270015ABCD");
    body.extend_from_slice(b"00822-015033265045");
    assert_eq!(body.len(), 90);
    body
}

/// 70-byte report: category 2 with one level.
fn on29_report_cat2() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"04000");
    body.extend_from_slice(b"26000");
    body.extend_from_slice(b"725001");
    body.extend_from_slice(b"2300");
    body.extend_from_slice(b"       ");
    body.extend_from_slice(b"011");
    body.extend_from_slice(b"00123");
    body.extend_from_slice(b"00");
    body.extend_from_slice(b"007");
    body.extend_from_slice(b"0200701002");
    body.extend_from_slice(b"10000 015063AB ");
    body.resize(70, b' ');
    body
}

fn on29_block(header_digits: &[u8; 10], reports: &[&[u8]]) -> Vec<u8> {
    let mut out = vec![b' '; 60];
    out[..10].copy_from_slice(header_digits);
    out.extend_from_slice(&[b'X'; 10]);
    for r in reports {
        out.extend_from_slice(r);
    }
    out.extend_from_slice(b"END RECORD");
    out.extend_from_slice(b"ENDOF FILE");
    out.extend_from_slice(&[b'X'; 10]);
    out
}

#[test]
fn on29_end_to_end_with_nested_categories() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let report = on29_report_cat1();
    let bytes = on29_block(b"1200070101", &[&report]);
    let path = write_fixture(&dir, "upperair.txt", &bytes);

    assert_eq!(sniff_file(&path).unwrap(), FormatVariant::NmcOn29);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 1);
    assert_eq!(decoder.scan_report().station_count, 1);

    let schema = decoder.schema();
    let station = schema.field_id("stationId").unwrap();
    let levels = schema.field_id("mandatoryLevels").unwrap();
    assert_eq!(
        schema.get(levels).unwrap().semantic_type,
        SemanticType::NestedSequence
    );

    let section = decoder
        .read(RecordSelection::contiguous(0, 1), &[station, levels])
        .unwrap();
    assert_eq!(
        section.column("stationId").unwrap().data,
        ColumnData::Text(vec!["724691".to_string()])
    );
    let ColumnData::Nested(nested) = &section.column("mandatoryLevels").unwrap().data else {
        panic!("nested column has the wrong type");
    };
    assert_eq!(nested.counts, vec![2]);
    let ColumnData::Float32(pressure) = &nested
        .columns
        .iter()
        .find(|c| c.name == "pressure")
        .unwrap()
        .data
    else {
        panic!("pressure column has the wrong type");
    };
    assert_eq!(pressure, &vec![1000.0, 850.0]);
    let ColumnData::Int16(wind_dir) = &nested
        .columns
        .iter()
        .find(|c| c.name == "windDir")
        .unwrap()
        .data
    else {
        panic!("windDir column has the wrong type");
    };
    assert_eq!(wind_dir, &vec![270, 265]);
}

#[test]
fn on29_multi_block_resolves_times_per_block() {
    let dir = TempDir::new().unwrap();
    let mut bytes = on29_block(b"1200070101", &[&on29_report_cat1()]);
    // second block, reference 2007-01-02 00:00; its 23Z report is yesterday's
    bytes.extend_from_slice(&on29_block(b"0000070102", &[&on29_report_cat2()]));
    let path = write_fixture(&dir, "upperair.txt", &bytes);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 2);
    assert_eq!(decoder.scan_report().station_count, 2);

    let times: Vec<i64> = decoder
        .index()
        .iter()
        .map(|e| e.key_fields.time.unwrap())
        .collect();
    // 2007-01-01T12:00Z and 2007-01-01T23:00Z
    assert_eq!(times, vec![1_167_652_800, 1_167_692_400]);

    // category 2 never appeared in the first record, so its group reads empty
    let levels = decoder.schema().field_id("mandatoryLevels").unwrap();
    let section = decoder
        .read(RecordSelection::contiguous(0, 2), &[levels])
        .unwrap();
    let ColumnData::Nested(nested) = &section.columns[0].data else {
        panic!("nested column has the wrong type");
    };
    assert_eq!(nested.counts, vec![2, 0]);
}

#[test]
fn on29_resynchronizes_across_a_corrupt_region() {
    let dir = TempDir::new().unwrap();
    let report = on29_report_cat1();
    let mut out = vec![b' '; 60];
    out[..10].copy_from_slice(b"1200070101");
    out.extend_from_slice(&[b'X'; 10]);
    out.extend_from_slice(&report);
    out.extend_from_slice(b"@@@@@@@@@@"); // one corrupt 10-byte word
    out.extend_from_slice(&report);
    out.extend_from_slice(b"END RECORD");
    out.extend_from_slice(b"ENDOF FILE");
    let path = write_fixture(&dir, "upperair.txt", &out);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 2);
    assert_eq!(decoder.scan_report().records_skipped, 1);
    assert!(decoder.scan_report().resync_events >= 1);
}

#[test]
fn on29_strict_categories_flags_uncovered_codes() {
    let dir = TempDir::new().unwrap();
    let bytes = on29_block(b"1200070101", &[&on29_report_cat1(), &on29_report_cat2()]);
    let path = write_fixture(&dir, "upperair.txt", &bytes);

    // the faithful default scans clean
    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 2);

    let err = Decoder::open_with(&path, DecoderOptions::default().strict_categories(true))
        .unwrap_err();
    assert!(matches!(
        err,
        DecodeError::SchemaCoverage { code: 2, .. }
    ));
}

// ---------------------------------------------------------------------------
// Elevation grid with sidecar
// ---------------------------------------------------------------------------

#[test]
fn demgrid_end_to_end() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let samples: [i16; 6] = [100, 250, -32768, 0, 17, 4200];
    let mut bytes = Vec::new();
    for s in samples {
        bytes.extend_from_slice(&s.to_be_bytes());
    }
    let path = write_fixture(&dir, "tile.dem", &bytes);
    std::fs::write(
        dir.path().join("tile.hdr"),
        "BYTEORDER M\nNROWS 2\nNCOLS 3\nULXMAP -99.995\nULYMAP 40.0\nXDIM 0.01\nYDIM 0.01\n",
    )
    .unwrap();

    assert_eq!(sniff_file(&path).unwrap(), FormatVariant::DemGrid);

    let decoder = Decoder::open(&path).unwrap();
    assert_eq!(decoder.record_count(), 2);
    let grid = decoder.header().grid.as_ref().unwrap();
    assert_eq!((grid.nrows, grid.ncols), (2, 3));

    let section = decoder
        .read_all(RecordSelection::contiguous(0, 2))
        .unwrap();
    let ColumnData::Nested(nested) = &section.column("elevation").unwrap().data else {
        panic!("elevation column has the wrong type");
    };
    assert_eq!(nested.counts, vec![3, 3]);
    assert_eq!(
        nested.columns[0].data,
        ColumnData::Int16(vec![100, 250, -32768, 0, 17, 4200])
    );

    // the second row alone, via a strided selection
    let tail = decoder
        .read(RecordSelection::strided(1, 1, 2), &[0])
        .unwrap();
    let ColumnData::Nested(nested) = &tail.columns[0].data else {
        panic!("elevation column has the wrong type");
    };
    assert_eq!(nested.columns[0].data, ColumnData::Int16(vec![0, 17, 4200]));
}

#[test]
fn demgrid_missing_sidecar_fails_the_open() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "tile.dem", &[0u8; 12]);
    let err = Decoder::open(&path).unwrap_err();
    assert!(matches!(err, DecodeError::SidecarMissing { .. }));
}

// ---------------------------------------------------------------------------
// Cross-cutting behavior
// ---------------------------------------------------------------------------

#[test]
fn unrecognized_bytes_are_a_distinct_error() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "notes.txt", b"nothing resembling an archive\n");
    let err = sniff_file(&path).unwrap_err();
    assert!(matches!(err, DecodeError::NotRecognized { .. }));
}

#[test]
fn invalid_selections_and_projections_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_fixture());
    let decoder = Decoder::open(&path).unwrap();

    let lat = [decoder.schema().field_id("lat").unwrap()];
    for bad in [
        decoder.read(RecordSelection::strided(0, 2, 0), &lat),
        decoder.read(RecordSelection::contiguous(2, 5), &lat),
        decoder.read(RecordSelection::contiguous(0, 1), &[42]),
    ] {
        assert!(matches!(
            bad.unwrap_err(),
            DecodeError::InvalidArgument { .. }
        ));
    }

    // an empty selection is legal and yields empty columns
    let empty = decoder
        .read(RecordSelection::contiguous(0, 0), &lat)
        .unwrap();
    assert_eq!(empty.column("lat").unwrap().data, ColumnData::Float64(vec![]));
}

#[test]
fn cancellation_flag_aborts_the_scan() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_fixture());

    let flag = Arc::new(AtomicBool::new(true));
    let err =
        Decoder::open_with(&path, DecoderOptions::default().cancel_flag(flag)).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::Cancelled { records_indexed: 0 }
    ));
}

#[test]
fn fail_fast_reads_surface_per_record_io_errors() {
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_clean_fixture());
    let decoder = Decoder::open_with(&path, DecoderOptions::default().fail_fast(true)).unwrap();
    assert_eq!(decoder.record_count(), 2);

    // truncate the file after opening so the last extent cannot be re-read
    let full = std::fs::read(&path).unwrap();
    std::fs::write(&path, &full[..full.len() - 20]).unwrap();

    let amplitude = [decoder.schema().field_id("amplitude").unwrap()];
    let err = decoder
        .read(RecordSelection::contiguous(0, 2), &amplitude)
        .unwrap_err();
    assert!(matches!(err, DecodeError::Io(_)));

    // the intact leading record still reads under the same options
    let head = decoder
        .read(RecordSelection::contiguous(0, 1), &amplitude)
        .unwrap();
    assert_eq!(
        head.column("amplitude").unwrap().data,
        ColumnData::Float32(vec![-96.1])
    );
}

#[test]
fn unreadable_records_substitute_missing_values() {
    // a record indexed past what the file still holds decodes as missing
    let dir = TempDir::new().unwrap();
    let path = write_fixture(&dir, "strokes.txt", &uspln_extended_fixture());
    let decoder = Decoder::open(&path).unwrap();

    // truncate the file after opening so the last extent cannot be re-read
    let full = std::fs::read(&path).unwrap();
    std::fs::write(&path, &full[..full.len() - 20]).unwrap();

    let amplitude = [decoder.schema().field_id("amplitude").unwrap()];
    let section = decoder
        .read(RecordSelection::contiguous(0, 3), &amplitude)
        .unwrap();
    let ColumnData::Float32(vals) = &section.column("amplitude").unwrap().data else {
        panic!("amplitude column has the wrong type");
    };
    assert_eq!(vals[0], -96.1);
    assert_eq!(vals[2], missing::FLOAT);
}
