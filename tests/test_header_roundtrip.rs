use cubeio::{CubeAccessor, CubeError, HeaderCodec, Interleave, Sample};
use std::io::Write;
use std::path::{Path, PathBuf};

fn write_cube_with_header(dir: &Path, name: &str, extra_header_lines: &str) -> PathBuf {
    let (rows, cols, bands) = (4usize, 4usize, 5usize);
    let data_path = dir.join(format!("{}.bip", name));
    let mut bytes = Vec::with_capacity(rows * cols * bands * 4);
    for r in 0..rows {
        for c in 0..cols {
            for b in 0..bands {
                bytes.extend_from_slice(&((r * 100 + c * 10 + b) as f32).to_le_bytes());
            }
        }
    }
    std::fs::write(&data_path, bytes).unwrap();

    let mut header = std::fs::File::create(dir.join(format!("{}.hdr", name))).unwrap();
    write!(
        header,
        "ENVI\n\
         samples = {}\n\
         lines = {}\n\
         bands = {}\n\
         data type = 4\n\
         interleave = bip\n\
         byte order = 0\n\
         wavelength = {{ 400, 450, 500, 550, 600 }}\n\
         {}",
        cols, rows, bands, extra_header_lines
    )
    .unwrap();
    data_path
}

#[test]
fn test_bad_band_list_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "bbl", "");

    let mask = [1u8, 0, 1, 1, 0];
    {
        let mut accessor = CubeAccessor::open(&path).unwrap();
        assert!(accessor.get_bad_band_list().is_none());
        accessor.set_bad_band_list(Some(&mask)).unwrap();
        assert_eq!(accessor.get_bad_band_list().as_deref(), Some(&mask[..]));
        accessor.close();
    }

    let reopened = CubeAccessor::open(&path).unwrap();
    assert_eq!(reopened.get_bad_band_list().as_deref(), Some(&mask[..]));
    assert_eq!(reopened.bad_bands(), vec![1, 4]);
    assert!(!reopened.is_band_good(1));
    assert!(reopened.is_band_good(0));
}

#[test]
fn test_clearing_bad_band_list_removes_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "clear", "bbl = { 1, 1, 0, 1, 1 }\n");

    let mut accessor = CubeAccessor::open(&path).unwrap();
    assert_eq!(accessor.bad_bands(), vec![2]);
    accessor.set_bad_band_list(None).unwrap();
    assert!(accessor.get_bad_band_list().is_none());

    // The re-parsed header must have no bbl key at all
    let doc = HeaderCodec::read_file(dir.path().join("clear.hdr")).unwrap();
    assert!(!doc.contains_key("bbl"));
}

#[test]
fn test_bad_band_list_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "invalid", "");
    let mut accessor = CubeAccessor::open(&path).unwrap();

    assert!(matches!(
        accessor.set_bad_band_list(Some(&[1, 0])),
        Err(CubeError::BandMaskLengthMismatch { expected: 5, found: 2 })
    ));
    assert!(matches!(
        accessor.set_bad_band_list(Some(&[1, 0, 2, 1, 1])),
        Err(CubeError::InvalidBandMaskValue { index: 2, .. })
    ));
    // Failed sets never became durable
    let doc = HeaderCodec::read_file(dir.path().join("invalid.hdr")).unwrap();
    assert!(!doc.contains_key("bbl"));
}

#[test]
fn test_mismatched_bbl_on_load_degrades_to_absent() {
    let dir = tempfile::tempdir().unwrap();
    // Three entries for a five-band cube
    let path = write_cube_with_header(dir.path(), "shortbbl", "bbl = { 1, 0, 1 }\n");
    let accessor = CubeAccessor::open(&path).unwrap();
    assert!(accessor.get_bad_band_list().is_none());
    assert!(accessor.is_band_good(1));
    assert!(!accessor.warnings().is_empty());
}

#[test]
fn test_data_ignore_value_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "ignore", "");

    {
        let mut accessor = CubeAccessor::open(&path).unwrap();
        assert_eq!(accessor.get_data_ignore_value(), None);
        accessor.set_data_ignore_value(Some(-9999.0)).unwrap();
        accessor.close();
    }

    let reopened = CubeAccessor::open(&path).unwrap();
    assert_eq!(reopened.get_data_ignore_value(), Some(-9999.0));
}

#[test]
fn test_data_ignore_value_none_text_clears() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "nonetext", "data ignore value = none\n");
    let accessor = CubeAccessor::open(&path).unwrap();
    assert_eq!(accessor.get_data_ignore_value(), None);
}

#[test]
fn test_data_ignore_value_masks_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "masked", "");

    let mut accessor = CubeAccessor::open(&path).unwrap();
    // Value at (row 0, col 0, band 0) is 0.0 by the generator
    accessor.set_data_ignore_value(Some(0.0)).unwrap();
    let spectrum = accessor.get_pixel_spectrum(0, 0).unwrap();
    assert_eq!(spectrum[0], Sample::Invalid);
    assert!(spectrum[1].is_valid());
}

#[test]
fn test_unrelated_keys_survive_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(
        dir.path(),
        "custom",
        "map info = { UTM, 1.0, 1.0, 500000, 4000000, 30, 30 }\nsensor type = HyMap\n",
    );

    let mut accessor = CubeAccessor::open(&path).unwrap();
    accessor.set_bad_band_list(Some(&[1, 1, 1, 0, 1])).unwrap();
    accessor.set_data_ignore_value(Some(-1.0)).unwrap();

    let doc = HeaderCodec::read_file(dir.path().join("custom.hdr")).unwrap();
    assert!(doc.contains_key("map info"));
    assert_eq!(doc.get("sensor type").unwrap().as_text(), Some("HyMap"));
    assert_eq!(doc.get("samples").unwrap().as_int(), Some(4));
}

#[test]
fn test_serialization_idempotent_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    write_cube_with_header(dir.path(), "idem", "bbl = { 1, 1, 0, 1, 1 }\n");
    let header_path = dir.path().join("idem.hdr");

    let original = HeaderCodec::read_file(&header_path).unwrap();
    let serialized = HeaderCodec::serialize(&original);
    let reparsed = HeaderCodec::parse(&serialized).unwrap();
    assert!(original.semantically_equal(&reparsed));
}

#[test]
fn test_readonly_header_rejected_and_state_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "ro", "");
    let header_path = dir.path().join("ro.hdr");

    let mut accessor = CubeAccessor::open(&path).unwrap();

    let mut perms = std::fs::metadata(&header_path).unwrap().permissions();
    perms.set_readonly(true);
    std::fs::set_permissions(&header_path, perms.clone()).unwrap();

    let result = accessor.set_bad_band_list(Some(&[1, 1, 0, 1, 1]));
    assert!(matches!(result, Err(CubeError::HeaderNotWritable(_))));
    // In-memory state stays on the last durable value
    assert!(accessor.get_bad_band_list().is_none());

    perms.set_readonly(false);
    std::fs::set_permissions(&header_path, perms).unwrap();
}

#[test]
fn test_reload_observes_external_header_edit() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_cube_with_header(dir.path(), "external", "");
    let header_path = dir.path().join("external.hdr");

    let mut accessor = CubeAccessor::open(&path).unwrap();
    assert!(accessor.get_bad_band_list().is_none());

    // Simulate another process editing the sidecar
    let mut text = std::fs::read_to_string(&header_path).unwrap();
    text.push_str("bbl = { 0, 1, 1, 1, 1 }\n");
    std::fs::write(&header_path, text).unwrap();

    accessor.reload().unwrap();
    assert_eq!(accessor.bad_bands(), vec![0]);
    assert_eq!(accessor.interleave(), Interleave::Bip);
}
