use cubeio::{
    CubeAccessor, CubeError, Interleave, OpenOptions, Sample, SourceKind, StorageMode,
};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Deterministic generator so every (row, col, band) has a unique value
fn synth_value(row: usize, col: usize, band: usize) -> f32 {
    (row * 10_000 + col * 100 + band) as f32
}

fn physical_index(
    row: usize,
    col: usize,
    band: usize,
    rows: usize,
    cols: usize,
    bands: usize,
    interleave: Interleave,
) -> usize {
    match interleave {
        Interleave::Bsq => (band * rows + row) * cols + col,
        Interleave::Bil => (row * bands + band) * cols + col,
        Interleave::Bip => (row * cols + col) * bands + band,
    }
}

/// Write a little-endian f32 ENVI cube plus its header sidecar
fn write_envi_cube(
    dir: &Path,
    name: &str,
    rows: usize,
    cols: usize,
    bands: usize,
    interleave: Interleave,
    extra_header_lines: &str,
) -> PathBuf {
    let data_path = dir.join(format!("{}.{}", name, interleave));
    let mut bytes = vec![0u8; rows * cols * bands * 4];
    for r in 0..rows {
        for c in 0..cols {
            for b in 0..bands {
                let index = physical_index(r, c, b, rows, cols, bands, interleave);
                bytes[index * 4..index * 4 + 4]
                    .copy_from_slice(&synth_value(r, c, b).to_le_bytes());
            }
        }
    }
    std::fs::write(&data_path, bytes).expect("failed to write data file");

    let header_path = dir.join(format!("{}.hdr", name));
    let mut header = std::fs::File::create(header_path).expect("failed to create header");
    write!(
        header,
        "ENVI\n\
         samples = {}\n\
         lines = {}\n\
         bands = {}\n\
         data type = 4\n\
         interleave = {}\n\
         byte order = 0\n\
         {}",
        cols, rows, bands, interleave, extra_header_lines
    )
    .expect("failed to write header");

    data_path
}

#[test]
fn test_interleave_equivalence_across_files() {
    let dir = tempfile::tempdir().unwrap();
    let (rows, cols, bands) = (6, 5, 4);

    let accessors: Vec<CubeAccessor> = [Interleave::Bsq, Interleave::Bil, Interleave::Bip]
        .into_iter()
        .map(|il| {
            let path = write_envi_cube(dir.path(), &format!("cube_{}", il), rows, cols, bands, il, "");
            CubeAccessor::open(&path).expect("failed to open cube")
        })
        .collect();

    for accessor in &accessors {
        let shape = accessor.shape();
        assert_eq!((shape.rows, shape.cols, shape.bands), (rows, cols, bands));
    }

    // Pixel spectra and band planes agree for all in-range coordinates
    for y in 0..rows {
        for x in 0..cols {
            let reference = accessors[0].get_pixel_spectrum(x, y).unwrap();
            for accessor in &accessors[1..] {
                assert_eq!(accessor.get_pixel_spectrum(x, y).unwrap(), reference);
            }
            for b in 0..bands {
                assert_eq!(
                    reference[b],
                    Sample::Valid(synth_value(y, x, b) as f64),
                    "wrong value at ({}, {}, {})",
                    y,
                    x,
                    b
                );
            }
        }
    }
    for b in 0..bands {
        let reference = accessors[0].get_band_data(b).unwrap();
        for accessor in &accessors[1..] {
            assert_eq!(accessor.get_band_data(b).unwrap(), reference);
        }
    }
}

#[test]
fn test_memmap_and_resident_reads_agree() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_envi_cube(dir.path(), "modes", 4, 7, 3, Interleave::Bil, "");

    let lazy = CubeAccessor::open(&path).unwrap();
    let resident = CubeAccessor::open_with_options(
        &path,
        &OpenOptions {
            load_to_ram: true,
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(lazy.storage_mode(), StorageMode::Memmapped);
    assert_eq!(resident.storage_mode(), StorageMode::Resident);

    for y in 0..4 {
        assert_eq!(
            lazy.extract_line_spectra(y).unwrap(),
            resident.extract_line_spectra(y).unwrap()
        );
    }
    assert_eq!(lazy.get_band_data(2).unwrap(), resident.get_band_data(2).unwrap());
}

#[test]
fn test_open_via_header_path() {
    let dir = tempfile::tempdir().unwrap();
    write_envi_cube(dir.path(), "viahdr", 3, 3, 2, Interleave::Bsq, "");
    let accessor = CubeAccessor::open(dir.path().join("viahdr.hdr")).unwrap();
    assert_eq!(accessor.source_kind(), SourceKind::Envi);
    assert_eq!(
        accessor.get_pixel_spectrum(1, 2).unwrap()[1],
        Sample::Valid(synth_value(2, 1, 1) as f64)
    );
}

#[test]
fn test_missing_header_is_typed_failure() {
    let dir = tempfile::tempdir().unwrap();
    let orphan = dir.path().join("orphan.bsq");
    std::fs::write(&orphan, vec![0u8; 16]).unwrap();
    assert!(matches!(
        CubeAccessor::open(&orphan),
        Err(CubeError::HeaderMissing(_))
    ));
}

#[test]
fn test_missing_data_is_typed_failure() {
    let dir = tempfile::tempdir().unwrap();
    let header = dir.path().join("orphan.hdr");
    std::fs::write(&header, "ENVI\nsamples = 2\nlines = 2\nbands = 1\ndata type = 4\ninterleave = bsq\n").unwrap();
    assert!(matches!(
        CubeAccessor::open(&header),
        Err(CubeError::DataMissing(_))
    ));
}

#[test]
fn test_nonexistent_path_is_file_not_found() {
    assert!(matches!(
        CubeAccessor::open("/definitely/not/here.bip"),
        Err(CubeError::FileNotFound(_))
    ));
}

#[test]
fn test_truncated_data_file_fails_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_envi_cube(dir.path(), "short", 4, 4, 2, Interleave::Bip, "");
    // Chop off half the file so the header's geometry no longer fits
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
    assert!(CubeAccessor::open(&path).is_err());
}

#[test]
fn test_force_interleave_overrides_wrong_header() {
    let dir = tempfile::tempdir().unwrap();
    // Data physically laid out BIP, header wrongly claims BSQ
    let path = write_envi_cube(dir.path(), "lying", 4, 3, 5, Interleave::Bip, "");
    let header_path = dir.path().join("lying.hdr");
    let text = std::fs::read_to_string(&header_path)
        .unwrap()
        .replace("interleave = bip", "interleave = bsq");
    std::fs::write(&header_path, text).unwrap();

    let forced = CubeAccessor::open_with_options(
        &path,
        &OpenOptions {
            force_interleave: Some(Interleave::Bip),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(forced.interleave(), Interleave::Bip);
    assert_eq!(
        forced.get_pixel_spectrum(2, 1).unwrap()[3],
        Sample::Valid(synth_value(1, 2, 3) as f64)
    );
}

#[test]
fn test_force_interleave_rescues_missing_key() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_envi_cube(dir.path(), "nokey", 3, 3, 2, Interleave::Bil, "");
    let header_path = dir.path().join("nokey.hdr");
    let text = std::fs::read_to_string(&header_path)
        .unwrap()
        .replace("interleave = bil\n", "");
    std::fs::write(&header_path, text).unwrap();

    // Without the override the header is malformed
    assert!(CubeAccessor::open(&path).is_err());

    let rescued = CubeAccessor::open_with_options(
        &path,
        &OpenOptions {
            force_interleave: Some(Interleave::Bil),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(rescued.interleave(), Interleave::Bil);
}

#[test]
fn test_big_endian_cube() {
    let dir = tempfile::tempdir().unwrap();
    let (rows, cols, bands) = (2, 2, 2);
    let data_path = dir.path().join("be.bsq");
    let mut bytes = Vec::new();
    for b in 0..bands {
        for r in 0..rows {
            for c in 0..cols {
                bytes.extend_from_slice(&synth_value(r, c, b).to_be_bytes());
            }
        }
    }
    std::fs::write(&data_path, bytes).unwrap();
    std::fs::write(
        dir.path().join("be.hdr"),
        "ENVI\nsamples = 2\nlines = 2\nbands = 2\ndata type = 4\ninterleave = bsq\nbyte order = 1\n",
    )
    .unwrap();

    let accessor = CubeAccessor::open(&data_path).unwrap();
    assert_eq!(
        accessor.get_pixel_spectrum(1, 0).unwrap()[1],
        Sample::Valid(synth_value(0, 1, 1) as f64)
    );
}

#[test]
fn test_coordinate_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_envi_cube(dir.path(), "bounds", 3, 4, 2, Interleave::Bsq, "");
    let accessor = CubeAccessor::open(&path).unwrap();

    assert!(matches!(
        accessor.get_pixel_spectrum(4, 0),
        Err(CubeError::CoordinateOutOfRange { .. })
    ));
    assert!(matches!(
        accessor.get_band_data(2),
        Err(CubeError::CoordinateOutOfRange { .. })
    ));
    assert!(matches!(
        accessor.extract_line_spectra(3),
        Err(CubeError::CoordinateOutOfRange { .. })
    ));
}
