use crate::io::header::{HeaderCodec, HeaderDocument};
use crate::types::{
    BandPlane, ByteOrder, CubeError, CubeResult, CubeShape, DataType, Interleave, LineSpectra,
    OpenOptions, OpenWarning, Sample, Spectrum, StorageMode,
};
use memmap2::Mmap;
use ndarray::{Array1, Array2};
use num_complex::Complex;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Data-file extensions tried when resolving a header's companion
const DATA_EXTENSIONS: &[&str] = &["bsq", "bil", "bip", "dat", "img", "raw"];

/// Backing byte store for an opened ENVI cube.
///
/// Both variants serve the same strided decode path; `Mapped` pages bytes
/// in on demand while `Resident` materialized them once at open.
enum ByteStore {
    Mapped(Mmap),
    Resident(Vec<u8>),
}

impl ByteStore {
    fn bytes(&self) -> &[u8] {
        match self {
            ByteStore::Mapped(map) => map,
            ByteStore::Resident(buf) => buf,
        }
    }
}

/// Reader for raw-binary ENVI cubes with a text header sidecar
pub struct EnviBackend {
    data_path: PathBuf,
    header_path: PathBuf,
    header: HeaderDocument,
    shape: CubeShape,
    dtype: DataType,
    interleave: Interleave,
    byte_order: ByteOrder,
    header_offset: usize,
    storage_mode: StorageMode,
    store: ByteStore,
    wavelengths: Vec<f64>,
    warnings: Vec<OpenWarning>,
}

impl EnviBackend {
    /// Open an ENVI cube given either its data file or its header file
    pub fn open<P: AsRef<Path>>(path: P, options: &OpenOptions) -> CubeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CubeError::FileNotFound(path.to_path_buf()));
        }

        let (data_path, header_path) = Self::resolve_pair(path)?;
        log::info!(
            "Opening ENVI cube: data={}, header={}",
            data_path.display(),
            header_path.display()
        );

        let header = HeaderCodec::read_file(&header_path)?;
        let mut warnings = Vec::new();

        let rows = Self::required_usize(&header, "lines")?;
        let cols = Self::required_usize(&header, "samples")?;
        let bands = Self::required_usize(&header, "bands")?;
        let shape = CubeShape::new(rows, cols, bands);

        let dtype_code = header
            .get("data type")
            .and_then(|v| v.as_int())
            .ok_or_else(|| {
                CubeError::InvalidHeaderField("missing or non-integer 'data type'".to_string())
            })?;
        let dtype = DataType::from_envi_code(dtype_code)?;

        let interleave = match options.force_interleave {
            Some(forced) => {
                log::warn!("Forcing interleave {} over header value", forced);
                forced
            }
            None => header
                .get("interleave")
                .and_then(|v| v.as_text())
                .ok_or_else(|| {
                    CubeError::InvalidHeaderField("missing 'interleave'".to_string())
                })?
                .parse::<Interleave>()?,
        };

        let byte_order = match header.get("byte order").and_then(|v| v.as_int()) {
            Some(1) => ByteOrder::BigEndian,
            _ => ByteOrder::LittleEndian,
        };

        let header_offset = header
            .get("header offset")
            .and_then(|v| v.as_int())
            .unwrap_or(0)
            .max(0) as usize;

        let file = File::open(&data_path)?;
        let file_len = file.metadata()?.len() as usize;
        let expected = shape.len() * dtype.size_bytes() + header_offset;
        if file_len < expected {
            return Err(CubeError::InvalidHeaderField(format!(
                "data file is {} bytes but header implies at least {} ({} {} {} elements)",
                file_len, expected, shape, dtype, interleave
            )));
        }

        let (store, storage_mode) = if options.load_to_ram {
            log::info!("Loading {} cube to RAM ({} bytes)", shape, expected);
            let buf = std::fs::read(&data_path)?;
            (ByteStore::Resident(buf), StorageMode::Resident)
        } else {
            // Read-only map; page faults are the lazy-read mechanism
            let map = unsafe { Mmap::map(&file)? };
            log::info!("Created memory map for {} cube", shape);
            (ByteStore::Mapped(map), StorageMode::Memmapped)
        };

        let wavelengths = Self::resolve_wavelengths(&header, bands, &mut warnings);

        log::info!(
            "Successfully opened ENVI data: {} ({}, {})",
            shape,
            interleave,
            dtype
        );

        Ok(Self {
            data_path,
            header_path,
            header,
            shape,
            dtype,
            interleave,
            byte_order,
            header_offset,
            storage_mode,
            store,
            wavelengths,
            warnings,
        })
    }

    /// Resolve the data/header file pair from either half of it
    pub fn resolve_pair(path: &Path) -> CubeResult<(PathBuf, PathBuf)> {
        if path.extension().map(|e| e.eq_ignore_ascii_case("hdr")) == Some(true) {
            let data = Self::find_data_file(path)
                .ok_or_else(|| CubeError::DataMissing(path.to_path_buf()))?;
            Ok((data, path.to_path_buf()))
        } else {
            let header = Self::find_header_file(path)
                .ok_or_else(|| CubeError::HeaderMissing(path.to_path_buf()))?;
            Ok((path.to_path_buf(), header))
        }
    }

    /// Try documented header filename conventions next to a data file
    fn find_header_file(data_path: &Path) -> Option<PathBuf> {
        // data.bsq -> data.bsq.hdr
        let mut appended = data_path.as_os_str().to_os_string();
        appended.push(".hdr");
        let appended = PathBuf::from(appended);
        if appended.exists() {
            return Some(appended);
        }
        // data.bsq -> data.hdr
        let swapped = data_path.with_extension("hdr");
        if swapped.exists() {
            return Some(swapped);
        }
        None
    }

    /// Try documented data filename conventions next to a header file
    fn find_data_file(header_path: &Path) -> Option<PathBuf> {
        let stem = header_path.with_extension("");
        if stem.exists() && stem.is_file() {
            return Some(stem);
        }
        for ext in DATA_EXTENSIONS {
            let candidate = header_path.with_extension(ext);
            if candidate.exists() {
                return Some(candidate);
            }
        }
        None
    }

    fn required_usize(header: &HeaderDocument, key: &str) -> CubeResult<usize> {
        header
            .get(key)
            .and_then(|v| v.as_int())
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .ok_or_else(|| {
                CubeError::InvalidHeaderField(format!("missing or invalid '{}'", key))
            })
    }

    fn resolve_wavelengths(
        header: &HeaderDocument,
        bands: usize,
        warnings: &mut Vec<OpenWarning>,
    ) -> Vec<f64> {
        match header.get("wavelength").and_then(|v| v.as_list()) {
            Some(list) => {
                let parsed: Vec<f64> = list.iter().filter_map(|v| v.as_float()).collect();
                if parsed.len() == bands {
                    return parsed;
                }
                let warning = OpenWarning::WavelengthUnavailable {
                    detail: format!(
                        "wavelength list has {} entries for {} bands",
                        parsed.len(),
                        bands
                    ),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
            }
            None => {
                log::debug!("no wavelength key in header, using band indices");
            }
        }
        (1..=bands).map(|b| b as f64).collect()
    }

    pub fn shape(&self) -> CubeShape {
        self.shape
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn interleave(&self) -> Interleave {
        self.interleave
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.storage_mode
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn header(&self) -> &HeaderDocument {
        &self.header
    }

    pub fn header_path(&self) -> &Path {
        &self.header_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn warnings(&self) -> &[OpenWarning] {
        &self.warnings
    }

    /// Byte offset of one logical element for this cube's interleave
    fn element_offset(&self, row: usize, col: usize, band: usize) -> usize {
        let (rows, cols, bands) = (self.shape.rows, self.shape.cols, self.shape.bands);
        debug_assert!(row < rows && col < cols && band < bands);
        let index = match self.interleave {
            Interleave::Bsq => (band * rows + row) * cols + col,
            Interleave::Bil => (row * bands + band) * cols + col,
            Interleave::Bip => (row * cols + col) * bands + band,
        };
        self.header_offset + index * self.dtype.size_bytes()
    }

    /// Decode one element; a truncated region degrades to `Invalid`
    /// rather than aborting the surrounding read.
    fn read_element(&self, row: usize, col: usize, band: usize) -> Sample {
        let offset = self.element_offset(row, col, band);
        let size = self.dtype.size_bytes();
        let bytes = self.store.bytes();
        if offset + size > bytes.len() {
            log::warn!(
                "element ({}, {}, {}) lies beyond the data file; marking invalid",
                row,
                col,
                band
            );
            return Sample::Invalid;
        }
        Sample::from_f64(self.decode(&bytes[offset..offset + size]))
    }

    /// Decode a raw element into f64. Complex samples collapse to their
    /// modulus; the uniform element type stays scalar.
    fn decode(&self, raw: &[u8]) -> f64 {
        let be = self.byte_order == ByteOrder::BigEndian;
        match self.dtype {
            DataType::U8 => raw[0] as f64,
            DataType::I16 => {
                let b = [raw[0], raw[1]];
                (if be { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) }) as f64
            }
            DataType::U16 => {
                let b = [raw[0], raw[1]];
                (if be { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }) as f64
            }
            DataType::I32 => {
                let b = [raw[0], raw[1], raw[2], raw[3]];
                (if be { i32::from_be_bytes(b) } else { i32::from_le_bytes(b) }) as f64
            }
            DataType::U32 => {
                let b = [raw[0], raw[1], raw[2], raw[3]];
                (if be { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) }) as f64
            }
            DataType::F32 => {
                let b = [raw[0], raw[1], raw[2], raw[3]];
                (if be { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) }) as f64
            }
            DataType::I64 => {
                let b = [
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ];
                (if be { i64::from_be_bytes(b) } else { i64::from_le_bytes(b) }) as f64
            }
            DataType::U64 => {
                let b = [
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ];
                (if be { u64::from_be_bytes(b) } else { u64::from_le_bytes(b) }) as f64
            }
            DataType::F64 => {
                let b = [
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ];
                if be {
                    f64::from_be_bytes(b)
                } else {
                    f64::from_le_bytes(b)
                }
            }
            DataType::C64 => {
                let re = [raw[0], raw[1], raw[2], raw[3]];
                let im = [raw[4], raw[5], raw[6], raw[7]];
                let (re, im) = if be {
                    (f32::from_be_bytes(re), f32::from_be_bytes(im))
                } else {
                    (f32::from_le_bytes(re), f32::from_le_bytes(im))
                };
                Complex::new(re as f64, im as f64).norm()
            }
            DataType::C128 => {
                let re = [
                    raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
                ];
                let im = [
                    raw[8], raw[9], raw[10], raw[11], raw[12], raw[13], raw[14], raw[15],
                ];
                let (re, im) = if be {
                    (f64::from_be_bytes(re), f64::from_be_bytes(im))
                } else {
                    (f64::from_le_bytes(re), f64::from_le_bytes(im))
                };
                Complex::new(re, im).norm()
            }
        }
    }

    /// Full spectrum at pixel (x = col, y = row), canonical band order
    pub fn read_pixel(&self, x: usize, y: usize) -> CubeResult<Spectrum> {
        if x >= self.shape.cols {
            return Err(CubeError::CoordinateOutOfRange {
                what: "x",
                index: x,
                limit: self.shape.cols,
            });
        }
        if y >= self.shape.rows {
            return Err(CubeError::CoordinateOutOfRange {
                what: "y",
                index: y,
                limit: self.shape.rows,
            });
        }
        Ok(Array1::from_iter(
            (0..self.shape.bands).map(|b| self.read_element(y, x, b)),
        ))
    }

    /// Full band plane (rows x cols), irrespective of physical layout
    pub fn read_band(&self, band: usize) -> CubeResult<BandPlane> {
        if band >= self.shape.bands {
            return Err(CubeError::CoordinateOutOfRange {
                what: "band",
                index: band,
                limit: self.shape.bands,
            });
        }
        Ok(Array2::from_shape_fn(
            (self.shape.rows, self.shape.cols),
            |(r, c)| self.read_element(r, c, band),
        ))
    }

    /// All spectra along one spatial row, shape (cols x bands)
    pub fn read_line(&self, row: usize) -> CubeResult<LineSpectra> {
        if row >= self.shape.rows {
            return Err(CubeError::CoordinateOutOfRange {
                what: "row",
                index: row,
                limit: self.shape.rows,
            });
        }
        Ok(Array2::from_shape_fn(
            (self.shape.cols, self.shape.bands),
            |(c, b)| self.read_element(row, c, b),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Backend over an in-memory byte buffer, bypassing file resolution
    fn make_backend(
        shape: CubeShape,
        dtype: DataType,
        interleave: Interleave,
        byte_order: ByteOrder,
        bytes: Vec<u8>,
    ) -> EnviBackend {
        EnviBackend {
            data_path: PathBuf::from("test.raw"),
            header_path: PathBuf::from("test.hdr"),
            header: HeaderCodec::parse("ENVI\n").unwrap(),
            shape,
            dtype,
            interleave,
            byte_order,
            header_offset: 0,
            storage_mode: StorageMode::Resident,
            store: ByteStore::Resident(bytes),
            wavelengths: (1..=shape.bands).map(|b| b as f64).collect(),
            warnings: Vec::new(),
        }
    }

    /// Value generator shared by the interleave tests
    fn element(row: usize, col: usize, band: usize) -> u8 {
        (row * 31 + col * 7 + band * 3) as u8
    }

    fn write_cube(shape: CubeShape, interleave: Interleave) -> Vec<u8> {
        let mut bytes = vec![0u8; shape.len()];
        for r in 0..shape.rows {
            for c in 0..shape.cols {
                for b in 0..shape.bands {
                    let index = match interleave {
                        Interleave::Bsq => (b * shape.rows + r) * shape.cols + c,
                        Interleave::Bil => (r * shape.bands + b) * shape.cols + c,
                        Interleave::Bip => (r * shape.cols + c) * shape.bands + b,
                    };
                    bytes[index] = element(r, c, b);
                }
            }
        }
        bytes
    }

    #[test]
    fn test_interleave_equivalence_in_memory() {
        let shape = CubeShape::new(4, 3, 5);
        for interleave in [Interleave::Bsq, Interleave::Bil, Interleave::Bip] {
            let backend = make_backend(
                shape,
                DataType::U8,
                interleave,
                ByteOrder::LittleEndian,
                write_cube(shape, interleave),
            );
            for r in 0..shape.rows {
                for c in 0..shape.cols {
                    let spectrum = backend.read_pixel(c, r).unwrap();
                    for b in 0..shape.bands {
                        assert_eq!(
                            spectrum[b],
                            Sample::Valid(element(r, c, b) as f64),
                            "pixel mismatch at ({}, {}, {}) for {}",
                            r,
                            c,
                            b,
                            interleave
                        );
                    }
                }
            }
            for b in 0..shape.bands {
                let plane = backend.read_band(b).unwrap();
                assert_eq!(plane.dim(), (shape.rows, shape.cols));
                assert_eq!(plane[[2, 1]], Sample::Valid(element(2, 1, b) as f64));
            }
            let line = backend.read_line(1).unwrap();
            assert_eq!(line.dim(), (shape.cols, shape.bands));
            assert_eq!(line[[2, 4]], Sample::Valid(element(1, 2, 4) as f64));
        }
    }

    #[test]
    fn test_big_endian_decode() {
        // Single i16 element, big-endian: 0x0102 = 258
        let backend = make_backend(
            CubeShape::new(1, 1, 1),
            DataType::I16,
            Interleave::Bsq,
            ByteOrder::BigEndian,
            vec![0x01, 0x02],
        );
        assert_eq!(
            backend.read_pixel(0, 0).unwrap()[0],
            Sample::Valid(258.0)
        );
    }

    #[test]
    fn test_complex_reads_as_modulus() {
        // c64 element (3.0, 4.0) -> modulus 5.0
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3.0f32.to_le_bytes());
        bytes.extend_from_slice(&4.0f32.to_le_bytes());
        let backend = make_backend(
            CubeShape::new(1, 1, 1),
            DataType::C64,
            Interleave::Bip,
            ByteOrder::LittleEndian,
            bytes,
        );
        assert_eq!(backend.read_pixel(0, 0).unwrap()[0], Sample::Valid(5.0));
    }

    #[test]
    fn test_truncated_element_is_invalid() {
        // Two declared bands but bytes for only one
        let backend = make_backend(
            CubeShape::new(1, 1, 2),
            DataType::U8,
            Interleave::Bsq,
            ByteOrder::LittleEndian,
            vec![42],
        );
        let spectrum = backend.read_pixel(0, 0).unwrap();
        assert_eq!(spectrum[0], Sample::Valid(42.0));
        assert_eq!(spectrum[1], Sample::Invalid);
    }

    #[test]
    fn test_out_of_range_rejected() {
        let shape = CubeShape::new(2, 2, 2);
        let backend = make_backend(
            shape,
            DataType::U8,
            Interleave::Bsq,
            ByteOrder::LittleEndian,
            write_cube(shape, Interleave::Bsq),
        );
        assert!(matches!(
            backend.read_pixel(2, 0),
            Err(CubeError::CoordinateOutOfRange { what: "x", .. })
        ));
        assert!(matches!(
            backend.read_band(2),
            Err(CubeError::CoordinateOutOfRange { what: "band", .. })
        ));
        assert!(matches!(
            backend.read_line(5),
            Err(CubeError::CoordinateOutOfRange { what: "row", .. })
        ));
    }
}
