use ndarray::{Array1, Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// A single cube element: a valid measurement or masked no-data.
///
/// Masking (fill sentinels, out-of-range reflectance, data-ignore values)
/// is applied where the data is read; only the display layer collapses
/// `Invalid` back to NaN.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample {
    Valid(f64),
    Invalid,
}

impl Sample {
    /// NaN-tolerant constructor: non-finite input becomes `Invalid`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Sample::Valid(value)
        } else {
            Sample::Invalid
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Sample::Valid(_))
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Sample::Valid(v) => Some(*v),
            Sample::Invalid => None,
        }
    }

    /// Collapse to a raw float, `Invalid` becoming NaN.
    pub fn to_f64(&self) -> f64 {
        match self {
            Sample::Valid(v) => *v,
            Sample::Invalid => f64::NAN,
        }
    }
}

/// Per-pixel spectrum (bands)
pub type Spectrum = Array1<Sample>;

/// All spectra along one spatial line (cols x bands)
pub type LineSpectra = Array2<Sample>;

/// Single band plane (rows x cols)
pub type BandPlane = Array2<Sample>;

/// Fully resident cube in canonical order (rows x cols x bands), NaN = masked
pub type CubeArray = Array3<f64>;

/// Canonical cube dimensions, always (rows, cols, bands) after load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeShape {
    pub rows: usize,
    pub cols: usize,
    pub bands: usize,
}

impl CubeShape {
    pub fn new(rows: usize, cols: usize, bands: usize) -> Self {
        Self { rows, cols, bands }
    }

    /// Total element count
    pub fn len(&self) -> usize {
        self.rows * self.cols * self.bands
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for CubeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.rows, self.cols, self.bands)
    }
}

/// Physical byte ordering of the cube on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interleave {
    /// Band-sequential: each band is a contiguous rows*cols block
    Bsq,
    /// Band-interleaved-by-line: each row stores all bands before the next row
    Bil,
    /// Band-interleaved-by-pixel: each pixel stores all bands contiguously
    Bip,
}

impl fmt::Display for Interleave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interleave::Bsq => write!(f, "bsq"),
            Interleave::Bil => write!(f, "bil"),
            Interleave::Bip => write!(f, "bip"),
        }
    }
}

impl FromStr for Interleave {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bsq" => Ok(Interleave::Bsq),
            "bil" => Ok(Interleave::Bil),
            "bip" => Ok(Interleave::Bip),
            other => Err(CubeError::UnsupportedInterleave(other.to_string())),
        }
    }
}

/// Numeric element type of the stored cube, mirroring the ENVI `data type` codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U8,
    I16,
    I32,
    F32,
    F64,
    C64,
    C128,
    U16,
    U32,
    I64,
    U64,
}

impl DataType {
    /// Map an ENVI `data type` code to an element type
    pub fn from_envi_code(code: i64) -> CubeResult<Self> {
        match code {
            1 => Ok(DataType::U8),
            2 => Ok(DataType::I16),
            3 => Ok(DataType::I32),
            4 => Ok(DataType::F32),
            5 => Ok(DataType::F64),
            6 => Ok(DataType::C64),
            9 => Ok(DataType::C128),
            12 => Ok(DataType::U16),
            13 => Ok(DataType::U32),
            14 => Ok(DataType::I64),
            15 => Ok(DataType::U64),
            other => Err(CubeError::InvalidHeaderField(format!(
                "unknown ENVI data type code: {}",
                other
            ))),
        }
    }

    /// The ENVI `data type` code for this element type
    pub fn envi_code(&self) -> i64 {
        match self {
            DataType::U8 => 1,
            DataType::I16 => 2,
            DataType::I32 => 3,
            DataType::F32 => 4,
            DataType::F64 => 5,
            DataType::C64 => 6,
            DataType::C128 => 9,
            DataType::U16 => 12,
            DataType::U32 => 13,
            DataType::I64 => 14,
            DataType::U64 => 15,
        }
    }

    /// Size of one stored element in bytes
    pub fn size_bytes(&self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::F64 | DataType::I64 | DataType::U64 | DataType::C64 => 8,
            DataType::C128 => 16,
        }
    }

    pub fn is_complex(&self) -> bool {
        matches!(self, DataType::C64 | DataType::C128)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::U8 => "u8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::C64 => "c64",
            DataType::C128 => "c128",
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::I64 => "i64",
            DataType::U64 => "u64",
        };
        write!(f, "{}", name)
    }
}

/// Byte order of the ENVI data file (`byte order` header key)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// How the cube is held in memory, fixed at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    /// Lazy reads over a memory map (or bounded NetCDF hyperslab reads)
    Memmapped,
    /// The whole cube is materialized once at open
    Resident,
}

/// Which on-disk representation the cube came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Envi,
    Emit,
    Aviris3,
    Derived,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Envi => write!(f, "ENVI"),
            SourceKind::Emit => write!(f, "EMIT"),
            SourceKind::Aviris3 => write!(f, "AVIRIS-3"),
            SourceKind::Derived => write!(f, "derived"),
        }
    }
}

/// Processing level of a NetCDF product, parsed from the filename.
/// Decides the validity-masking rules (reflectance range vs radiance sign).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductLevel {
    /// EMIT L1B calibrated radiance
    L1bRad,
    /// AVIRIS-3 L1B calibrated radiance
    L1bRdn,
    /// Surface reflectance (EMIT or AVIRIS-3 L2A)
    L2aRfl,
    /// EMIT L2A quality mask
    L2aMask,
    /// AVIRIS-3 L2A optimal estimation (includes reflectance)
    L2aOe,
    /// EMIT L2B mineralogy
    L2bMin,
    /// AVIRIS-3 L2B products
    L2b,
    Unknown,
}

impl ProductLevel {
    /// Parse the product level out of an EMIT or AVIRIS-3 granule name
    pub fn from_filename(name: &str) -> Self {
        let upper = name.to_uppercase();
        if upper.contains("L2A_RFL") {
            ProductLevel::L2aRfl
        } else if upper.contains("L2A_MASK") {
            ProductLevel::L2aMask
        } else if upper.contains("L2A_OE") {
            ProductLevel::L2aOe
        } else if upper.contains("L1B_RDN") {
            ProductLevel::L1bRdn
        } else if upper.contains("L1B") {
            ProductLevel::L1bRad
        } else if upper.contains("L2B_MIN") {
            ProductLevel::L2bMin
        } else if upper.contains("L2B") {
            ProductLevel::L2b
        } else {
            ProductLevel::Unknown
        }
    }

    /// Radiance-style products mask negatives only; reflectance-style
    /// products also mask values above 1.
    pub fn is_radiance(&self) -> bool {
        matches!(self, ProductLevel::L1bRad | ProductLevel::L1bRdn)
    }

    pub fn is_reflectance(&self) -> bool {
        matches!(self, ProductLevel::L2aRfl | ProductLevel::L2aOe)
    }
}

/// Non-fatal degradations recorded during open.
///
/// These complete the open but downgrade confidence in parts of the
/// handle's metadata; they are logged at warn level and surfaced through
/// `CubeInfo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpenWarning {
    /// Spectral axis classification was ambiguous; axis 0 (or the first
    /// candidate) was assumed
    AmbiguousSpectralAxis { detail: String },
    /// No wavelength table could be resolved; synthetic 1..bands values used
    WavelengthUnavailable { detail: String },
    /// A bad-band list was present but unusable and was dropped
    BandMaskMismatch { expected: usize, found: usize },
    /// The forced interleave override failed validation; header value kept
    ForcedInterleaveRejected { forced: String, kept: String },
    /// Sensor spatial metadata group was absent or unreadable
    SpatialMetadataUnavailable { detail: String },
}

impl fmt::Display for OpenWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenWarning::AmbiguousSpectralAxis { detail } => {
                write!(f, "ambiguous spectral axis: {}", detail)
            }
            OpenWarning::WavelengthUnavailable { detail } => {
                write!(f, "wavelengths unavailable: {}", detail)
            }
            OpenWarning::BandMaskMismatch { expected, found } => write!(
                f,
                "bad band list length {} does not match {} bands; ignored",
                found, expected
            ),
            OpenWarning::ForcedInterleaveRejected { forced, kept } => write!(
                f,
                "forced interleave '{}' rejected; using header value '{}'",
                forced, kept
            ),
            OpenWarning::SpatialMetadataUnavailable { detail } => {
                write!(f, "spatial metadata unavailable: {}", detail)
            }
        }
    }
}

/// Open-time behavior switches shared by every backend
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenOptions {
    /// Materialize the whole cube at open instead of lazy reads
    pub load_to_ram: bool,
    /// Override the header-stated ENVI interleave (malformed-header rescue)
    pub force_interleave: Option<Interleave>,
}

/// Error types for cube access
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("no header file found for data file: {0}")]
    HeaderMissing(PathBuf),

    #[error("no data file found for header file: {0}")]
    DataMissing(PathBuf),

    #[error("unsupported interleave: {0}")]
    UnsupportedInterleave(String),

    #[error("invalid header field: {0}")]
    InvalidHeaderField(String),

    #[error("bad band list length {found} does not match {expected} bands")]
    BandMaskLengthMismatch { expected: usize, found: usize },

    #[error("bad band list entry at index {index} is not 0 or 1: {value}")]
    InvalidBandMaskValue { index: usize, value: String },

    #[error("header is not writable: {0}")]
    HeaderNotWritable(String),

    #[error("no suitable 3-D data variable found: {0}")]
    NoSuitableVariable(String),

    #[error("coordinate out of range: {what} = {index}, valid range 0..{limit}")]
    CoordinateOutOfRange {
        what: &'static str,
        index: usize,
        limit: usize,
    },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("composite error: {0}")]
    Composite(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "netcdf")]
    #[error("NetCDF error: {0}")]
    Netcdf(#[from] netcdf::Error),

    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Result type for cube operations
pub type CubeResult<T> = Result<T, CubeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envi_dtype_roundtrip() {
        for code in [1, 2, 3, 4, 5, 6, 9, 12, 13, 14, 15] {
            let dtype = DataType::from_envi_code(code).unwrap();
            assert_eq!(dtype.envi_code(), code);
        }
        assert!(DataType::from_envi_code(7).is_err());
    }

    #[test]
    fn test_interleave_parsing() {
        assert_eq!("BSQ".parse::<Interleave>().unwrap(), Interleave::Bsq);
        assert_eq!(" bil ".parse::<Interleave>().unwrap(), Interleave::Bil);
        assert_eq!("Bip".parse::<Interleave>().unwrap(), Interleave::Bip);
        assert!("tiled".parse::<Interleave>().is_err());
    }

    #[test]
    fn test_sample_from_f64() {
        assert_eq!(Sample::from_f64(1.5), Sample::Valid(1.5));
        assert_eq!(Sample::from_f64(f64::NAN), Sample::Invalid);
        assert_eq!(Sample::from_f64(f64::INFINITY), Sample::Invalid);
        assert!(Sample::Invalid.to_f64().is_nan());
    }

    #[test]
    fn test_product_level_from_filename() {
        assert_eq!(
            ProductLevel::from_filename("EMIT_L2A_RFL_001_20230801T120000_2113208_006.nc"),
            ProductLevel::L2aRfl
        );
        assert_eq!(
            ProductLevel::from_filename("EMIT_L1B_RAD_001_20230801T120000_2113208_006.nc"),
            ProductLevel::L1bRad
        );
        assert_eq!(
            ProductLevel::from_filename("AV320230801t120000_L1B_RDN_eb7b.nc"),
            ProductLevel::L1bRdn
        );
        assert_eq!(
            ProductLevel::from_filename("scene_subset.nc"),
            ProductLevel::Unknown
        );
        assert!(ProductLevel::L1bRdn.is_radiance());
        assert!(ProductLevel::L2aRfl.is_reflectance());
    }
}
