//! cubeio: A Fast, Uniform Accessor for ENVI and NetCDF Hyperspectral Cubes
//!
//! This library opens heterogeneous on-disk hyperspectral cubes — raw-binary
//! ENVI in BSQ/BIL/BIP interleave with a text header sidecar, and NetCDF-based
//! EMIT and AVIRIS-3 products — and exposes a single canonical
//! (rows, cols, bands) addressing model: pixel spectra, band planes, spatial
//! lines and percentile-stretched display composites, independent of the
//! physical layout of the source.

pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    ByteOrder, CubeError, CubeResult, CubeShape, DataType, Interleave, OpenOptions, OpenWarning,
    ProductLevel, Sample, SourceKind, StorageMode,
};

pub use crate::core::{BandMask, CompositeImage, CompositeParams, Compositor, CubeAccessor, CubeInfo};
pub use crate::io::{EnviBackend, HeaderCodec, HeaderDocument, HeaderValue};
#[cfg(feature = "netcdf")]
pub use crate::io::{NetCdfBackend, NetCdfIntrospector};
