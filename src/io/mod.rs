//! Format readers and the header sidecar codec

pub mod envi;
pub mod header;
#[cfg(feature = "netcdf")]
pub mod introspect;
#[cfg(feature = "netcdf")]
pub mod netcdf;

// Re-export main types
pub use envi::EnviBackend;
pub use header::{HeaderCodec, HeaderDocument, HeaderValue};
#[cfg(feature = "netcdf")]
pub use introspect::{Introspection, NetCdfIntrospector};
#[cfg(feature = "netcdf")]
pub use netcdf::NetCdfBackend;
