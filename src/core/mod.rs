//! Core cube access modules

pub mod accessor;
pub mod composite;
pub mod mask;

// Re-export main types
pub use accessor::{CubeAccessor, CubeInfo};
pub use composite::{
    nearest_band, select_display_bands, CompositeImage, CompositeParams, Compositor,
};
pub use mask::BandMask;
