use crate::core::composite::{
    matches_no_data, nearest_band, select_display_bands, CompositeImage, CompositeParams,
    Compositor,
};
use crate::core::mask::BandMask;
use crate::io::envi::EnviBackend;
use crate::io::header::{HeaderCodec, HeaderValue};
#[cfg(feature = "netcdf")]
use crate::io::netcdf::NetCdfBackend;
use crate::types::{
    BandPlane, CubeError, CubeResult, CubeShape, DataType, Interleave, LineSpectra, OpenOptions,
    OpenWarning, ProductLevel, Sample, SourceKind, Spectrum, StorageMode,
};
use ndarray::{Array2, Dimension};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Backend dispatch for an opened cube
enum Backend {
    Envi(EnviBackend),
    #[cfg(feature = "netcdf")]
    NetCdf(NetCdfBackend),
}

/// Dataset summary handed to display and analysis layers
#[derive(Debug, Clone, Serialize)]
pub struct CubeInfo {
    pub path: PathBuf,
    pub source_kind: SourceKind,
    pub shape: CubeShape,
    pub dtype: DataType,
    pub interleave: Interleave,
    pub storage_mode: StorageMode,
    pub product_level: Option<ProductLevel>,
    pub num_bands: usize,
    pub spatial_size: (usize, usize),
    pub wavelength_range: Option<(f64, f64)>,
    pub data_ignore_value: Option<f64>,
    pub bad_band_count: usize,
    pub estimated_memory_bytes: usize,
    pub warnings: Vec<String>,
}

/// Uniform facade over every supported cube representation.
///
/// One accessor owns one opened file (and its memory map or NetCDF
/// container) for its whole lifetime. All reads return canonical
/// (rows, cols, bands) data with validity masking already applied;
/// callers never see the physical layout.
///
/// Several accessors may read the same file concurrently. A header
/// rewrite through one of them is observed by the others only after
/// they [`reload`](Self::reload).
pub struct CubeAccessor {
    path: PathBuf,
    options: OpenOptions,
    backend: Backend,
    mask: BandMask,
    data_ignore_value: Option<f64>,
    warnings: Vec<OpenWarning>,
}

impl CubeAccessor {
    /// Open a cube with default options (lazy storage, no overrides)
    pub fn open<P: AsRef<Path>>(path: P) -> CubeResult<Self> {
        Self::open_with_options(path, &OpenOptions::default())
    }

    /// Open a cube, sniffing the on-disk format from the file name
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: &OpenOptions) -> CubeResult<Self> {
        let path = path.as_ref();
        let mut warnings = Vec::new();

        let backend = match Self::sniff(path) {
            #[cfg(feature = "netcdf")]
            SourceKind::Emit => Backend::NetCdf(NetCdfBackend::open(path, options, SourceKind::Emit)?),
            #[cfg(feature = "netcdf")]
            SourceKind::Aviris3 => {
                Backend::NetCdf(NetCdfBackend::open(path, options, SourceKind::Aviris3)?)
            }
            #[cfg(not(feature = "netcdf"))]
            SourceKind::Emit | SourceKind::Aviris3 => {
                return Err(CubeError::BackendUnavailable(
                    "built without NetCDF support".to_string(),
                ));
            }
            _ => Backend::Envi(Self::open_envi(path, options, &mut warnings)?),
        };

        let shape = match &backend {
            Backend::Envi(b) => b.shape(),
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.shape(),
        };

        let mut mask = BandMask::all_good(shape.bands);
        let mut data_ignore_value = None;
        match &backend {
            Backend::Envi(envi) => {
                warnings.extend(envi.warnings().iter().cloned());
                Self::load_band_mask(envi, &mut mask, &mut warnings);
                data_ignore_value = Self::load_data_ignore_value(envi);
            }
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(nc) => {
                warnings.extend(nc.warnings().iter().cloned());
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            options: *options,
            backend,
            mask,
            data_ignore_value,
            warnings,
        })
    }

    /// Decide which backend a path belongs to.
    ///
    /// Only `.nc` files carrying the sensor marker in their name route to
    /// the NetCDF backend; any other path takes the ENVI pairing rules
    /// (and fails there when no sidecar exists).
    fn sniff(path: &Path) -> SourceKind {
        let is_nc = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("nc"))
            .unwrap_or(false);
        if !is_nc {
            return SourceKind::Envi;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        if name.contains("EMIT") {
            SourceKind::Emit
        } else if name.contains("AV3") {
            SourceKind::Aviris3
        } else {
            SourceKind::Envi
        }
    }

    /// ENVI open with the forced-interleave fallback: when the override
    /// itself makes the open fail, retry on the header's own value and
    /// record the downgrade instead of failing.
    fn open_envi(
        path: &Path,
        options: &OpenOptions,
        warnings: &mut Vec<OpenWarning>,
    ) -> CubeResult<EnviBackend> {
        match EnviBackend::open(path, options) {
            Ok(backend) => Ok(backend),
            Err(err) => {
                let Some(forced) = options.force_interleave else {
                    return Err(err);
                };
                if matches!(
                    err,
                    CubeError::FileNotFound(_)
                        | CubeError::HeaderMissing(_)
                        | CubeError::DataMissing(_)
                ) {
                    return Err(err);
                }
                log::warn!(
                    "open with forced interleave {} failed ({}); falling back to header value",
                    forced,
                    err
                );
                let retry = OpenOptions {
                    force_interleave: None,
                    ..*options
                };
                let backend = EnviBackend::open(path, &retry)?;
                let warning = OpenWarning::ForcedInterleaveRejected {
                    forced: forced.to_string(),
                    kept: backend.interleave().to_string(),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
                Ok(backend)
            }
        }
    }

    /// Parse the header's bad band list; unusable lists degrade to absent
    fn load_band_mask(envi: &EnviBackend, mask: &mut BandMask, warnings: &mut Vec<OpenWarning>) {
        let Some(list) = envi.header().get("bbl").and_then(|v| v.as_list()) else {
            return;
        };
        match BandMask::flags_from_header_list(list) {
            Ok(flags) => {
                let found = flags.len();
                if mask.set(Some(flags)).is_err() {
                    let warning = OpenWarning::BandMaskMismatch {
                        expected: mask.bands(),
                        found,
                    };
                    log::warn!("{}", warning);
                    warnings.push(warning);
                } else {
                    log::info!(
                        "loaded bad band list: {} bad of {} bands",
                        mask.bad_bands().len(),
                        mask.bands()
                    );
                }
            }
            Err(err) => {
                log::warn!("unusable bad band list in header ({}); ignoring", err);
            }
        }
    }

    /// `data ignore value` from the header; `none`/`null` text clears it
    fn load_data_ignore_value(envi: &EnviBackend) -> Option<f64> {
        let value = envi.header().get("data ignore value")?;
        if let Some(text) = value.as_text() {
            let lower = text.to_lowercase();
            if lower == "none" || lower == "null" {
                return None;
            }
        }
        let parsed = value.as_float();
        if let Some(v) = parsed {
            log::info!("loaded data ignore value: {}", v);
        }
        parsed
    }

    pub fn shape(&self) -> CubeShape {
        match &self.backend {
            Backend::Envi(b) => b.shape(),
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.shape(),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        match &self.backend {
            Backend::Envi(_) => SourceKind::Envi,
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.source_kind(),
        }
    }

    pub fn storage_mode(&self) -> StorageMode {
        match &self.backend {
            Backend::Envi(b) => b.storage_mode(),
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.storage_mode(),
        }
    }

    pub fn dtype(&self) -> DataType {
        match &self.backend {
            Backend::Envi(b) => b.dtype(),
            // NetCDF values are converted to f64 on read
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(_) => DataType::F64,
        }
    }

    /// Logical interleave; NetCDF sources are canonical after transpose
    pub fn interleave(&self) -> Interleave {
        match &self.backend {
            Backend::Envi(b) => b.interleave(),
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(_) => Interleave::Bsq,
        }
    }

    pub fn wavelengths(&self) -> &[f64] {
        match &self.backend {
            Backend::Envi(b) => b.wavelengths(),
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.wavelengths(),
        }
    }

    /// Soft degradations recorded while opening
    pub fn warnings(&self) -> &[OpenWarning] {
        &self.warnings
    }

    /// Spectrum at pixel (x = col, y = row), data-ignore masking applied
    pub fn get_pixel_spectrum(&self, x: usize, y: usize) -> CubeResult<Spectrum> {
        let mut spectrum = match &self.backend {
            Backend::Envi(b) => b.read_pixel(x, y)?,
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.read_pixel(x, y)?,
        };
        self.apply_ignore_value(&mut spectrum);
        Ok(spectrum)
    }

    /// Band plane (rows x cols), data-ignore masking applied
    pub fn get_band_data(&self, band: usize) -> CubeResult<BandPlane> {
        let mut plane = match &self.backend {
            Backend::Envi(b) => b.read_band(band)?,
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.read_band(band)?,
        };
        self.apply_ignore_value(&mut plane);
        Ok(plane)
    }

    /// Spectra for every pixel along a spatial row (cols x bands)
    pub fn extract_line_spectra(&self, row: usize) -> CubeResult<LineSpectra> {
        let mut line = match &self.backend {
            Backend::Envi(b) => b.read_line(row)?,
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.read_line(row)?,
        };
        self.apply_ignore_value(&mut line);
        Ok(line)
    }

    /// Mask the configured data-ignore sentinel out of a fresh read
    fn apply_ignore_value<D: Dimension>(&self, data: &mut ndarray::Array<Sample, D>) {
        let Some(ignore) = self.data_ignore_value else {
            return;
        };
        data.mapv_inplace(|sample| match sample {
            Sample::Valid(v) if matches_no_data(v, Some(ignore)) => Sample::Invalid,
            other => other,
        });
    }

    /// Percentile-stretched display composite.
    ///
    /// Unspecified bands are auto-selected from the wavelength table;
    /// explicit indices are clamped into range. Identical indices on all
    /// three channels produce a grayscale image. `no_data_value` defaults
    /// to the handle's data-ignore value.
    pub fn get_rgb_composite(
        &self,
        red: Option<usize>,
        green: Option<usize>,
        blue: Option<usize>,
        stretch_percent: f64,
        no_data_value: Option<f64>,
    ) -> CubeResult<CompositeImage> {
        let bands = self.shape().bands;
        let auto = if red.is_none() || green.is_none() || blue.is_none() {
            Some(select_display_bands(self.wavelengths()))
        } else {
            None
        };
        let clamp = |index: usize| index.min(bands.saturating_sub(1));
        let r = clamp(red.unwrap_or_else(|| auto.map(|a| a.0).unwrap_or(0)));
        let g = clamp(green.unwrap_or_else(|| auto.map(|a| a.1).unwrap_or(0)));
        let b = clamp(blue.unwrap_or_else(|| auto.map(|a| a.2).unwrap_or(0)));

        let compositor = Compositor::with_params(CompositeParams {
            stretch_percent,
            no_data_value: no_data_value.or(self.data_ignore_value),
        });

        if r == g && g == b {
            log::debug!("composite bands coincide at {}, producing grayscale", r);
            let plane = self.band_plane_f64(r)?;
            return Ok(CompositeImage::Gray(compositor.grayscale(&plane)?));
        }
        log::debug!("composite bands: r={}, g={}, b={}", r, g, b);
        let red_plane = self.band_plane_f64(r)?;
        let green_plane = self.band_plane_f64(g)?;
        let blue_plane = self.band_plane_f64(b)?;
        Ok(CompositeImage::Rgb(compositor.rgb(
            &red_plane,
            &green_plane,
            &blue_plane,
        )?))
    }

    /// Band plane collapsed to floats for the compositor (NaN = invalid)
    fn band_plane_f64(&self, band: usize) -> CubeResult<Array2<f64>> {
        let plane = match &self.backend {
            Backend::Envi(b) => b.read_band(band)?,
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.read_band(band)?,
        };
        Ok(plane.mapv(|s| s.to_f64()))
    }

    /// Current bad band list (0 = bad, 1 = good), `None` when unset
    pub fn get_bad_band_list(&self) -> Option<Vec<u8>> {
        self.mask.as_list()
    }

    /// Replace the bad band list and persist it to the header sidecar.
    ///
    /// The header is rewritten before the in-memory state changes, so a
    /// failed rewrite leaves the accessor on its last durable value.
    /// `None` removes the key from the header entirely.
    pub fn set_bad_band_list(&mut self, list: Option<&[u8]>) -> CubeResult<()> {
        let envi = self.require_envi("bad band list")?;

        let flags = match list {
            Some(values) => {
                if values.len() != self.mask.bands() {
                    return Err(CubeError::BandMaskLengthMismatch {
                        expected: self.mask.bands(),
                        found: values.len(),
                    });
                }
                let mut flags = Vec::with_capacity(values.len());
                for (index, value) in values.iter().enumerate() {
                    match value {
                        0 => flags.push(false),
                        1 => flags.push(true),
                        other => {
                            return Err(CubeError::InvalidBandMaskValue {
                                index,
                                value: other.to_string(),
                            });
                        }
                    }
                }
                Some(flags)
            }
            None => None,
        };

        let header_value = flags.as_ref().map(|f| {
            HeaderValue::List(
                f.iter()
                    .map(|g| HeaderValue::Int(i64::from(*g)))
                    .collect(),
            )
        });
        HeaderCodec::rewrite_field(
            envi.header_path(),
            "bbl",
            header_value,
            &["wavelength", "fwhm", "bands"],
        )?;

        // Durable now; commit the in-memory copy
        self.mask.set(flags)?;
        log::info!(
            "bad band list updated: {} bad of {} bands",
            self.mask.bad_bands().len(),
            self.mask.bands()
        );
        Ok(())
    }

    pub fn is_band_good(&self, band: usize) -> bool {
        self.mask.is_band_good(band)
    }

    pub fn good_bands(&self) -> Vec<usize> {
        self.mask.good_bands()
    }

    pub fn bad_bands(&self) -> Vec<usize> {
        self.mask.bad_bands()
    }

    pub fn get_data_ignore_value(&self) -> Option<f64> {
        self.data_ignore_value
    }

    /// Replace the data-ignore sentinel and persist it to the header
    /// sidecar; `None` removes the key. Same rollback ordering as
    /// [`set_bad_band_list`](Self::set_bad_band_list).
    pub fn set_data_ignore_value(&mut self, value: Option<f64>) -> CubeResult<()> {
        let envi = self.require_envi("data ignore value")?;
        HeaderCodec::rewrite_field(
            envi.header_path(),
            "data ignore value",
            value.map(HeaderValue::Float),
            &["data type", "bands", "lines", "samples"],
        )?;
        self.data_ignore_value = value;
        match value {
            Some(v) => log::info!("data ignore value set to {}", v),
            None => log::info!("data ignore value cleared"),
        }
        Ok(())
    }

    fn require_envi(&self, what: &str) -> CubeResult<&EnviBackend> {
        log::trace!("header-backed mutation requested: {}", what);
        match &self.backend {
            Backend::Envi(b) => Ok(b),
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => Err(CubeError::HeaderNotWritable(format!(
                "{} sources have no header sidecar to persist the {}",
                b.source_kind(),
                what
            ))),
        }
    }

    /// Band index and actual wavelength nearest to a target wavelength
    pub fn band_at_wavelength(&self, target_nm: f64) -> Option<(usize, f64)> {
        let wavelengths = self.wavelengths();
        if wavelengths.is_empty() {
            return None;
        }
        let index = nearest_band(wavelengths, target_nm);
        Some((index, wavelengths[index]))
    }

    /// Re-open the file with the original options, picking up external
    /// header edits (bad band list, data ignore value, ...)
    pub fn reload(&mut self) -> CubeResult<()> {
        log::info!("Reloading {} to pick up header changes", self.path.display());
        let path = self.path.clone();
        let options = self.options;
        *self = Self::open_with_options(&path, &options)?;
        Ok(())
    }

    /// Dataset summary for display layers
    pub fn get_info(&self) -> CubeInfo {
        let shape = self.shape();
        let wavelengths = self.wavelengths();
        let wavelength_range = match (wavelengths.first(), wavelengths.last()) {
            (Some(first), Some(last)) => Some((*first, *last)),
            _ => None,
        };
        let product_level = match &self.backend {
            Backend::Envi(_) => None,
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => Some(b.product()),
        };
        CubeInfo {
            path: self.path.clone(),
            source_kind: self.source_kind(),
            shape,
            dtype: self.dtype(),
            interleave: self.interleave(),
            storage_mode: self.storage_mode(),
            product_level,
            num_bands: shape.bands,
            spatial_size: (shape.rows, shape.cols),
            wavelength_range,
            data_ignore_value: self.data_ignore_value,
            bad_band_count: self.mask.bad_bands().len(),
            estimated_memory_bytes: shape.len() * self.dtype().size_bytes(),
            warnings: self.warnings.iter().map(|w| w.to_string()).collect(),
        }
    }

    /// Release the handle and its backing resources. The accessor is
    /// consumed; reopening requires a fresh `open`.
    pub fn close(self) {
        log::debug!("closing cube accessor for {}", self.path.display());
        match self.backend {
            Backend::Envi(_) => {}
            #[cfg(feature = "netcdf")]
            Backend::NetCdf(b) => b.close(),
        }
    }
}
