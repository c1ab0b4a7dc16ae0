use crate::io::introspect::{Introspection, NetCdfIntrospector};
use crate::types::{
    BandPlane, CubeArray, CubeError, CubeResult, CubeShape, LineSpectra, OpenOptions, OpenWarning,
    ProductLevel, Sample, SourceKind, Spectrum, StorageMode,
};
use ndarray::{Array1, Array2, Array3, ArrayD, Ix3, IxDyn};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Default fill sentinel for EMIT and AVIRIS-3 granules
const DEFAULT_FILL_VALUE: f64 = -9999.0;

/// Element-count threshold above which resident masking runs in parallel
const PARALLEL_MASK_THRESHOLD: usize = 5_000_000;

/// Backing storage for an opened NetCDF cube
enum NcStorage {
    /// Fully materialized, canonical order, masked (NaN = invalid);
    /// the container is released as soon as the array is built
    Resident(CubeArray),
    /// Open container served by bounded hyperslab reads per call
    Lazy(netcdf::File),
}

/// Reader for NetCDF hyperspectral products (EMIT, AVIRIS-3)
pub struct NetCdfBackend {
    path: PathBuf,
    source_kind: SourceKind,
    product: ProductLevel,
    introspection: Introspection,
    shape: CubeShape,
    wavelengths: Vec<f64>,
    fill_value: f64,
    storage: NcStorage,
    warnings: Vec<OpenWarning>,
}

impl NetCdfBackend {
    /// Open an EMIT or AVIRIS-3 container and bring it into canonical
    /// (rows, cols, bands) orientation.
    pub fn open<P: AsRef<Path>>(
        path: P,
        options: &OpenOptions,
        source_kind: SourceKind,
    ) -> CubeResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CubeError::FileNotFound(path.to_path_buf()));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let product = ProductLevel::from_filename(&file_name);
        log::info!(
            "Opening {} file: {} (product level {:?})",
            source_kind,
            path.display(),
            product
        );

        let file = netcdf::open(path)?;
        let introspection = NetCdfIntrospector::classify(&file)?;
        let mut warnings = Vec::new();
        if let Some(w) = introspection.warning.clone() {
            warnings.push(w);
        }

        let perm = introspection.permutation;
        let shape = CubeShape::new(
            introspection.shape[perm[0]],
            introspection.shape[perm[1]],
            introspection.shape[perm[2]],
        );

        let fill_value = Self::fill_value_of(&file, &introspection);
        let wavelengths =
            Self::resolve_wavelengths(&file, &introspection, source_kind, shape.bands, &mut warnings);
        Self::check_spatial_metadata(&file, source_kind, &mut warnings);

        let storage = if options.load_to_ram {
            let cube = Self::materialize(&file, &introspection, shape, product, fill_value)?;
            drop(file);
            NcStorage::Resident(cube)
        } else {
            NcStorage::Lazy(file)
        };

        log::info!(
            "Successfully opened {} data: {} ({} wavelengths)",
            source_kind,
            shape,
            wavelengths.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            source_kind,
            product,
            introspection,
            shape,
            wavelengths,
            fill_value,
            storage,
            warnings,
        })
    }

    /// Look up the primary variable, inside its group when it has one
    fn primary_variable<'f>(
        file: &'f netcdf::File,
        introspection: &Introspection,
    ) -> CubeResult<netcdf::Variable<'f>> {
        let var = match &introspection.group {
            Some(group_name) => file
                .group(group_name)?
                .and_then(|g| g.variable(&introspection.variable)),
            None => file.variable(&introspection.variable),
        };
        var.ok_or_else(|| {
            CubeError::NoSuitableVariable(format!(
                "variable '{}' disappeared from container",
                introspection.variable
            ))
        })
    }

    /// Fill sentinel from the variable's attribute, else the sensor default
    fn fill_value_of(file: &netcdf::File, introspection: &Introspection) -> f64 {
        let var = match Self::primary_variable(file, introspection) {
            Ok(v) => v,
            Err(_) => return DEFAULT_FILL_VALUE,
        };
        match var.attribute("_FillValue").map(|a| a.value()) {
            Some(Ok(netcdf::AttributeValue::Double(v))) => v,
            Some(Ok(netcdf::AttributeValue::Float(v))) => v as f64,
            Some(Ok(netcdf::AttributeValue::Int(v))) => v as f64,
            Some(Ok(netcdf::AttributeValue::Short(v))) => v as f64,
            _ => DEFAULT_FILL_VALUE,
        }
    }

    /// Resolve the wavelength table from the sensor-specific location.
    ///
    /// EMIT stores it in the `sensor_band_parameters` side group,
    /// AVIRIS-3 alongside the data variable in the product group. Either
    /// failing falls back to synthetic 1..=bands values with a reported
    /// downgrade.
    fn resolve_wavelengths(
        file: &netcdf::File,
        introspection: &Introspection,
        source_kind: SourceKind,
        bands: usize,
        warnings: &mut Vec<OpenWarning>,
    ) -> Vec<f64> {
        let attempt = match source_kind {
            SourceKind::Aviris3 => Self::group_values(
                file,
                introspection.group.as_deref(),
                "wavelength",
            ),
            _ => Self::group_values(file, Some("sensor_band_parameters"), "wavelengths"),
        };

        match attempt {
            Ok(values) if values.len() == bands => {
                log::info!("loaded {} wavelengths from container", values.len());
                values
            }
            Ok(values) => {
                let warning = OpenWarning::WavelengthUnavailable {
                    detail: format!("{} wavelengths for {} bands", values.len(), bands),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
                (1..=bands).map(|b| b as f64).collect()
            }
            Err(e) => {
                let warning = OpenWarning::WavelengthUnavailable {
                    detail: e.to_string(),
                };
                log::warn!("{}", warning);
                warnings.push(warning);
                (1..=bands).map(|b| b as f64).collect()
            }
        }
    }

    /// Read a 1-D variable from an optional group
    fn group_values(
        file: &netcdf::File,
        group: Option<&str>,
        variable: &str,
    ) -> CubeResult<Vec<f64>> {
        let var = match group {
            Some(name) => {
                let group = file.group(name)?.ok_or_else(|| {
                    CubeError::NoSuitableVariable(format!("no '{}' group", name))
                })?;
                group.variable(variable)
            }
            None => file.variable(variable),
        };
        let var = var.ok_or_else(|| {
            CubeError::NoSuitableVariable(format!(
                "no '{}' variable in {}",
                variable,
                group.unwrap_or("root")
            ))
        })?;
        Ok(var.get_values::<f64, _>(..)?)
    }

    /// Note the presence or absence of the sensor's spatial reference
    fn check_spatial_metadata(
        file: &netcdf::File,
        source_kind: SourceKind,
        warnings: &mut Vec<OpenWarning>,
    ) {
        let present = match source_kind {
            SourceKind::Emit => matches!(file.group("location"), Ok(Some(g))
                if g.variable("lat").is_some() && g.variable("lon").is_some()),
            SourceKind::Aviris3 => {
                file.variable("easting").is_some() && file.variable("northing").is_some()
            }
            _ => return,
        };
        if present {
            log::debug!("spatial reference metadata located for {}", source_kind);
        } else {
            let warning = OpenWarning::SpatialMetadataUnavailable {
                detail: format!("no coordinate variables for {}", source_kind),
            };
            log::warn!("{}", warning);
            warnings.push(warning);
        }
    }

    /// Load the full variable, permute to canonical order and mask it
    fn materialize(
        file: &netcdf::File,
        introspection: &Introspection,
        shape: CubeShape,
        product: ProductLevel,
        fill_value: f64,
    ) -> CubeResult<CubeArray> {
        log::info!("Loading {} cube to RAM", shape);
        let var = Self::primary_variable(file, introspection)?;
        let values = var.get_values::<f64, _>(..)?;
        let arr = ArrayD::from_shape_vec(IxDyn(&introspection.shape), values)?;
        let arr = arr.permuted_axes(IxDyn(&introspection.permutation));
        let mut cube: Array3<f64> = arr
            .into_dimensionality::<Ix3>()?
            .as_standard_layout()
            .to_owned();

        // Collapse masked elements to NaN once, at load time
        if cube.len() > PARALLEL_MASK_THRESHOLD {
            cube.par_mapv_inplace(|v| mask_to_nan(v, product, fill_value));
        } else {
            cube.mapv_inplace(|v| mask_to_nan(v, product, fill_value));
        }
        Ok(cube)
    }

    pub fn shape(&self) -> CubeShape {
        self.shape
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    pub fn product(&self) -> ProductLevel {
        self.product
    }

    pub fn storage_mode(&self) -> StorageMode {
        match self.storage {
            NcStorage::Resident(_) => StorageMode::Resident,
            NcStorage::Lazy(_) => StorageMode::Memmapped,
        }
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn fill_value(&self) -> f64 {
        self.fill_value
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn warnings(&self) -> &[OpenWarning] {
        &self.warnings
    }

    /// Release the container handle (a resident cube has already done so)
    pub fn close(self) {
        log::debug!("closing NetCDF backend for {}", self.path.display());
        // Dropping NcStorage::Lazy closes the underlying file
    }

    fn mask(&self, value: f64) -> Sample {
        Sample::from_f64(mask_to_nan(value, self.product, self.fill_value))
    }

    /// Bounded hyperslab read in logical coordinates, returned in
    /// canonical (rows, cols, bands) order.
    fn read_slab(
        &self,
        file: &netcdf::File,
        logical: [Range<usize>; 3],
    ) -> CubeResult<Array3<f64>> {
        let perm = self.introspection.permutation;
        let mut physical: [Range<usize>; 3] = [0..0, 0..0, 0..0];
        for (axis, range) in logical.iter().enumerate() {
            physical[perm[axis]] = range.clone();
        }
        let counts: Vec<usize> = physical.iter().map(|r| r.len()).collect();

        let var = Self::primary_variable(file, &self.introspection)?;
        let values = var.get_values::<f64, _>(physical.clone())?;
        let arr = ArrayD::from_shape_vec(IxDyn(&counts), values)?;
        let arr = arr.permuted_axes(IxDyn(&perm));
        Ok(arr
            .into_dimensionality::<Ix3>()?
            .as_standard_layout()
            .to_owned())
    }

    /// Full spectrum at pixel (x = col, y = row)
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
        match &self.storage {
            NcStorage::Resident(cube) => Ok(cube
                .slice(ndarray::s![y, x, ..])
                .iter()
                .map(|v| Sample::from_f64(*v))
                .collect::<Array1<Sample>>()),
            NcStorage::Lazy(file) => {
                let slab = self.read_slab(file, [y..y + 1, x..x + 1, 0..self.shape.bands])?;
                Ok(slab
                    .slice(ndarray::s![0, 0, ..])
                    .iter()
                    .map(|v| self.mask(*v))
                    .collect::<Array1<Sample>>())
            }
        }
    }

    /// Full band plane (rows x cols)
    pub fn read_band(&self, band: usize) -> CubeResult<BandPlane> {
        if band >= self.shape.bands {
            return Err(CubeError::CoordinateOutOfRange {
                what: "band",
                index: band,
                limit: self.shape.bands,
            });
        }
        match &self.storage {
            NcStorage::Resident(cube) => Ok(cube
                .slice(ndarray::s![.., .., band])
                .map(|v| Sample::from_f64(*v))),
            NcStorage::Lazy(file) => {
                let slab =
                    self.read_slab(file, [0..self.shape.rows, 0..self.shape.cols, band..band + 1])?;
                Ok(Array2::from_shape_fn(
                    (self.shape.rows, self.shape.cols),
                    |(r, c)| self.mask(slab[[r, c, 0]]),
                ))
            }
        }
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
        match &self.storage {
            NcStorage::Resident(cube) => Ok(cube
                .slice(ndarray::s![row, .., ..])
                .map(|v| Sample::from_f64(*v))),
            NcStorage::Lazy(file) => {
                let slab = self.read_slab(
                    file,
                    [row..row + 1, 0..self.shape.cols, 0..self.shape.bands],
                )?;
                Ok(Array2::from_shape_fn(
                    (self.shape.cols, self.shape.bands),
                    |(c, b)| self.mask(slab[[0, c, b]]),
                ))
            }
        }
    }
}

/// Product-specific validity masking, collapsing invalid values to NaN.
///
/// Reflectance products are only physical inside [0, 1]; radiance can
/// take any non-negative value. The fill sentinel and NaN are invalid
/// everywhere.
fn mask_to_nan(value: f64, product: ProductLevel, fill_value: f64) -> f64 {
    if !value.is_finite() || value == fill_value {
        return f64::NAN;
    }
    if product.is_reflectance() && !(0.0..=1.0).contains(&value) {
        return f64::NAN;
    }
    if product.is_radiance() && value < 0.0 {
        return f64::NAN;
    }
    value
}
