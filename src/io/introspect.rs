use crate::types::{CubeError, CubeResult, OpenWarning};

/// Name fragments marking a spectral axis
const SPECTRAL_NAMES: &[&str] = &["band", "wavelength", "spectral"];

/// Name fragments marking a spatial axis
const SPATIAL_NAMES: &[&str] = &[
    "downtrack",
    "crosstrack",
    "line",
    "sample",
    "northing",
    "easting",
    "lat",
    "lon",
    "x",
    "y",
];

/// Variable names preferred as the primary 3-D cube
const PREFERRED_VARIABLES: &[&str] = &["reflectance", "radiance", "mask"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Spectral,
    Spatial,
    Unknown,
}

/// Classify one axis by name substring first, then cardinality.
///
/// Name evidence outranks the cardinality heuristic so a 300-line
/// `downtrack` axis is not mistaken for a spectral one; the [200, 400]
/// band-count window only decides axes with uninformative names.
pub fn classify_axis(name: &str, len: usize) -> AxisKind {
    let lower = name.to_lowercase();
    if SPECTRAL_NAMES.iter().any(|s| lower.contains(s)) {
        return AxisKind::Spectral;
    }
    if SPATIAL_NAMES.iter().any(|s| lower.contains(s)) {
        return AxisKind::Spatial;
    }
    if (200..=400).contains(&len) {
        return AxisKind::Spectral;
    }
    if len >= 50 {
        return AxisKind::Spatial;
    }
    AxisKind::Unknown
}

/// Outcome of classifying a variable's three axes
#[derive(Debug, Clone)]
pub struct AxisClassification {
    pub kinds: Vec<AxisKind>,
    pub spectral_axis: usize,
    /// Present when the spectral axis had to be guessed
    pub ambiguity: Option<String>,
}

/// Classify all axes of a 3-D variable and pick the spectral one.
///
/// Zero or multiple spectral candidates fall back to axis 0 or the first
/// candidate; the ambiguity is reported, never silently resolved.
pub fn classify_axes(dims: &[(String, usize)]) -> AxisClassification {
    let kinds: Vec<AxisKind> = dims
        .iter()
        .map(|(name, len)| classify_axis(name, *len))
        .collect();

    let candidates: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == AxisKind::Spectral)
        .map(|(i, _)| i)
        .collect();

    let (spectral_axis, ambiguity) = match candidates.as_slice() {
        [single] => (*single, None),
        [] => (
            0,
            Some(format!(
                "no spectral axis identified among {:?}; assuming axis 0",
                dims
            )),
        ),
        multiple => (
            multiple[0],
            Some(format!(
                "multiple spectral axis candidates {:?} among {:?}; using axis {}",
                multiple, dims, multiple[0]
            )),
        ),
    };

    AxisClassification {
        kinds,
        spectral_axis,
        ambiguity,
    }
}

/// Permutation placing the spectral axis last while keeping the other
/// axes in their relative order. `None` means the data is already in
/// canonical orientation.
pub fn transpose_for(spectral_axis: usize, ndim: usize) -> Option<Vec<usize>> {
    if spectral_axis + 1 == ndim {
        return None;
    }
    let mut perm: Vec<usize> = (0..ndim).filter(|a| *a != spectral_axis).collect();
    perm.push(spectral_axis);
    Some(perm)
}

/// Everything the backend needs to know about the primary data variable
#[derive(Debug, Clone)]
pub struct Introspection {
    /// Variable name inside the container
    pub variable: String,
    /// Containing group, when the variable is not at the root
    pub group: Option<String>,
    /// Physical dimension names, in storage order
    pub dims: Vec<String>,
    /// Physical shape, in storage order
    pub shape: Vec<usize>,
    /// Axis permutation to canonical (rows, cols, bands); identity when
    /// the spectral axis is already last
    pub permutation: [usize; 3],
    /// Physical index of the spectral axis
    pub spectral_axis: usize,
    /// Ambiguity warning, when classification was low-confidence
    pub warning: Option<OpenWarning>,
}

/// Locates the primary 3-D variable of a NetCDF container and derives
/// the transpose to canonical orientation.
pub struct NetCdfIntrospector;

impl NetCdfIntrospector {
    /// Inspect a container: enumerate 3-D variables at the root and one
    /// group level deep, prefer the sensor allow-list, classify axes.
    pub fn classify(file: &netcdf::File) -> CubeResult<Introspection> {
        let mut candidates: Vec<(Option<String>, String, Vec<(String, usize)>)> = Vec::new();

        for var in file.variables() {
            if var.dimensions().len() == 3 {
                let dims = Self::dimension_pairs(&var);
                log::debug!(
                    "found 3-D variable '{}': dims={:?}",
                    var.name(),
                    dims
                );
                candidates.push((None, var.name().to_string(), dims));
            }
        }
        for group in file.groups()? {
            for var in group.variables() {
                if var.dimensions().len() == 3 {
                    let dims = Self::dimension_pairs(&var);
                    log::debug!(
                        "found 3-D variable '{}/{}': dims={:?}",
                        group.name(),
                        var.name(),
                        dims
                    );
                    candidates.push((
                        Some(group.name().to_string()),
                        var.name().to_string(),
                        dims,
                    ));
                }
            }
        }

        if candidates.is_empty() {
            return Err(CubeError::NoSuitableVariable(
                "container has no 3-D variables".to_string(),
            ));
        }

        let chosen = candidates
            .iter()
            .find(|(_, name, _)| PREFERRED_VARIABLES.contains(&name.to_lowercase().as_str()))
            .unwrap_or(&candidates[0])
            .clone();
        let (group, variable, dims) = chosen;

        let classification = classify_axes(&dims);
        let warning = classification.ambiguity.map(|detail| {
            let w = OpenWarning::AmbiguousSpectralAxis { detail };
            log::warn!("{}", w);
            w
        });

        let permutation = match transpose_for(classification.spectral_axis, 3) {
            Some(perm) => [perm[0], perm[1], perm[2]],
            None => [0, 1, 2],
        };

        log::info!(
            "selected variable '{}{}{}' dims {:?}, spectral axis {}, permutation {:?}",
            group.as_deref().unwrap_or(""),
            if group.is_some() { "/" } else { "" },
            variable,
            dims,
            classification.spectral_axis,
            permutation
        );

        Ok(Introspection {
            variable,
            group,
            dims: dims.iter().map(|(n, _)| n.clone()).collect(),
            shape: dims.iter().map(|(_, l)| *l).collect(),
            permutation,
            spectral_axis: classification.spectral_axis,
            warning,
        })
    }

    fn dimension_pairs(var: &netcdf::Variable<'_>) -> Vec<(String, usize)> {
        var.dimensions()
            .iter()
            .map(|d| (d.name().to_string(), d.len()))
            .collect()
    }
}
