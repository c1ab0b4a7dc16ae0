use crate::types::{CubeError, CubeResult};
use ndarray::{Array2, Array3, Zip};

/// Element-count threshold above which channel stretching runs in parallel
const PARALLEL_STRETCH_THRESHOLD: usize = 1_000_000;

/// Display targets for true-color composites (nm)
const TARGET_RED_NM: f64 = 650.0;
const TARGET_GREEN_NM: f64 = 550.0;
const TARGET_BLUE_NM: f64 = 450.0;

/// Contrast-stretch parameters
#[derive(Debug, Clone)]
pub struct CompositeParams {
    /// Percentile clipped from each end of the valid-data histogram (0-50)
    pub stretch_percent: f64,
    /// Sentinel excluded from statistics and zeroed after the stretch
    pub no_data_value: Option<f64>,
}

impl Default for CompositeParams {
    fn default() -> Self {
        Self {
            stretch_percent: 2.0,
            no_data_value: None,
        }
    }
}

/// A synthesized display image
#[derive(Debug, Clone, PartialEq)]
pub enum CompositeImage {
    /// (rows, cols, 3) channel-last
    Rgb(Array3<u8>),
    /// (rows, cols), produced when all three requested bands coincide
    Gray(Array2<u8>),
}

impl CompositeImage {
    pub fn spatial_dim(&self) -> (usize, usize) {
        match self {
            CompositeImage::Rgb(img) => (img.dim().0, img.dim().1),
            CompositeImage::Gray(img) => img.dim(),
        }
    }
}

/// Percentile-based contrast stretch and RGB/grayscale image synthesis.
///
/// Input channels are float planes where NaN marks invalid elements;
/// those and no-data pixels render as 0 in the output.
pub struct Compositor {
    params: CompositeParams,
}

impl Compositor {
    /// Compositor with default parameters (2% linear stretch)
    pub fn new() -> Self {
        Self {
            params: CompositeParams::default(),
        }
    }

    pub fn with_params(params: CompositeParams) -> Self {
        Self { params }
    }

    /// Stretch three channel planes into an RGB image
    pub fn rgb(
        &self,
        red: &Array2<f64>,
        green: &Array2<f64>,
        blue: &Array2<f64>,
    ) -> CubeResult<Array3<u8>> {
        self.validate()?;
        let dim = red.dim();
        if green.dim() != dim || blue.dim() != dim {
            return Err(CubeError::Composite(format!(
                "channel shapes differ: {:?} vs {:?} vs {:?}",
                red.dim(),
                green.dim(),
                blue.dim()
            )));
        }

        log::debug!(
            "compositing {}x{} RGB image, stretch {}%",
            dim.0,
            dim.1,
            self.params.stretch_percent
        );

        let mut out = Array3::<u8>::zeros((dim.0, dim.1, 3));
        for (channel, plane) in [red, green, blue].into_iter().enumerate() {
            let stretched = self.stretch_channel(plane);
            out.slice_mut(ndarray::s![.., .., channel]).assign(&stretched);
        }
        Ok(out)
    }

    /// Stretch a single plane into a grayscale image
    pub fn grayscale(&self, band: &Array2<f64>) -> CubeResult<Array2<u8>> {
        self.validate()?;
        log::debug!(
            "compositing {}x{} grayscale image, stretch {}%",
            band.dim().0,
            band.dim().1,
            self.params.stretch_percent
        );
        Ok(self.stretch_channel(band))
    }

    fn validate(&self) -> CubeResult<()> {
        let p = self.params.stretch_percent;
        if !(0.0..50.0).contains(&p) {
            return Err(CubeError::Composite(format!(
                "stretch percent must be in [0, 50): {}",
                p
            )));
        }
        Ok(())
    }

    /// Linear percentile stretch of one channel to [0, 255].
    ///
    /// The percentile window is computed over finite, non-no-data values
    /// only; no-data pixels are forced to 0 after the stretch so they
    /// never influence the window.
    fn stretch_channel(&self, plane: &Array2<f64>) -> Array2<u8> {
        let no_data = self.params.no_data_value;

        let mut valid: Vec<f64> = plane
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .filter(|v| !matches_no_data(*v, no_data))
            .collect();

        if valid.is_empty() {
            log::debug!("channel has no valid data, rendering black");
            return Array2::zeros(plane.dim());
        }

        valid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let p = self.params.stretch_percent;
        let mut low = percentile(&valid, p);
        let mut high = percentile(&valid, 100.0 - p);

        if high <= low {
            // Degenerate percentile window: widen to the full valid range
            low = valid[0];
            high = valid[valid.len() - 1];
        }

        let mut out = Array2::<u8>::zeros(plane.dim());
        if high > low {
            let scale = 255.0 / (high - low);
            let apply = |dst: &mut u8, src: &f64| {
                let v = *src;
                *dst = if !v.is_finite() || matches_no_data(v, no_data) {
                    0
                } else {
                    ((v - low) * scale).clamp(0.0, 255.0) as u8
                };
            };
            if plane.len() > PARALLEL_STRETCH_THRESHOLD {
                Zip::from(&mut out).and(plane).par_for_each(apply);
            } else {
                Zip::from(&mut out).and(plane).for_each(apply);
            }
        } else {
            // Constant-valued channel: mid-gray for nonzero, black for zero
            let fill = if low != 0.0 { 128 } else { 0 };
            Zip::from(&mut out).and(plane).for_each(|dst, src| {
                let v = *src;
                *dst = if !v.is_finite() || matches_no_data(v, no_data) {
                    0
                } else {
                    fill
                };
            });
        }
        out
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

/// numpy-style linear-interpolated percentile over a sorted slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Sentinel comparison with a tolerance scaled to the sentinel magnitude
pub(crate) fn matches_no_data(value: f64, no_data: Option<f64>) -> bool {
    let Some(nd) = no_data else {
        return false;
    };
    if nd.is_nan() {
        // NaN sentinels are already covered by the finiteness filter
        return false;
    }
    let atol = if nd != 0.0 {
        (nd.abs() * 1e-6).max(1e-6)
    } else {
        1e-6
    };
    (value - nd).abs() <= atol + 1e-6 * nd.abs()
}

/// Index of the band whose wavelength is nearest to the target
pub fn nearest_band(wavelengths: &[f64], target_nm: f64) -> usize {
    let mut best = 0;
    let mut best_diff = f64::INFINITY;
    for (i, wl) in wavelengths.iter().enumerate() {
        let diff = (wl - target_nm).abs();
        if diff < best_diff {
            best = i;
            best_diff = diff;
        }
    }
    best
}

/// Pick display bands for a true-color composite.
///
/// With visible-spectrum coverage the result is the nearest bands to
/// 650/550/450 nm. Without it, three distinct bands are spread across
/// the available range (long wavelengths on red) rather than silently
/// collapsing to near-identical channels.
pub fn select_display_bands(wavelengths: &[f64]) -> (usize, usize, usize) {
    if wavelengths.is_empty() {
        return (0, 0, 0);
    }
    let n = wavelengths.len();
    if n < 3 {
        return (0, 0, 0);
    }

    let min_wl = wavelengths.iter().copied().fold(f64::INFINITY, f64::min);
    let max_wl = wavelengths
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let has_blue = min_wl <= 480.0;
    let has_green = min_wl <= 580.0 && max_wl >= 520.0;
    let has_red = max_wl >= 620.0;

    if has_blue && has_green && has_red {
        log::debug!("visible coverage {:.0}-{:.0} nm, using true-color targets", min_wl, max_wl);
        return (
            nearest_band(wavelengths, TARGET_RED_NM),
            nearest_band(wavelengths, TARGET_GREEN_NM),
            nearest_band(wavelengths, TARGET_BLUE_NM),
        );
    }

    // Limited visible coverage: spread three distinct bands over the range
    let mut red = ((n as f64 * 0.8) as usize).min(n - 1);
    let mut green = ((n as f64 * 0.5) as usize).min(n - 1);
    let mut blue = ((n as f64 * 0.2) as usize).min(n - 1);
    if green == red {
        green = red.saturating_sub(1);
    }
    if blue == green {
        blue = green.saturating_sub(1);
    }
    if blue == red {
        blue = red.saturating_sub(2);
    }
    log::debug!(
        "limited visible coverage {:.0}-{:.0} nm, spreading bands ({}, {}, {})",
        min_wl,
        max_wl,
        red,
        green,
        blue
    );
    (red, green, blue)
}
