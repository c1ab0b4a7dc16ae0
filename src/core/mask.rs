use crate::io::header::HeaderValue;
use crate::types::{CubeError, CubeResult};

/// Per-band validity flags (bad band list), plus the absent state.
///
/// An absent mask means "no restriction configured": every band reads as
/// good. Queries are permissive — out-of-range indices are good — while
/// explicit mutation validates strictly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BandMask {
    bands: usize,
    good: Option<Vec<bool>>,
}

impl BandMask {
    /// Unrestricted mask for a cube with the given band count
    pub fn all_good(bands: usize) -> Self {
        Self { bands, good: None }
    }

    /// Validate and install a mask; `None` clears any restriction
    pub fn set(&mut self, good: Option<Vec<bool>>) -> CubeResult<()> {
        if let Some(ref flags) = good {
            if flags.len() != self.bands {
                return Err(CubeError::BandMaskLengthMismatch {
                    expected: self.bands,
                    found: flags.len(),
                });
            }
        }
        self.good = good;
        Ok(())
    }

    /// Build flags from ENVI header list entries (0 = bad, 1 = good).
    /// Int and float zeros/ones are both accepted; anything else is an
    /// `InvalidBandMaskValue`.
    pub fn flags_from_header_list(list: &[HeaderValue]) -> CubeResult<Vec<bool>> {
        list.iter()
            .enumerate()
            .map(|(index, value)| match value.as_float() {
                Some(v) if v == 0.0 => Ok(false),
                Some(v) if v == 1.0 => Ok(true),
                _ => Err(CubeError::InvalidBandMaskValue {
                    index,
                    value: format!("{:?}", value),
                }),
            })
            .collect()
    }

    /// Flags back to ENVI header list entries
    pub fn to_header_list(&self) -> Option<Vec<HeaderValue>> {
        self.good.as_ref().map(|flags| {
            flags
                .iter()
                .map(|g| HeaderValue::Int(if *g { 1 } else { 0 }))
                .collect()
        })
    }

    /// The raw 0/1 list, or `None` when no mask is configured
    pub fn as_list(&self) -> Option<Vec<u8>> {
        self.good
            .as_ref()
            .map(|flags| flags.iter().map(|g| u8::from(*g)).collect())
    }

    pub fn is_set(&self) -> bool {
        self.good.is_some()
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// Permissive query: out-of-range indices and an absent mask are good
    pub fn is_band_good(&self, band: usize) -> bool {
        match &self.good {
            Some(flags) => flags.get(band).copied().unwrap_or(true),
            None => true,
        }
    }

    /// Indices of bands flagged good; all bands when no mask is set
    pub fn good_bands(&self) -> Vec<usize> {
        match &self.good {
            Some(flags) => flags
                .iter()
                .enumerate()
                .filter(|(_, g)| **g)
                .map(|(i, _)| i)
                .collect(),
            None => (0..self.bands).collect(),
        }
    }

    /// Indices of bands flagged bad; empty when no mask is set
    pub fn bad_bands(&self) -> Vec<usize> {
        match &self.good {
            Some(flags) => flags
                .iter()
                .enumerate()
                .filter(|(_, g)| !**g)
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        }
    }
}
