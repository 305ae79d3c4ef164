//! Combining per-band pseudo-spectra into one composite map.

use crate::error::{DoaError, Result};
use log::warn;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How per-band maps are folded together. Serialized by name, e.g.
/// `"linadd"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "String", into = "String")]
pub enum FusionPolicy {
    /// Product of each band over its maximum
    Lin,
    /// Mean of each band in decibels
    Log,
    /// Sum of each band over its maximum
    #[default]
    LinAdd,
    /// Sum of the raw bands
    LinAddWithoutNorm,
}

impl FusionPolicy {
    /// Lowercase name used in config files.
    pub fn name(&self) -> &'static str {
        match self {
            FusionPolicy::Lin => "lin",
            FusionPolicy::Log => "log",
            FusionPolicy::LinAdd => "linadd",
            FusionPolicy::LinAddWithoutNorm => "linaddwithoutnorm",
        }
    }
}

impl fmt::Display for FusionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<String> for FusionPolicy {
    type Error = DoaError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<FusionPolicy> for String {
    fn from(value: FusionPolicy) -> Self {
        value.name().to_string()
    }
}

impl FromStr for FusionPolicy {
    type Err = DoaError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lin" => Ok(FusionPolicy::Lin),
            "log" => Ok(FusionPolicy::Log),
            "linadd" => Ok(FusionPolicy::LinAdd),
            "linaddwithoutnorm" => Ok(FusionPolicy::LinAddWithoutNorm),
            other => Err(DoaError::config(format!("unknown fusion policy '{}'", other))),
        }
    }
}

fn finite_range(map: &Array2<f64>) -> Option<(f64, f64)> {
    map.iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Replaces non-finite entries: `+inf` with the largest finite value, the
/// rest with the smallest. A map with no finite values becomes all ones.
fn repair(map: &Array2<f64>, band: usize) -> Array2<f64> {
    if map.iter().all(|v| v.is_finite()) {
        return map.clone();
    }
    warn!("band {} has non-finite cells, clamping them", band);
    match finite_range(map) {
        Some((lo, hi)) => map.mapv(|v| {
            if v.is_finite() {
                v
            } else if v == f64::INFINITY {
                hi
            } else {
                lo
            }
        }),
        None => Array2::ones(map.raw_dim()),
    }
}

/// Rescales `map` to `[0, 1]`. A flat (or entirely non-finite) map becomes a
/// uniform 0.5.
pub fn normalize_map(map: &Array2<f64>) -> Array2<f64> {
    match finite_range(map) {
        Some((lo, hi)) if hi - lo > 0.0 && (hi - lo).is_finite() => map.mapv(|v| {
            if v.is_finite() {
                (v - lo) / (hi - lo)
            } else if v == f64::INFINITY {
                1.0
            } else {
                0.0
            }
        }),
        _ => Array2::from_elem(map.raw_dim(), 0.5),
    }
}

/// Folds `per_band` maps under `policy`. Returns the raw composite and each
/// band rescaled to `[0, 1]`; the composite is left for the caller to
/// normalise.
pub fn fuse_bands(
    per_band: &[Array2<f64>],
    policy: FusionPolicy,
) -> Result<(Array2<f64>, Vec<Array2<f64>>)> {
    let first = per_band
        .first()
        .ok_or_else(|| DoaError::config("nothing to fuse"))?;
    let dim = first.raw_dim();
    if per_band.iter().any(|m| m.raw_dim() != dim) {
        return Err(DoaError::shape("band maps have different shapes"));
    }
    let n_bands = per_band.len() as f64;

    let mut composite = match policy {
        FusionPolicy::Lin => Array2::ones(dim),
        _ => Array2::zeros(dim),
    };
    let mut normalized = Vec::with_capacity(per_band.len());

    for (i, raw) in per_band.iter().enumerate() {
        let band = repair(raw, i);
        let max = band.iter().cloned().fold(f64::MIN, f64::max);
        let max = if max > 0.0 { max } else { 1.0 };
        match policy {
            FusionPolicy::Lin => composite *= &(&band / max),
            FusionPolicy::Log => {
                composite += &band.mapv(|v| 10.0 * v.max(f64::MIN_POSITIVE).log10() / n_bands)
            }
            FusionPolicy::LinAdd => composite += &(&band / max),
            FusionPolicy::LinAddWithoutNorm => composite += &band,
        }
        normalized.push(normalize_map(&band));
    }

    Ok((composite, normalized))
}

/// Intensity of cell (`row`, `col`) in every normalised band map.
pub fn band_intensities(normalized: &[Array2<f64>], row: usize, col: usize) -> Vec<f64> {
    normalized
        .iter()
        .map(|m| m.get((row, col)).copied().unwrap_or(0.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn policy_names_parse() {
        for p in [
            FusionPolicy::Lin,
            FusionPolicy::Log,
            FusionPolicy::LinAdd,
            FusionPolicy::LinAddWithoutNorm,
        ] {
            assert_eq!(p.name().parse::<FusionPolicy>().unwrap(), p);
        }
        assert!(matches!(
            "geometric".parse::<FusionPolicy>(),
            Err(DoaError::ConfigurationError(_))
        ));
        assert_eq!(FusionPolicy::default(), FusionPolicy::LinAdd);
    }

    #[test]
    fn linadd_of_identical_bands_doubles() {
        let band = array![[1.0, 2.0], [4.0, 8.0]];
        let (composite, _) = fuse_bands(&[band.clone(), band.clone()], FusionPolicy::LinAdd).unwrap();
        let expected = band.mapv(|v| 2.0 * v / 8.0);
        assert!(composite
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| (a - b).abs() < 1e-12));
    }

    #[test]
    fn lin_multiplies_from_ones() {
        let a = array![[1.0, 2.0]];
        let b = array![[4.0, 2.0]];
        let (composite, _) = fuse_bands(&[a, b], FusionPolicy::Lin).unwrap();
        assert_eq!(composite, array![[0.5, 0.5]]);
    }

    #[test]
    fn log_averages_decibels() {
        let a = array![[1.0, 10.0]];
        let b = array![[100.0, 10.0]];
        let (composite, _) = fuse_bands(&[a, b], FusionPolicy::Log).unwrap();
        assert!((composite[[0, 0]] - 10.0).abs() < 1e-12);
        assert!((composite[[0, 1]] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn raw_sum() {
        let a = array![[1.0, 10.0]];
        let b = array![[100.0, 10.0]];
        let (composite, _) = fuse_bands(&[a, b], FusionPolicy::LinAddWithoutNorm).unwrap();
        assert_eq!(composite, array![[101.0, 20.0]]);
    }

    #[test]
    fn normalized_bands_and_intensities() {
        let a = array![[1.0, 3.0], [5.0, 9.0]];
        let flat = array![[2.0, 2.0], [2.0, 2.0]];
        let (_, norm) = fuse_bands(&[a, flat], FusionPolicy::LinAdd).unwrap();
        assert_eq!(norm[0], array![[0.0, 0.25], [0.5, 1.0]]);
        assert_eq!(norm[1], Array2::from_elem((2, 2), 0.5));
        assert_eq!(band_intensities(&norm, 1, 0), vec![0.5, 0.5]);
    }

    #[test]
    fn composite_normalizes_into_unit_range() {
        let a = array![[1.0, 3.0], [5.0, 9.0]];
        let b = array![[7.0, 1.0], [2.0, 3.0]];
        for policy in [
            FusionPolicy::Lin,
            FusionPolicy::Log,
            FusionPolicy::LinAdd,
            FusionPolicy::LinAddWithoutNorm,
        ] {
            let (composite, _) = fuse_bands(&[a.clone(), b.clone()], policy).unwrap();
            let n = normalize_map(&composite);
            assert!(n.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(n.iter().any(|v| *v == 1.0));
        }
    }

    #[test]
    fn infinite_cells_are_repaired() {
        let a = array![[1.0, f64::INFINITY], [f64::NAN, 4.0]];
        let (composite, norm) = fuse_bands(&[a], FusionPolicy::LinAdd).unwrap();
        assert!(composite.iter().all(|v| v.is_finite()));
        assert_eq!(composite, array![[0.25, 1.0], [0.25, 1.0]]);
        assert_eq!(norm[0], array![[0.0, 1.0], [0.0, 1.0]]);
    }

    #[test]
    fn mismatched_shapes_are_rejected() {
        let a = Array2::<f64>::zeros((2, 2));
        let b = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            fuse_bands(&[a, b], FusionPolicy::LinAdd),
            Err(DoaError::ShapeMismatch(_))
        ));
        assert!(fuse_bands(&[], FusionPolicy::LinAdd).is_err());
    }

    #[test]
    fn flat_map_normalizes_to_half() {
        let flat = Array2::from_elem((3, 4), 7.0);
        assert_eq!(normalize_map(&flat), Array2::from_elem((3, 4), 0.5));
    }
}
