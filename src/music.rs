//! Subspace (MUSIC) pseudo-spectrum over a target grid.
//!
//! Each channel is taken to the frequency domain, every bin becomes one
//! snapshot of the array, and the sample covariance of those snapshots is
//! decomposed. The singular vectors left over once the strongest
//! `assumed_source_count` are removed span the noise subspace; a cell whose
//! steering vector is orthogonal to it is a likely source.

use crate::audio::AudioBuffer;
use crate::error::{DoaError, Result};
use crate::geometry::{ArrayGeometry, TargetGrid};
use crate::manifold::{SteeringModel, C64};
use crate::spectral::half_spectrum;
use log::debug;
use nalgebra::{DMatrix, DVector};
use ndarray::Array2;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// Tuning for [music_spectrum].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicOptions {
    /// Number of singular vectors treated as signal.
    pub assumed_source_count: usize,
    /// Smallest denominator allowed in `1/|AᴴUnUnᴴA|`. `None` leaves the
    /// reciprocal unguarded, which can produce `inf`.
    pub epsilon: Option<f64>,
}

impl Default for MusicOptions {
    fn default() -> Self {
        Self {
            assumed_source_count: 2,
            epsilon: Some(1e-12),
        }
    }
}

/// Spatial covariance `(1/K)·Σ x_f x_fᴴ` of the half-spectrum snapshots of
/// every channel.
///
/// Computed as `Xᵀ·X̄`, the conjugate of `Xᴴ·X`, to pair with the `+j`
/// phase of the steering vectors in [crate::manifold].
pub fn spatial_covariance(audio: &AudioBuffer) -> Result<DMatrix<C64>> {
    let n = audio.n_channels();
    let bins = audio.n_samples() / 2;
    if bins < n {
        return Err(DoaError::InsufficientData {
            needed: 2 * n,
            got: audio.n_samples(),
        });
    }

    let mut planner = FftPlanner::new();
    let mut x = DMatrix::<C64>::zeros(bins, n);
    for ch in 0..n {
        let samples = audio.channel(ch).to_vec();
        let spec = half_spectrum(&mut planner, &samples);
        x.set_column(ch, &DVector::from_vec(spec));
    }

    let r = x.transpose() * x.map(|c| c.conj());
    Ok(r / C64::new(bins as f64, 0.0))
}

/// Projector onto the noise subspace of `covariance`.
pub fn noise_projector(covariance: DMatrix<C64>, sources: usize) -> Result<DMatrix<C64>> {
    let n = covariance.nrows();
    let svd = covariance
        .try_svd(true, false, f64::EPSILON, 0)
        .ok_or_else(|| DoaError::NumericDegeneracy("covariance SVD did not converge".into()))?;
    let u = svd
        .u
        .ok_or_else(|| DoaError::NumericDegeneracy("SVD returned no left vectors".into()))?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| svd.singular_values[b].total_cmp(&svd.singular_values[a]));

    let noise: Vec<usize> = order.into_iter().skip(sources).collect();
    let un = DMatrix::from_fn(n, noise.len(), |r, c| u[(r, noise[c])]);
    Ok(&un * un.adjoint())
}

/// `1/|aᴴ·P·a|` for steering vector `a` and noise projector `P`, with the
/// denominator raised to `epsilon` when one is given.
pub fn pseudo_power(a: &DVector<C64>, projector: &DMatrix<C64>, epsilon: Option<f64>) -> f64 {
    let d = (a.adjoint() * projector * a)[(0, 0)].norm();
    let d = match epsilon {
        Some(eps) => d.max(eps),
        None => d,
    };
    1.0 / d
}

/// MUSIC pseudo-spectrum of band-limited audio at centre frequency `fc`,
/// shaped like `grid`.
pub fn music_spectrum(
    filtered: &AudioBuffer,
    fc: f64,
    grid: &TargetGrid,
    geometry: &ArrayGeometry,
    steering: &SteeringModel,
    options: &MusicOptions,
) -> Result<Array2<f64>> {
    let n = geometry.n_mics;
    if filtered.n_channels() != n {
        return Err(DoaError::shape(format!(
            "{} channels for a {} microphone array",
            filtered.n_channels(),
            n
        )));
    }
    if grid.n_mics() != n {
        return Err(DoaError::shape(format!(
            "grid built for {} microphones, array has {}",
            grid.n_mics(),
            n
        )));
    }
    if options.assumed_source_count >= n {
        return Err(DoaError::config(format!(
            "cannot assume {} sources with {} microphones",
            options.assumed_source_count, n
        )));
    }
    if !(fc.is_finite() && fc > 0.0) {
        return Err(DoaError::config(format!("bad centre frequency {}", fc)));
    }
    steering.check_grid(grid)?;

    let r = spatial_covariance(filtered)?;
    let projector = noise_projector(r, options.assumed_source_count)?;

    let (rows, cols) = grid.shape();
    let mut out = Array2::zeros((rows, cols));
    for row in 0..rows {
        for col in 0..cols {
            let a = steering.steering(grid, geometry, fc, row, col)?;
            out[[row, col]] = pseudo_power(&a, &projector, options.epsilon);
        }
    }
    debug!("music spectrum at {} Hz over {}x{} cells", fc, rows, cols);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{fuse_bands, normalize_map, FusionPolicy};
    use crate::geometry::{build_target_grid, Surface};
    use crate::manifold::NearFieldModel;
    use crate::simulator::{PointSource, SourceLocation};

    fn argmax(map: &Array2<f64>) -> (usize, usize) {
        let mut best = (0, 0);
        for ((r, c), v) in map.indexed_iter() {
            if *v > map[best] {
                best = (r, c);
            }
        }
        best
    }

    #[test]
    fn far_field_source_is_found() {
        let geometry = ArrayGeometry::new(8, 0.05, 343.0);
        let grid = build_target_grid(
            &Surface::FarField {
                theta_cells: 37,
                phi_cells: 10,
            },
            &geometry,
        )
        .unwrap();
        let audio = PointSource::new(
            SourceLocation::Direction {
                theta: f64::to_radians(120.0),
                phi: f64::to_radians(60.0),
            },
            vec![(2000.0, 1.0)],
        )
        .render(&geometry, 48000.0, 4800)
        .unwrap();

        let map = music_spectrum(
            &audio,
            2000.0,
            &grid,
            &geometry,
            &SteeringModel::FarField,
            &MusicOptions::default(),
        )
        .unwrap();
        assert_eq!(map.dim(), (37, 10));
        assert!(map.iter().all(|v| *v > 0.0));

        let (r, c) = argmax(&map);
        assert!((r as i64 - 12).abs() <= 1, "theta cell {}", r);
        assert!((c as i64 - 6).abs() <= 1, "phi cell {}", c);
    }

    #[test]
    fn near_field_plane_source_is_found() {
        let geometry = ArrayGeometry::new(8, 0.1, 343.0);
        let grid = build_target_grid(
            &Surface::Plane {
                length: 2.0,
                height: 1.0,
                cells: 11,
            },
            &geometry,
        )
        .unwrap();
        let audio = PointSource::new(SourceLocation::Point([0.4, -0.6, 1.0]), vec![(2000.0, 1.0)])
            .render(&geometry, 48000.0, 4800)
            .unwrap();

        let map = music_spectrum(
            &audio,
            2000.0,
            &grid,
            &geometry,
            &SteeringModel::NearField(NearFieldModel::Planar),
            &MusicOptions::default(),
        )
        .unwrap();
        let (r, c) = argmax(&map);
        // rows run along y, columns along x
        assert!((r as i64 - 2).abs() <= 1, "y cell {}", r);
        assert!((c as i64 - 7).abs() <= 1, "x cell {}", c);
    }

    #[test]
    fn unguarded_reciprocal_is_allowed() {
        let geometry = ArrayGeometry::new(4, 0.05, 343.0);
        let grid = build_target_grid(
            &Surface::FarField {
                theta_cells: 5,
                phi_cells: 3,
            },
            &geometry,
        )
        .unwrap();
        let audio = PointSource::new(
            SourceLocation::Direction {
                theta: 0.0,
                phi: 1.0,
            },
            vec![(1000.0, 1.0)],
        )
        .with_noise(0.01, 7)
        .render(&geometry, 16000.0, 1600)
        .unwrap();
        let options = MusicOptions {
            assumed_source_count: 1,
            epsilon: None,
        };
        let map = music_spectrum(
            &audio,
            1000.0,
            &grid,
            &geometry,
            &SteeringModel::FarField,
            &options,
        )
        .unwrap();
        assert!(map.iter().all(|v| *v > 0.0));
    }

    #[test]
    fn epsilon_caps_a_vanishing_denominator() {
        // projector onto the last two axes; `a` lies wholly in the first two
        let projector = DMatrix::<C64>::from_diagonal(&DVector::from_vec(vec![
            C64::new(0.0, 0.0),
            C64::new(0.0, 0.0),
            C64::new(1.0, 0.0),
            C64::new(1.0, 0.0),
        ]));
        let a = DVector::from_vec(vec![
            C64::new(1.0, 0.0),
            C64::new(0.0, 1.0),
            C64::new(0.0, 0.0),
            C64::new(0.0, 0.0),
        ]);
        assert_eq!(pseudo_power(&a, &projector, Some(1e-3)), 1e3);
        assert_eq!(pseudo_power(&a, &projector, None), f64::INFINITY);

        let b = DVector::from_element(4, C64::new(0.5, 0.0));
        assert!((pseudo_power(&b, &projector, Some(1e-3)) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn steering_vector_in_signal_subspace_hits_the_guard() {
        let geometry = ArrayGeometry::new(4, 0.05, 343.0);
        let a = crate::manifold::far_field(&geometry, 2000.0, 0.7, 1.1);
        // rank one covariance spanned by `a` itself
        let r = &a * a.adjoint();
        let projector = noise_projector(r, 1).unwrap();

        assert_eq!(pseudo_power(&a, &projector, Some(1e-3)), 1e3);
        let unguarded = pseudo_power(&a, &projector, None);
        assert!(unguarded > 1e3, "unguarded {}", unguarded);
    }

    #[test]
    fn infinite_cells_survive_fusion() {
        let projector = DMatrix::<C64>::from_diagonal(&DVector::from_vec(vec![
            C64::new(0.0, 0.0),
            C64::new(1.0, 0.0),
        ]));
        let on = DVector::from_vec(vec![C64::new(1.0, 0.0), C64::new(0.0, 0.0)]);
        let off = DVector::from_vec(vec![C64::new(0.0, 0.0), C64::new(2.0, 0.0)]);
        let map = Array2::from_shape_vec(
            (1, 2),
            vec![
                pseudo_power(&on, &projector, None),
                pseudo_power(&off, &projector, None),
            ],
        )
        .unwrap();
        assert_eq!(map[[0, 0]], f64::INFINITY);

        for policy in [
            FusionPolicy::Lin,
            FusionPolicy::Log,
            FusionPolicy::LinAdd,
            FusionPolicy::LinAddWithoutNorm,
        ] {
            let (raw, bands) = fuse_bands(&[map.clone(), map.clone()], policy).unwrap();
            assert!(raw.iter().all(|v| v.is_finite()), "{:?}: {:?}", policy, raw);
            let composite = normalize_map(&raw);
            assert!(composite.iter().all(|v| (0.0..=1.0).contains(v)));
            assert!(bands.iter().flatten().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn shape_errors() {
        let geometry = ArrayGeometry::new(4, 0.05, 343.0);
        let grid = build_target_grid(&Surface::default(), &geometry).unwrap();
        let opts = MusicOptions::default();

        let three = AudioBuffer::from_channels(vec![vec![0.0; 64]; 3], 8000.0).unwrap();
        assert!(matches!(
            music_spectrum(&three, 1000.0, &grid, &geometry, &SteeringModel::FarField, &opts),
            Err(DoaError::ShapeMismatch(_))
        ));

        let short = AudioBuffer::from_channels(vec![vec![0.0; 6]; 4], 8000.0).unwrap();
        assert!(matches!(
            music_spectrum(&short, 1000.0, &grid, &geometry, &SteeringModel::FarField, &opts),
            Err(DoaError::InsufficientData { needed: 8, got: 6 })
        ));

        let too_many = MusicOptions {
            assumed_source_count: 4,
            ..opts
        };
        let ok = AudioBuffer::from_channels(vec![vec![0.0; 64]; 4], 8000.0).unwrap();
        assert!(matches!(
            music_spectrum(&ok, 1000.0, &grid, &geometry, &SteeringModel::FarField, &too_many),
            Err(DoaError::ConfigurationError(_))
        ));

        let other = ArrayGeometry::new(6, 0.05, 343.0);
        let other_grid = build_target_grid(&Surface::default(), &other).unwrap();
        assert!(matches!(
            music_spectrum(&ok, 1000.0, &other_grid, &geometry, &SteeringModel::FarField, &opts),
            Err(DoaError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn covariance_is_hermitian() {
        let geometry = ArrayGeometry::new(4, 0.05, 343.0);
        let audio = PointSource::new(
            SourceLocation::Direction {
                theta: 1.0,
                phi: 0.8,
            },
            vec![(1500.0, 1.0), (2500.0, 0.5)],
        )
        .with_noise(0.05, 3)
        .render(&geometry, 16000.0, 512)
        .unwrap();
        let r = spatial_covariance(&audio).unwrap();
        assert!((&r - r.adjoint()).norm() < 1e-9);
    }
}
