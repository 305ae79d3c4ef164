//! Steering vectors: the complex response of every microphone to a unit
//! source in a given cell, at a given frequency.

use crate::error::{DoaError, Result};
use crate::geometry::{ArrayGeometry, Bearing, TargetGrid};
use nalgebra::DVector;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

/// Complex sample type used throughout.
pub type C64 = Complex<f64>;

/// How near-field elements are modelled. All of these have been used on
/// real surfaces, so none is folded into another. `Planar` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NearFieldModel {
    /// `(ref/local)·exp(jk(local − ref)·cosθ·sinφ)`
    CylindricalDecay,
    /// `(ref/local)·exp(jk|local − ref|·cosθ·sinφ)`
    CylindricalAbsPath,
    /// `exp(jk(ref − local))`
    #[default]
    Planar,
    /// `(ref/local)·exp(jk(ref − local))`
    PlanarDecay,
    /// `exp(jkR·cosθ·sinφ)` with per-microphone angles
    AngleOnly,
}

/// Which manifold a spectrum is evaluated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SteeringModel {
    /// Plane-wave model over each cell's direction from the array centre.
    #[default]
    FarField,
    /// Spherical-wave model over each cell's per-microphone bearings.
    NearField(NearFieldModel),
}

/// Far-field steering vector for a uniform circular array.
pub fn far_field(geometry: &ArrayGeometry, fc: f64, theta: f64, phi: f64) -> DVector<C64> {
    let k = geometry.wavenumber(fc);
    let n_ring = geometry.n_ring();
    let theta = theta - geometry.theta_offset();
    DVector::from_fn(geometry.n_mics, |m, _| {
        if m >= n_ring {
            return C64::new(1.0, 0.0);
        }
        let arg = k * geometry.radius * (theta - geometry.mic_angle(m)).cos() * phi.sin();
        C64::from_polar(1.0, arg)
    })
}

/// Near-field steering vector from a cell's centre bearing and its bearing
/// from each microphone.
pub fn near_field(
    geometry: &ArrayGeometry,
    fc: f64,
    model: NearFieldModel,
    centre: &Bearing,
    per_mic: &[Bearing],
) -> DVector<C64> {
    let k = geometry.wavenumber(fc);
    let n_ring = geometry.n_ring();
    let reference = centre.range;
    DVector::from_fn(geometry.n_mics, |m, _| {
        if m >= n_ring {
            return C64::new(1.0, 0.0);
        }
        let b = &per_mic[m];
        let local = b.range;
        match model {
            NearFieldModel::CylindricalDecay => C64::from_polar(
                reference / local,
                k * (local - reference) * b.theta.cos() * b.phi.sin(),
            ),
            NearFieldModel::CylindricalAbsPath => C64::from_polar(
                reference / local,
                k * (local - reference).abs() * b.theta.cos() * b.phi.sin(),
            ),
            NearFieldModel::Planar => C64::from_polar(1.0, k * (reference - local)),
            NearFieldModel::PlanarDecay => {
                C64::from_polar(reference / local, k * (reference - local))
            }
            NearFieldModel::AngleOnly => C64::from_polar(
                1.0,
                k * geometry.radius * b.theta.cos() * b.phi.sin(),
            ),
        }
    })
}

impl SteeringModel {
    /// Checks that this model can be evaluated over `grid`.
    pub fn check_grid(&self, grid: &TargetGrid) -> Result<()> {
        match self {
            SteeringModel::NearField(model) if !grid.is_near_field() => Err(DoaError::config(
                format!("near-field steering ({:?}) needs a near-field surface", model),
            )),
            _ => Ok(()),
        }
    }

    /// Steering vector for cell (`row`, `col`) of `grid` at frequency `fc`.
    pub fn steering(
        &self,
        grid: &TargetGrid,
        geometry: &ArrayGeometry,
        fc: f64,
        row: usize,
        col: usize,
    ) -> Result<DVector<C64>> {
        let centre = grid.centre(row, col);
        match self {
            SteeringModel::FarField => Ok(far_field(geometry, fc, centre.theta, centre.phi)),
            SteeringModel::NearField(model) => {
                let per_mic = grid.mic_bearings(row, col).ok_or_else(|| {
                    DoaError::config("near-field steering needs a near-field surface")
                })?;
                Ok(near_field(geometry, fc, *model, &centre, per_mic))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{build_target_grid, Surface};
    use std::f64::consts::PI;

    fn close(a: C64, b: C64) -> bool {
        (a - b).norm() < 1e-9
    }

    #[test]
    fn even_ring_elements_are_rotations_of_each_other() {
        let g = ArrayGeometry::new(8, 0.05, 340.0);
        let step = 2.0 * PI / 8.0;
        for theta_deg in [0.0, 37.0, 190.0, 300.0] {
            let theta = f64::to_radians(theta_deg);
            let phi = 1.1;
            let a = far_field(&g, 3000.0, theta, phi);
            let shifted = far_field(&g, 3000.0, theta + step, phi);
            for k in 0..7 {
                assert!(close(a[k + 1], shifted[k]));
            }
        }
    }

    #[test]
    fn odd_array_centre_element_is_unity() {
        let g = ArrayGeometry::new(9, 0.05, 340.0);
        for (theta, phi) in [(0.0, 0.0), (1.0, 0.5), (4.0, 1.5)] {
            let a = far_field(&g, 2500.0, theta, phi);
            assert_eq!(a[8], C64::new(1.0, 0.0));
        }
        let grid = build_target_grid(
            &Surface::Plane {
                length: 1.0,
                height: 0.7,
                cells: 4,
            },
            &g,
        )
        .unwrap();
        for model in [
            NearFieldModel::CylindricalDecay,
            NearFieldModel::CylindricalAbsPath,
            NearFieldModel::Planar,
            NearFieldModel::PlanarDecay,
            NearFieldModel::AngleOnly,
        ] {
            let a = SteeringModel::NearField(model)
                .steering(&grid, &g, 2500.0, 1, 2)
                .unwrap();
            assert_eq!(a[8], C64::new(1.0, 0.0));
        }
    }

    #[test]
    fn broadside_elevation_zero_is_flat() {
        let g = ArrayGeometry::new(6, 0.05, 340.0);
        let a = far_field(&g, 4000.0, 2.0, 0.0);
        assert!(a.iter().all(|e| close(*e, C64::new(1.0, 0.0))));
    }

    #[test]
    fn theta_offset_rotates_the_pattern() {
        let g = ArrayGeometry::new(4, 0.05, 340.0);
        let shifted = ArrayGeometry {
            theta_offset_deg: 30.0,
            ..g
        };
        let a = far_field(&g, 2000.0, 0.4, 1.0);
        let b = far_field(&shifted, 2000.0, 0.4 + f64::to_radians(30.0), 1.0);
        assert!(a.iter().zip(b.iter()).all(|(x, y)| close(*x, *y)));
    }

    #[test]
    fn planar_model_tracks_path_difference() {
        let g = ArrayGeometry::new(4, 0.05, 340.0);
        let grid = build_target_grid(
            &Surface::Plane {
                length: 1.0,
                height: 1.0,
                cells: 3,
            },
            &g,
        )
        .unwrap();
        let centre = grid.centre(0, 0);
        let per_mic = grid.mic_bearings(0, 0).unwrap();
        let a = near_field(&g, 1000.0, NearFieldModel::PlanarDecay, &centre, per_mic);
        let k = g.wavenumber(1000.0);
        for m in 0..4 {
            let expected =
                C64::from_polar(centre.range / per_mic[m].range, k * (centre.range - per_mic[m].range));
            assert!(close(a[m], expected));
        }
    }

    #[test]
    fn every_near_field_model_matches_its_formula() {
        let g = ArrayGeometry::new(9, 0.1, 340.0);
        let grid = build_target_grid(
            &Surface::Plane {
                length: 1.0,
                height: 0.5,
                cells: 5,
            },
            &g,
        )
        .unwrap();
        let fc = 1500.0;
        let k = g.wavenumber(fc);
        let (rows, cols) = grid.shape();
        let mut nearer_mic_seen = false;

        for row in 0..rows {
            for col in 0..cols {
                let centre = grid.centre(row, col);
                let per_mic = grid.mic_bearings(row, col).unwrap();
                let reference = centre.range;
                let eval = |model| near_field(&g, fc, model, &centre, per_mic);
                let cyl = eval(NearFieldModel::CylindricalDecay);
                let abs = eval(NearFieldModel::CylindricalAbsPath);
                let planar = eval(NearFieldModel::Planar);
                let planar_decay = eval(NearFieldModel::PlanarDecay);
                let angle = eval(NearFieldModel::AngleOnly);

                for m in 0..g.n_ring() {
                    let b = per_mic[m];
                    let local = b.range;
                    let tilt = b.theta.cos() * b.phi.sin();
                    let gain = reference / local;

                    assert!(close(
                        cyl[m],
                        C64::from_polar(gain, k * (local - reference) * tilt)
                    ));
                    assert!(close(
                        abs[m],
                        C64::from_polar(gain, k * (local - reference).abs() * tilt)
                    ));
                    assert!(close(planar[m], C64::from_polar(1.0, k * (reference - local))));
                    assert!(close(
                        planar_decay[m],
                        C64::from_polar(gain, k * (reference - local))
                    ));
                    assert!(close(angle[m], C64::from_polar(1.0, k * g.radius * tilt)));

                    if local < reference && (k * (local - reference) * tilt).sin().abs() > 1e-6 {
                        nearer_mic_seen = true;
                        assert!(!close(cyl[m], abs[m]));
                    }
                }
            }
        }
        assert!(nearer_mic_seen);
    }

    #[test]
    fn planar_is_the_default_near_field_model() {
        assert_eq!(NearFieldModel::default(), NearFieldModel::Planar);
    }

    #[test]
    fn near_field_on_far_field_grid_is_an_error() {
        let g = ArrayGeometry::default();
        let grid = build_target_grid(&Surface::default(), &g).unwrap();
        let model = SteeringModel::NearField(NearFieldModel::Planar);
        assert!(model.check_grid(&grid).is_err());
        assert!(model.steering(&grid, &g, 1000.0, 0, 0).is_err());
        assert!(SteeringModel::FarField.check_grid(&grid).is_ok());
    }
}
