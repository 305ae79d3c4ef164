//! Array placement and the grids of candidate source cells that the
//! estimators are evaluated over.
//!
//! Every grid is built by [build_target_grid] from a [Surface] and an
//! [ArrayGeometry]. Far-field grids only carry a direction per cell. The
//! near-field surfaces (plane, pipe, cylinder) also carry the bearing and
//! range of every cell as seen from every microphone, which is what the
//! near-field manifold models need.
//!
//! All lengths are in metres. Angles inside a [TargetGrid] are radians; the
//! configuration surface takes degrees where a human is expected to type
//! them.

use crate::error::{DoaError, Result};
use log::debug;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

/// A 3D position, in metres, relative to the array centre.
pub type Position = [f64; 3];

/// A uniform circular microphone array, optionally with one extra microphone
/// at its centre.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayGeometry {
    /// Number of microphones. If odd, the last one sits at the centre.
    pub n_mics: usize,
    /// Radius of the ring, in metres
    pub radius: f64,
    /// Physical rotation of the ring, in degrees
    pub rotation_deg: f64,
    /// Azimuth correction applied when steering, in degrees
    pub theta_offset_deg: f64,
    /// Speed of sound, in m/s
    pub speed_of_sound: f64,
}

impl Default for ArrayGeometry {
    fn default() -> Self {
        Self {
            n_mics: 9,
            radius: 0.05,
            rotation_deg: 0.0,
            theta_offset_deg: 0.0,
            speed_of_sound: 340.0,
        }
    }
}

impl ArrayGeometry {
    /// Shorthand for an unrotated array with no azimuth offset.
    pub fn new(n_mics: usize, radius: f64, speed_of_sound: f64) -> Self {
        Self {
            n_mics,
            radius,
            speed_of_sound,
            ..Default::default()
        }
    }

    /// Fails fast on an array we cannot steer.
    pub fn validate(&self) -> Result<()> {
        if self.n_mics < 2 {
            return Err(DoaError::config(format!(
                "need at least 2 microphones, got {}",
                self.n_mics
            )));
        }
        if !(self.radius.is_finite() && self.radius > 0.0) {
            return Err(DoaError::config("array radius must be positive"));
        }
        if !(self.speed_of_sound.is_finite() && self.speed_of_sound > 0.0) {
            return Err(DoaError::config("speed of sound must be positive"));
        }
        if !(self.rotation_deg.is_finite() && self.theta_offset_deg.is_finite()) {
            return Err(DoaError::config("array angles must be finite"));
        }
        Ok(())
    }

    /// Whether the last microphone sits at the array centre.
    pub fn has_centre_mic(&self) -> bool {
        self.n_mics % 2 == 1
    }

    /// Number of microphones on the ring.
    pub fn n_ring(&self) -> usize {
        if self.has_centre_mic() {
            self.n_mics - 1
        } else {
            self.n_mics
        }
    }

    /// Placement angle of microphone `k`, in radians. Ring microphones run
    /// clockwise from the rotation angle; the centre microphone reports 0.
    pub fn mic_angle(&self, k: usize) -> f64 {
        if k >= self.n_ring() {
            return 0.0;
        }
        -2.0 * PI * k as f64 / self.n_ring() as f64 + self.rotation_deg.to_radians()
    }

    /// `theta_offset_deg` in radians.
    pub fn theta_offset(&self) -> f64 {
        self.theta_offset_deg.to_radians()
    }

    /// Position of microphone `k`.
    pub fn mic_position(&self, k: usize) -> Position {
        if k >= self.n_ring() {
            return [0.0; 3];
        }
        let a = self.mic_angle(k);
        [self.radius * a.cos(), self.radius * a.sin(), 0.0]
    }

    /// Positions of every microphone, in channel order.
    pub fn mic_positions(&self) -> Vec<Position> {
        (0..self.n_mics).map(|k| self.mic_position(k)).collect()
    }

    /// Wavenumber 2π/λ at the frequency `fc`.
    pub fn wavenumber(&self, fc: f64) -> f64 {
        2.0 * PI * fc / self.speed_of_sound
    }
}

/// The surface a [TargetGrid] covers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Surface {
    /// Directions only, azimuth 0° to 360° by elevation 0° to 90°.
    FarField {
        /// Azimuth cells
        theta_cells: usize,
        /// Elevation cells
        phi_cells: usize,
    },
    /// A square plane parallel to the array at `height`.
    Plane {
        /// Side length
        length: f64,
        /// Distance above the array
        height: f64,
        /// Cells along each side
        cells: usize,
    },
    /// The face of a pipe running along y, seen side-on.
    Pipe {
        /// Length of the visible face along y
        length: f64,
        /// Pipe diameter
        diameter: f64,
        /// Offset of the pipe face along x
        distance: f64,
        /// Height of the pipe axis
        height: f64,
        /// Cells along the pipe
        length_cells: usize,
        /// Cells across the pipe
        diameter_cells: usize,
    },
    /// An arc of a horizontal cylinder (a ball mill shell) running along y.
    Cylinder {
        /// Shell radius
        radius: f64,
        /// Length along y
        length: f64,
        /// Height of the lowest point of the shell
        height: f64,
        /// Half-angle of the visible arc, in degrees
        chi_deg: f64,
        /// Rotation of the visible arc, in degrees
        chi_offset_deg: f64,
        /// Offset of the cylinder axis along x
        x_offset: f64,
        /// Cells along the axis
        y_cells: usize,
        /// Cells around the arc
        delta_cells: usize,
    },
}

impl Default for Surface {
    fn default() -> Self {
        Surface::FarField {
            theta_cells: 73,
            phi_cells: 19,
        }
    }
}

impl Surface {
    /// Whether the grid carries per-microphone bearings.
    pub fn is_near_field(&self) -> bool {
        !matches!(self, Surface::FarField { .. })
    }

    fn validate(&self) -> Result<()> {
        fn positive(name: &str, v: f64) -> Result<()> {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(DoaError::config(format!("{} must be positive, got {}", name, v)))
            }
        }
        fn finite(name: &str, v: f64) -> Result<()> {
            if v.is_finite() {
                Ok(())
            } else {
                Err(DoaError::config(format!("{} must be finite", name)))
            }
        }
        fn cells(name: &str, n: usize) -> Result<()> {
            if n == 0 {
                Err(DoaError::config(format!("{} must be at least 1", name)))
            } else {
                Ok(())
            }
        }

        match *self {
            Surface::FarField {
                theta_cells,
                phi_cells,
            } => {
                cells("theta_cells", theta_cells)?;
                cells("phi_cells", phi_cells)
            }
            Surface::Plane {
                length,
                height,
                cells: n,
            } => {
                positive("plane length", length)?;
                finite("plane height", height)?;
                cells("plane cells", n)
            }
            Surface::Pipe {
                length,
                diameter,
                distance,
                height,
                length_cells,
                diameter_cells,
            } => {
                positive("pipe length", length)?;
                positive("pipe diameter", diameter)?;
                finite("pipe distance", distance)?;
                finite("pipe height", height)?;
                cells("length_cells", length_cells)?;
                cells("diameter_cells", diameter_cells)
            }
            Surface::Cylinder {
                radius,
                length,
                height,
                chi_deg,
                chi_offset_deg,
                x_offset,
                y_cells,
                delta_cells,
            } => {
                positive("cylinder radius", radius)?;
                positive("cylinder length", length)?;
                positive("chi", chi_deg)?;
                finite("cylinder height", height)?;
                finite("chi offset", chi_offset_deg)?;
                finite("x offset", x_offset)?;
                cells("y_cells", y_cells)?;
                cells("delta_cells", delta_cells)
            }
        }
    }
}

/// Where a cell lies as seen from one point of the array.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bearing {
    /// Azimuth, radians
    pub theta: f64,
    /// Elevation from the array normal, radians
    pub phi: f64,
    /// Distance in metres; infinite for far-field cells
    pub range: f64,
}

/// An ordered rows × cols grid of candidate source cells.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    surface: Surface,
    n_mics: usize,
    rows: usize,
    cols: usize,
    row_axis: Vec<f64>,
    col_axis: Vec<f64>,
    centre: Vec<Bearing>,
    per_mic: Option<Vec<Bearing>>,
    positions: Option<Vec<Position>>,
}

impl TargetGrid {
    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Total number of cells.
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Grids are never empty once built; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Surface the grid was built from.
    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    /// Microphone count the grid was built for.
    pub fn n_mics(&self) -> usize {
        self.n_mics
    }

    /// Coordinates along the row axis (θ, or y).
    pub fn row_axis(&self) -> &[f64] {
        &self.row_axis
    }

    /// Coordinates along the column axis (φ, x, z, or δ).
    pub fn col_axis(&self) -> &[f64] {
        &self.col_axis
    }

    /// True when cells carry positions and per-mic bearings.
    pub fn is_near_field(&self) -> bool {
        self.per_mic.is_some()
    }

    /// Bearing of a cell from the array centre.
    pub fn centre(&self, row: usize, col: usize) -> Bearing {
        self.centre[row * self.cols + col]
    }

    /// Bearing of a cell from each microphone, for near-field grids.
    pub fn mic_bearings(&self, row: usize, col: usize) -> Option<&[Bearing]> {
        let start = (row * self.cols + col) * self.n_mics;
        self.per_mic
            .as_ref()
            .map(|b| &b[start..start + self.n_mics])
    }

    /// Cartesian position of a cell, for near-field grids.
    pub fn position(&self, row: usize, col: usize) -> Option<Position> {
        self.positions
            .as_ref()
            .map(|p| p[row * self.cols + col])
    }
}

/// Azimuth of the vector (x, y), wound so that it increases monotonically
/// from 0 to 2π counter-clockwise. The zero vector maps to 0.
pub fn wind_azimuth(x: f64, y: f64) -> f64 {
    if x == 0.0 && y == 0.0 {
        return 0.0;
    }
    let base = (y / x).atan();
    if x < 0.0 {
        base + PI
    } else if y < 0.0 {
        base + 2.0 * PI
    } else {
        base
    }
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    Array1::linspace(start, end, n).to_vec()
}

/// Spherical bearing of `offset`, wound with [wind_azimuth].
fn bearing_of(offset: Position) -> Bearing {
    let [x, y, z] = offset;
    let range = (x * x + y * y + z * z).sqrt();
    let phi = if range > 0.0 {
        (z / range).clamp(-1.0, 1.0).acos()
    } else {
        0.0
    };
    Bearing {
        theta: wind_azimuth(x, y),
        phi,
        range,
    }
}

/// Builds the grid of candidate cells for `surface` as seen by `geometry`.
pub fn build_target_grid(surface: &Surface, geometry: &ArrayGeometry) -> Result<TargetGrid> {
    geometry.validate()?;
    surface.validate()?;

    let (row_axis, col_axis, positions): (Vec<f64>, Vec<f64>, Option<Vec<Position>>) =
        match *surface {
            Surface::FarField {
                theta_cells,
                phi_cells,
            } => (
                linspace(0.0, 2.0 * PI, theta_cells),
                linspace(0.0, PI / 2.0, phi_cells),
                None,
            ),
            Surface::Plane {
                length,
                height,
                cells,
            } => {
                let ys = linspace(-length / 2.0, length / 2.0, cells);
                let xs = ys.clone();
                let pos = ys
                    .iter()
                    .flat_map(|&y| xs.iter().map(move |&x| [x, y, height]))
                    .collect();
                (ys, xs, Some(pos))
            }
            Surface::Pipe {
                length,
                diameter,
                distance,
                height,
                length_cells,
                diameter_cells,
            } => {
                let ys = linspace(length / 2.0, -length / 2.0, length_cells);
                let zs = linspace(
                    height + diameter / 2.0,
                    height - diameter / 2.0,
                    diameter_cells,
                );
                let pos = ys
                    .iter()
                    .flat_map(|&y| zs.iter().map(move |&z| [distance, y, z]))
                    .collect();
                (ys, zs, Some(pos))
            }
            Surface::Cylinder {
                radius,
                length,
                height,
                chi_deg,
                chi_offset_deg,
                x_offset,
                y_cells,
                delta_cells,
            } => {
                let chi = chi_deg.to_radians();
                let chi_off = chi_offset_deg.to_radians();
                let ys = linspace(-length / 2.0, length / 2.0, y_cells);
                let deltas = linspace(
                    -PI / 2.0 - chi + chi_off,
                    -PI / 2.0 + chi + chi_off,
                    delta_cells,
                );
                let pos = ys
                    .iter()
                    .flat_map(|&y| {
                        deltas.iter().map(move |&d| {
                            [
                                radius * d.cos() + x_offset,
                                y,
                                height + radius * (1.0 + d.sin()),
                            ]
                        })
                    })
                    .collect();
                (ys, deltas, Some(pos))
            }
        };

    let rows = row_axis.len();
    let cols = col_axis.len();

    let (centre, per_mic) = match &positions {
        None => {
            let centre = row_axis
                .iter()
                .flat_map(|&theta| {
                    col_axis.iter().map(move |&phi| Bearing {
                        theta,
                        phi,
                        range: f64::INFINITY,
                    })
                })
                .collect();
            (centre, None)
        }
        Some(positions) => {
            let mics = geometry.mic_positions();
            let mut centre = Vec::with_capacity(positions.len());
            let mut per_mic = Vec::with_capacity(positions.len() * mics.len());
            for cell in positions {
                let c = bearing_of(*cell);
                if c.range <= f64::EPSILON {
                    return Err(DoaError::config("a grid cell coincides with the array centre"));
                }
                centre.push(c);
                for (k, mic) in mics.iter().enumerate() {
                    let b = bearing_of([cell[0] - mic[0], cell[1] - mic[1], cell[2] - mic[2]]);
                    if b.range <= f64::EPSILON {
                        return Err(DoaError::config(format!(
                            "a grid cell coincides with microphone {}",
                            k
                        )));
                    }
                    per_mic.push(Bearing {
                        theta: b.theta - geometry.mic_angle(k),
                        ..b
                    });
                }
            }
            (centre, Some(per_mic))
        }
    };

    debug!(
        "built {}x{} target grid for {:?} with {} microphones",
        rows, cols, surface, geometry.n_mics
    );

    Ok(TargetGrid {
        surface: *surface,
        n_mics: geometry.n_mics,
        rows,
        cols,
        row_axis,
        col_axis,
        centre,
        per_mic,
        positions,
    })
}

/// Built grids, keyed by the surface and array they were built for. Grids
/// only change when the configuration does, so this is consulted at
/// configuration time and the result shared with the processing threads.
#[derive(Debug, Default)]
pub struct GridCache {
    grids: Mutex<Vec<((Surface, ArrayGeometry), Arc<TargetGrid>)>>,
}

impl GridCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached grid for this pair, building it on first use.
    pub fn get_or_build(
        &self,
        surface: &Surface,
        geometry: &ArrayGeometry,
    ) -> Result<Arc<TargetGrid>> {
        let mut grids = self.grids.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, grid)) = grids
            .iter()
            .find(|((s, g), _)| s == surface && g == geometry)
        {
            return Ok(Arc::clone(grid));
        }
        let grid = Arc::new(build_target_grid(surface, geometry)?);
        grids.push(((*surface, *geometry), Arc::clone(&grid)));
        Ok(grid)
    }

    /// Number of distinct grids held.
    pub fn len(&self) -> usize {
        self.grids.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// True if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn winding_covers_all_quadrants() {
        let cases = [
            ((1.0, 1.0), 45.0),
            ((-1.0, 1.0), 135.0),
            ((-1.0, -1.0), 225.0),
            ((1.0, -1.0), 315.0),
        ];
        for ((x, y), deg) in cases {
            assert!((wind_azimuth(x, y).to_degrees() - deg).abs() < EPS);
        }
    }

    #[test]
    fn winding_on_axes() {
        assert!((wind_azimuth(1.0, 0.0)).abs() < EPS);
        assert!((wind_azimuth(0.0, 1.0).to_degrees() - 90.0).abs() < EPS);
        assert!((wind_azimuth(-1.0, 0.0).to_degrees() - 180.0).abs() < EPS);
        assert!((wind_azimuth(0.0, -1.0).to_degrees() - 270.0).abs() < EPS);
        assert_eq!(wind_azimuth(0.0, 0.0), 0.0);
    }

    #[test]
    fn winding_is_monotonic_around_the_circle() {
        let mut last = -1.0;
        for i in 0..360 {
            let a = (i as f64 + 0.5).to_radians();
            let w = wind_azimuth(a.cos(), a.sin());
            assert!(w > last);
            assert!((w - a).abs() < 1e-9);
            last = w;
        }
    }

    #[test]
    fn mic_layout_even_and_odd() {
        let even = ArrayGeometry::new(4, 1.0, 340.0);
        let p = even.mic_positions();
        assert!((p[1][0]).abs() < EPS && (p[1][1] + 1.0).abs() < EPS);
        assert!((p[2][0] + 1.0).abs() < EPS);

        let odd = ArrayGeometry::new(5, 1.0, 340.0);
        assert_eq!(odd.n_ring(), 4);
        assert_eq!(odd.mic_position(4), [0.0, 0.0, 0.0]);
        assert_eq!(odd.mic_positions(), {
            let mut v = even.mic_positions();
            v.push([0.0; 3]);
            v
        });
    }

    #[test]
    fn too_few_mics_is_rejected() {
        let g = ArrayGeometry::new(1, 0.05, 340.0);
        let res = build_target_grid(&Surface::default(), &g);
        assert!(matches!(res, Err(DoaError::ConfigurationError(_))));
    }

    #[test]
    fn zero_size_grid_is_rejected() {
        let g = ArrayGeometry::default();
        let res = build_target_grid(
            &Surface::FarField {
                theta_cells: 0,
                phi_cells: 10,
            },
            &g,
        );
        assert!(matches!(res, Err(DoaError::ConfigurationError(_))));
    }

    #[test]
    fn far_field_axes() {
        let g = ArrayGeometry::default();
        let grid = build_target_grid(
            &Surface::FarField {
                theta_cells: 37,
                phi_cells: 10,
            },
            &g,
        )
        .unwrap();
        assert_eq!(grid.shape(), (37, 10));
        assert!(!grid.is_near_field());
        let b = grid.centre(12, 6);
        assert!((b.theta.to_degrees() - 120.0).abs() < 1e-9);
        assert!((b.phi.to_degrees() - 60.0).abs() < 1e-9);
        assert!(grid.mic_bearings(0, 0).is_none());
    }

    #[test]
    fn plane_cells_and_bearings() {
        let g = ArrayGeometry::new(4, 0.1, 340.0);
        let grid = build_target_grid(
            &Surface::Plane {
                length: 2.0,
                height: 1.0,
                cells: 3,
            },
            &g,
        )
        .unwrap();
        assert_eq!(grid.shape(), (3, 3));
        assert_eq!(grid.position(0, 2), Some([1.0, -1.0, 1.0]));

        // straight above the array centre
        let c = grid.centre(1, 1);
        assert!((c.range - 1.0).abs() < EPS);
        assert!(c.phi.abs() < EPS);

        // mic 0 sits at (0.1, 0, 0)
        let b = grid.mic_bearings(1, 1).unwrap();
        assert_eq!(b.len(), 4);
        assert!((b[0].range - (1.0f64 + 0.01).sqrt()).abs() < EPS);
        assert!((b[0].theta.to_degrees() - 180.0).abs() < 1e-9);
    }

    #[test]
    fn pipe_axes_run_top_down() {
        let g = ArrayGeometry::default();
        let grid = build_target_grid(
            &Surface::Pipe {
                length: 4.0,
                diameter: 0.5,
                distance: 2.0,
                height: 1.0,
                length_cells: 5,
                diameter_cells: 3,
            },
            &g,
        )
        .unwrap();
        assert_eq!(grid.shape(), (5, 3));
        assert_eq!(grid.row_axis()[0], 2.0);
        assert_eq!(grid.col_axis(), &[1.25, 1.0, 0.75]);
        assert_eq!(grid.position(4, 0), Some([2.0, -2.0, 1.25]));
    }

    #[test]
    fn cylinder_chi_is_in_degrees() {
        let g = ArrayGeometry::default();
        let grid = build_target_grid(
            &Surface::Cylinder {
                radius: 1.0,
                length: 2.0,
                height: 0.5,
                chi_deg: 90.0,
                chi_offset_deg: 0.0,
                x_offset: 0.0,
                y_cells: 3,
                delta_cells: 3,
            },
            &g,
        )
        .unwrap();
        let d = grid.col_axis();
        assert!((d[0] + PI).abs() < EPS);
        assert!((d[2]).abs() < EPS);
        // the middle of the arc is the bottom of the shell
        let p = grid.position(1, 1).unwrap();
        assert!(p[0].abs() < EPS && (p[2] - 0.5).abs() < EPS);
    }

    #[test]
    fn cache_reuses_grids() {
        let cache = GridCache::new();
        let g = ArrayGeometry::default();
        let s = Surface::default();
        let a = cache.get_or_build(&s, &g).unwrap();
        let b = cache.get_or_build(&s, &g).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);

        let other = ArrayGeometry { n_mics: 8, ..g };
        let c = cache.get_or_build(&s, &other).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }
}
