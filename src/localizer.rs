//! Picking source locations out of a fused heatmap.

use crate::geometry::{Position, TargetGrid};
use ndarray::Array2;

/// A local maximum of a heatmap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    /// Grid row
    pub row: usize,
    /// Grid column
    pub col: usize,
    /// Map value at the peak
    pub value: f64,
    /// Azimuth from the array centre, degrees
    pub theta_deg: f64,
    /// Elevation from the array normal, degrees
    pub phi_deg: f64,
    /// Where the cell sits, for near-field grids
    pub position: Option<Position>,
}

fn is_local_max(map: &Array2<f64>, row: usize, col: usize, wrap_rows: bool) -> bool {
    let (rows, cols) = map.dim();
    let v = map[[row, col]];
    let mut any_lower = false;
    for dr in [-1i64, 0, 1] {
        for dc in [-1i64, 0, 1] {
            if dr == 0 && dc == 0 {
                continue;
            }
            let r = row as i64 + dr;
            let c = col as i64 + dc;
            let r = if wrap_rows {
                r.rem_euclid(rows as i64)
            } else if r < 0 || r >= rows as i64 {
                continue;
            } else {
                r
            };
            if c < 0 || c >= cols as i64 {
                continue;
            }
            let n = map[[r as usize, c as usize]];
            if n > v {
                return false;
            }
            any_lower |= n < v;
        }
    }
    any_lower
}

/// Up to `max_peaks` local maxima of `map`, strongest first. Flat plateaus
/// are not peaks, and peaks closer than `min_separation` cells (Chebyshev
/// distance) to a stronger one are dropped. On far-field grids the azimuth
/// rows wrap around.
pub fn localize_peaks(
    map: &Array2<f64>,
    grid: &TargetGrid,
    max_peaks: usize,
    min_separation: usize,
) -> Vec<Peak> {
    if map.dim() != grid.shape() {
        return Vec::new();
    }
    let (rows, _) = map.dim();
    let wrap_rows = !grid.is_near_field();

    let mut candidates: Vec<(usize, usize, f64)> = map
        .indexed_iter()
        .filter(|(_, v)| v.is_finite())
        .filter(|&((r, c), _)| is_local_max(map, r, c, wrap_rows))
        .map(|((r, c), &v)| (r, c, v))
        .collect();
    candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

    let row_distance = |a: usize, b: usize| {
        let d = a.abs_diff(b);
        if wrap_rows {
            d.min(rows - d)
        } else {
            d
        }
    };

    let mut peaks: Vec<Peak> = Vec::new();
    for (row, col, value) in candidates {
        if peaks.len() >= max_peaks {
            break;
        }
        let crowded = peaks.iter().any(|p| {
            row_distance(p.row, row).max(p.col.abs_diff(col)) < min_separation
        });
        if crowded {
            continue;
        }
        let b = grid.centre(row, col);
        peaks.push(Peak {
            row,
            col,
            value,
            theta_deg: b.theta.to_degrees(),
            phi_deg: b.phi.to_degrees(),
            position: grid.position(row, col),
        });
    }
    peaks
}
