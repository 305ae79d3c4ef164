//! Turning grid cells, and pixels of a rendered heatmap, back into
//! directions that the beamformer can be steered towards.

use crate::error::{DoaError, Result};
use crate::geometry::{Bearing, TargetGrid};
use std::sync::Arc;

/// Bearing of the centre of cell (`row`, `col`) as seen from the array
/// centre. Far-field cells report an infinite range.
pub fn cell_direction(grid: &TargetGrid, row: usize, col: usize) -> Result<Bearing> {
    let (rows, cols) = grid.shape();
    if row >= rows || col >= cols {
        return Err(DoaError::shape(format!(
            "cell ({}, {}) is outside the {}x{} grid",
            row, col, rows, cols
        )));
    }
    Ok(grid.centre(row, col))
}

/// Maps pixels of a `width` × `height` image of a heatmap onto its grid.
/// Grid rows run down the image, columns across.
#[derive(Debug, Clone)]
pub struct Sphericalizer {
    grid: Arc<TargetGrid>,
    width: usize,
    height: usize,
}

impl Sphericalizer {
    /// Maps a `width` × `height` display onto `grid`.
    pub fn new(grid: Arc<TargetGrid>, width: usize, height: usize) -> Self {
        Self {
            grid,
            width,
            height,
        }
    }

    /// Cell under pixel (`px`, `py`), or None outside the image.
    pub fn pixel_to_cell(&self, px: usize, py: usize) -> Option<(usize, usize)> {
        if px >= self.width || py >= self.height {
            return None;
        }
        let (rows, cols) = self.grid.shape();
        let row = py * rows / self.height;
        let col = px * cols / self.width;
        Some((row.min(rows - 1), col.min(cols - 1)))
    }

    /// Direction under pixel (`px`, `py`).
    pub fn query(&self, px: usize, py: usize) -> Option<Bearing> {
        let (row, col) = self.pixel_to_cell(px, py)?;
        cell_direction(&self.grid, row, col).ok()
    }
}
