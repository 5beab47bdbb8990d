//! Vehicle-centred bird's-eye-view costmap.
//!
//! Cell (0, 0) covers the corner at (-size/2, -size/2) and rows grow with
//! y, columns with x. Every lookup used by the cost kernels is clamped to
//! the grid, so a trajectory leaving the map reads the border cell.

use crate::config::MapConfig;
use crate::error::{MppiError, Result};
use ndarray::Array2;

#[derive(Clone, Debug, PartialEq)]
pub struct Costmap {
    cells: Array2<f64>,
    /// Edge length [m]
    size: f64,
    /// [m/cell]
    resolution: f64,
}

impl Costmap {
    pub fn zeros(map: &MapConfig) -> Result<Self> {
        map.validate()?;
        let n = map.cells_per_side();
        Ok(Self {
            cells: Array2::zeros((n, n)),
            size: map.size,
            resolution: map.resolution,
        })
    }

    /// Row-major cells, `n * n` values with n = round(size / resolution).
    pub fn from_vec(cells: Vec<f64>, map: &MapConfig) -> Result<Self> {
        map.validate()?;
        let n = map.cells_per_side();
        let cells = Array2::from_shape_vec((n, n), cells).map_err(|e| {
            MppiError::config(format!("costmap expects {n}x{n} cells: {e}"))
        })?;
        Ok(Self {
            cells,
            size: map.size,
            resolution: map.resolution,
        })
    }

    /// 8-bit image channel, scaled to [0, 1].
    pub fn from_u8(pixels: &[u8], map: &MapConfig) -> Result<Self> {
        Self::from_vec(pixels.iter().map(|&p| p as f64 / 255.0).collect(), map)
    }

    /// Sample `f(x, y)` at every cell centre.
    pub fn from_fn<F>(map: &MapConfig, f: F) -> Result<Self>
    where
        F: Fn(f64, f64) -> f64,
    {
        let mut costmap = Self::zeros(map)?;
        let (half, res) = (costmap.size * 0.5, costmap.resolution);
        costmap.cells.indexed_iter_mut().for_each(|((row, col), c)| {
            let x = (col as f64 + 0.5) * res - half;
            let y = (row as f64 + 0.5) * res - half;
            *c = f(x, y);
        });
        Ok(costmap)
    }

    pub fn cells_per_side(&self) -> usize {
        self.cells.nrows()
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn cells(&self) -> &Array2<f64> {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut Array2<f64> {
        &mut self.cells
    }

    pub fn matches(&self, map: &MapConfig) -> bool {
        self.cells_per_side() == map.cells_per_side()
            && (self.size - map.size).abs() < 1e-9
            && (self.resolution - map.resolution).abs() < 1e-12
    }

    fn raw_index(&self, coord: f64) -> f64 {
        ((coord + self.size * 0.5) / self.resolution).floor()
    }

    /// (row, col) of the cell under (x, y), clamped to the grid.
    ///
    /// NaN maps to 0 and ±inf to the matching border.
    pub fn clamped_index(&self, x: f64, y: f64) -> (usize, usize) {
        let max = (self.cells_per_side() - 1) as f64;
        let clamp = |i: f64| if i.is_nan() { 0 } else { i.clamp(0.0, max) as usize };
        (clamp(self.raw_index(y)), clamp(self.raw_index(x)))
    }

    /// Strict index, `None` outside the grid.
    pub fn index(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let n = self.cells_per_side() as f64;
        let (r, c) = (self.raw_index(y), self.raw_index(x));
        ((0.0..n).contains(&r) && (0.0..n).contains(&c)).then(|| (r as usize, c as usize))
    }

    pub fn cost_at(&self, x: f64, y: f64) -> f64 {
        self.cells[self.clamped_index(x, y)]
    }

    pub fn try_cost(&self, x: f64, y: f64) -> Result<f64> {
        self.index(x, y)
            .map(|idx| self.cells[idx])
            .ok_or(MppiError::OutOfBoundsLookup { x, y })
    }
}
