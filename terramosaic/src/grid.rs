//! In-memory elevation grids and the data derived from them for display.

use serde::Serialize;

use crate::bounds::Bounds;

/// Row-major elevation samples, north row first, NaN where no data exists.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationGrid {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    bounds: Bounds,
}

/// Summary statistics over the valid cells of a grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridStats {
    /// Lowest valid value, `None` if every cell is NaN.
    pub min: Option<f32>,
    /// Highest valid value.
    pub max: Option<f32>,
    /// Mean of the valid values.
    pub mean: Option<f32>,
    /// Number of NaN cells.
    pub nodata_count: usize,
}

/// Coordinate axes of a grid, for surface plots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SurfaceAxes {
    /// Longitude of each column, west to east.
    pub x: Vec<f64>,
    /// Latitude of each row, south to north.
    pub y: Vec<f64>,
}

impl ElevationGrid {
    /// Create a grid. Returns `None` if `data` is not `rows * cols` long.
    pub fn new(rows: usize, cols: usize, data: Vec<f32>, bounds: Bounds) -> Option<Self> {
        if data.len() != rows * cols {
            return None;
        }
        Some(Self {
            rows,
            cols,
            data,
            bounds,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// `(rows, cols)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Geographic extent.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    /// All samples, row-major.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Sample at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(row * self.cols + col).copied()
    }

    /// One row of samples.
    pub fn row(&self, row: usize) -> &[f32] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Min, max and mean of valid cells plus the NaN count.
    pub fn stats(&self) -> GridStats {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for &v in self.data.iter().filter(|v| !v.is_nan()) {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
            count += 1;
        }

        let valid = count > 0;
        GridStats {
            min: valid.then_some(min),
            max: valid.then_some(max),
            mean: valid.then(|| (sum / count as f64) as f32),
            nodata_count: self.data.len() - count,
        }
    }

    /// Thin the grid for a 3D surface with at most about `max_points` cells.
    ///
    /// Keeps every `n`-th row and column, `n = floor(sqrt(cells / max_points))`.
    pub fn decimate_for_surface(&self, max_points: usize) -> ElevationGrid {
        let points = self.rows * self.cols;
        if max_points == 0 || points <= max_points {
            return self.clone();
        }
        let step = ((points as f64 / max_points as f64).sqrt() as usize).max(1);
        self.take_every(step, step)
    }

    /// Longitude and latitude axes spanning the grid bounds.
    pub fn surface_axes(&self) -> SurfaceAxes {
        SurfaceAxes {
            x: linspace(self.bounds.left, self.bounds.right, self.cols),
            y: linspace(self.bounds.bottom, self.bounds.top, self.rows),
        }
    }

    /// Rows for a ridge-line rendering, south row first.
    ///
    /// NaN cells are replaced with the grid mean and, when there are more
    /// than `max_lines` rows, every `rows / max_lines`-th row is kept.
    pub fn ridge_lines(&self, max_lines: usize) -> Vec<Vec<f32>> {
        let fill = self.stats().mean.unwrap_or(0.0);
        let step = if max_lines > 0 && self.rows > max_lines {
            self.rows / max_lines
        } else {
            1
        };

        (0..self.rows)
            .rev()
            .step_by(step)
            .map(|r| {
                self.row(r)
                    .iter()
                    .map(|&v| if v.is_nan() { fill } else { v })
                    .collect()
            })
            .collect()
    }

    fn take_every(&self, row_step: usize, col_step: usize) -> ElevationGrid {
        let rows = self.rows.div_ceil(row_step);
        let cols = self.cols.div_ceil(col_step);
        let mut data = Vec::with_capacity(rows * cols);
        for r in (0..self.rows).step_by(row_step) {
            for c in (0..self.cols).step_by(col_step) {
                data.push(self.data[r * self.cols + c]);
            }
        }
        ElevationGrid {
            rows,
            cols,
            data,
            bounds: self.bounds,
        }
    }
}

/// `n` evenly spaced values from `start` to `end` inclusive.
fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: usize, cols: usize) -> ElevationGrid {
        let data = (0..rows * cols).map(|v| v as f32).collect();
        ElevationGrid::new(rows, cols, data, Bounds::new(-75.0, 40.0, -74.0, 41.0)).unwrap()
    }

    #[test]
    fn test_new_checks_shape() {
        assert!(ElevationGrid::new(2, 2, vec![0.0; 3], Bounds::new(0.0, 0.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn test_stats() {
        let mut g = grid(2, 3);
        g.data[1] = f32::NAN;
        let stats = g.stats();
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(5.0));
        assert_eq!(stats.mean, Some(14.0 / 5.0));
        assert_eq!(stats.nodata_count, 1);

        let empty = ElevationGrid::new(1, 2, vec![f32::NAN; 2], g.bounds()).unwrap();
        assert_eq!(empty.stats().mean, None);
        assert_eq!(empty.stats().nodata_count, 2);
    }

    #[test]
    fn test_decimate_for_surface() {
        let g = grid(100, 100);
        // 10_000 / 1_000 = 10, sqrt -> 3
        let small = g.decimate_for_surface(1_000);
        assert_eq!(small.shape(), (34, 34));
        assert_eq!(small.get(1, 1), Some(303.0));
        assert!(small.rows() * small.cols() <= 1_200);

        assert_eq!(g.decimate_for_surface(20_000).shape(), (100, 100));
    }

    #[test]
    fn test_surface_axes() {
        let axes = grid(3, 5).surface_axes();
        assert_eq!(axes.x, vec![-75.0, -74.75, -74.5, -74.25, -74.0]);
        assert_eq!(axes.y, vec![40.0, 40.5, 41.0]);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert!(linspace(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn test_ridge_lines() {
        let mut g = grid(4, 2);
        g.data[6] = f32::NAN;
        let lines = g.ridge_lines(10);
        assert_eq!(lines.len(), 4);
        // South row first, NaN replaced by the mean of the valid cells
        let mean = 22.0 / 7.0;
        assert!((lines[0][0] - mean).abs() < 1e-5);
        assert_eq!(lines[0][1], 7.0);
        assert_eq!(lines[3], vec![0.0, 1.0]);

        let thinned = grid(10, 1).ridge_lines(3);
        // step 10 / 3 = 3: rows 9, 6, 3, 0
        assert_eq!(thinned, vec![vec![9.0], vec![6.0], vec![3.0], vec![0.0]]);
    }
}
