//! 2D raster grid with square cells and NaN as "no data".

use crate::crs::Crs;
use crate::error::{Error, Result};
use std::ops::{Index, IndexMut};

/// Value stored in cells that received no point.
pub const NO_DATA: f64 = f64::NAN;

/// Largest grid the crate will allocate (2 GiB of f64 cells).
pub const MAX_CELLS: usize = 1 << 28;

/// Geometry of an aligned grid: lower-left corner, size in cells, cell size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub xmin: f64,
    pub ymin: f64,
    pub ncol: usize,
    pub nrow: usize,
    pub res: f64,
}

impl GridSpec {
    /// Smallest grid anchored at the bounding box minimum that covers every
    /// (x, y) in `xy`.
    pub fn covering(xy: impl IntoIterator<Item = (f64, f64)>, res: f64) -> Result<Self> {
        if !(res > 0.0) || !res.is_finite() {
            return Err(Error::invalid(format!("cell size must be > 0, got {res}")));
        }
        let mut xmin = f64::INFINITY;
        let mut ymin = f64::INFINITY;
        let mut xmax = f64::NEG_INFINITY;
        let mut ymax = f64::NEG_INFINITY;
        for (x, y) in xy {
            xmin = xmin.min(x);
            ymin = ymin.min(y);
            xmax = xmax.max(x);
            ymax = ymax.max(y);
        }
        if !xmin.is_finite() || !ymin.is_finite() || !xmax.is_finite() || !ymax.is_finite() {
            return Err(Error::invalid("cannot derive a grid from an empty point set"));
        }
        let ncol = ((xmax - xmin) / res).floor() + 1.0;
        let nrow = ((ymax - ymin) / res).floor() + 1.0;
        if ncol * nrow > MAX_CELLS as f64 {
            return Err(Error::invalid(format!(
                "a {ncol} x {nrow} grid at cell size {res} exceeds {MAX_CELLS} cells"
            )));
        }
        let spec = Self {
            xmin,
            ymin,
            ncol: ncol as usize,
            nrow: nrow as usize,
            res,
        };
        spec.cell_count()?;
        Ok(spec)
    }

    /// `ncol * nrow`, or `InvalidInput` past [`MAX_CELLS`].
    pub fn cell_count(&self) -> Result<usize> {
        match self.ncol.checked_mul(self.nrow) {
            Some(n) if n <= MAX_CELLS => Ok(n),
            _ => Err(Error::invalid(format!(
                "a {} x {} grid exceeds {MAX_CELLS} cells",
                self.ncol, self.nrow
            ))),
        }
    }

    pub fn xmax(&self) -> f64 {
        self.xmin + self.ncol as f64 * self.res
    }

    pub fn ymax(&self) -> f64 {
        self.ymin + self.nrow as f64 * self.res
    }

    /// Row/column of the cell containing (x, y), or None outside the grid.
    ///
    /// Column is `floor((x - xmin) / res)`; rows count from the north edge.
    pub fn cell_of(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let fx = ((x - self.xmin) / self.res).floor();
        let fy = ((y - self.ymin) / self.res).floor();
        if fx < 0.0 || fy < 0.0 || !fx.is_finite() || !fy.is_finite() {
            return None;
        }
        let (col, iy) = (fx as usize, fy as usize);
        if col >= self.ncol || iy >= self.nrow {
            return None;
        }
        Some((self.nrow - 1 - iy, col))
    }
}

/// A 2D raster (row-major). Row 0 is the northern edge.
///
/// Cell (r, c) is centred on:
///   x = xmin + (c + 0.5) * res
///   y = ymax - (r + 0.5) * res
#[derive(Debug, Clone)]
pub struct Raster {
    pub nrow: usize,
    pub ncol: usize,
    pub data: Vec<f64>,
    /// Cell size in map units.
    pub res: f64,
    pub xmin: f64,
    pub ymin: f64,
    pub crs: Crs,
}

impl Raster {
    /// Raster on `spec` with every cell set to [`NO_DATA`].
    pub fn empty(spec: &GridSpec, crs: Crs) -> Self {
        Self {
            nrow: spec.nrow,
            ncol: spec.ncol,
            data: vec![NO_DATA; spec.nrow * spec.ncol],
            res: spec.res,
            xmin: spec.xmin,
            ymin: spec.ymin,
            crs,
        }
    }

    /// Raster from row-major values.
    pub fn from_vec(spec: &GridSpec, crs: Crs, data: Vec<f64>) -> Result<Self> {
        let cells = spec.cell_count()?;
        if data.len() != cells {
            return Err(Error::invalid(format!(
                "raster data has {} values, grid needs {cells}",
                data.len()
            )));
        }
        Ok(Self {
            nrow: spec.nrow,
            ncol: spec.ncol,
            data,
            res: spec.res,
            xmin: spec.xmin,
            ymin: spec.ymin,
            crs,
        })
    }

    pub fn spec(&self) -> GridSpec {
        GridSpec {
            xmin: self.xmin,
            ymin: self.ymin,
            ncol: self.ncol,
            nrow: self.nrow,
            res: self.res,
        }
    }

    pub fn xmax(&self) -> f64 {
        self.xmin + self.ncol as f64 * self.res
    }

    pub fn ymax(&self) -> f64 {
        self.ymin + self.nrow as f64 * self.res
    }

    /// Get value at (row, col), NaN if out of bounds.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        if row < self.nrow && col < self.ncol {
            self.data[row * self.ncol + col]
        } else {
            NO_DATA
        }
    }

    /// Value at (row, col) if inside the grid and not "no data".
    #[inline]
    pub fn get_opt(&self, row: isize, col: isize) -> Option<f64> {
        if row >= 0 && col >= 0 && (row as usize) < self.nrow && (col as usize) < self.ncol {
            let v = self.data[row as usize * self.ncol + col as usize];
            if v.is_nan() {
                None
            } else {
                Some(v)
            }
        } else {
            None
        }
    }

    /// Convert row,col to world X,Y (cell centre).
    pub fn rc_to_xy(&self, row: usize, col: usize) -> (f64, f64) {
        let x = self.xmin + (col as f64 + 0.5) * self.res;
        let y = self.ymax() - (row as f64 + 0.5) * self.res;
        (x, y)
    }

    /// Cell containing world X,Y.
    pub fn xy_to_rc(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        self.spec().cell_of(x, y)
    }

    pub fn len(&self) -> usize {
        self.nrow * self.ncol
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cells holding a value.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// (min, max) over valid cells, None when every cell is "no data".
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.data
            .iter()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// Cellwise maximum of two rasters on the same grid. "No data" never wins
    /// over a value.
    pub fn max_merge(&self, other: &Raster) -> Result<Raster> {
        if self.spec() != other.spec() || self.crs != other.crs {
            return Err(Error::invalid("cannot merge rasters with different grids"));
        }
        let mut out = self.clone();
        for (a, &b) in out.data.iter_mut().zip(other.data.iter()) {
            if a.is_nan() || b > *a {
                *a = b;
            }
        }
        Ok(out)
    }
}

impl Index<(usize, usize)> for Raster {
    type Output = f64;
    fn index(&self, (r, c): (usize, usize)) -> &f64 {
        &self.data[r * self.ncol + c]
    }
}

impl IndexMut<(usize, usize)> for Raster {
    fn index_mut(&mut self, (r, c): (usize, usize)) -> &mut f64 {
        &mut self.data[r * self.ncol + c]
    }
}
