//! Canopy height model: per-cell maximum z of a filtered point set.
//!
//! The maximum (not the mean) is kept because any return reaching height z
//! in a column means the canopy surface is at least that high there.

use crate::point_cloud::PointCloud;
use crate::raster::{GridSpec, Raster};
use crate::error::{Error, Result};
use log::info;

/// Rasterize `cloud` onto a grid covering its bounding box with cells of size `res`.
///
/// Fails with `InvalidInput` on an empty cloud or a non-positive cell size.
pub fn rasterize(cloud: &PointCloud, res: f64) -> Result<Raster> {
    if cloud.is_empty() {
        return Err(Error::invalid("cannot rasterize an empty point set"));
    }
    let spec = GridSpec::covering(cloud.points.iter().map(|p| (p.x, p.y)), res)?;
    let chm = rasterize_on(cloud, &spec)?;
    info!(
        "canopy raster: {} x {} cells at {} m, {} populated",
        chm.ncol,
        chm.nrow,
        res,
        chm.valid_count()
    );
    Ok(chm)
}

/// Rasterize onto a fixed grid. Points falling outside the grid are ignored;
/// empty cells hold NaN.
pub fn rasterize_on(cloud: &PointCloud, spec: &GridSpec) -> Result<Raster> {
    if !(spec.res > 0.0) {
        return Err(Error::invalid(format!("cell size must be > 0, got {}", spec.res)));
    }
    spec.cell_count()?;
    let mut chm = Raster::empty(spec, cloud.crs);
    for p in &cloud.points {
        if p.z.is_nan() {
            continue;
        }
        if let Some((r, c)) = spec.cell_of(p.x, p.y) {
            let cell = &mut chm[(r, c)];
            if cell.is_nan() || p.z > *cell {
                *cell = p.z;
            }
        }
    }
    Ok(chm)
}
