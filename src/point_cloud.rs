//! Point clouds, regions of interest, and the elevation/region point filter.

use crate::crs::{self, Crs};
use crate::error::{Error, Result};
use las::{Read, Reader};
use log::{debug, info};
use std::path::Path;

/// A LiDAR return: (x, y, z) in the cloud's CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Unordered multiset of points tagged with their coordinate reference system.
#[derive(Debug, Clone)]
pub struct PointCloud {
    pub crs: Crs,
    pub points: Vec<Point3>,
}

impl PointCloud {
    pub fn new(crs: Crs, points: Vec<Point3>) -> Self {
        Self { crs, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Copy of the cloud expressed in `target`. Order and z are preserved.
    pub fn reproject(&self, target: Crs) -> Result<PointCloud> {
        let xy: Vec<(f64, f64)> = self.points.iter().map(|p| (p.x, p.y)).collect();
        let points = crs::reproject_all(self.crs, target, &xy)?
            .into_iter()
            .zip(&self.points)
            .map(|((x, y), p)| Point3::new(x, y, p.z))
            .collect();
        Ok(PointCloud::new(target, points))
    }
}

/// Closed polygon ring; the last vertex always repeats the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<(f64, f64)>,
}

impl Polygon {
    /// Build a polygon, closing the ring if the caller did not.
    pub fn new(mut vertices: Vec<(f64, f64)>) -> Result<Self> {
        if let (Some(&first), Some(&last)) = (vertices.first(), vertices.last()) {
            if first != last {
                vertices.push(first);
            }
        }
        let mut distinct: Vec<(f64, f64)> = Vec::new();
        for &v in &vertices[..vertices.len().saturating_sub(1)] {
            if !distinct.contains(&v) {
                distinct.push(v);
            }
        }
        if distinct.len() < 3 {
            return Err(Error::invalid(
                "region of interest needs at least 3 distinct vertices",
            ));
        }
        if vertices.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(Error::invalid("region of interest has non-finite vertices"));
        }
        Ok(Self { vertices })
    }

    /// Axis-aligned rectangle.
    pub fn rectangle(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Result<Self> {
        Self::new(vec![(xmin, ymin), (xmax, ymin), (xmax, ymax), (xmin, ymax)])
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// Even-odd containment; points on an edge or vertex count as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = false;
        for w in self.vertices.windows(2) {
            let (x1, y1) = w[0];
            let (x2, y2) = w[1];
            if on_segment((x1, y1), (x2, y2), (x, y)) {
                return true;
            }
            if (y1 > y) != (y2 > y) {
                let x_cross = x1 + (y - y1) * (x2 - x1) / (y2 - y1);
                if x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Copy of the polygon expressed in `to`.
    pub fn reproject(&self, from: Crs, to: Crs) -> Result<Polygon> {
        Ok(Polygon {
            vertices: crs::reproject_all(from, to, &self.vertices)?,
        })
    }
}

fn on_segment(a: (f64, f64), b: (f64, f64), p: (f64, f64)) -> bool {
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    let scale = (b.0 - a.0).abs().max((b.1 - a.1).abs()).max(1.0);
    if cross.abs() > 1e-9 * scale {
        return false;
    }
    p.0 >= a.0.min(b.0) && p.0 <= a.0.max(b.0) && p.1 >= a.1.min(b.1) && p.1 <= a.1.max(b.1)
}

/// Closed elevation interval [z_min, z_max].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElevationBand {
    pub z_min: f64,
    pub z_max: f64,
}

impl ElevationBand {
    pub fn new(z_min: f64, z_max: f64) -> Result<Self> {
        if z_min.is_nan() || z_max.is_nan() || z_min > z_max {
            return Err(Error::invalid(format!(
                "elevation band [{z_min}, {z_max}] is empty"
            )));
        }
        Ok(Self { z_min, z_max })
    }

    #[inline]
    pub fn contains(&self, z: f64) -> bool {
        z >= self.z_min && z <= self.z_max
    }
}

/// Keep the points inside (or on the boundary of) `region` whose z lies in
/// `band`. With no region only the band applies. Input order is preserved.
pub fn filter_points(
    cloud: &PointCloud,
    region: Option<&Polygon>,
    band: &ElevationBand,
) -> PointCloud {
    let points: Vec<Point3> = cloud
        .points
        .iter()
        .filter(|p| band.contains(p.z))
        .filter(|p| region.map_or(true, |poly| poly.contains(p.x, p.y)))
        .copied()
        .collect();
    debug!(
        "point filter: band=[{}, {}] region={} kept {}/{}",
        band.z_min,
        band.z_max,
        region.is_some(),
        points.len(),
        cloud.len()
    );
    PointCloud::new(cloud.crs, points)
}

/// Read every point of a LAS/LAZ file. The CRS is supplied by the caller.
pub fn read_las<P: AsRef<Path>>(path: P, crs: Crs) -> Result<PointCloud> {
    let path = path.as_ref();
    let mut reader = Reader::from_path(path)?;
    let expected = reader.header().number_of_points() as usize;
    let mut points = Vec::with_capacity(expected);
    for wrapped in reader.points() {
        let p = wrapped?;
        points.push(Point3::new(p.x, p.y, p.z));
    }
    info!("read {} points from '{}' ({crs})", points.len(), path.display());
    Ok(PointCloud::new(crs, points))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UTM: Crs = Crs::utm(18, true);

    fn square() -> Polygon {
        Polygon::rectangle(0.0, 0.0, 10.0, 10.0).unwrap()
    }

    #[test]
    fn test_polygon_closes_ring() {
        let p = Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]).unwrap();
        assert_eq!(p.vertices().len(), 4);
        assert_eq!(p.vertices()[0], p.vertices()[3]);

        let closed = Polygon::new(vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]).unwrap();
        assert_eq!(closed.vertices().len(), 4);
    }

    #[test]
    fn test_polygon_rejects_degenerate() {
        assert!(Polygon::new(vec![]).is_err());
        assert!(Polygon::new(vec![(0.0, 0.0), (1.0, 1.0)]).is_err());
        assert!(Polygon::new(vec![(0.0, 0.0), (1.0, 1.0), (0.0, 0.0), (1.0, 1.0)]).is_err());
    }

    #[test]
    fn test_contains_interior_exterior_boundary() {
        let sq = square();
        assert!(sq.contains(5.0, 5.0));
        assert!(!sq.contains(11.0, 5.0));
        assert!(!sq.contains(-0.001, 5.0));
        // edges and corners are inside
        assert!(sq.contains(0.0, 5.0));
        assert!(sq.contains(10.0, 10.0));
        assert!(sq.contains(5.0, 0.0));
    }

    #[test]
    fn test_contains_concave() {
        // U shape: notch between x=3..7 above y=3
        let u = Polygon::new(vec![
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (7.0, 10.0),
            (7.0, 3.0),
            (3.0, 3.0),
            (3.0, 10.0),
            (0.0, 10.0),
        ])
        .unwrap();
        assert!(u.contains(1.0, 8.0));
        assert!(u.contains(9.0, 8.0));
        assert!(!u.contains(5.0, 8.0));
        assert!(u.contains(5.0, 1.0));
        assert!(u.contains(5.0, 3.0));
    }

    #[test]
    fn test_elevation_band() {
        let band = ElevationBand::new(180.0, 220.0).unwrap();
        assert!(band.contains(180.0));
        assert!(band.contains(220.0));
        assert!(!band.contains(220.01));
        assert!(ElevationBand::new(5.0, 1.0).is_err());
        assert!(ElevationBand::new(f64::NAN, 1.0).is_err());
    }

    #[test]
    fn test_filter_subset_and_idempotent() {
        let cloud = PointCloud::new(
            UTM,
            vec![
                Point3::new(1.0, 1.0, 190.0),
                Point3::new(1.0, 1.0, 179.0),
                Point3::new(20.0, 1.0, 190.0),
                Point3::new(10.0, 10.0, 220.0),
                Point3::new(5.0, 5.0, 221.0),
            ],
        );
        let band = ElevationBand::new(180.0, 220.0).unwrap();
        let sq = square();
        let once = filter_points(&cloud, Some(&sq), &band);
        assert_eq!(
            once.points,
            vec![Point3::new(1.0, 1.0, 190.0), Point3::new(10.0, 10.0, 220.0)]
        );
        for p in &once.points {
            assert!(cloud.points.contains(p));
            assert!(sq.contains(p.x, p.y) && band.contains(p.z));
        }
        let twice = filter_points(&once, Some(&sq), &band);
        assert_eq!(once.points, twice.points);
        assert_eq!(twice.crs, UTM);
    }

    #[test]
    fn test_filter_without_region_and_empty() {
        let band = ElevationBand::new(0.0, 1.0).unwrap();
        let cloud = PointCloud::new(UTM, vec![Point3::new(1e6, -1e6, 0.5)]);
        assert_eq!(filter_points(&cloud, None, &band).len(), 1);

        let empty = PointCloud::new(UTM, Vec::new());
        assert!(filter_points(&empty, Some(&square()), &band).is_empty());
    }

    #[test]
    fn test_cloud_reprojection_round_trip() {
        let cloud = PointCloud::new(UTM, vec![Point3::new(500_000.0, 4_500_000.0, 200.0)]);
        let geo = cloud.reproject(Crs::WGS84).unwrap();
        assert_eq!(geo.crs, Crs::WGS84);
        assert!((geo.points[0].x + 75.0).abs() < 1e-7);
        let back = geo.reproject(UTM).unwrap();
        assert!((back.points[0].x - 500_000.0).abs() < 1e-3);
        assert!((back.points[0].y - 4_500_000.0).abs() < 1e-3);
        assert_eq!(back.points[0].z, 200.0);
    }
}
