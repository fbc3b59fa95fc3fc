//! Coordinate reference systems and explicit reprojection.
//!
//! Every point set in the crate carries a [`Crs`] tag: an EPSG code checked
//! against the `proj4rs` definition table. The working system must be
//! projected (metres); maps want geographic WGS84 longitude/latitude.
//! Geographic coordinates are exchanged in degrees.

use crate::error::{Error, Result};
use proj4rs::proj::Proj;
use std::fmt;

/// Coordinate reference system tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs {
    epsg: u16,
    projected: bool,
}

impl Crs {
    /// Geographic WGS84, (longitude, latitude) in degrees.
    pub const WGS84: Crs = Crs {
        epsg: 4326,
        projected: false,
    };

    /// UTM zone on WGS84 (EPSG 326zz / 327zz); `zone` is 1..=60.
    pub const fn utm(zone: u8, north: bool) -> Crs {
        let base = if north { 32600 } else { 32700 };
        Crs {
            epsg: base + zone as u16,
            projected: true,
        }
    }

    /// Look up an EPSG code in the projection definition table.
    pub fn from_epsg(code: u32) -> Result<Self> {
        let epsg = u16::try_from(code)
            .map_err(|_| Error::Projection(format!("unknown EPSG code {code}")))?;
        let proj = Proj::from_epsg_code(epsg)
            .map_err(|e| Error::Projection(format!("EPSG:{code}: {e}")))?;
        Ok(Crs {
            epsg,
            projected: !proj.is_latlong(),
        })
    }

    pub fn epsg(&self) -> u32 {
        self.epsg as u32
    }

    /// True for systems with planar (x, y) coordinates.
    pub fn is_projected(&self) -> bool {
        self.projected
    }

    fn proj(&self) -> Result<Proj> {
        Proj::from_epsg_code(self.epsg)
            .map_err(|e| Error::Projection(format!("{self}: {e}")))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg)
    }
}

/// Reproject a single (x, y) pair from `from` to `to`.
pub fn reproject_xy(from: Crs, to: Crs, x: f64, y: f64) -> Result<(f64, f64)> {
    if from == to {
        return Ok((x, y));
    }
    let (src, dst) = (from.proj()?, to.proj()?);
    transform_one(&src, &dst, from, to, x, y)
}

/// Reproject a sequence of (x, y) pairs, preserving order.
pub fn reproject_all(from: Crs, to: Crs, xy: &[(f64, f64)]) -> Result<Vec<(f64, f64)>> {
    if from == to {
        return Ok(xy.to_vec());
    }
    let (src, dst) = (from.proj()?, to.proj()?);
    xy.iter()
        .map(|&(x, y)| transform_one(&src, &dst, from, to, x, y))
        .collect()
}

// proj4rs works in radians for geographic systems
fn transform_one(
    src: &Proj,
    dst: &Proj,
    from: Crs,
    to: Crs,
    x: f64,
    y: f64,
) -> Result<(f64, f64)> {
    let mut point = if from.projected {
        (x, y, 0.0)
    } else {
        (x.to_radians(), y.to_radians(), 0.0)
    };
    proj4rs::transform::transform(src, dst, &mut point)
        .map_err(|e| Error::Projection(format!("({x}, {y}) {from} -> {to}: {e}")))?;
    let (px, py, _) = point;
    if !px.is_finite() || !py.is_finite() {
        return Err(Error::Projection(format!("({x}, {y}) has no image in {to}")));
    }
    if to.projected {
        Ok((px, py))
    } else {
        Ok((px.to_degrees(), py.to_degrees()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epsg_codes() {
        assert_eq!(Crs::from_epsg(4326).unwrap(), Crs::WGS84);
        assert!(!Crs::WGS84.is_projected());
        assert_eq!(Crs::from_epsg(32618).unwrap(), Crs::utm(18, true));
        assert_eq!(Crs::from_epsg(32733).unwrap(), Crs::utm(33, false));
        assert_eq!(Crs::utm(18, true).epsg(), 32618);
        assert_eq!(Crs::utm(18, true).to_string(), "EPSG:32618");

        // Lambert-93
        let l93 = Crs::from_epsg(2154).unwrap();
        assert!(l93.is_projected());
        assert_eq!(l93.epsg(), 2154);

        assert!(Crs::from_epsg(32600).is_err());
        assert!(Crs::from_epsg(100_000).is_err());
    }

    #[test]
    fn test_central_meridian_on_equator() {
        let (x, y) = reproject_xy(Crs::WGS84, Crs::utm(31, true), 3.0, 0.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-3);
        assert!(y.abs() < 1e-3);
    }

    #[test]
    fn test_known_northing_at_45_degrees() {
        // k0 × meridian arc at 45°N (4 984 944.4 m on WGS84)
        let (x, y) = reproject_xy(Crs::WGS84, Crs::utm(31, true), 3.0, 45.0).unwrap();
        assert!((x - 500_000.0).abs() < 1e-3);
        assert!((y - 4_982_950.4).abs() < 2.0, "northing = {y}");
    }

    #[test]
    fn test_lambert93_origin() {
        let l93 = Crs::from_epsg(2154).unwrap();
        let (x, y) = reproject_xy(Crs::WGS84, l93, 3.0, 46.5).unwrap();
        assert!((x - 700_000.0).abs() < 1e-2, "x = {x}");
        assert!((y - 6_600_000.0).abs() < 1e-2, "y = {y}");
    }

    #[test]
    fn test_round_trip_within_zone() {
        let utm18 = Crs::utm(18, true);
        for &(lon, lat) in &[(-75.0, 40.0), (-73.2, 43.5), (-76.9, 38.1)] {
            let (e, n) = reproject_xy(Crs::WGS84, utm18, lon, lat).unwrap();
            let (lon2, lat2) = reproject_xy(utm18, Crs::WGS84, e, n).unwrap();
            assert!((lon - lon2).abs() < 1e-6, "lon {lon} -> {lon2}");
            assert!((lat - lat2).abs() < 1e-6, "lat {lat} -> {lat2}");
        }
    }

    #[test]
    fn test_southern_hemisphere_offset() {
        let south = Crs::utm(33, false);
        let (_, n) = reproject_xy(Crs::WGS84, south, 15.0, -10.0).unwrap();
        assert!(n < 10_000_000.0 && n > 8_000_000.0);
        let (lon, lat) = reproject_xy(south, Crs::WGS84, 500_000.0, n).unwrap();
        assert!((lon - 15.0).abs() < 1e-6);
        assert!((lat + 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_reproject_all_preserves_order() {
        let pts = vec![(-75.0, 40.0), (-74.0, 41.0)];
        let out = reproject_all(Crs::WGS84, Crs::utm(18, true), &pts).unwrap();
        assert_eq!(out.len(), 2);
        assert!(out[0].1 < out[1].1);
        assert_eq!(reproject_all(Crs::WGS84, Crs::WGS84, &pts).unwrap(), pts);
    }
}
