//! Outputs for rendering collaborators: tree tables, map layers, the canopy
//! raster, and the height histogram.

use crate::crs::{self, Crs};
use crate::error::{Error, Result};
use crate::pipeline::TreeRecord;
use crate::raster::{GridSpec, Raster};
use csv::Writer;
use log::{info, warn};
use serde_json::json;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tiff::decoder::ifd::Value;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GDAL_NODATA_TAG: u16 = 42113;

// ==========================================================================
// Tree records
// ==========================================================================

/// Consumes tree records and writes one display artefact.
pub trait TreeExporter {
    fn export(&self, records: &[TreeRecord], path: &Path) -> Result<()>;
}

/// `id,x,y,z,cluster` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvExporter;

impl TreeExporter for CsvExporter {
    fn export(&self, records: &[TreeRecord], path: &Path) -> Result<()> {
        let mut wtr = Writer::from_writer(BufWriter::new(File::create(path)?));
        wtr.write_record(["id", "x", "y", "z", "cluster"])?;
        for r in records {
            wtr.write_record([
                r.id.to_string(),
                format!("{:.2}", r.x),
                format!("{:.2}", r.y),
                format!("{:.2}", r.z),
                r.cluster.to_string(),
            ])?;
        }
        wtr.flush()?;
        info!("wrote {} records to '{}'", records.len(), path.display());
        Ok(())
    }
}

/// GeoJSON FeatureCollection in WGS84 for web maps.
#[derive(Debug, Clone, Copy)]
pub struct GeoJsonExporter {
    /// CRS of the incoming record coordinates.
    pub source: Crs,
}

impl GeoJsonExporter {
    pub fn to_value(&self, records: &[TreeRecord]) -> Result<serde_json::Value> {
        let features = records
            .iter()
            .map(|r| {
                let (lon, lat) = crs::reproject_xy(self.source, Crs::WGS84, r.x, r.y)?;
                Ok(json!({
                    "type": "Feature",
                    "geometry": { "type": "Point", "coordinates": [lon, lat] },
                    "properties": { "id": r.id, "z": r.z, "cluster": r.cluster },
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(json!({ "type": "FeatureCollection", "features": features }))
    }
}

impl TreeExporter for GeoJsonExporter {
    fn export(&self, records: &[TreeRecord], path: &Path) -> Result<()> {
        let value = self.to_value(records)?;
        let mut out = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut out, &value)?;
        out.flush()?;
        info!("wrote {} map features to '{}'", records.len(), path.display());
        Ok(())
    }
}

// ==========================================================================
// Height histogram
// ==========================================================================

/// Half-open bin `[lower, upper)`; the last bin also holds `upper`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Fixed-width histogram of `values`, bins aligned on multiples of `bin_width`.
pub fn height_histogram(values: &[f64], bin_width: f64) -> Result<Vec<HistogramBin>> {
    if !(bin_width > 0.0) || !bin_width.is_finite() {
        return Err(Error::invalid(format!(
            "bin width must be > 0, got {bin_width}"
        )));
    }
    let valid: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let Some(min) = valid.iter().copied().reduce(f64::min) else {
        return Ok(Vec::new());
    };
    let max = valid.iter().copied().fold(min, f64::max);

    let start = (min / bin_width).floor();
    let n_bins = ((max / bin_width).floor() - start) as usize + 1;
    let mut bins: Vec<HistogramBin> = (0..n_bins)
        .map(|i| HistogramBin {
            lower: (start + i as f64) * bin_width,
            upper: (start + i as f64 + 1.0) * bin_width,
            count: 0,
        })
        .collect();
    for v in valid {
        let i = ((v / bin_width).floor() - start) as usize;
        bins[i.min(n_bins - 1)].count += 1;
    }
    Ok(bins)
}

pub fn write_histogram_csv(bins: &[HistogramBin], path: &Path) -> Result<()> {
    let mut wtr = Writer::from_writer(BufWriter::new(File::create(path)?));
    wtr.write_record(["lower", "upper", "count"])?;
    for b in bins {
        wtr.write_record([
            format!("{:.2}", b.lower),
            format!("{:.2}", b.upper),
            b.count.to_string(),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

// ==========================================================================
// GeoTIFF
// ==========================================================================

/// Write the raster as a single-band 64-bit float GeoTIFF.
pub fn write_geotiff(raster: &Raster, path: &Path) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
    let mut image =
        encoder.new_image::<colortype::Gray64Float>(raster.ncol as u32, raster.nrow as u32)?;

    let dir = image.encoder();
    dir.write_tag(Tag::ModelPixelScaleTag, &[raster.res, raster.res, 0.0][..])?;
    dir.write_tag(
        Tag::ModelTiepointTag,
        &[0.0, 0.0, 0.0, raster.xmin, raster.ymax(), 0.0][..],
    )?;
    if raster.crs.is_projected() {
        // GTModelType=projected, GTRasterType=PixelIsArea, ProjectedCSType=EPSG
        let keys: [u16; 16] = [
            1, 1, 0, 3, //
            1024, 0, 1, 1, //
            1025, 0, 1, 1, //
            3072, 0, 1, raster.crs.epsg() as u16,
        ];
        dir.write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), &keys[..])?;
    }
    dir.write_tag(Tag::Unknown(GDAL_NODATA_TAG), "nan")?;

    image.write_data(&raster.data)?;
    info!(
        "wrote {} x {} canopy raster to '{}'",
        raster.ncol,
        raster.nrow,
        path.display()
    );
    Ok(())
}

/// Square cell size and upper-left corner from the ModelPixelScale and
/// ModelTiepoint tags. Both tags are required.
fn georeference<R: std::io::Read + std::io::Seek>(
    decoder: &mut Decoder<R>,
) -> Result<(f64, f64, f64)> {
    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)?
        .ok_or_else(|| Error::invalid("GeoTIFF has no ModelPixelScale tag"))?
        .into_f64_vec()?;
    let tie = decoder
        .find_tag(Tag::ModelTiepointTag)?
        .ok_or_else(|| Error::invalid("GeoTIFF has no ModelTiepoint tag"))?
        .into_f64_vec()?;
    let (&[res_x, res_y, ..], &[_, _, _, origin_x, origin_y, ..]) = (&scale[..], &tie[..]) else {
        return Err(Error::invalid("GeoTIFF georeferencing tags are truncated"));
    };

    if !(res_x > 0.0) || !res_x.is_finite() {
        return Err(Error::invalid(format!("GeoTIFF cell size must be > 0, got {res_x}")));
    }
    if (res_x - res_y).abs() > 1e-9 * res_x {
        return Err(Error::invalid(format!(
            "non-square cells ({res_x} x {res_y}) are not supported"
        )));
    }
    if !origin_x.is_finite() || !origin_y.is_finite() {
        return Err(Error::invalid("GeoTIFF tiepoint is not finite"));
    }
    Ok((res_x, origin_x, origin_y))
}

/// GDAL NoData value, if the file declares a numeric one.
fn gdal_nodata<R: std::io::Read + std::io::Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
    match decoder.find_tag(Tag::Unknown(GDAL_NODATA_TAG)) {
        Ok(Some(Value::Ascii(s))) => s.trim_end_matches('\0').trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Load the first band of a GeoTIFF canopy model. Cells equal to the GDAL
/// NoData value become NaN. The CRS is supplied by the caller.
pub fn load_geotiff(path: &Path, crs: Crs) -> Result<Raster> {
    let file = File::open(path)?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let (width, height) = decoder.dimensions()?;
    let ncol = width as usize;
    let nrow = height as usize;
    let (res, origin_x, origin_y) = georeference(&mut decoder)?;
    let nodata = gdal_nodata(&mut decoder);

    let raw: Vec<f64> = match decoder.read_image()? {
        DecodingResult::F64(v) => v,
        DecodingResult::F32(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::U16(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::U8(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::I16(v) => v.iter().map(|x| *x as f64).collect(),
        DecodingResult::I32(v) => v.iter().map(|x| *x as f64).collect(),
        _ => return Err(Error::invalid("unsupported GeoTIFF pixel format")),
    };

    let total_pixels = nrow * ncol;
    if total_pixels == 0 || raw.len() % total_pixels != 0 {
        return Err(Error::invalid("GeoTIFF has an empty or ragged image"));
    }
    let n_bands = raw.len() / total_pixels;
    if n_bands > 1 {
        warn!("{n_bands} bands found, using band 0");
    }
    let data: Vec<f64> = (0..total_pixels)
        .map(|px| raw[px * n_bands])
        .map(|v| match nodata {
            Some(nd) if v == nd => f64::NAN,
            _ => v,
        })
        .collect();

    let spec = GridSpec {
        xmin: origin_x,
        ymin: origin_y - nrow as f64 * res,
        ncol,
        nrow,
        res,
    };
    info!("loaded {ncol} x {nrow} raster from '{}'", path.display());
    Raster::from_vec(&spec, crs, data)
}
