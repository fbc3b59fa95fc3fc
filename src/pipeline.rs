//! End-to-end run: filter → rasterize → detect → percentile → cluster.
//!
//! Each stage returns a fresh value; nothing is shared or mutated between
//! stages. An invalid parameter aborts the run before any data is touched.
//! A stage that produces nothing ends the computation early: later stages are
//! skipped and report empty output, and [`PipelineOutput::empty_at`] names
//! the stage.

use crate::canopy;
use crate::cluster::{self, Clustering, DbscanParams, NOISE};
use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::percentile;
use crate::point_cloud::{self, ElevationBand, PointCloud, Polygon};
use crate::raster::Raster;
use crate::tree_detection::{self, DetectionParams, TreeCandidate};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Site-specific constants of a run.
///
/// Defaults are empirical site constants; override them per dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// EPSG code of the point cloud's projected CRS.
    pub crs_epsg: u32,
    /// Region of interest vertices; None keeps everything.
    pub region: Option<Vec<(f64, f64)>>,
    /// EPSG code of the region vertices when they are not in `crs_epsg`.
    pub region_epsg: Option<u32>,
    /// Elevation band lower bound (m).
    pub z_min: f64,
    /// Elevation band upper bound (m).
    pub z_max: f64,
    /// Canopy raster cell size (m).
    pub cell_size: f64,
    /// Local-maximum window width in cells.
    pub window: usize,
    /// Minimum tree-top height (m).
    pub min_height: Option<f64>,
    /// Tall-tree percentile in (0, 1).
    pub percentile: f64,
    /// Clustering radius (m).
    pub eps: f64,
    /// Clustering minimum neighbourhood size.
    pub min_pts: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            crs_epsg: 32618,
            region: None,
            region_epsg: None,
            z_min: 180.0,
            z_max: 220.0,
            cell_size: 1.0,
            window: 5,
            min_height: Some(185.0),
            percentile: 0.9,
            eps: 12.0,
            min_pts: 5,
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file; absent fields take their default.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn crs(&self) -> Result<Crs> {
        let crs = Crs::from_epsg(self.crs_epsg)?;
        if !crs.is_projected() {
            return Err(Error::Projection(format!(
                "working CRS must be projected in metres, got {crs}"
            )));
        }
        Ok(crs)
    }

    pub fn band(&self) -> Result<ElevationBand> {
        ElevationBand::new(self.z_min, self.z_max)
    }

    /// Region of interest in the working CRS.
    pub fn region_polygon(&self) -> Result<Option<Polygon>> {
        let Some(vertices) = self.region.clone() else {
            return Ok(None);
        };
        let polygon = Polygon::new(vertices)?;
        let working = self.crs()?;
        match self.region_epsg {
            Some(code) => {
                let source = Crs::from_epsg(code)?;
                debug!("region of interest: {source} -> {working}");
                Ok(Some(polygon.reproject(source, working)?))
            }
            None => Ok(Some(polygon)),
        }
    }

    pub fn detection(&self) -> DetectionParams {
        DetectionParams {
            window: self.window,
            min_height: self.min_height,
        }
    }

    pub fn dbscan(&self) -> DbscanParams {
        DbscanParams {
            eps: self.eps,
            min_pts: self.min_pts,
        }
    }

    /// Check every parameter up front.
    pub fn validate(&self) -> Result<()> {
        self.crs()?;
        self.band()?;
        self.region_polygon()?;
        if !(self.cell_size > 0.0) || !self.cell_size.is_finite() {
            return Err(Error::invalid(format!(
                "cell_size must be > 0, got {}",
                self.cell_size
            )));
        }
        self.detection().validate()?;
        if !(self.percentile > 0.0 && self.percentile < 1.0) {
            return Err(Error::invalid(format!(
                "percentile must be in (0, 1), got {}",
                self.percentile
            )));
        }
        self.dbscan().validate()
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Filter,
    Detect,
    Percentile,
    Cluster,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Filter => "point filter",
            Stage::Detect => "tree detection",
            Stage::Percentile => "percentile filter",
            Stage::Cluster => "clustering",
        };
        f.write_str(name)
    }
}

/// Row handed to exporters and renderers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TreeRecord {
    pub id: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Cluster label; 0 for noise and for trees outside the tall subset.
    pub cluster: u32,
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub crs: Crs,
    pub input_points: usize,
    pub filtered_points: usize,
    /// Canopy height model; None when filtering left no point.
    pub canopy: Option<Raster>,
    pub candidates: Vec<TreeCandidate>,
    pub tall_trees: Vec<TreeCandidate>,
    /// Height threshold of the tall subset; None when the stage was skipped.
    pub threshold: Option<f64>,
    /// One label per tall tree.
    pub clustering: Clustering,
    /// First stage that produced no element.
    pub empty_at: Option<Stage>,
}

impl PipelineOutput {
    fn empty(crs: Crs, input_points: usize, stage: Stage) -> Self {
        warn!("{stage} produced no output; remaining stages skipped");
        Self {
            crs,
            input_points,
            filtered_points: 0,
            canopy: None,
            candidates: Vec::new(),
            tall_trees: Vec::new(),
            threshold: None,
            clustering: Clustering {
                labels: Vec::new(),
                n_clusters: 0,
            },
            empty_at: Some(stage),
        }
    }

    /// Records for the tall subset with their cluster labels.
    pub fn tall_records(&self) -> Vec<TreeRecord> {
        self.tall_trees
            .iter()
            .zip(self.clustering.labels.iter())
            .map(|(t, &cluster)| TreeRecord {
                id: t.id,
                x: t.x,
                y: t.y,
                z: t.z,
                cluster,
            })
            .collect()
    }

    /// Records for every candidate; tall trees carry their cluster label.
    pub fn records(&self) -> Vec<TreeRecord> {
        let tall = self.tall_records();
        let mut cursor = tall.iter().peekable();
        self.candidates
            .iter()
            .map(|t| {
                let cluster = match cursor.peek() {
                    Some(r) if r.id == t.id => cursor.next().map_or(NOISE, |r| r.cluster),
                    _ => NOISE,
                };
                TreeRecord {
                    id: t.id,
                    x: t.x,
                    y: t.y,
                    z: t.z,
                    cluster,
                }
            })
            .collect()
    }

    /// Tall-tree locations in clustering order.
    pub fn tall_xy(&self) -> Vec<(f64, f64)> {
        self.tall_trees.iter().map(|t| (t.x, t.y)).collect()
    }
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Run every stage on a raw point cloud.
pub fn run(cloud: &PointCloud, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let crs = config.crs()?;
    if cloud.crs != crs {
        return Err(Error::Projection(format!(
            "point cloud is in {}, config expects {crs}; reproject first",
            cloud.crs
        )));
    }
    debug!("pipeline config: {config:?}");
    info!("pipeline: {} input points", cloud.len());

    let region = config.region_polygon()?;
    let filtered = point_cloud::filter_points(cloud, region.as_ref(), &config.band()?);
    info!("point filter: kept {}/{} points", filtered.len(), cloud.len());
    if filtered.is_empty() {
        return Ok(PipelineOutput::empty(crs, cloud.len(), Stage::Filter));
    }

    let chm = canopy::rasterize(&filtered, config.cell_size)?;
    let mut out = run_on_canopy(chm, config)?;
    out.input_points = cloud.len();
    out.filtered_points = filtered.len();
    Ok(out)
}

/// Run detection, percentile and clustering on an existing canopy raster.
pub fn run_on_canopy(chm: Raster, config: &PipelineConfig) -> Result<PipelineOutput> {
    config.validate()?;
    let crs = config.crs()?;
    if chm.crs != crs {
        return Err(Error::Projection(format!(
            "canopy raster is in {}, config expects {crs}",
            chm.crs
        )));
    }
    if !(chm.res > 0.0) || !chm.res.is_finite() {
        return Err(Error::invalid(format!(
            "canopy raster cell size must be > 0, got {}",
            chm.res
        )));
    }

    let candidates = tree_detection::local_maxima(&chm, &config.detection())?;
    let mut out = PipelineOutput {
        crs,
        input_points: 0,
        filtered_points: 0,
        canopy: Some(chm),
        candidates,
        tall_trees: Vec::new(),
        threshold: None,
        clustering: Clustering {
            labels: Vec::new(),
            n_clusters: 0,
        },
        empty_at: None,
    };
    if out.candidates.is_empty() {
        warn!("{} produced no output; remaining stages skipped", Stage::Detect);
        out.empty_at = Some(Stage::Detect);
        return Ok(out);
    }

    let (tall, threshold) = percentile::tall_trees(&out.candidates, config.percentile)?;
    out.tall_trees = tall;
    out.threshold = Some(threshold);
    if out.tall_trees.is_empty() {
        warn!("{} produced no output; remaining stages skipped", Stage::Percentile);
        out.empty_at = Some(Stage::Percentile);
        return Ok(out);
    }

    out.clustering = cluster::dbscan(&out.tall_xy(), &config.dbscan())?;
    if out.clustering.n_clusters == 0 {
        warn!("{} found no cluster; every tall tree is noise", Stage::Cluster);
        out.empty_at = Some(Stage::Cluster);
    }
    Ok(out)
}
