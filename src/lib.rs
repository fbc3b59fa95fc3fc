//! # treetops: tree tops and tall-tree clusters from airborne LiDAR
//!
//! Answers descriptive questions about a forest plot (how many trees, where,
//! how tall, where the tallest ones group) from a single point cloud.
//!
//! Pipeline, each stage a pure transformation:
//! - **Point filter**: [`filter_points`] keeps returns inside a region of
//!   interest and an elevation band
//! - **Canopy height model**: [`rasterize`] takes the per-cell maximum z
//! - **Tree detection**: [`local_maxima`] finds one apex per window peak
//! - **Tall trees**: [`tall_trees`] keeps trees above a height percentile
//! - **Clustering**: [`dbscan`] groups tall trees spatially, 0 = noise
//!
//! [`pipeline::run`] chains them; [`export`] turns the results into tables,
//! map layers, a GeoTIFF, and a height histogram.

pub mod canopy;
pub mod cluster;
pub mod crs;
pub mod error;
pub mod export;
pub mod percentile;
pub mod pipeline;
pub mod point_cloud;
pub mod raster;
pub mod tree_detection;

pub use canopy::{rasterize, rasterize_on};
pub use cluster::{dbscan, Clustering, DbscanParams, NOISE};
pub use crs::Crs;
pub use error::{Error, Result};
pub use percentile::{quantile, tall_trees};
pub use pipeline::{PipelineConfig, PipelineOutput, Stage, TreeRecord};
pub use point_cloud::{filter_points, read_las, ElevationBand, Point3, PointCloud, Polygon};
pub use raster::{GridSpec, Raster, NO_DATA};
pub use tree_detection::{local_maxima, DetectionParams, TreeCandidate};
