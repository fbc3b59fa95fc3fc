//! Density-based spatial clustering (DBSCAN) of tree locations.
//!
//! A point is a core point when at least `min_pts` points, itself included,
//! lie within distance `eps`. Clusters are grown from core points in input
//! order, so a fixed input always receives the same labels. Label 0 is noise.

use crate::error::{Error, Result};
use log::info;
use rstar::primitives::GeomWithData;
use rstar::RTree;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Label given to points that belong to no cluster.
pub const NOISE: u32 = 0;

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Neighbourhood rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbscanParams {
    /// Neighbourhood radius (map units); the boundary is inclusive.
    pub eps: f64,
    /// Points, including the centre, needed for a core point.
    pub min_pts: usize,
}

impl Default for DbscanParams {
    fn default() -> Self {
        Self { eps: 12.0, min_pts: 5 }
    }
}

impl DbscanParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.eps > 0.0) || !self.eps.is_finite() {
            return Err(Error::invalid(format!("eps must be > 0, got {}", self.eps)));
        }
        if self.min_pts < 1 {
            return Err(Error::invalid("min_pts must be >= 1"));
        }
        Ok(())
    }
}

/// Per-point labels: 0 for noise, 1..=n_clusters in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clustering {
    pub labels: Vec<u32>,
    pub n_clusters: u32,
}

/// Size and centroid of one cluster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterSummary {
    pub label: u32,
    pub size: usize,
    pub cx: f64,
    pub cy: f64,
}

impl Clustering {
    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l == NOISE).count()
    }

    /// One summary per cluster, ordered by label. `points` must be the
    /// sequence that was clustered.
    pub fn summaries(&self, points: &[(f64, f64)]) -> Vec<ClusterSummary> {
        let mut acc = vec![(0usize, 0.0f64, 0.0f64); self.n_clusters as usize];
        for (&label, &(x, y)) in self.labels.iter().zip(points) {
            if label == NOISE {
                continue;
            }
            let slot = &mut acc[(label - 1) as usize];
            slot.0 += 1;
            slot.1 += x;
            slot.2 += y;
        }
        acc.into_iter()
            .enumerate()
            .map(|(i, (size, sx, sy))| ClusterSummary {
                label: i as u32 + 1,
                size,
                cx: sx / size.max(1) as f64,
                cy: sy / size.max(1) as f64,
            })
            .collect()
    }
}

/// Cluster `points` with DBSCAN.
pub fn dbscan(points: &[(f64, f64)], params: &DbscanParams) -> Result<Clustering> {
    params.validate()?;

    let tree: RTree<IndexedPoint> = RTree::bulk_load(
        points
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| GeomWithData::new([x, y], i))
            .collect(),
    );
    let eps2 = params.eps * params.eps;
    let neighbours = |i: usize| -> Vec<usize> {
        let (x, y) = points[i];
        let mut found: Vec<usize> = tree
            .locate_within_distance([x, y], eps2)
            .map(|p| p.data)
            .collect();
        found.sort_unstable();
        found
    };

    let mut labels = vec![NOISE; points.len()];
    let mut visited = vec![false; points.len()];
    let mut next_label = 0u32;
    let mut queue: VecDeque<usize> = VecDeque::new();

    for i in 0..points.len() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        let seeds = neighbours(i);
        if seeds.len() < params.min_pts {
            continue;
        }

        next_label += 1;
        labels[i] = next_label;
        queue.extend(seeds.into_iter().filter(|&j| j != i));

        while let Some(j) = queue.pop_front() {
            if labels[j] == NOISE {
                labels[j] = next_label;
            }
            if visited[j] {
                continue;
            }
            visited[j] = true;
            let reach = neighbours(j);
            if reach.len() >= params.min_pts {
                queue.extend(reach.into_iter().filter(|&k| !visited[k] || labels[k] == NOISE));
            }
        }
    }

    info!(
        "clustering: eps={} min_pts={} -> {} clusters over {} points",
        params.eps,
        params.min_pts,
        next_label,
        points.len()
    );
    Ok(Clustering {
        labels,
        n_clusters: next_label,
    })
}
