//! Height percentile and the tall-tree subset.

use crate::error::{Error, Result};
use crate::tree_detection::TreeCandidate;
use log::info;
use std::cmp::Ordering;

/// `p`-quantile of `values` with linear interpolation between order
/// statistics: position `p × (n − 1)` in the ascending sort.
///
/// NaN values are ignored. Fails on an empty input or `p` outside (0, 1).
pub fn quantile(values: &[f64], p: f64) -> Result<f64> {
    if !(p > 0.0 && p < 1.0) {
        return Err(Error::invalid(format!("percentile must be in (0, 1), got {p}")));
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Err(Error::invalid("quantile of an empty sequence"));
    }
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Ok(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Trees whose height is strictly above the `p`-quantile of all heights,
/// in input order, together with the threshold.
pub fn tall_trees(trees: &[TreeCandidate], p: f64) -> Result<(Vec<TreeCandidate>, f64)> {
    if trees.is_empty() {
        return Err(Error::invalid("percentile filter needs at least one tree"));
    }
    let heights: Vec<f64> = trees.iter().map(|t| t.z).collect();
    let threshold = quantile(&heights, p)?;
    let tall: Vec<TreeCandidate> = trees.iter().filter(|t| t.z > threshold).copied().collect();
    info!(
        "percentile filter: p={p} threshold={threshold:.2} kept {}/{}",
        tall.len(),
        trees.len()
    );
    Ok((tall, threshold))
}
