//! Tree-top detection on a canopy height model.
//!
//! A cell is a tree top when its height equals the maximum of the `w × w`
//! window centred on it. Windows are truncated at the grid border, never
//! padded. Equal maxima that share a window collapse to a single candidate:
//! the first cell in row-major order.

use crate::error::{Error, Result};
use crate::raster::Raster;
use log::{debug, info};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A detected tree apex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeCandidate {
    /// 1-based id in detection (row-major) order; only stable within one run.
    pub id: u32,
    /// Cell-centre X of the apex (map units).
    pub x: f64,
    /// Cell-centre Y of the apex (map units).
    pub y: f64,
    /// Canopy height stored in the apex cell.
    pub z: f64,
}

/// Parameters for [`local_maxima`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionParams {
    /// Moving window width in cells (odd, ≥ 3).
    pub window: usize,
    /// Drop apices lower than this height.
    pub min_height: Option<f64>,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            window: 5,
            min_height: None,
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<()> {
        if self.window < 3 || self.window % 2 == 0 {
            return Err(Error::invalid(format!(
                "window must be odd and >= 3, got {}",
                self.window
            )));
        }
        if let Some(h) = self.min_height {
            if h.is_nan() {
                return Err(Error::invalid("min_height is NaN"));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// local_maxima
// ---------------------------------------------------------------------------

/// Fixed-window local maxima of `chm`, one candidate per tied peak.
///
/// "No data" cells are never candidates and never take part in a window
/// maximum. An all-"no data" raster yields an empty vector.
pub fn local_maxima(chm: &Raster, params: &DetectionParams) -> Result<Vec<TreeCandidate>> {
    params.validate()?;
    let half = (params.window / 2) as isize;
    let is_max = window_maxima(chm, half);
    debug!(
        "local maxima: window={} raw maxima={}",
        params.window,
        is_max.iter().filter(|&&m| m).count()
    );

    let apices = resolve_ties(chm, &is_max, half);

    let mut trees = Vec::with_capacity(apices.len());
    for (r, c) in apices {
        let z = chm.get(r, c);
        if let Some(hmin) = params.min_height {
            if z < hmin {
                continue;
            }
        }
        let (x, y) = chm.rc_to_xy(r, c);
        trees.push(TreeCandidate {
            id: trees.len() as u32 + 1,
            x,
            y,
            z,
        });
    }
    info!("tree detection: {} candidates", trees.len());
    Ok(trees)
}

/// Cells whose value equals the maximum of their truncated window.
fn window_maxima(chm: &Raster, half: isize) -> Vec<bool> {
    let mut is_max = vec![false; chm.len()];
    for r in 0..chm.nrow {
        for c in 0..chm.ncol {
            let v = chm.get(r, c);
            if v.is_nan() {
                continue;
            }
            let mut highest = true;
            'window: for dr in -half..=half {
                for dc in -half..=half {
                    if let Some(n) = chm.get_opt(r as isize + dr, c as isize + dc) {
                        if n > v {
                            highest = false;
                            break 'window;
                        }
                    }
                }
            }
            is_max[r * chm.ncol + c] = highest;
        }
    }
    is_max
}

/// Group equal-valued maxima lying within each other's window (transitively)
/// and keep the first cell of each group in row-major order.
fn resolve_ties(chm: &Raster, is_max: &[bool], half: isize) -> Vec<(usize, usize)> {
    let ncol = chm.ncol;
    let mut grouped = vec![false; is_max.len()];
    let mut apices = Vec::new();
    let mut stack: Vec<(usize, usize)> = Vec::new();

    for r in 0..chm.nrow {
        for c in 0..ncol {
            let idx = r * ncol + c;
            if !is_max[idx] || grouped[idx] {
                continue;
            }
            // every earlier member of this group would already be marked,
            // so (r, c) is the group's row-major first cell
            apices.push((r, c));
            let v = chm.get(r, c);
            grouped[idx] = true;
            stack.push((r, c));
            while let Some((sr, sc)) = stack.pop() {
                for dr in -half..=half {
                    for dc in -half..=half {
                        let nr = sr as isize + dr;
                        let nc = sc as isize + dc;
                        if nr < 0 || nc < 0 || nr >= chm.nrow as isize || nc >= ncol as isize {
                            continue;
                        }
                        let nidx = nr as usize * ncol + nc as usize;
                        if is_max[nidx] && !grouped[nidx] && chm.data[nidx] == v {
                            grouped[nidx] = true;
                            stack.push((nr as usize, nc as usize));
                        }
                    }
                }
            }
        }
    }
    apices
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::{GridSpec, NO_DATA};

    const UTM: Crs = Crs::utm(18, true);

    fn raster(nrow: usize, ncol: usize, data: Vec<f64>) -> Raster {
        let spec = GridSpec { xmin: 0.0, ymin: 0.0, ncol, nrow, res: 1.0 };
        Raster::from_vec(&spec, UTM, data).unwrap()
    }

    fn params(window: usize) -> DetectionParams {
        DetectionParams {
            window,
            min_height: None,
        }
    }

    #[test]
    fn test_plateau_keeps_north_west_cell() {
        // 2x2 plateau in the south-west corner; row 0 is the northern edge
        let chm = raster(3, 3, vec![1.0, 1.0, 1.0, 5.0, 5.0, 1.0, 5.0, 5.0, 1.0]);
        let trees = local_maxima(&chm, &params(3)).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!((trees[0].x, trees[0].y), (0.5, 1.5));
        assert_eq!(trees[0].z, 5.0);
    }

    #[test]
    fn test_single_peak() {
        let mut data = vec![1.0; 49];
        data[2 * 7 + 4] = 5.0;
        let chm = raster(7, 7, data);
        let trees = local_maxima(&chm, &params(5)).unwrap();
        // the flat background is dominated near the peak but far corners
        // are out of its window, so only check the peak itself
        let peak: Vec<_> = trees.iter().filter(|t| t.z == 5.0).collect();
        assert_eq!(peak.len(), 1);
        assert_eq!((peak[0].x, peak[0].y), chm.rc_to_xy(2, 4));
        assert_eq!(peak[0].id, trees.iter().position(|t| t.z == 5.0).unwrap() as u32 + 1);
    }

    #[test]
    fn test_single_peak_on_cone() {
        // heights fall off with Chebyshev distance from (3, 3)
        let mut data = Vec::new();
        for r in 0..7i32 {
            for c in 0..7i32 {
                data.push(10.0 - (r - 3).abs().max((c - 3).abs()) as f64);
            }
        }
        let chm = raster(7, 7, data);
        let trees = local_maxima(&chm, &params(3)).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].id, 1);
        assert_eq!(trees[0].z, 10.0);
        assert_eq!((trees[0].x, trees[0].y), chm.rc_to_xy(3, 3));
    }

    #[test]
    fn test_flat_region_single_candidate() {
        let mut data = vec![NO_DATA; 64];
        for r in 1..7 {
            for c in 2..8 {
                data[r * 8 + c] = 20.0;
            }
        }
        let chm = raster(8, 8, data);
        let trees = local_maxima(&chm, &params(3)).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!((trees[0].x, trees[0].y), chm.rc_to_xy(1, 2));
    }

    #[test]
    fn test_fully_flat_raster() {
        let chm = raster(12, 15, vec![3.0; 180]);
        let trees = local_maxima(&chm, &params(5)).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!((trees[0].x, trees[0].y), chm.rc_to_xy(0, 0));
    }

    #[test]
    fn test_two_separated_peaks() {
        let mut data = vec![1.0; 10 * 10];
        data[1 * 10 + 1] = 8.0;
        data[8 * 10 + 8] = 9.0;
        let chm = raster(10, 10, data);
        let trees = local_maxima(&chm, &params(5)).unwrap();
        let tall: Vec<_> = trees.iter().filter(|t| t.z > 1.0).collect();
        assert_eq!(tall.len(), 2);
        assert_eq!(tall[0].z, 8.0);
        assert_eq!(tall[1].z, 9.0);
        assert!(tall[0].id < tall[1].id);
    }

    #[test]
    fn test_edge_window_is_truncated() {
        // a corner cell higher than its truncated neighbourhood is a maximum
        let chm = raster(3, 3, vec![9.0, 5.0, 4.0, 5.0, 5.0, 4.0, 4.0, 4.0, 6.0]);
        let trees = local_maxima(&chm, &params(3)).unwrap();
        let zs: Vec<f64> = trees.iter().map(|t| t.z).collect();
        assert_eq!(zs, vec![9.0, 6.0]);
        assert_eq!((trees[1].x, trees[1].y), chm.rc_to_xy(2, 2));
    }

    #[test]
    fn test_no_data_never_selected() {
        let chm = raster(3, 3, vec![NO_DATA; 9]);
        assert!(local_maxima(&chm, &params(3)).unwrap().is_empty());

        let chm = raster(1, 3, vec![NO_DATA, 4.0, NO_DATA]);
        let trees = local_maxima(&chm, &params(3)).unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees[0].z, 4.0);
    }

    #[test]
    fn test_min_height_keeps_ids_dense() {
        let mut data = vec![0.0; 10 * 10];
        data[1 * 10 + 1] = 8.0;
        data[5 * 10 + 5] = 3.0;
        data[8 * 10 + 8] = 9.0;
        let chm = raster(10, 10, data);
        let trees = local_maxima(
            &chm,
            &DetectionParams {
                window: 3,
                min_height: Some(5.0),
            },
        )
        .unwrap();
        assert_eq!(trees.len(), 2);
        assert_eq!(trees[0].id, 1);
        assert_eq!(trees[1].id, 2);
        assert_eq!(trees[1].z, 9.0);
    }

    #[test]
    fn test_invalid_window() {
        let chm = raster(3, 3, vec![1.0; 9]);
        for w in [0, 1, 2, 4] {
            assert!(matches!(
                local_maxima(&chm, &params(w)),
                Err(Error::InvalidInput(_))
            ));
        }
    }
}
