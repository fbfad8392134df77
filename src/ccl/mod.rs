//! Connected-component labelling: two-pass union-find over pixels crossing a
//! signed analysis threshold, producing per-island peak, barycentre, and
//! bounding-box statistics, pruned against a detection threshold.

use std::collections::HashMap;

use ndarray::Array2;

use crate::error::CclError;
use crate::fit::Gaussian2D;

/// Bounding box, inclusive on all sides: `(min_row, max_row, min_col, max_col)`.
pub type BoundingBox = (usize, usize, usize, usize);

/// One detected source island.
#[derive(Clone, Debug)]
pub struct IslandParams {
    pub label_idx: i32,
    pub sign: i32,
    pub extremum_val: f64,
    pub extremum_y_idx: usize,
    pub extremum_x_idx: usize,
    pub ybar: f64,
    pub xbar: f64,
    pub bounding_box: BoundingBox,
    /// Converged Gaussian fit, if fitting was requested and succeeded.
    pub fit: Option<Gaussian2D>,
    /// Diagnostic recorded when fitting was requested but did not converge
    /// or errored; `None` when fitting wasn't requested or did succeed.
    pub fit_diagnostic: Option<String>,
}

/// Connectivity used when walking already-labelled neighbours.
#[derive(Clone, Copy, Debug)]
pub enum Connectivity {
    Four,
    Eight,
}

struct UnionFind {
    parent: Vec<i32>,
}

impl UnionFind {
    fn new() -> Self {
        Self { parent: vec![0] }
    }

    fn new_label(&mut self) -> i32 {
        let label = self.parent.len() as i32;
        self.parent.push(label);
        label
    }

    fn find(&mut self, mut x: i32) -> i32 {
        while self.parent[x as usize] != x {
            self.parent[x as usize] = self.parent[self.parent[x as usize] as usize];
            x = self.parent[x as usize];
        }
        x
    }

    fn union(&mut self, a: i32, b: i32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[big as usize] = small;
        }
    }
}

/// Run one signed labelling pass (positive extrema if `sign > 0`, negative if
/// `sign < 0`) over `data` at the given analysis threshold, pruning any
/// island whose peak fails `detection_threshold`.
///
/// Returns the (unpruned, contiguously relabelled) label map restricted to
/// this sign and the retained islands. Label ids in the returned map are
/// positive for both signs; callers combine positive/negative passes by
/// negating the negative pass's ids.
pub fn label_islands(
    data: &Array2<f64>,
    analysis_threshold: f64,
    detection_threshold: f64,
    sign: i32,
    connectivity: Connectivity,
    generate_labelmap: bool,
) -> Result<(Array2<i32>, Vec<IslandParams>), CclError> {
    if sign == 0 {
        return Err(CclError::InvalidInput("sign must be +1 or -1".into()));
    }
    let (h, w) = data.dim();
    if h == 0 || w == 0 {
        return Err(CclError::InvalidInput("cannot label an empty image".into()));
    }

    let passes = |v: f64| -> bool {
        if sign > 0 {
            v >= analysis_threshold
        } else {
            v <= -analysis_threshold
        }
    };

    let mut provisional = Array2::<i32>::zeros((h, w));
    let mut uf = UnionFind::new();

    for row in 0..h {
        for col in 0..w {
            if !passes(data[[row, col]]) {
                continue;
            }

            let mut neighbour_labels = Vec::with_capacity(4);
            if row > 0 {
                let up = provisional[[row - 1, col]];
                if up > 0 {
                    neighbour_labels.push(up);
                }
            }
            if col > 0 {
                let left = provisional[[row, col - 1]];
                if left > 0 {
                    neighbour_labels.push(left);
                }
            }
            if let Connectivity::Eight = connectivity {
                if row > 0 && col + 1 < w {
                    let ne = provisional[[row - 1, col + 1]];
                    if ne > 0 {
                        neighbour_labels.push(ne);
                    }
                }
                if row > 0 && col > 0 {
                    let nw = provisional[[row - 1, col - 1]];
                    if nw > 0 {
                        neighbour_labels.push(nw);
                    }
                }
            }

            let label = if neighbour_labels.is_empty() {
                uf.new_label()
            } else {
                let min_label = *neighbour_labels.iter().min().unwrap();
                for &other in &neighbour_labels {
                    if other != min_label {
                        uf.union(min_label, other);
                    }
                }
                min_label
            };
            provisional[[row, col]] = label;
        }
    }

    // Pass 2: relabel contiguously and accumulate per-label statistics.
    let mut root_to_contig: HashMap<i32, i32> = HashMap::new();
    let mut next_contig = 1i32;
    let mut final_labels = Array2::<i32>::zeros((h, w));

    struct Accum {
        extremum_val: f64,
        extremum_y: usize,
        extremum_x: usize,
        sum_weight: f64,
        sum_y: f64,
        sum_x: f64,
        min_row: usize,
        max_row: usize,
        min_col: usize,
        max_col: usize,
    }

    let mut accums: HashMap<i32, Accum> = HashMap::new();

    for row in 0..h {
        for col in 0..w {
            let prov = provisional[[row, col]];
            if prov == 0 {
                continue;
            }
            let root = uf.find(prov);
            let contig = *root_to_contig.entry(root).or_insert_with(|| {
                let id = next_contig;
                next_contig += 1;
                id
            });
            final_labels[[row, col]] = contig;

            let value = data[[row, col]];
            let weight = value.abs();
            let entry = accums.entry(contig).or_insert(Accum {
                extremum_val: value,
                extremum_y: row,
                extremum_x: col,
                sum_weight: 0.0,
                sum_y: 0.0,
                sum_x: 0.0,
                min_row: row,
                max_row: row,
                min_col: col,
                max_col: col,
            });

            let extremum_wins = if sign > 0 {
                value > entry.extremum_val
            } else {
                value < entry.extremum_val
            };
            if extremum_wins {
                entry.extremum_val = value;
                entry.extremum_y = row;
                entry.extremum_x = col;
            }
            entry.sum_weight += weight;
            entry.sum_y += weight * row as f64;
            entry.sum_x += weight * col as f64;
            entry.min_row = entry.min_row.min(row);
            entry.max_row = entry.max_row.max(row);
            entry.min_col = entry.min_col.min(col);
            entry.max_col = entry.max_col.max(col);
        }
    }

    let mut islands = Vec::new();
    let mut retained_labels = std::collections::HashSet::new();

    for (label, acc) in accums {
        if acc.extremum_val.abs() < detection_threshold {
            continue;
        }
        retained_labels.insert(label);
        let (ybar, xbar) = if acc.sum_weight > crate::consts::EPSILON {
            (acc.sum_y / acc.sum_weight, acc.sum_x / acc.sum_weight)
        } else {
            (acc.extremum_y as f64, acc.extremum_x as f64)
        };
        islands.push(IslandParams {
            label_idx: label,
            sign,
            extremum_val: acc.extremum_val,
            extremum_y_idx: acc.extremum_y,
            extremum_x_idx: acc.extremum_x,
            ybar,
            xbar,
            bounding_box: (acc.min_row, acc.max_row, acc.min_col, acc.max_col),
            fit: None,
            fit_diagnostic: None,
        });
    }

    islands.sort_by_key(|i| i.label_idx);

    if generate_labelmap {
        for v in final_labels.iter_mut() {
            if *v != 0 && !retained_labels.contains(v) {
                *v = 0;
            }
        }
    }

    Ok((final_labels, islands))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn island_image() -> Array2<f64> {
        let mut data = Array2::<f64>::zeros((8, 8));
        data[[2, 2]] = 5.0;
        data[[2, 3]] = 4.0;
        data[[6, 6]] = -5.0;
        data
    }

    #[test]
    fn finds_one_positive_island() {
        let data = island_image();
        let (_, islands) = label_islands(&data, 3.0, 4.0, 1, Connectivity::Eight, true).unwrap();
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].extremum_y_idx, 2);
        assert_eq!(islands[0].extremum_x_idx, 2);
    }

    #[test]
    fn finds_one_negative_island() {
        let data = island_image();
        let (_, islands) = label_islands(&data, 3.0, 4.0, -1, Connectivity::Eight, true).unwrap();
        assert_eq!(islands.len(), 1);
        assert_eq!(islands[0].sign, -1);
    }

    #[test]
    fn detection_threshold_prunes_weak_islands() {
        let mut data = Array2::<f64>::zeros((8, 8));
        data[[1, 1]] = 3.5; // below detection (4.0), above analysis (3.0)
        let (labels, islands) = label_islands(&data, 3.0, 4.0, 1, Connectivity::Eight, true).unwrap();
        assert!(islands.is_empty());
        assert!(labels.iter().all(|&v| v == 0));
    }

    #[test]
    fn relabelling_is_idempotent_up_to_permutation() {
        let data = island_image();
        let (labels_a, islands_a) =
            label_islands(&data, 3.0, 4.0, 1, Connectivity::Eight, true).unwrap();
        let (labels_b, islands_b) =
            label_islands(&data, 3.0, 4.0, 1, Connectivity::Eight, true).unwrap();
        assert_eq!(islands_a.len(), islands_b.len());
        for (a, b) in labels_a.iter().zip(labels_b.iter()) {
            assert_eq!((*a == 0), (*b == 0));
        }
    }

    #[test]
    fn rejects_zero_sign() {
        let data = island_image();
        assert!(label_islands(&data, 3.0, 4.0, 0, Connectivity::Eight, true).is_err());
    }
}
