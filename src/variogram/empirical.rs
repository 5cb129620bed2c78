use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VariogramBin {
    /// Mean separation of the pairs in the bin.
    pub distance: f64,
    pub semivariance: f64,
    pub n_pairs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmpiricalVariogram {
    pub bins: Vec<VariogramBin>,
    pub cutoff: f64,
}

#[derive(Clone, Copy, Default)]
struct Accumulator {
    distance: f64,
    squared_diff: f64,
    n_pairs: usize,
}

/// Diagonal of the coordinates' bounding box.
pub fn extent_diagonal(coords: ArrayView2<f64>) -> f64 {
    let (mut x_min, mut x_max) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut y_min, mut y_max) = (f64::INFINITY, f64::NEG_INFINITY);
    for row in coords.rows() {
        x_min = x_min.min(row[0]);
        x_max = x_max.max(row[0]);
        y_min = y_min.min(row[1]);
        y_max = y_max.max(row[1]);
    }
    ((x_max - x_min).powi(2) + (y_max - y_min).powi(2)).sqrt()
}

fn merge(mut a: Vec<Accumulator>, b: Vec<Accumulator>) -> Vec<Accumulator> {
    for (acc, other) in a.iter_mut().zip(b) {
        acc.distance += other.distance;
        acc.squared_diff += other.squared_diff;
        acc.n_pairs += other.n_pairs;
    }
    a
}

/// Classical (Matheron) semivariogram `sum (z_i - z_j)^2 / (2 N(h))` over `n_bins` equal-width
/// lag classes up to `cutoff`. Lag classes without pairs are left out.
pub fn empirical_variogram(
    coords: ArrayView2<f64>,
    z: ArrayView1<f64>,
    n_bins: usize,
    cutoff: f64,
) -> EmpiricalVariogram {
    let n = z.len();
    let width = cutoff / n_bins as f64;

    let pairs_from = |i: usize| -> Vec<Accumulator> {
        let mut acc = vec![Accumulator::default(); n_bins];
        let (xi, yi) = (coords[[i, 0]], coords[[i, 1]]);
        for j in (i + 1)..n {
            let d = ((coords[[j, 0]] - xi).powi(2) + (coords[[j, 1]] - yi).powi(2)).sqrt();
            if d > cutoff {
                continue;
            }
            let bin = ((d / width) as usize).min(n_bins - 1);
            acc[bin].distance += d;
            acc[bin].squared_diff += (z[i] - z[j]).powi(2);
            acc[bin].n_pairs += 1;
        }
        acc
    };

    #[cfg(not(feature = "use-rayon"))]
    let totals = (0..n)
        .map(pairs_from)
        .fold(vec![Accumulator::default(); n_bins], merge);

    // Merged in index order so the sums do not depend on scheduling.
    #[cfg(feature = "use-rayon")]
    let totals = (0..n)
        .into_par_iter()
        .map(pairs_from)
        .collect::<Vec<_>>()
        .into_iter()
        .fold(vec![Accumulator::default(); n_bins], merge);

    let bins = totals
        .into_iter()
        .filter(|a| a.n_pairs > 0)
        .map(|a| VariogramBin {
            distance: a.distance / a.n_pairs as f64,
            semivariance: a.squared_diff / (2.0 * a.n_pairs as f64),
            n_pairs: a.n_pairs,
        })
        .collect();

    EmpiricalVariogram { bins, cutoff }
}
