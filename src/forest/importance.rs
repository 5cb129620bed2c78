use ndarray::{ArrayView1, ArrayView2};
use rand::{seq::SliceRandom, Rng};

use super::tree::RegressionTree;

fn oob_mse(tree: &RegressionTree, x: ArrayView2<f64>, y: ArrayView1<f64>, oob: &[usize]) -> f64 {
    oob.iter()
        .map(|&r| (y[r] - tree.predict_row(x.row(r))).powi(2))
        .sum::<f64>()
        / oob.len() as f64
}

/// Increase in a tree's out-of-bag MSE when each feature is permuted among the OOB rows.
pub fn tree_permutation_importance<R: Rng + ?Sized>(
    tree: &RegressionTree,
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    oob: &[usize],
    rng: &mut R,
) -> Vec<f64> {
    let p = x.ncols();
    if oob.len() < 2 {
        return vec![0.0; p];
    }
    let baseline = oob_mse(tree, x, y, oob);

    (0..p)
        .map(|j| {
            let mut permuted: Vec<f64> = oob.iter().map(|&r| x[[r, j]]).collect();
            permuted.shuffle(rng);
            let permuted_mse = oob
                .iter()
                .zip(&permuted)
                .map(|(&r, &v)| {
                    let (pred, _) = tree.leaf_with(|f| if f == j { v } else { x[[r, f]] });
                    (y[r] - pred).powi(2)
                })
                .sum::<f64>()
                / oob.len() as f64;
            permuted_mse - baseline
        })
        .collect()
}

/// Element-wise mean of per-tree importance vectors.
pub fn average_importance(per_tree: &[Vec<f64>], n_features: usize) -> Vec<f64> {
    let mut total = vec![0.0; n_features];
    for imp in per_tree {
        for (t, v) in total.iter_mut().zip(imp) {
            *t += v;
        }
    }
    let n = per_tree.len().max(1) as f64;
    total.iter_mut().for_each(|t| *t /= n);
    total
}
