use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::StdRng, seq::index::sample, Rng, SeedableRng};

use crate::error::{Error, Result, Stage};
use crate::FitResult;

use super::importance::{average_importance, tree_permutation_importance};
use super::params::{ImportanceMode, QrfParams};
use super::tree::{RegressionTree, TreeSettings};
use super::QuantileForest;

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

struct GrownTree {
    tree: RegressionTree,
    in_bag: Vec<bool>,
    importance: Option<Vec<f64>>,
}

fn check_inputs(x: ArrayView2<f64>, y: ArrayView1<f64>, params: &QrfParams) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(Error::input(
            Stage::Forest,
            format!("{} feature rows for {} responses", x.nrows(), y.len()),
        ));
    }
    if x.nrows() < 2 || x.ncols() == 0 {
        return Err(Error::input(
            Stage::Forest,
            format!(
                "need at least 2 rows and 1 feature, got {}x{}",
                x.nrows(),
                x.ncols()
            ),
        ));
    }
    if params.n_trees == 0 {
        return Err(Error::configuration(Stage::Forest, "n_trees must be > 0"));
    }
    if !(params.sample_fraction > 0.0 && params.sample_fraction <= 1.0) {
        return Err(Error::configuration(
            Stage::Forest,
            format!(
                "sample_fraction must be in (0, 1], got {}",
                params.sample_fraction
            ),
        ));
    }
    Ok(())
}

fn draw_rows<R: Rng + ?Sized>(n: usize, size: usize, replace: bool, rng: &mut R) -> Vec<usize> {
    if replace {
        (0..size).map(|_| rng.gen_range(0..n)).collect()
    } else {
        sample(rng, n, size).into_vec()
    }
}

/// Fits a quantile regression forest. The returned [`FitResult`] holds out-of-bag
/// predictions; rows that were in every tree's sample fall back to the full-forest mean.
pub fn fit<R: Rng + ?Sized>(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    hyperparameters: &QrfParams,
    rng: &mut R,
) -> Result<(FitResult, QuantileForest)> {
    check_inputs(x, y, hyperparameters)?;

    let n = x.nrows();
    let p = x.ncols();
    let sample_size = ((n as f64 * hyperparameters.sample_fraction).round() as usize).clamp(1, n);
    let settings = TreeSettings {
        mtry: hyperparameters.resolved_mtry(p),
        min_node_size: hyperparameters.min_node_size,
        max_depth: hyperparameters.max_depth,
    };
    let importance_mode = hyperparameters.importance;
    let replace = hyperparameters.replace;

    // Pre-generate seeds for each tree
    let seeds: Vec<u64> = (0..hyperparameters.n_trees).map(|_| rng.gen()).collect();

    let grow_one = |seed: u64| -> GrownTree {
        let mut tree_rng = StdRng::seed_from_u64(seed);
        let rows = draw_rows(n, sample_size, replace, &mut tree_rng);
        let mut in_bag = vec![false; n];
        rows.iter().for_each(|&r| in_bag[r] = true);

        let (tree, impurity) = RegressionTree::grow(x, y, rows, &settings, &mut tree_rng);
        let importance = match importance_mode {
            ImportanceMode::None => None,
            ImportanceMode::Impurity => Some(impurity),
            ImportanceMode::Permutation => {
                let oob: Vec<usize> = (0..n).filter(|&i| !in_bag[i]).collect();
                Some(tree_permutation_importance(&tree, x, y, &oob, &mut tree_rng))
            }
        };
        GrownTree {
            tree,
            in_bag,
            importance,
        }
    };

    #[cfg(not(feature = "use-rayon"))]
    let grown: Vec<GrownTree> = seeds.iter().map(|&seed| grow_one(seed)).collect();

    #[cfg(feature = "use-rayon")]
    let grown: Vec<GrownTree> = seeds.par_iter().map(|&seed| grow_one(seed)).collect();

    let y_hat = oob_predictions(&grown, x);
    let residuals = &y - &y_hat;
    let err = residuals.pow2().mean().unwrap_or(f64::NAN);

    let importance = match importance_mode {
        ImportanceMode::None => None,
        _ => {
            let per_tree: Vec<Vec<f64>> = grown
                .iter()
                .filter_map(|g| g.importance.clone())
                .collect();
            Some(average_importance(&per_tree, p))
        }
    };

    let trees = grown.into_iter().map(|g| g.tree).collect();
    let forest = QuantileForest::new(trees, p, importance);

    log::debug!(
        "Fitted {} trees on {}x{} (mtry = {}), OOB MSE {:.5}",
        hyperparameters.n_trees,
        n,
        p,
        settings.mtry,
        err
    );

    Ok((
        FitResult {
            err,
            residuals,
            y_hat,
        },
        forest,
    ))
}

fn oob_predictions(grown: &[GrownTree], x: ArrayView2<f64>) -> Array1<f64> {
    Array1::from_shape_fn(x.nrows(), |i| {
        let row = x.row(i);
        let (sum, count) = grown
            .iter()
            .filter(|g| !g.in_bag[i])
            .fold((0.0, 0usize), |(s, c), g| (s + g.tree.predict_row(row), c + 1));
        if count > 0 {
            sum / count as f64
        } else {
            grown.iter().map(|g| g.tree.predict_row(row)).sum::<f64>() / grown.len() as f64
        }
    })
}
