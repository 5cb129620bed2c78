//! Quantile regression forest.
//!
//! Trees are grown as in a regular random forest, but every leaf keeps the full list of
//! in-bag responses that reached it. A conditional quantile for a query is read off the
//! pooled leaf members of all trees, so the forest yields predictive intervals and not only a
//! conditional mean.

pub mod fitter;
pub mod importance;
pub mod params;
pub mod tree;

use std::fs;
use std::path::Path;

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Stage};
use crate::stats::quantile_sorted;
use crate::FittedModel;

pub use fitter::fit;
pub use params::{ImportanceMode, QrfParams, QrfParamsBuilder};
use tree::RegressionTree;

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantileForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    feature_names: Vec<String>,
    importance: Option<Vec<f64>>,
}

fn check_quantile(q: f64) -> Result<()> {
    if q > 0.0 && q < 1.0 {
        Ok(())
    } else {
        Err(Error::input(
            Stage::Forest,
            format!("quantile level must lie in (0, 1), got {q}"),
        ))
    }
}

impl QuantileForest {
    pub fn new(trees: Vec<RegressionTree>, n_features: usize, importance: Option<Vec<f64>>) -> Self {
        Self {
            trees,
            n_features,
            feature_names: Vec::new(),
            importance,
        }
    }

    /// Names the model's input columns so it can be applied to a grid later.
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        debug_assert_eq!(names.len(), self.n_features);
        self.feature_names = names;
        self
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn importance(&self) -> Option<&[f64]> {
        self.importance.as_deref()
    }

    /// Training responses pooled from the leaf each tree assigns to `row`, sorted.
    pub fn leaf_values(&self, row: ArrayView1<f64>) -> Vec<f64> {
        let mut pooled = Vec::new();
        for tree in &self.trees {
            pooled.extend_from_slice(tree.leaf(row).1);
        }
        pooled.sort_by(f64::total_cmp);
        pooled
    }

    pub fn predict_quantile_row(&self, row: ArrayView1<f64>, q: f64) -> Result<f64> {
        check_quantile(q)?;
        Ok(quantile_sorted(&self.leaf_values(row), q))
    }

    pub fn predict_mean_row(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// One column per requested level, one row per query.
    pub fn predict_quantiles(&self, x: ArrayView2<f64>, quantiles: &[f64]) -> Result<Array2<f64>> {
        quantiles.iter().try_for_each(|&q| check_quantile(q))?;
        self.check_width(x)?;

        let per_row = |i: usize| -> Vec<f64> {
            let pooled = self.leaf_values(x.row(i));
            quantiles
                .iter()
                .map(|&q| quantile_sorted(&pooled, q))
                .collect()
        };

        #[cfg(not(feature = "use-rayon"))]
        let rows: Vec<Vec<f64>> = (0..x.nrows()).map(per_row).collect();

        #[cfg(feature = "use-rayon")]
        let rows: Vec<Vec<f64>> = (0..x.nrows()).into_par_iter().map(per_row).collect();

        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((x.nrows(), quantiles.len()), flat)
            .map_err(|e| Error::fit(Stage::Forest, e.to_string()))
    }

    fn check_width(&self, x: ArrayView2<f64>) -> Result<()> {
        if x.ncols() != self.n_features {
            return Err(Error::input(
                Stage::Forest,
                format!(
                    "model expects {} features, query has {}",
                    self.n_features,
                    x.ncols()
                ),
            ));
        }
        Ok(())
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let toml_string = toml::to_string(self)?;
        fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let toml_string = fs::read_to_string(path)?;
        Ok(toml::from_str(&toml_string)?)
    }
}

impl FittedModel for QuantileForest {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        x.axis_iter(Axis(0))
            .map(|row| self.predict_mean_row(row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_data::{linear_signal, setup_data_hardcoded};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_model_fit_beats_mean() {
        let (x, y) = linear_signal(120, 3, 0.1, 5);
        let mut rng = StdRng::seed_from_u64(42);
        let params = QrfParamsBuilder::new().n_trees(60).build();
        let (fit_result, _) = fit(x.view(), y.view(), &params, &mut rng).unwrap();
        let mean = y.mean().unwrap();
        let base_err = (&y - mean).pow2().mean().unwrap();
        assert!(
            fit_result.err < base_err,
            "OOB error {} is not less than mean error {}",
            fit_result.err,
            base_err
        );
    }

    #[test]
    fn test_quantiles_are_ordered() {
        let (x, y) = linear_signal(100, 2, 0.5, 11);
        let mut rng = StdRng::seed_from_u64(1);
        let params = QrfParamsBuilder::new().n_trees(40).build();
        let (_, forest) = fit(x.view(), y.view(), &params, &mut rng).unwrap();
        let q = forest.predict_quantiles(x.view(), &[0.05, 0.5, 0.95]).unwrap();
        for row in q.axis_iter(Axis(0)) {
            assert!(row[0] <= row[1] && row[1] <= row[2]);
        }
    }

    #[test]
    fn test_singleton_leaves_return_own_response() {
        let (x, y) = setup_data_hardcoded();
        let params = QrfParamsBuilder::new()
            .n_trees(10)
            .min_node_size(1)
            .sample_fraction(1.0)
            .build();
        let mut rng = StdRng::seed_from_u64(9);
        let (_, forest) = fit(x.view(), y.view(), &params, &mut rng).unwrap();
        for i in 0..y.len() {
            let median = forest.predict_quantile_row(x.row(i), 0.5).unwrap();
            assert_eq!(median, y[i]);
        }
    }

    #[test]
    fn test_rejects_invalid_quantile_and_width() {
        let (x, y) = setup_data_hardcoded();
        let mut rng = StdRng::seed_from_u64(0);
        let params = QrfParamsBuilder::new().n_trees(3).build();
        let (_, forest) = fit(x.view(), y.view(), &params, &mut rng).unwrap();
        assert!(forest.predict_quantile_row(x.row(0), 1.0).is_err());
        assert!(forest.predict_quantiles(x.view(), &[0.0]).is_err());
        let narrow = x.slice(ndarray::s![.., ..1]);
        assert!(forest.predict_quantiles(narrow, &[0.5]).is_err());
    }

    #[test]
    fn test_save_and_load_preserves_predictions() {
        let (x, y) = linear_signal(40, 2, 0.2, 3);
        let mut rng = StdRng::seed_from_u64(5);
        let params = QrfParamsBuilder::new().n_trees(5).build();
        let (_, forest) = fit(x.view(), y.view(), &params, &mut rng).unwrap();
        let forest = forest.with_feature_names(vec!["a".into(), "b".into()]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        forest.save(&path).unwrap();
        let loaded = QuantileForest::load(&path).unwrap();

        assert_eq!(loaded.feature_names(), forest.feature_names());
        let a = forest.predict_quantiles(x.view(), &[0.5]).unwrap();
        let b = loaded.predict_quantiles(x.view(), &[0.5]).unwrap();
        assert_eq!(a, b);
    }
}
