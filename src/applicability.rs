//! Area of applicability.
//!
//! Predictors are standardised and weighted by model importance. The dissimilarity index (DI)
//! of a location is its distance to the nearest training observation in that space, divided
//! by the mean distance between training observations. Locations whose DI exceeds what is
//! seen in cross-validation are outside the model's area of applicability.

use itertools::Itertools;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::blocking::FoldAssignment;
use crate::config::ThresholdMethod;
use crate::data::{GridGeometry, Raster};
use crate::error::{Error, Result, Stage};
use crate::stats::{column_scaling, quantile};

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

/// Weighted, standardised training space.
#[derive(Debug, Clone)]
pub struct DissimilarityModel {
    means: Vec<f64>,
    sds: Vec<f64>,
    weights: Vec<f64>,
    train: Array2<f64>,
    mean_distance: f64,
}

/// Negative importances count as zero; the rest are scaled by their maximum.
pub fn importance_weights(importance: &[f64]) -> Vec<f64> {
    let clipped: Vec<f64> = importance
        .iter()
        .map(|&v| if v.is_finite() { v.max(0.0) } else { 0.0 })
        .collect();
    let max = clipped.iter().copied().fold(0.0, f64::max);
    if max > 0.0 {
        clipped.iter().map(|v| v / max).collect()
    } else {
        vec![1.0; importance.len()]
    }
}

fn distance(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(u, v)| (u - v).powi(2))
        .sum::<f64>()
        .sqrt()
}

impl DissimilarityModel {
    pub fn fit(train_x: ArrayView2<f64>, importance: &[f64]) -> Result<Self> {
        if importance.len() != train_x.ncols() {
            return Err(Error::input(
                Stage::Applicability,
                format!(
                    "{} importance values for {} predictors",
                    importance.len(),
                    train_x.ncols()
                ),
            ));
        }
        if train_x.nrows() < 2 {
            return Err(Error::input(
                Stage::Applicability,
                "need at least 2 training observations",
            ));
        }
        let (means, sds) = column_scaling(train_x);
        let weights = importance_weights(importance);
        let mut model = Self {
            means,
            sds,
            weights,
            train: Array2::zeros((0, train_x.ncols())),
            mean_distance: f64::NAN,
        };
        model.train = model.transform(train_x);

        let n = model.train.nrows();
        let total: f64 = (0..n)
            .tuple_combinations()
            .map(|(i, j)| distance(model.train.row(i), model.train.row(j)))
            .sum();
        model.mean_distance = total / (n * (n - 1) / 2) as f64;
        if !(model.mean_distance.is_finite() && model.mean_distance > 0.0) {
            return Err(Error::fit(
                Stage::Applicability,
                "training observations coincide in the weighted predictor space",
            ));
        }
        Ok(model)
    }

    pub fn mean_distance(&self) -> f64 {
        self.mean_distance
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    fn transform(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut scaled = x.to_owned();
        for (j, mut col) in scaled.axis_iter_mut(Axis(1)).enumerate() {
            let (m, s, w) = (self.means[j], self.sds[j], self.weights[j]);
            col.mapv_inplace(|v| (v - m) / s * w);
        }
        scaled
    }

    fn nearest<F: Fn(usize) -> bool>(&self, row: ArrayView1<f64>, admit: F) -> f64 {
        self.train
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(i, _)| admit(*i))
            .map(|(_, t)| distance(row, t))
            .fold(f64::INFINITY, f64::min)
    }

    /// DI of each query row against every training observation.
    pub fn dissimilarity(&self, query: ArrayView2<f64>) -> Array1<f64> {
        let scaled = self.transform(query);
        let di_of = |i: usize| self.nearest(scaled.row(i), |_| true) / self.mean_distance;

        #[cfg(not(feature = "use-rayon"))]
        let values: Vec<f64> = (0..scaled.nrows()).map(di_of).collect();

        #[cfg(feature = "use-rayon")]
        let values: Vec<f64> = (0..scaled.nrows()).into_par_iter().map(di_of).collect();

        Array1::from(values)
    }

    /// DI of each training observation against the training observations of other folds.
    pub fn training_dissimilarity(&self, folds: &FoldAssignment) -> Array1<f64> {
        Array1::from_shape_fn(self.train.nrows(), |i| {
            let own = folds.fold_of(i);
            self.nearest(self.train.row(i), |j| folds.fold_of(j) != own) / self.mean_distance
        })
    }
}

/// Largest training DI inside the upper boxplot whisker `Q3 + 1.5 IQR`.
pub fn whisker_threshold(training_di: &[f64]) -> f64 {
    let q1 = quantile(training_di, 0.25);
    let q3 = quantile(training_di, 0.75);
    let upper = q3 + 1.5 * (q3 - q1);
    training_di
        .iter()
        .copied()
        .filter(|&d| d <= upper)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// DI at the knee of the running-mean absolute CV error plotted against training DI: the point
/// lying furthest below the chord joining the ends of the normalised curve.
pub fn error_knee_threshold(training_di: &[f64], cv_residuals: &[f64]) -> Option<f64> {
    let mut pairs: Vec<(f64, f64)> = training_di
        .iter()
        .zip(cv_residuals)
        .filter(|(d, r)| d.is_finite() && r.is_finite())
        .map(|(&d, &r)| (d, r.abs()))
        .collect();
    if pairs.len() < 3 {
        return None;
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    let n = pairs.len();
    let half = (n / 20).max(1);
    let smoothed: Vec<f64> = (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            pairs[lo..hi].iter().map(|p| p.1).sum::<f64>() / (hi - lo) as f64
        })
        .collect();

    let (d0, d1) = (pairs[0].0, pairs[n - 1].0);
    let (e_min, e_max) = smoothed
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !(d1 > d0 && e_max > e_min) {
        return None;
    }
    let (e0, e1) = (
        (smoothed[0] - e_min) / (e_max - e_min),
        (smoothed[n - 1] - e_min) / (e_max - e_min),
    );

    let (knee, gap) = (0..n)
        .map(|i| {
            let t = (pairs[i].0 - d0) / (d1 - d0);
            let e = (smoothed[i] - e_min) / (e_max - e_min);
            let chord = e0 + t * (e1 - e0);
            (i, chord - e)
        })
        .fold((0, f64::NEG_INFINITY), |best, cand| if cand.1 > best.1 { cand } else { best });
    (gap > 0.0).then(|| pairs[knee].0)
}

#[derive(Debug, Clone)]
pub struct Applicability {
    pub dissimilarity: Raster,
    /// 1 inside the area of applicability, 0 outside, `NaN` for nodata.
    pub mask: Raster,
    pub threshold: f64,
    pub training_di: Array1<f64>,
}

impl Applicability {
    /// Share of valid cells inside the area of applicability, in percent.
    pub fn percent_in_domain(&self) -> f64 {
        let valid = self.mask.valid_count();
        if valid == 0 {
            return f64::NAN;
        }
        let inside = self.mask.values.iter().filter(|&&v| v == 1.0).count();
        100.0 * inside as f64 / valid as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ApplicabilityParams<'a> {
    pub method: ThresholdMethod,
    /// Absolute-error source for the error-knee threshold, one per training observation.
    pub cv_residuals: Option<ArrayView1<'a, f64>>,
}

/// Computes the DI raster and the applicability mask over the valid grid `cells`, whose
/// predictor values are the rows of `grid_x`.
pub fn estimate_applicability(
    train_x: ArrayView2<f64>,
    importance: &[f64],
    folds: &FoldAssignment,
    grid_x: ArrayView2<f64>,
    cells: &[(usize, usize)],
    geometry: GridGeometry,
    params: &ApplicabilityParams,
) -> Result<Applicability> {
    if folds.len() != train_x.nrows() {
        return Err(Error::input(
            Stage::Applicability,
            format!(
                "folds cover {} observations, training data has {}",
                folds.len(),
                train_x.nrows()
            ),
        ));
    }
    if grid_x.nrows() != cells.len() || grid_x.ncols() != train_x.ncols() {
        return Err(Error::input(
            Stage::Applicability,
            format!(
                "grid features of shape {:?} do not match {} cells and {} predictors",
                grid_x.shape(),
                cells.len(),
                train_x.ncols()
            ),
        ));
    }

    let model = DissimilarityModel::fit(train_x, importance)?;
    let training_di = model.training_dissimilarity(folds);
    let di_values = training_di.to_vec();

    let threshold = match params.method {
        ThresholdMethod::Whisker => whisker_threshold(&di_values),
        ThresholdMethod::ErrorKnee => {
            let residuals = params.cv_residuals.ok_or_else(|| {
                Error::configuration(
                    Stage::Applicability,
                    "error-knee threshold needs cross-validation residuals",
                )
            })?;
            match error_knee_threshold(&di_values, &residuals.to_vec()) {
                Some(t) => t,
                None => {
                    log::warn!("No error knee found, using the whisker threshold instead");
                    whisker_threshold(&di_values)
                }
            }
        }
    };

    let grid_di = model.dissimilarity(grid_x);
    let mask_values: Vec<f64> = grid_di
        .iter()
        .map(|&d| if d <= threshold { 1.0 } else { 0.0 })
        .collect();
    let applicability = Applicability {
        dissimilarity: Raster::from_cells(geometry, cells, &grid_di.to_vec()),
        mask: Raster::from_cells(geometry, cells, &mask_values),
        threshold,
        training_di,
    };
    log::info!(
        "Applicability threshold {:.4}; {:.1}% of {} valid cells in domain",
        threshold,
        applicability.percent_in_domain(),
        cells.len()
    );
    Ok(applicability)
}
