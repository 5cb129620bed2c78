//! Correlation and variance-inflation based removal of redundant predictors.
//!
//! The correlation threshold is lowered in fixed steps until every retained predictor has a
//! variance inflation factor under the ceiling. The greedy pass resolves pairs from the
//! strongest correlation down, so the largest retained |r| never grows as the threshold drops.

use itertools::Itertools;
use ndarray::{Array2, ArrayView2, Axis};
use ndarray_linalg::Inverse;

use crate::error::{Error, Result, Stage};
use crate::stats::correlation_matrix;

#[derive(Debug, Clone)]
pub struct RedundancyParams {
    pub initial_threshold: f64,
    pub vif_ceiling: f64,
    pub step: f64,
}

impl Default for RedundancyParams {
    fn default() -> Self {
        Self {
            initial_threshold: 1.0,
            vif_ceiling: 2.5,
            step: 0.01,
        }
    }
}

impl RedundancyParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.initial_threshold > 0.0 && self.initial_threshold <= 1.0) {
            return Err(Error::configuration(
                Stage::Redundancy,
                format!(
                    "initial correlation threshold must lie in (0, 1], got {}",
                    self.initial_threshold
                ),
            ));
        }
        if !(self.vif_ceiling >= 1.0) {
            return Err(Error::configuration(
                Stage::Redundancy,
                format!("VIF ceiling must be at least 1, got {}", self.vif_ceiling),
            ));
        }
        if !(self.step > 0.0 && self.step < 1.0) {
            return Err(Error::configuration(
                Stage::Redundancy,
                format!("threshold step must lie in (0, 1), got {}", self.step),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdAttempt {
    pub threshold: f64,
    pub max_abs_correlation: f64,
    pub max_vif: f64,
}

#[derive(Debug, Clone)]
pub struct RedundancyResult {
    pub retained: Vec<String>,
    /// Pairwise correlations among the retained predictors.
    pub correlation: Array2<f64>,
    pub threshold: f64,
    pub max_vif: f64,
    pub trace: Vec<ThresholdAttempt>,
}

/// Greedy correlation filter. Of each pair above `threshold`, strongest first, the member with
/// the larger mean |r| against all other predictors is dropped. Returns the retained column
/// indices in their original order.
pub fn correlation_filter(corr: &Array2<f64>, threshold: f64) -> Vec<usize> {
    let p = corr.nrows();
    let mean_abs: Vec<f64> = (0..p)
        .map(|i| {
            let others = (0..p).filter(|&k| k != i);
            let sum: f64 = others.map(|k| corr[[i, k]].abs()).sum();
            if p > 1 {
                sum / (p - 1) as f64
            } else {
                0.0
            }
        })
        .collect();

    let mut retained: Vec<usize> = (0..p).collect();
    loop {
        let worst = retained
            .iter()
            .copied()
            .tuple_combinations()
            .map(|(i, j)| (i, j, corr[[i, j]].abs()))
            .filter(|&(_, _, r)| r > threshold)
            .fold(None, |best: Option<(usize, usize, f64)>, cand| match best {
                Some(b) if b.2 >= cand.2 => Some(b),
                _ => Some(cand),
            });
        let Some((i, j, _)) = worst else {
            return retained;
        };
        let drop = if mean_abs[i] > mean_abs[j] { i } else { j };
        retained.retain(|&k| k != drop);
    }
}

fn submatrix(corr: &Array2<f64>, idx: &[usize]) -> Array2<f64> {
    corr.select(Axis(0), idx).select(Axis(1), idx)
}

/// Variance inflation factors from the diagonal of the inverse correlation matrix. A singular
/// matrix gives infinite factors.
pub fn variance_inflation(corr: &Array2<f64>) -> Vec<f64> {
    match corr.nrows() {
        0 => Vec::new(),
        1 => vec![1.0],
        p => match corr.inv() {
            Ok(inv) => inv
                .diag()
                .iter()
                .map(|&v| if v.is_finite() && v > 0.0 { v } else { f64::INFINITY })
                .collect(),
            Err(e) => {
                log::debug!("Correlation matrix of {p} predictors is singular: {e}");
                vec![f64::INFINITY; p]
            }
        },
    }
}

fn max_off_diagonal(corr: &Array2<f64>) -> f64 {
    (0..corr.nrows())
        .tuple_combinations()
        .map(|(i, j)| corr[[i, j]].abs())
        .fold(0.0, f64::max)
}

pub fn reduce(
    names: &[String],
    x: ArrayView2<f64>,
    params: &RedundancyParams,
) -> Result<RedundancyResult> {
    if names.len() != x.ncols() {
        return Err(Error::input(
            Stage::Redundancy,
            format!("{} names for {} covariate columns", names.len(), x.ncols()),
        ));
    }
    if names.len() < 2 {
        return Err(Error::input(
            Stage::Redundancy,
            format!("need at least 2 predictors, got {}", names.len()),
        ));
    }

    params.validate()?;

    let corr = correlation_matrix(x);
    let max_attempts = (params.initial_threshold / params.step).ceil() as usize + 1;
    let mut trace = Vec::with_capacity(max_attempts);

    for attempt in 0..max_attempts {
        let threshold = params.initial_threshold - attempt as f64 * params.step;
        let retained = correlation_filter(&corr, threshold);
        let retained_corr = submatrix(&corr, &retained);
        let max_vif = variance_inflation(&retained_corr)
            .into_iter()
            .fold(0.0, |m: f64, v| if v.is_nan() { f64::INFINITY } else { m.max(v) });
        let max_abs_correlation = max_off_diagonal(&retained_corr);
        trace.push(ThresholdAttempt {
            threshold,
            max_abs_correlation,
            max_vif,
        });
        log::debug!(
            "Threshold {:.2}: {} retained, max |r| {:.3}, max VIF {:.3}",
            threshold,
            retained.len(),
            max_abs_correlation,
            max_vif
        );

        if max_vif <= params.vif_ceiling {
            let retained_names: Vec<String> = retained.iter().map(|&j| names[j].clone()).collect();
            log::info!(
                "Kept {} of {} predictors at correlation threshold {:.2} (max VIF {:.3})",
                retained_names.len(),
                names.len(),
                threshold,
                max_vif
            );
            return Ok(RedundancyResult {
                retained: retained_names,
                correlation: retained_corr,
                threshold,
                max_vif,
                trace,
            });
        }
    }

    Err(Error::fit(
        Stage::Redundancy,
        format!(
            "no correlation threshold down to {:.2} brought the max VIF under {}",
            params.initial_threshold - (max_attempts - 1) as f64 * params.step,
            params.vif_ceiling
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::{rngs::StdRng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn names(p: usize) -> Vec<String> {
        (0..p).map(|j| format!("c{j}")).collect()
    }

    /// Columns 0 and 1 nearly collinear, the rest independent noise.
    fn near_duplicate_pair(n: usize, p: usize, seed: u64) -> Array2<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut x = Array2::from_shape_fn((n, p), |_| normal.sample(&mut rng));
        for i in 0..n {
            x[[i, 1]] = x[[i, 0]] + 0.1 * normal.sample(&mut rng);
        }
        x
    }

    #[test]
    fn test_vif_of_independent_columns_is_one() {
        let vif = variance_inflation(&Array2::eye(3));
        for v in vif {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-12);
        }
        assert_eq!(variance_inflation(&array![[1.0]]), vec![1.0]);
        // Two predictors: VIF = 1 / (1 - r^2).
        let pair = variance_inflation(&array![[1.0, 0.6], [0.6, 1.0]]);
        for v in pair {
            assert_abs_diff_eq!(v, 1.0 / (1.0 - 0.36), epsilon = 1e-10);
        }
        let singular = array![[1.0, 1.0], [1.0, 1.0]];
        assert!(variance_inflation(&singular).iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_filter_drops_more_correlated_member() {
        let corr = array![[1.0, 0.9, 0.5], [0.9, 1.0, 0.1], [0.5, 0.1, 1.0]];
        assert_eq!(correlation_filter(&corr, 0.95), vec![0, 1, 2]);
        assert_eq!(correlation_filter(&corr, 0.8), vec![1, 2]);
    }

    #[test]
    fn test_keeps_exactly_one_of_collinear_pair() {
        let x = near_duplicate_pair(300, 5, 8);
        let result = reduce(&names(5), x.view(), &RedundancyParams::default()).unwrap();
        let pair_kept = result
            .retained
            .iter()
            .filter(|n| *n == "c0" || *n == "c1")
            .count();
        assert_eq!(pair_kept, 1);
        for other in ["c2", "c3", "c4"] {
            assert!(result.retained.iter().any(|n| n == other));
        }
        assert!(result.max_vif <= 2.5);
    }

    #[test]
    fn test_trace_correlation_is_non_increasing() {
        let x = near_duplicate_pair(200, 6, 21);
        let result = reduce(&names(6), x.view(), &RedundancyParams::default()).unwrap();
        assert!(result.trace.len() > 1);
        for pair in result.trace.windows(2) {
            assert!(pair[1].threshold < pair[0].threshold);
            assert!(pair[1].max_abs_correlation <= pair[0].max_abs_correlation);
        }
        assert_eq!(result.trace.last().unwrap().max_vif, result.max_vif);
    }

    #[test]
    fn test_filter_ranks_by_correlation_with_all_predictors() {
        // Column 0 goes first. Against the remaining columns 3 would look worse than 2,
        // against all columns 2 is worse.
        let corr = array![
            [1.0, 0.95, 0.8, 0.0],
            [0.95, 1.0, 0.0, 0.7],
            [0.8, 0.0, 1.0, 0.9],
            [0.0, 0.7, 0.9, 1.0]
        ];
        assert_eq!(correlation_filter(&corr, 0.85), vec![1, 3]);
    }

    #[test]
    fn test_invalid_params_are_configuration_errors() {
        let x = near_duplicate_pair(50, 3, 2);
        let invalid = [
            RedundancyParams {
                step: 0.0,
                ..Default::default()
            },
            RedundancyParams {
                step: f64::NAN,
                ..Default::default()
            },
            RedundancyParams {
                initial_threshold: 1.5,
                ..Default::default()
            },
            RedundancyParams {
                vif_ceiling: 0.5,
                ..Default::default()
            },
        ];
        for params in &invalid {
            assert!(
                matches!(
                    reduce(&names(3), x.view(), params),
                    Err(Error::Configuration {
                        stage: Stage::Redundancy,
                        ..
                    })
                ),
                "{params:?} was accepted"
            );
        }
    }

    #[test]
    fn test_undefined_correlation_is_fit_error() {
        let mut x = near_duplicate_pair(100, 3, 2);
        x[[5, 2]] = f64::NAN;
        assert!(matches!(
            reduce(&names(3), x.view(), &RedundancyParams::default()),
            Err(Error::Fit {
                stage: Stage::Redundancy,
                ..
            })
        ));
    }

    #[test]
    fn test_single_predictor_is_input_error() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        assert!(matches!(
            reduce(&names(1), x.view(), &RedundancyParams::default()),
            Err(Error::Input { .. })
        ));
    }
}
