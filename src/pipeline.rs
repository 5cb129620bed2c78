//! End-to-end run: screening, de-correlation, spatial blocking, forward selection, gridded
//! quantile prediction and the area of applicability.
//!
//! Every stage draws its own seed from one generator seeded with `random_seed`, so repeated
//! runs over the same inputs are identical.

use ndarray::Array1;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::applicability::{estimate_applicability, Applicability, ApplicabilityParams};
use crate::blocking::{assign_folds, block_size_from_range, FoldAssignment};
use crate::config::{BlockShape, PipelineConfig, ThresholdMethod};
use crate::data::{CovariateGrid, ObservationTable};
use crate::error::{Error, Result, Stage, Warning};
use crate::forest::{ImportanceMode, QrfParams, QuantileForest};
use crate::prediction::{predict_cells, GridPrediction};
use crate::redundancy::{reduce, RedundancyParams, RedundancyResult};
use crate::screening::{screen, ScreeningParams, ScreeningResult};
use crate::selection::{forward_select, SelectionParams, SelectionResult};
use crate::stats::r_squared;
use crate::variogram::{estimate_range, DependenceEstimate, DependenceParams, LambdaGrid};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationSummary {
    pub n_observations: usize,
    pub predictors: Vec<String>,
    pub mtry: usize,
    pub range: f64,
    pub block_size: f64,
    pub block_shape: BlockShape,
    pub n_folds: usize,
    /// Mean of the per-fold R² that drove the selection.
    pub cv_r2: f64,
    /// Scores of the pooled out-of-fold predictions.
    pub mse: f64,
    pub rmse: f64,
    pub r2: f64,
    pub applicability_threshold: f64,
    pub percent_in_domain: f64,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub predictors: Vec<String>,
    pub model: QuantileForest,
    pub screening: ScreeningResult,
    /// Absent when screening confirmed a single predictor.
    pub redundancy: Option<RedundancyResult>,
    /// Absent when the configured manual range replaced a failed variogram fit.
    pub dependence: Option<DependenceEstimate>,
    pub folds: FoldAssignment,
    pub selection: SelectionResult,
    pub prediction: GridPrediction,
    pub applicability: Applicability,
    pub summary: ValidationSummary,
}

struct StageSeeds {
    screening: u64,
    variogram: u64,
    blocking: u64,
    selection: u64,
    final_forest: u64,
}

impl StageSeeds {
    fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self {
            screening: rng.gen(),
            variogram: rng.gen(),
            blocking: rng.gen(),
            selection: rng.gen(),
            final_forest: rng.gen(),
        }
    }
}

impl PipelineConfig {
    fn screening_params(&self) -> ScreeningParams {
        ScreeningParams {
            significance: self.boruta_significance,
            max_runs: self.boruta_max_iterations,
            n_trees: self.boruta_trees,
            importance: self.boruta_importance,
        }
    }

    fn redundancy_params(&self) -> RedundancyParams {
        RedundancyParams {
            initial_threshold: self.initial_correlation_threshold,
            vif_ceiling: self.vif_ceiling,
            step: self.vif_threshold_step,
        }
    }

    fn dependence_params(&self) -> DependenceParams {
        DependenceParams {
            min_observations: self.min_observations_for_variogram,
            n_bins: self.variogram_bins,
            max_transform_sample: self.max_transform_sample,
            lambda_grid: LambdaGrid {
                start: self.lambda_start,
                end: self.lambda_end,
                step: self.lambda_step,
            },
        }
    }

    fn selection_params(&self, seeds: &StageSeeds) -> SelectionParams {
        let mut final_forest = self.forest.clone();
        if final_forest.importance == ImportanceMode::None {
            final_forest.importance = ImportanceMode::Permutation;
        }
        SelectionParams {
            mtry_candidates: self.mtry_candidates.clone(),
            search_forest: QrfParams {
                n_trees: self.selection_trees,
                importance: ImportanceMode::None,
                ..self.forest.clone()
            },
            final_forest,
            search_seed: seeds.selection,
            final_seed: seeds.final_forest,
        }
    }
}

/// Covariates present both in the observations and as grid layers.
fn shared_covariates(observations: &ObservationTable, grid: &CovariateGrid) -> Vec<String> {
    let (shared, missing): (Vec<String>, Vec<String>) = observations
        .names()
        .iter()
        .cloned()
        .partition(|n| grid.names().contains(n));
    if !missing.is_empty() {
        log::warn!("Covariates without a grid layer are not used: {:?}", missing);
    }
    shared
}

fn spatial_range(
    observations: &ObservationTable,
    config: &PipelineConfig,
    seed: u64,
    warnings: &mut Vec<Warning>,
) -> Result<(f64, Option<DependenceEstimate>)> {
    match estimate_range(
        observations.coords(),
        observations.response(),
        &config.dependence_params(),
        seed,
    ) {
        Ok(estimate) => {
            warnings.extend(estimate.warnings.iter().cloned());
            Ok((estimate.range, Some(estimate)))
        }
        Err(err @ Error::Fit { .. }) => match config.manual_range {
            Some(range) => {
                warnings.push(Warning::insufficient_data(
                    Stage::SpatialDependence,
                    format!("{err}; using manual range {range}"),
                ));
                Ok((range, None))
            }
            None => Err(err),
        },
        Err(err) => Err(err),
    }
}

/// Pooled MSE, RMSE and R² over the observations that received an out-of-fold prediction.
fn pooled_scores(y: &Array1<f64>, oof: &Array1<f64>) -> (f64, f64, f64) {
    let rows: Vec<usize> = (0..y.len()).filter(|&i| oof[i].is_finite()).collect();
    let y_scored: Array1<f64> = rows.iter().map(|&i| y[i]).collect();
    let p_scored: Array1<f64> = rows.iter().map(|&i| oof[i]).collect();
    let mse = (&y_scored - &p_scored).pow2().mean().unwrap_or(f64::NAN);
    (mse, mse.sqrt(), r_squared(y_scored.view(), p_scored.view()))
}

/// Runs every stage and assembles the outputs. Nothing is returned unless all stages succeed.
pub fn run(
    observations: &ObservationTable,
    grid: &CovariateGrid,
    config: &PipelineConfig,
) -> Result<PipelineOutput> {
    config.validate()?;
    let seeds = StageSeeds::from_seed(config.random_seed);
    let mut warnings = Vec::new();

    let observations = match config.depth_interval_bounds {
        Some((lower, upper)) => {
            if observations.depth().is_none() {
                return Err(Error::configuration(
                    Stage::Input,
                    "depth_interval_bounds is set but the observations carry no depth",
                ));
            }
            let kept = observations.within_depth(lower, upper);
            log::info!(
                "Kept {} of {} observations within depth [{}, {}]",
                kept.len(),
                observations.len(),
                lower,
                upper
            );
            kept
        }
        None => observations.clone(),
    };
    if observations.len() < config.cv_fold_count {
        return Err(Error::configuration(
            Stage::Blocking,
            format!(
                "{} observations cannot fill {} folds",
                observations.len(),
                config.cv_fold_count
            ),
        ));
    }
    let y = observations.response().to_owned();

    let candidates = shared_covariates(&observations, grid);
    let x_candidates = observations.select(&candidates)?;
    let screening = screen(
        &candidates,
        x_candidates.view(),
        y.view(),
        &config.screening_params(),
        seeds.screening,
    )?;
    let confirmed = screening.confirmed();
    if confirmed.is_empty() {
        return Err(Error::fit(
            Stage::Screening,
            "no covariate was confirmed as more informative than noise",
        ));
    }

    let (predictors, redundancy) = if confirmed.len() > 1 {
        let x_confirmed = observations.select(&confirmed)?;
        let result = reduce(&confirmed, x_confirmed.view(), &config.redundancy_params())?;
        (result.retained.clone(), Some(result))
    } else {
        log::info!("Single confirmed covariate, skipping redundancy reduction");
        (confirmed, None)
    };

    let (range, dependence) = spatial_range(&observations, config, seeds.variogram, &mut warnings)?;
    let block_size = block_size_from_range(range, config.block_size_multiplier);
    let folds = assign_folds(
        observations.coords(),
        config.cv_fold_count,
        block_size,
        config.block_shape,
        seeds.blocking,
    )?;

    let x_predictors = observations.select(&predictors)?;
    let selection = forward_select(
        &predictors,
        x_predictors.view(),
        y.view(),
        &folds,
        &config.selection_params(&seeds),
    )?;
    warnings.extend(selection.warnings.iter().cloned());

    let (grid_x, cells) = grid.feature_matrix(&selection.selected)?;
    if cells.is_empty() {
        return Err(Error::input(
            Stage::Prediction,
            "no grid cell has valid values for every selected predictor",
        ));
    }
    let prediction = predict_cells(
        &selection.model,
        grid_x.view(),
        &cells,
        grid.geometry(),
        &config.quantile_levels_for_output,
    )?;

    let importance = selection.model.importance().ok_or_else(|| {
        Error::fit(Stage::Applicability, "final model carries no importance")
    })?;
    let train_selected = observations.select(&selection.selected)?;
    let residuals = &y - &selection.oof_predictions;
    let applicability = estimate_applicability(
        train_selected.view(),
        importance,
        &folds,
        grid_x.view(),
        &cells,
        grid.geometry(),
        &ApplicabilityParams {
            method: config.applicability_threshold,
            cv_residuals: match config.applicability_threshold {
                ThresholdMethod::ErrorKnee => Some(residuals.view()),
                ThresholdMethod::Whisker => None,
            },
        },
    )?;

    let (mse, rmse, r2) = pooled_scores(&y, &selection.oof_predictions);
    let summary = ValidationSummary {
        n_observations: observations.len(),
        predictors: selection.selected.clone(),
        mtry: selection.mtry,
        range,
        block_size,
        block_shape: config.block_shape,
        n_folds: folds.k(),
        cv_r2: selection.cv_r2,
        mse,
        rmse,
        r2,
        applicability_threshold: applicability.threshold,
        percent_in_domain: applicability.percent_in_domain(),
        warnings,
    };
    log::info!(
        "Validation: RMSE {:.4}, R² {:.4}, {:.1}% of the grid in domain",
        summary.rmse,
        summary.r2,
        summary.percent_in_domain
    );

    Ok(PipelineOutput {
        predictors: selection.selected.clone(),
        model: selection.model.clone(),
        screening,
        redundancy,
        dependence,
        folds,
        selection,
        prediction,
        applicability,
        summary,
    })
}
