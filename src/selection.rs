//! Forward feature selection coupled to mtry tuning.
//!
//! Every candidate predictor set is paired with every admissible mtry and scored by the mean
//! R² over spatial cross-validation folds. The search grows the set one predictor at a time
//! and stops as soon as the best addition fails to strictly improve the score.

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand::{rngs::StdRng, SeedableRng};

use crate::blocking::FoldAssignment;
use crate::error::{Error, Result, Stage, Warning};
use crate::forest::{fit, QrfParams, QuantileForest};
use crate::stats::r_squared;
use crate::FitResult;

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct SelectionParams {
    pub mtry_candidates: Vec<usize>,
    /// Forest used to score candidates; its `mtry` is overridden per evaluation.
    pub search_forest: QrfParams,
    /// Forest refitted on all observations with the winning predictors.
    pub final_forest: QrfParams,
    pub search_seed: u64,
    pub final_seed: u64,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            mtry_candidates: vec![1, 2, 3],
            search_forest: QrfParams {
                n_trees: 200,
                ..Default::default()
            },
            final_forest: QrfParams::default(),
            search_seed: 0,
            final_seed: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub step: usize,
    /// Predictor added by the best candidate of the step.
    pub added: String,
    pub mtry: usize,
    pub score: f64,
    pub n_evaluated: usize,
    pub adopted: bool,
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub selected: Vec<String>,
    pub mtry: usize,
    pub cv_r2: f64,
    /// R² per fold for the winning configuration; `None` for folds that could not be scored.
    pub fold_r2: Vec<Option<f64>>,
    /// Out-of-fold predictions of the winning configuration, `NaN` where unscored.
    pub oof_predictions: Array1<f64>,
    pub trace: Vec<StepRecord>,
    pub warnings: Vec<Warning>,
    pub model: QuantileForest,
    pub final_fit: FitResult,
}

#[derive(Debug, Clone)]
struct Evaluation {
    subset: Vec<usize>,
    mtry: usize,
    score: f64,
    fold_r2: Vec<Option<f64>>,
    oof: Array1<f64>,
}

/// mtry values tried for a subset of `size` predictors, ascending.
pub fn admissible_mtry(candidates: &[usize], size: usize) -> Vec<usize> {
    let mut values: Vec<usize> = candidates
        .iter()
        .copied()
        .filter(|&m| m >= 1 && m <= size)
        .collect();
    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        values.push(size);
    }
    values
}

/// Folds that can be scored at all. Each unusable fold is reported once.
fn usable_folds(folds: &FoldAssignment, y: ArrayView1<f64>) -> (Vec<bool>, Vec<Warning>) {
    let mut warnings = Vec::new();
    let usable = folds
        .folds()
        .iter()
        .enumerate()
        .map(|(f, fold)| {
            let reason = if fold.train.len() < 2 {
                Some(format!("{} training rows", fold.train.len()))
            } else if fold.validation.len() < 2 {
                Some(format!("{} validation rows", fold.validation.len()))
            } else {
                let val = y.select(Axis(0), &fold.validation);
                let m = val.mean().unwrap_or(0.0);
                let sst = val.mapv(|v| (v - m).powi(2)).sum();
                (sst <= f64::EPSILON).then(|| "constant validation response".to_string())
            };
            match reason {
                Some(r) => {
                    warnings.push(Warning::insufficient_data(
                        Stage::Selection,
                        format!("fold {f} excluded from scoring: {r}"),
                    ));
                    false
                }
                None => true,
            }
        })
        .collect();
    (usable, warnings)
}

fn evaluate(
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    folds: &FoldAssignment,
    usable: &[bool],
    subset: &[usize],
    mtry: usize,
    params: &SelectionParams,
) -> Result<Option<Evaluation>> {
    let forest_params = QrfParams {
        mtry: Some(mtry),
        ..params.search_forest.clone()
    };
    let xs = x.select(Axis(1), subset);
    let mut oof = Array1::from_elem(y.len(), f64::NAN);
    let mut fold_r2 = vec![None; folds.k()];

    for (f, fold) in folds.folds().iter().enumerate() {
        if !usable[f] {
            continue;
        }
        let x_train = xs.select(Axis(0), &fold.train);
        let y_train = y.select(Axis(0), &fold.train);
        let x_val = xs.select(Axis(0), &fold.validation);
        let y_val = y.select(Axis(0), &fold.validation);

        let mut rng = StdRng::seed_from_u64(params.search_seed);
        let (_, forest) = fit(x_train.view(), y_train.view(), &forest_params, &mut rng)?;
        let pred = forest.predict_quantiles(x_val.view(), &[0.5])?.column(0).to_owned();
        for (&obs, &p) in fold.validation.iter().zip(pred.iter()) {
            oof[obs] = p;
        }
        let r2 = r_squared(y_val.view(), pred.view());
        if r2.is_finite() {
            fold_r2[f] = Some(r2);
        }
    }

    let scored: Vec<f64> = fold_r2.iter().flatten().copied().collect();
    if scored.is_empty() {
        return Ok(None);
    }
    Ok(Some(Evaluation {
        subset: subset.to_vec(),
        mtry,
        score: scored.iter().sum::<f64>() / scored.len() as f64,
        fold_r2,
        oof,
    }))
}

/// First candidate with the highest score; later candidates must be strictly better.
fn best_of(evaluations: Vec<Evaluation>) -> Option<Evaluation> {
    evaluations.into_iter().fold(None, |best, cand| match best {
        Some(b) if b.score >= cand.score => Some(b),
        _ => Some(cand),
    })
}

/// Greedy forward selection over `names` with spatial cross-validation.
pub fn forward_select(
    names: &[String],
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    folds: &FoldAssignment,
    params: &SelectionParams,
) -> Result<SelectionResult> {
    if names.len() != x.ncols() || x.nrows() != y.len() {
        return Err(Error::input(
            Stage::Selection,
            format!(
                "{} names, {}x{} covariates and {} responses do not line up",
                names.len(),
                x.nrows(),
                x.ncols(),
                y.len()
            ),
        ));
    }
    if names.is_empty() {
        return Err(Error::input(Stage::Selection, "no candidate predictors"));
    }
    if folds.len() != y.len() {
        return Err(Error::input(
            Stage::Selection,
            format!("folds cover {} observations, data has {}", folds.len(), y.len()),
        ));
    }

    let (usable, warnings) = usable_folds(folds, y);
    if !usable.contains(&true) {
        return Err(Error::input(
            Stage::Selection,
            "no cross-validation fold can be scored",
        ));
    }

    let mut remaining: Vec<usize> = (0..names.len()).collect();
    let mut best: Option<Evaluation> = None;
    let mut trace = Vec::new();

    while !remaining.is_empty() {
        let current: Vec<usize> = best.as_ref().map(|b| b.subset.clone()).unwrap_or_default();
        let jobs: Vec<(Vec<usize>, usize)> = remaining
            .iter()
            .flat_map(|&p| {
                let mut subset = current.clone();
                subset.push(p);
                admissible_mtry(&params.mtry_candidates, subset.len())
                    .into_iter()
                    .map(move |m| (subset.clone(), m))
            })
            .collect();

        let run = |job: &(Vec<usize>, usize)| evaluate(x, y, folds, &usable, &job.0, job.1, params);

        #[cfg(not(feature = "use-rayon"))]
        let results: Vec<Result<Option<Evaluation>>> = jobs.iter().map(run).collect();

        #[cfg(feature = "use-rayon")]
        let results: Vec<Result<Option<Evaluation>>> = jobs.par_iter().map(run).collect();

        let evaluations: Vec<Evaluation> = results
            .into_iter()
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let Some(step_best) = best_of(evaluations) else {
            break;
        };

        let added_index = *step_best.subset.last().unwrap_or(&0);
        let adopted = best.as_ref().map_or(true, |b| step_best.score > b.score);
        trace.push(StepRecord {
            step: trace.len() + 1,
            added: names[added_index].clone(),
            mtry: step_best.mtry,
            score: step_best.score,
            n_evaluated: jobs.len(),
            adopted,
        });
        log::debug!(
            "Step {}: best addition {} (mtry {}) scores {:.4}{}",
            trace.len(),
            names[added_index],
            step_best.mtry,
            step_best.score,
            if adopted { "" } else { ", no improvement" }
        );

        if !adopted {
            break;
        }
        remaining.retain(|&p| p != added_index);
        best = Some(step_best);
    }

    let best = best.ok_or_else(|| {
        Error::input(Stage::Selection, "no predictor set could be scored")
    })?;
    let selected: Vec<String> = best.subset.iter().map(|&j| names[j].clone()).collect();
    log::info!(
        "Selected {} predictors {:?} with mtry {} (spatial CV R² {:.4})",
        selected.len(),
        selected,
        best.mtry,
        best.score
    );

    let final_params = QrfParams {
        mtry: Some(best.mtry),
        ..params.final_forest.clone()
    };
    let xs = x.select(Axis(1), &best.subset);
    let mut rng = StdRng::seed_from_u64(params.final_seed);
    let (final_fit, model) = fit(xs.view(), y, &final_params, &mut rng)?;
    let model = model.with_feature_names(selected.clone());

    Ok(SelectionResult {
        selected,
        mtry: best.mtry,
        cv_r2: best.score,
        fold_r2: best.fold_r2,
        oof_predictions: best.oof,
        trace,
        warnings,
        model,
        final_fit,
    })
}
