//! Boruta-style variable screening.
//!
//! Each run appends a shadow column for every predictor that has not been rejected yet. A
//! shadow is the original column with its rows permuted, so it keeps the marginal
//! distribution but carries no information about the response. A predictor scores a hit when
//! its forest importance beats the best shadow of that run, and the running hit count is
//! tested against a fair coin.

use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Stage};
use crate::forest::{fit, ImportanceMode, QrfParamsBuilder};
use crate::stats::{binomial_lower_tail, binomial_upper_tail, variance};

const MIN_SHADOWS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Tentative,
    Confirmed,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct ScreeningParams {
    pub significance: f64,
    pub max_runs: usize,
    pub n_trees: usize,
    pub importance: ImportanceMode,
}

impl Default for ScreeningParams {
    fn default() -> Self {
        Self {
            significance: 0.05,
            max_runs: 500,
            n_trees: 500,
            importance: ImportanceMode::Permutation,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScreeningResult {
    pub names: Vec<String>,
    pub decisions: Vec<Decision>,
    pub hits: Vec<usize>,
    pub runs: usize,
}

impl ScreeningResult {
    fn with(&self, decision: Decision) -> Vec<String> {
        self.names
            .iter()
            .zip(&self.decisions)
            .filter(|(_, d)| **d == decision)
            .map(|(n, _)| n.clone())
            .collect()
    }

    pub fn confirmed(&self) -> Vec<String> {
        self.with(Decision::Confirmed)
    }

    pub fn tentative(&self) -> Vec<String> {
        self.with(Decision::Tentative)
    }

    pub fn rejected(&self) -> Vec<String> {
        self.with(Decision::Rejected)
    }
}

fn check_inputs(names: &[String], x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
    if names.len() != x.ncols() {
        return Err(Error::input(
            Stage::Screening,
            format!("{} names for {} covariate columns", names.len(), x.ncols()),
        ));
    }
    if x.nrows() != y.len() {
        return Err(Error::input(
            Stage::Screening,
            format!("{} covariate rows for {} responses", x.nrows(), y.len()),
        ));
    }
    if names.len() < 2 {
        return Err(Error::input(
            Stage::Screening,
            format!("need at least 2 candidate predictors, got {}", names.len()),
        ));
    }
    let var = variance(&y.to_vec());
    if !(var > 1e-12) {
        return Err(Error::input(
            Stage::Screening,
            format!("response variance {var:e} is too small to screen against"),
        ));
    }
    Ok(())
}

/// Real columns of `active` followed by their shadows, replicated until at least
/// [`MIN_SHADOWS`] shadow columns exist.
fn with_shadows(x: ArrayView2<f64>, active: &[usize], rng: &mut StdRng) -> Array2<f64> {
    let n = x.nrows();
    let copies = MIN_SHADOWS.div_ceil(active.len()).max(1);
    let n_shadows = active.len() * copies;
    let mut extended = Array2::zeros((n, active.len() + n_shadows));

    for (c, &j) in active.iter().enumerate() {
        extended.column_mut(c).assign(&x.column(j));
    }
    for s in 0..n_shadows {
        let mut values = x.column(active[s % active.len()]).to_vec();
        values.shuffle(rng);
        extended
            .column_mut(active.len() + s)
            .assign(&ArrayView1::from(&values[..]));
    }
    extended
}

/// Two-sided fair-coin test of `hits` out of `runs`, Bonferroni-adjusted over `n_tests`.
fn decide(hits: usize, runs: usize, n_tests: usize, significance: f64) -> Decision {
    let upper = binomial_upper_tail(hits, runs);
    let lower = binomial_lower_tail(hits, runs);
    let p_two_sided = (2.0 * upper.min(lower)).min(1.0);
    let adjusted = (p_two_sided * n_tests as f64).min(1.0);
    if adjusted >= significance {
        Decision::Tentative
    } else if upper < lower {
        Decision::Confirmed
    } else {
        Decision::Rejected
    }
}

/// Splits the candidates into confirmed, tentative and rejected predictors.
pub fn screen(
    names: &[String],
    x: ArrayView2<f64>,
    y: ArrayView1<f64>,
    params: &ScreeningParams,
    seed: u64,
) -> Result<ScreeningResult> {
    check_inputs(names, x, y)?;
    if params.importance == ImportanceMode::None {
        return Err(Error::configuration(
            Stage::Screening,
            "screening needs an importance mode",
        ));
    }

    let p = names.len();
    let mut rng = StdRng::seed_from_u64(seed);
    let mut decisions = vec![Decision::Tentative; p];
    let mut hits = vec![0usize; p];
    let forest_params = QrfParamsBuilder::new()
        .n_trees(params.n_trees)
        .importance(params.importance)
        .build();

    let mut runs = 0;
    while runs < params.max_runs && decisions.contains(&Decision::Tentative) {
        let active: Vec<usize> = (0..p)
            .filter(|&j| decisions[j] != Decision::Rejected)
            .collect();
        let extended = with_shadows(x, &active, &mut rng);
        let (_, forest) = fit(extended.view(), y, &forest_params, &mut rng)?;
        let importance = forest
            .importance()
            .ok_or_else(|| Error::fit(Stage::Screening, "forest returned no importance"))?;

        let (real, shadows) = importance.split_at(active.len());
        let shadow_max = shadows.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        for (c, &j) in active.iter().enumerate() {
            if real[c] > shadow_max {
                hits[j] += 1;
            }
        }
        runs += 1;

        for j in 0..p {
            if decisions[j] == Decision::Tentative {
                decisions[j] = decide(hits[j], runs, p, params.significance);
            }
        }
        log::debug!(
            "Boruta run {}: shadow max {:.5}, {} undecided",
            runs,
            shadow_max,
            decisions
                .iter()
                .filter(|d| **d == Decision::Tentative)
                .count()
        );
    }

    let result = ScreeningResult {
        names: names.to_vec(),
        decisions,
        hits,
        runs,
    };
    log::info!(
        "Screening finished after {} runs: {} confirmed, {} tentative, {} rejected",
        runs,
        result.confirmed().len(),
        result.tentative().len(),
        result.rejected().len()
    );
    Ok(result)
}
