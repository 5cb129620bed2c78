use rand::{seq::index::sample, Rng};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Stage};
use crate::stats::shapiro_wilk;

#[cfg(feature = "use-rayon")]
use rayon::prelude::*;

/// Candidate exponents for the power ladder, inclusive on both ends.
#[derive(Debug, Clone, Copy)]
pub struct LambdaGrid {
    pub start: f64,
    pub end: f64,
    pub step: f64,
}

impl Default for LambdaGrid {
    fn default() -> Self {
        Self {
            start: -10.0,
            end: 10.0,
            step: 0.025,
        }
    }
}

impl LambdaGrid {
    pub fn values(&self) -> Vec<f64> {
        let count = ((self.end - self.start) / self.step + 1e-9).floor() as usize + 1;
        (0..count)
            .map(|k| {
                // Snap to nine decimals so zero and whole exponents come out exact.
                ((self.start + k as f64 * self.step) * 1e9).round() / 1e9
            })
            .collect()
    }
}

/// Tukey's ladder of powers: `x^l` for `l > 0`, `ln x` at zero and `-(x^l)` below zero, so
/// the transform stays increasing in `x`.
pub fn tukey(value: f64, lambda: f64) -> f64 {
    if lambda > 0.0 {
        value.powf(lambda)
    } else if lambda == 0.0 {
        value.ln()
    } else {
        -value.powf(lambda)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerTransform {
    pub lambda: f64,
    /// Shapiro-Wilk W of the transformed sample.
    pub w: f64,
}

impl PowerTransform {
    pub fn apply(&self, value: f64) -> f64 {
        tukey(value, self.lambda)
    }
}

/// W of the transformed sample. Exponents that leave any of `values` non-finite are rejected,
/// sampled or not.
fn score(values: &[f64], sample: &[f64], lambda: f64) -> Option<f64> {
    if values.iter().any(|&v| !tukey(v, lambda).is_finite()) {
        return None;
    }
    let transformed: Vec<f64> = sample.iter().map(|&v| tukey(v, lambda)).collect();
    let w = shapiro_wilk(&transformed);
    w.is_finite().then_some(w)
}

/// Picks the exponent whose transform of (a sample of at most `max_sample` of) `values` is
/// closest to normal by the Shapiro-Wilk W statistic.
pub fn choose_transform<R: Rng + ?Sized>(
    values: &[f64],
    grid: &LambdaGrid,
    max_sample: usize,
    rng: &mut R,
) -> Result<PowerTransform> {
    let sample_values: Vec<f64> = if values.len() > max_sample {
        sample(rng, values.len(), max_sample)
            .into_iter()
            .map(|i| values[i])
            .collect()
    } else {
        values.to_vec()
    };

    let lambdas = grid.values();

    #[cfg(not(feature = "use-rayon"))]
    let scores: Vec<Option<f64>> = lambdas
        .iter()
        .map(|&l| score(values, &sample_values, l))
        .collect();

    #[cfg(feature = "use-rayon")]
    let scores: Vec<Option<f64>> = lambdas
        .par_iter()
        .map(|&l| score(values, &sample_values, l))
        .collect();

    let best = lambdas
        .iter()
        .zip(&scores)
        .filter_map(|(&lambda, s)| s.map(|w| PowerTransform { lambda, w }))
        .fold(None, |best: Option<PowerTransform>, cand| match best {
            Some(b) if b.w >= cand.w => Some(b),
            _ => Some(cand),
        });

    let best = best.ok_or_else(|| {
        Error::input(
            Stage::SpatialDependence,
            "no power transform yields finite values for the response",
        )
    })?;
    log::info!(
        "Power transform lambda = {} (Shapiro-Wilk W = {:.4}, {} values tested)",
        best.lambda,
        best.w,
        sample_values.len()
    );
    Ok(best)
}
