//! Spatial autocorrelation range of the response.
//!
//! The response is first moved towards normality with a power transform, then an empirical
//! semivariogram is computed and spherical, exponential and Gaussian models are fitted to it.
//! The range parameter of the best-fitting model sets the scale of the cross-validation
//! blocks.

pub mod empirical;
pub mod models;
pub mod transform;

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::StdRng, SeedableRng};

use crate::error::{Error, Result, Stage, Warning};

pub use empirical::{empirical_variogram, extent_diagonal, EmpiricalVariogram, VariogramBin};
pub use models::{fit_model, ModelFit, VariogramModel};
pub use transform::{choose_transform, LambdaGrid, PowerTransform};

#[derive(Debug, Clone)]
pub struct DependenceParams {
    pub min_observations: usize,
    pub n_bins: usize,
    pub max_transform_sample: usize,
    pub lambda_grid: LambdaGrid,
}

impl Default for DependenceParams {
    fn default() -> Self {
        Self {
            min_observations: 30,
            n_bins: 15,
            max_transform_sample: 5000,
            lambda_grid: LambdaGrid::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DependenceEstimate {
    pub transform: PowerTransform,
    pub variogram: EmpiricalVariogram,
    pub fits: Vec<ModelFit>,
    pub best: ModelFit,
    pub range: f64,
    pub warnings: Vec<Warning>,
}

fn fit_error(message: impl Into<String>) -> Error {
    Error::fit(Stage::SpatialDependence, message)
}

/// Estimates the autocorrelation range of `values` observed at `coords`.
pub fn estimate_range(
    coords: ArrayView2<f64>,
    values: ArrayView1<f64>,
    params: &DependenceParams,
    seed: u64,
) -> Result<DependenceEstimate> {
    if coords.nrows() != values.len() || coords.ncols() != 2 {
        return Err(Error::input(
            Stage::SpatialDependence,
            format!(
                "coordinates of shape {:?} do not match {} values",
                coords.shape(),
                values.len()
            ),
        ));
    }
    if values.len() < 3 {
        return Err(Error::input(
            Stage::SpatialDependence,
            format!("need at least 3 observations, got {}", values.len()),
        ));
    }

    let mut warnings = Vec::new();
    if values.len() < params.min_observations {
        warnings.push(Warning::insufficient_data(
            Stage::SpatialDependence,
            format!(
                "{} observations is below the {} recommended for a variogram",
                values.len(),
                params.min_observations
            ),
        ));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let raw = values.to_vec();
    let transform = choose_transform(
        &raw,
        &params.lambda_grid,
        params.max_transform_sample,
        &mut rng,
    )?;
    let z: Array1<f64> = values.mapv(|v| transform.apply(v));
    if z.iter().any(|v| !v.is_finite()) {
        return Err(Error::input(
            Stage::SpatialDependence,
            format!(
                "power transform with lambda {} is not finite for every observation",
                transform.lambda
            ),
        ));
    }

    let diagonal = extent_diagonal(coords);
    if !(diagonal.is_finite() && diagonal > 0.0) {
        return Err(fit_error("observations have no spatial extent"));
    }
    let variogram = empirical_variogram(coords, z.view(), params.n_bins, diagonal / 3.0);
    if variogram.bins.len() < 3 {
        return Err(fit_error(format!(
            "only {} non-empty lag classes, need at least 3",
            variogram.bins.len()
        )));
    }

    let fits: Vec<ModelFit> = VariogramModel::ALL
        .iter()
        .filter_map(|&m| fit_model(m, &variogram))
        .collect();
    for f in &fits {
        log::debug!(
            "{:?} variogram: nugget {:.4}, partial sill {:.4}, range {:.2}, WSSE {:.5}",
            f.model,
            f.nugget,
            f.partial_sill,
            f.range,
            f.wsse
        );
    }
    let best = fits
        .iter()
        .copied()
        .filter(|f| f.range > 0.0)
        .fold(None, |best: Option<ModelFit>, cand| match best {
            Some(b) if b.wsse <= cand.wsse => Some(b),
            _ => Some(cand),
        })
        .ok_or_else(|| fit_error("no variogram model could be fitted"))?;

    log::info!(
        "Autocorrelation range {:.2} from a {:?} model over {} lag classes",
        best.range,
        best.model,
        variogram.bins.len()
    );

    Ok(DependenceEstimate {
        transform,
        variogram,
        fits,
        best,
        range: best.range,
        warnings,
    })
}
