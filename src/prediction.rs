//! Gridded quantile prediction with interval summaries.

use ndarray::ArrayView2;

use crate::data::{CovariateGrid, GridGeometry, Raster};
use crate::error::{Error, Result, Stage};
use crate::forest::QuantileForest;

#[derive(Debug, Clone)]
pub struct GridPrediction {
    /// Requested levels, sorted ascending, one raster each.
    pub levels: Vec<f64>,
    pub quantiles: Vec<Raster>,
    pub median: Raster,
    /// Highest minus lowest requested quantile.
    pub interval_width: Raster,
    /// Interval width divided by the median.
    pub interval_ratio: Raster,
}

impl GridPrediction {
    pub fn quantile(&self, level: f64) -> Option<&Raster> {
        self.levels
            .iter()
            .position(|&l| l == level)
            .map(|i| &self.quantiles[i])
    }
}

fn sorted_levels(levels: &[f64]) -> Result<Vec<f64>> {
    if levels.is_empty() {
        return Err(Error::input(Stage::Prediction, "no quantile levels requested"));
    }
    let mut sorted = levels.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    Ok(sorted)
}

/// Predicts the requested quantiles for the valid `cells`, whose predictor values are the rows
/// of `x` in the model's feature order.
pub fn predict_cells(
    model: &QuantileForest,
    x: ArrayView2<f64>,
    cells: &[(usize, usize)],
    geometry: GridGeometry,
    levels: &[f64],
) -> Result<GridPrediction> {
    if x.nrows() != cells.len() {
        return Err(Error::input(
            Stage::Prediction,
            format!("{} feature rows for {} cells", x.nrows(), cells.len()),
        ));
    }
    let levels = sorted_levels(levels)?;
    let mut all_levels = levels.clone();
    all_levels.push(0.5);
    let predicted = model.predict_quantiles(x, &all_levels)?;

    let column = |j: usize| -> Vec<f64> { predicted.column(j).to_vec() };
    let quantiles: Vec<Raster> = (0..levels.len())
        .map(|j| Raster::from_cells(geometry, cells, &column(j)))
        .collect();
    let median = column(levels.len());
    let lowest = column(0);
    let highest = column(levels.len() - 1);

    let width: Vec<f64> = highest.iter().zip(&lowest).map(|(h, l)| h - l).collect();
    let ratio: Vec<f64> = width
        .iter()
        .zip(&median)
        .map(|(w, m)| if *m != 0.0 { w / m } else { f64::NAN })
        .collect();

    log::info!(
        "Predicted {} quantile levels on {} cells",
        levels.len(),
        cells.len()
    );
    Ok(GridPrediction {
        levels,
        quantiles,
        median: Raster::from_cells(geometry, cells, &median),
        interval_width: Raster::from_cells(geometry, cells, &width),
        interval_ratio: Raster::from_cells(geometry, cells, &ratio),
    })
}

/// Predicts every cell of `grid` where all of the model's predictors are valid.
pub fn predict_grid(
    model: &QuantileForest,
    grid: &CovariateGrid,
    levels: &[f64],
) -> Result<GridPrediction> {
    let (x, cells) = grid.feature_matrix(model.feature_names())?;
    predict_cells(model, x.view(), &cells, grid.geometry(), levels)
}
