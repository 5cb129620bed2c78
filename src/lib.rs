pub mod applicability;
pub mod blocking;
pub mod config;
pub mod data;
pub mod error;
pub mod forest;
pub mod io;
pub mod pipeline;
pub mod prediction;
pub mod redundancy;
pub mod screening;
pub mod selection;
pub mod stats;
pub mod variogram;

#[cfg(test)]
pub(crate) mod test_data;

use ndarray::{Array1, ArrayView2};

pub use error::{Error, Result, Stage, Warning};

#[derive(Debug, Clone)]
pub struct FitResult {
    pub err: f64,
    pub residuals: Array1<f64>,
    pub y_hat: Array1<f64>,
}

pub trait FittedModel {
    fn predict(&self, x: ArrayView2<f64>) -> Array1<f64>;
}
