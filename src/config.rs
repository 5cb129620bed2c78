//! Run configuration, loaded from TOML. Every option has a default so a config file only
//! needs to name what it changes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Stage};
use crate::forest::{ImportanceMode, QrfParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BlockShape {
    #[default]
    Square,
    Hexagon,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdMethod {
    /// Largest training dissimilarity inside the upper boxplot whisker.
    #[default]
    Whisker,
    /// Knee of the cross-validation error against training dissimilarity.
    ErrorKnee,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Inclusive sample-depth interval; observations outside it are dropped.
    pub depth_interval_bounds: Option<(f64, f64)>,

    pub boruta_significance: f64,
    pub boruta_max_iterations: usize,
    pub boruta_trees: usize,
    pub boruta_importance: ImportanceMode,

    pub initial_correlation_threshold: f64,
    pub vif_ceiling: f64,
    pub vif_threshold_step: f64,

    pub min_observations_for_variogram: usize,
    pub variogram_bins: usize,
    pub max_transform_sample: usize,
    pub lambda_start: f64,
    pub lambda_end: f64,
    pub lambda_step: f64,
    /// Used when the variogram cannot be fitted.
    pub manual_range: Option<f64>,

    pub cv_fold_count: usize,
    pub block_size_multiplier: f64,
    pub block_shape: BlockShape,

    pub mtry_candidates: Vec<usize>,
    pub selection_trees: usize,
    pub forest: QrfParams,

    pub quantile_levels_for_output: Vec<f64>,
    pub applicability_threshold: ThresholdMethod,

    pub random_seed: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            depth_interval_bounds: None,
            boruta_significance: 0.05,
            boruta_max_iterations: 500,
            boruta_trees: 500,
            boruta_importance: ImportanceMode::Permutation,
            initial_correlation_threshold: 1.0,
            vif_ceiling: 2.5,
            vif_threshold_step: 0.01,
            min_observations_for_variogram: 30,
            variogram_bins: 15,
            max_transform_sample: 5000,
            lambda_start: -10.0,
            lambda_end: 10.0,
            lambda_step: 0.025,
            manual_range: None,
            cv_fold_count: 10,
            block_size_multiplier: 0.3,
            block_shape: BlockShape::Square,
            mtry_candidates: vec![1, 2, 3],
            selection_trees: 200,
            forest: QrfParams::default(),
            quantile_levels_for_output: vec![0.05, 0.5, 0.95],
            applicability_threshold: ThresholdMethod::Whisker,
            random_seed: 42,
        }
    }
}

fn invalid(message: String) -> Error {
    Error::configuration(Stage::Config, message)
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Rejects settings that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if let Some((lo, hi)) = self.depth_interval_bounds {
            if !(lo.is_finite() && hi.is_finite() && lo <= hi) {
                return Err(invalid(format!(
                    "depth_interval_bounds must be an ordered finite pair, got ({lo}, {hi})"
                )));
            }
        }
        if !(self.boruta_significance > 0.0 && self.boruta_significance < 1.0) {
            return Err(invalid(format!(
                "boruta_significance must lie in (0, 1), got {}",
                self.boruta_significance
            )));
        }
        if self.boruta_max_iterations == 0 || self.boruta_trees == 0 {
            return Err(invalid(
                "boruta_max_iterations and boruta_trees must be positive".to_string(),
            ));
        }
        if self.boruta_importance == ImportanceMode::None {
            return Err(invalid(
                "boruta_importance must be 'permutation' or 'impurity'".to_string(),
            ));
        }
        if !(self.initial_correlation_threshold > 0.0 && self.initial_correlation_threshold <= 1.0)
        {
            return Err(invalid(format!(
                "initial_correlation_threshold must lie in (0, 1], got {}",
                self.initial_correlation_threshold
            )));
        }
        if !(self.vif_ceiling >= 1.0) {
            return Err(invalid(format!(
                "vif_ceiling must be at least 1, got {}",
                self.vif_ceiling
            )));
        }
        if !(self.vif_threshold_step > 0.0 && self.vif_threshold_step < 1.0) {
            return Err(invalid(format!(
                "vif_threshold_step must lie in (0, 1), got {}",
                self.vif_threshold_step
            )));
        }
        if self.variogram_bins < 3 || self.max_transform_sample < 3 {
            return Err(invalid(
                "variogram_bins and max_transform_sample must be at least 3".to_string(),
            ));
        }
        if !(self.lambda_step > 0.0 && self.lambda_start <= self.lambda_end) {
            return Err(invalid(format!(
                "lambda grid [{}, {}] step {} is empty",
                self.lambda_start, self.lambda_end, self.lambda_step
            )));
        }
        if let Some(range) = self.manual_range {
            if !(range.is_finite() && range > 0.0) {
                return Err(invalid(format!("manual_range must be positive, got {range}")));
            }
        }
        if self.cv_fold_count < 2 {
            return Err(invalid(format!(
                "cv_fold_count must be at least 2, got {}",
                self.cv_fold_count
            )));
        }
        if !(self.block_size_multiplier.is_finite() && self.block_size_multiplier > 0.0) {
            return Err(invalid(format!(
                "block_size_multiplier must be positive, got {}",
                self.block_size_multiplier
            )));
        }
        if self.mtry_candidates.is_empty() || self.mtry_candidates.contains(&0) {
            return Err(invalid(
                "mtry_candidates must be a non-empty list of positive values".to_string(),
            ));
        }
        if self.selection_trees == 0 || self.forest.n_trees == 0 {
            return Err(invalid(
                "selection_trees and forest.n_trees must be positive".to_string(),
            ));
        }
        if self.quantile_levels_for_output.is_empty()
            || self
                .quantile_levels_for_output
                .iter()
                .any(|&q| !(q > 0.0 && q < 1.0))
        {
            return Err(invalid(format!(
                "quantile_levels_for_output must be non-empty and inside (0, 1), got {:?}",
                self.quantile_levels_for_output
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.vif_ceiling, 2.5);
        assert_eq!(config.cv_fold_count, 10);
        assert_eq!(config.quantile_levels_for_output, vec![0.05, 0.5, 0.95]);
    }

    #[test]
    fn test_partial_toml_overrides() {
        let toml_string = r#"
            depth_interval_bounds = [0.0, 10.0]
            cv_fold_count = 5
            block_shape = "hexagon"
            random_seed = 7

            [forest]
            n_trees = 100
        "#;
        let config: PipelineConfig = toml::from_str(toml_string).unwrap();
        config.validate().unwrap();
        assert_eq!(config.depth_interval_bounds, Some((0.0, 10.0)));
        assert_eq!(config.block_shape, BlockShape::Hexagon);
        assert_eq!(config.forest.n_trees, 100);
        assert_eq!(config.forest.min_node_size, 5);
        assert_eq!(config.boruta_max_iterations, 500);
    }

    #[test]
    fn test_invalid_settings_are_configuration_errors() {
        let config = PipelineConfig {
            cv_fold_count: 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::Configuration {
                stage: Stage::Config,
                ..
            })
        ));

        let config = PipelineConfig {
            quantile_levels_for_output: vec![0.5, 1.0],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let config = PipelineConfig {
            manual_range: Some(12_000.0),
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        let parsed: PipelineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
