//! Error taxonomy shared by every pipeline stage.
//!
//! Hard failures are [`Error`] values carrying the [`Stage`] that raised them. Recoverable
//! shortfalls (a fold too small to score, too few points for a stable variogram) are
//! [`Warning`]s: they are logged when created and collected into the validation summary.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Input,
    Config,
    Screening,
    Redundancy,
    SpatialDependence,
    Blocking,
    Selection,
    Forest,
    Prediction,
    Applicability,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Input => "input",
            Stage::Config => "configuration",
            Stage::Screening => "variable screening",
            Stage::Redundancy => "redundancy reduction",
            Stage::SpatialDependence => "spatial dependence estimation",
            Stage::Blocking => "spatial blocking",
            Stage::Selection => "forward feature selection",
            Stage::Forest => "quantile regression forest",
            Stage::Prediction => "gridded prediction",
            Stage::Applicability => "area of applicability",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid input during {stage}: {message}")]
    Input { stage: Stage, message: String },

    #[error("Fitting failed during {stage}: {message}")]
    Fit { stage: Stage, message: String },

    #[error("Inconsistent configuration for {stage}: {message}")]
    Configuration { stage: Stage, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl Error {
    pub fn input(stage: Stage, message: impl Into<String>) -> Self {
        Error::Input {
            stage,
            message: message.into(),
        }
    }

    pub fn fit(stage: Stage, message: impl Into<String>) -> Self {
        Error::Fit {
            stage,
            message: message.into(),
        }
    }

    pub fn configuration(stage: Stage, message: impl Into<String>) -> Self {
        Error::Configuration {
            stage,
            message: message.into(),
        }
    }

    /// The stage that raised the error, if it came from the modeling core.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Input { stage, .. }
            | Error::Fit { stage, .. }
            | Error::Configuration { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// A recoverable data shortfall. The affected unit is excluded and the run continues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub stage: Stage,
    pub message: String,
}

impl Warning {
    /// Creates the warning and emits it on the `log` facade.
    pub fn insufficient_data(stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        log::warn!("Insufficient data during {}: {}", stage, message);
        Warning { stage, message }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_reports_stage() {
        let err = Error::fit(Stage::Redundancy, "ceiling unreachable");
        assert_eq!(err.stage(), Some(Stage::Redundancy));
        assert_eq!(
            err.to_string(),
            "Fitting failed during redundancy reduction: ceiling unreachable"
        );
    }

    #[test]
    fn test_io_error_has_no_stage() {
        let err: Error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert!(err.stage().is_none());
    }
}
