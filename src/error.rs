//! Error types for model construction and likelihood evaluation.

use thiserror::Error;

/// Errors raised by the lymphatic progression engine.
///
/// Every variant is fatal to the call that raised it. Degenerate but valid
/// parameters are not errors: a likelihood of zero is reported as a
/// log-likelihood of negative infinity.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LymphError {
    /// Malformed or cyclic drainage graph.
    #[error("graph error: {0}")]
    Graph(String),

    /// Out-of-range or wrong-length parameter vector.
    #[error("parameter error: {0}")]
    Parameter(String),

    /// Sensitivity or specificity outside [0, 1], or an unusable modality set.
    #[error("modality error: {0}")]
    Modality(String),

    /// Patient table or diagnosis that does not match the model layout.
    #[error("data format error: {0}")]
    DataFormat(String),

    /// Time prior that is not a distribution over 0..=t_max.
    #[error("time prior error: {0}")]
    TimePrior(String),

    /// Model configuration that cannot be parsed.
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, LymphError>;

impl From<serde_json::Error> for LymphError {
    fn from(err: serde_json::Error) -> Self {
        LymphError::Config(err.to_string())
    }
}
