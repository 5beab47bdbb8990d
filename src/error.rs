//! Error types for the controller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MppiError {
    /// Invalid parameters or mismatched tensor shapes. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// NaN or Inf found in rollout states or costs.
    #[error("numeric instability in {stage}: {detail}")]
    NumericInstability { stage: &'static str, detail: String },

    /// A strict costmap read fell outside the grid.
    #[error("costmap lookup at ({x:.3}, {y:.3}) falls outside the grid")]
    OutOfBoundsLookup { x: f64, y: f64 },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MppiError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        MppiError::Configuration(msg.into())
    }

    /// `true` for errors that only spoil a single tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MppiError::NumericInstability { .. } | MppiError::OutOfBoundsLookup { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MppiError>;
