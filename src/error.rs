//! Error types for the occupancy counter.

use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, CounterError>;

/// Conditions the core surfaces to its caller. Everything else (degenerate
/// binarisation, empty blobs, unmatched tracks) degrades to "no detection".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CounterError {
    #[error("background initialization needs {required} frames, got {supplied}")]
    InsufficientData { required: usize, supplied: usize },

    #[error("grid shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("background persistence failed: {0}")]
    Persistence(String),
}

impl CounterError {
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }

    /// True for the errors that signal a wiring mistake rather than a data condition.
    pub fn is_misconfiguration(&self) -> bool {
        matches!(self, Self::ShapeMismatch { .. } | Self::InvalidConfig(_))
    }
}
