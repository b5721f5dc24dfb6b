//! Error types for the CortexStream pipeline
//!
//! Recoverable conditions (link loss, calibration fit failure, malformed
//! samples) are absorbed at component boundaries and surface as explicit
//! snapshot fields. Only [`PipelineError::LinkUnavailable`] and
//! [`PipelineError::ReconnectExhausted`] end a session.

use thiserror::Error;

use crate::types::StreamKind;

// ============================================================================
// Sample Errors
// ============================================================================

/// A single sample that cannot be used
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SampleError {
    /// Wrong number of channels for the stream group
    #[error("{} sample has {got} channels", .stream.name())]
    ChannelCount {
        /// Stream group
        stream: StreamKind,
        /// Number of values received
        got: usize,
    },

    /// NaN or infinite value or timestamp
    #[error("{} sample contains a non-finite value", .stream.name())]
    NonFinite {
        /// Stream group
        stream: StreamKind,
    },
}

// ============================================================================
// Calibration Errors
// ============================================================================

/// Reasons a blind-source-separation fit can fail
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// Baseline shorter than the model needs
    #[error("baseline has {got} samples, need at least {need}")]
    TooFewSamples {
        /// Samples available
        got: usize,
        /// Samples required
        need: usize,
    },

    /// Channel covariance is (numerically) singular
    #[error("baseline covariance is rank deficient (eigenvalue ratio {ratio:.2e})")]
    RankDeficient {
        /// Smallest / largest eigenvalue
        ratio: f64,
    },

    /// Fixed-point iteration produced non-finite weights
    #[error("separation did not produce a finite model")]
    NonFinite,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Error taxonomy of a device session
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// No device reachable at session start
    #[error("link unavailable: {0}")]
    LinkUnavailable(String),

    /// Established link dropped or went silent
    #[error("link lost: {0}")]
    LinkLost(String),

    /// Bounded reconnection gave up
    #[error("reconnect failed after {attempts} attempts")]
    ReconnectExhausted {
        /// Attempts made in the final outage
        attempts: u32,
    },

    /// Separation model could not be fitted on the baseline
    #[error("calibration fit failed: {0}")]
    CalibrationFitFailure(#[from] FitError),

    /// Single unusable sample
    #[error("malformed sample: {0}")]
    MalformedSample(#[from] SampleError),

    /// Session stopped by the caller
    #[error("session cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Whether the error ends the session
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::LinkUnavailable(_) | Self::ReconnectExhausted { .. })
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Invalid configuration value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration `{field}`: {reason}")]
pub struct ConfigError {
    /// Dotted path of the offending field
    pub field: &'static str,
    /// What is wrong with it
    pub reason: String,
}

impl ConfigError {
    pub(crate) fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}
