//! CortexStream Core - shared types for the biosignal state pipeline
//!
//! This crate provides the data model shared by ingestion, processing and
//! downstream consumers of the four-electrode headband pipeline.
//!
//! # Modules
//!
//! - [`types`]: Channels, raw samples, frequency bands, state labels
//! - [`snapshot`]: The per-second record emitted to consumers
//! - [`config`]: Centralized thresholds for every component
//! - [`error`]: Error taxonomy of a device session
//!
//! # Example
//!
//! ```rust
//! use cortexstream_core::types::{BandPowers, EegChannel, EegSample};
//!
//! let sample = EegSample::new(0.5, [12.0, -3.5, 4.0, 8.25]);
//! assert!((sample.channel(EegChannel::Af8) - 4.0).abs() < 1e-12);
//!
//! let powers = BandPowers { delta: 2.0, theta: 2.0, alpha: 4.0, beta: 1.0, gamma: 1.0 };
//! assert!((powers.normalized().total() - 100.0).abs() < 1e-9);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod snapshot;
pub mod types;

// Re-export commonly used types at crate root
pub use config::PipelineConfig;
pub use error::{ConfigError, FitError, PipelineError, PipelineResult, SampleError};
pub use snapshot::{
    ArtifactFeatures, ArtifactKind, ArtifactVerdict, BrainStateView, CalibrationStatus,
    CardiacMetrics, CardiacStatus, ConnectionSession, ConnectionStatus, DerivedMetrics,
    DetectorFlags, PostureReading, Snapshot, TalkingStatus,
};
pub use types::{
    BadChannelSet, BandPowers, BrainState, EegBand, EegChannel, EegSample, MotionSample, PostureLabel,
    PpgSample, RawSample, SpeechActivity, StreamKind, Vec3,
};
