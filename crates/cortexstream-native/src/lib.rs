//! CortexStream Native - Host-side biosignal pipeline
//!
//! This crate turns a live four-electrode headband stream into one state
//! snapshot per second:
//! - Stream ingestion with watchdog and bounded reconnect
//! - Signal conditioning (band-limit, notch, calibrated source separation)
//! - Welch band powers and state labels
//! - Six-detector artifact classification
//! - Heart rate and variability from the pulse sensor
//! - Temporal smoothing with a dwell lock
//!
//! # Modules
//!
//! - [`bridge`]: Device transports, packet codec and window assembly
//! - [`processing`]: Signal processing pipelines
//! - [`session`]: Session context, driver and snapshot sinks
//!
//! # Example
//!
//! ```rust,no_run
//! use cortexstream_core::PipelineConfig;
//! use cortexstream_native::bridge::{SimulatedHeadband, SimulationConfig};
//! use cortexstream_native::session::{SessionDriver, SessionRecorder};
//!
//! # async fn demo() -> Result<(), cortexstream_core::PipelineError> {
//! let recorder = SessionRecorder::new();
//! recorder.start();
//!
//! let transport = SimulatedHeadband::new(SimulationConfig::default());
//! let mut driver = SessionDriver::new(transport, &PipelineConfig::default()).with_sink(recorder.clone());
//! driver.stop_after_windows(10);
//!
//! let (_stop, stop_rx) = tokio::sync::watch::channel(false);
//! let summary = driver.run(stop_rx).await?;
//! assert_eq!(recorder.len() as u64, summary.windows);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod bridge;
pub mod processing;
pub mod session;

// Re-export key types
pub use bridge::{DeviceTransport, ProcessingWindow, StreamIngestor};
pub use processing::conditioner::{CalibrationState, SignalConditioner};
pub use processing::smoother::TemporalSmoother;
pub use processing::spectral::SpectralAnalyzer;
pub use session::{SessionContext, SessionDriver, SessionRecorder, SnapshotSink, WindowProcessor};
