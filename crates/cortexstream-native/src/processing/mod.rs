//! Signal processing pipelines
//!
//! Every unit here is a pure function of its window input plus session
//! state passed in by reference:
//! - [`filters`]: Biquad sections, Butterworth cascades, notch
//! - [`ica`]: FastICA fit and re-mixing
//! - [`conditioner`]: Filters followed by calibrated source separation
//! - [`spectral`]: Welch PSD, band powers, state rules
//! - [`artifact`]: Six detectors, quality blend, bad channels
//! - [`cardiac`]: Pulse peaks, heart rate and variability
//! - [`posture`]: Head pose from the motion channels
//! - [`talking`]: Jaw-motion talking detection
//! - [`smoother`]: Moving averages, majority vote with dwell lock

pub mod artifact;
pub mod cardiac;
pub mod conditioner;
pub mod filters;
pub mod ica;
pub mod posture;
pub mod smoother;
pub mod spectral;
pub mod talking;
