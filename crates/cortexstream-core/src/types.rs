//! Core data types for headband biosignal streams
//!
//! This module defines the fundamental types used throughout the pipeline:
//! - Channel identifiers for the four-electrode headband
//! - Timestamped raw samples for every stream group
//! - Frequency band definitions and normalized band powers
//! - Classification labels (brain state, posture)

use serde::{Deserialize, Serialize};

use crate::error::SampleError;

// ============================================================================
// Channels and Streams
// ============================================================================

/// EEG electrode positions (10-20 system) on the headband
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EegChannel {
    /// Left temporal-parietal
    Tp9 = 0,
    /// Left frontal
    Af7 = 1,
    /// Right frontal
    Af8 = 2,
    /// Right temporal-parietal
    Tp10 = 3,
}

impl EegChannel {
    /// All channels in acquisition order
    pub const ALL: [Self; 4] = [Self::Tp9, Self::Af7, Self::Af8, Self::Tp10];

    /// Number of EEG channels
    pub const COUNT: usize = 4;

    /// Frontal channels (closest to the eyes and forehead muscles)
    pub const FRONTAL: [Self; 2] = [Self::Af7, Self::Af8];

    /// Get channel index (0-3)
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Create from index
    #[must_use]
    pub const fn from_index(idx: usize) -> Option<Self> {
        match idx {
            0 => Some(Self::Tp9),
            1 => Some(Self::Af7),
            2 => Some(Self::Af8),
            3 => Some(Self::Tp10),
            _ => None,
        }
    }

    /// Get the 10-20 label
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Tp9 => "TP9",
            Self::Af7 => "AF7",
            Self::Af8 => "AF8",
            Self::Tp10 => "TP10",
        }
    }

    /// Whether the electrode sits on the forehead
    #[must_use]
    pub const fn is_frontal(self) -> bool {
        matches!(self, Self::Af7 | Self::Af8)
    }
}

/// Channels excluded from cross-channel averaging in one window
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BadChannelSet {
    mask: [bool; EegChannel::COUNT],
}

impl BadChannelSet {
    /// No bad channels
    #[must_use]
    pub const fn new() -> Self {
        Self { mask: [false; EegChannel::COUNT] }
    }

    /// Flag a channel
    pub fn insert(&mut self, ch: EegChannel) {
        self.mask[ch.index()] = true;
    }

    /// Clear a channel
    pub fn remove(&mut self, ch: EegChannel) {
        self.mask[ch.index()] = false;
    }

    /// Whether a channel is flagged
    #[must_use]
    pub const fn contains(&self, ch: EegChannel) -> bool {
        self.mask[ch.index()]
    }

    /// Number of flagged channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.mask.iter().filter(|&&b| b).count()
    }

    /// Whether no channel is flagged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every channel is flagged
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len() == EegChannel::COUNT
    }

    /// Flagged channels in acquisition order
    pub fn iter(&self) -> impl Iterator<Item = EegChannel> + '_ {
        EegChannel::ALL.into_iter().filter(|ch| self.contains(*ch))
    }

    /// Channels not flagged, in acquisition order
    pub fn good(&self) -> impl Iterator<Item = EegChannel> + '_ {
        EegChannel::ALL.into_iter().filter(|ch| !self.contains(*ch))
    }

    /// Flagged channels as a list
    #[must_use]
    pub fn to_vec(&self) -> Vec<EegChannel> {
        self.iter().collect()
    }
}

impl FromIterator<EegChannel> for BadChannelSet {
    fn from_iter<I: IntoIterator<Item = EegChannel>>(iter: I) -> Self {
        let mut set = Self::new();
        for ch in iter {
            set.insert(ch);
        }
        set
    }
}

/// Independently timestamped stream groups delivered by the device
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    /// Brain electrodes
    Eeg,
    /// Photoplethysmography (pulse)
    Ppg,
    /// Accelerometer
    Accel,
    /// Gyroscope
    Gyro,
}

impl StreamKind {
    /// All stream groups
    pub const ALL: [Self; 4] = [Self::Eeg, Self::Ppg, Self::Accel, Self::Gyro];

    /// Get the stream name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Eeg => "eeg",
            Self::Ppg => "ppg",
            Self::Accel => "accel",
            Self::Gyro => "gyro",
        }
    }

    /// Nominal sample rate of the stream in Hz
    #[must_use]
    pub const fn nominal_rate_hz(self) -> f64 {
        match self {
            Self::Eeg => 256.0,
            Self::Ppg => 64.0,
            Self::Accel | Self::Gyro => 52.0,
        }
    }
}

// ============================================================================
// Raw Samples
// ============================================================================

/// Three-axis motion vector
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X axis
    pub x: f64,
    /// Y axis
    pub y: f64,
    /// Z axis
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Euclidean norm
    #[must_use]
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Component by axis index (0 = x, 1 = y, 2 = z)
    #[must_use]
    pub fn axis(&self, axis: usize) -> f64 {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// One EEG frame across all four electrodes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EegSample {
    /// Device timestamp in seconds
    pub timestamp: f64,
    /// Channel values in µV, indexed by [`EegChannel::index`]
    pub channels: [f64; EegChannel::COUNT],
}

impl EegSample {
    /// Create a new EEG sample
    #[must_use]
    pub const fn new(timestamp: f64, channels: [f64; EegChannel::COUNT]) -> Self {
        Self { timestamp, channels }
    }

    /// Get a channel value
    #[inline]
    #[must_use]
    pub fn channel(&self, ch: EegChannel) -> f64 {
        self.channels[ch.index()]
    }
}

/// Maximum number of optical channels in a pulse sample
pub const MAX_PPG_CHANNELS: usize = 3;

/// One pulse-sensor reading (ambient, infrared, red)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PpgSample {
    /// Device timestamp in seconds
    pub timestamp: f64,
    values: [f64; MAX_PPG_CHANNELS],
    len: u8,
}

impl PpgSample {
    /// Create from 1-3 optical channel readings
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::ChannelCount`] for an empty or oversized reading.
    pub fn new(timestamp: f64, readings: &[f64]) -> Result<Self, SampleError> {
        if readings.is_empty() || readings.len() > MAX_PPG_CHANNELS {
            return Err(SampleError::ChannelCount {
                stream: StreamKind::Ppg,
                got: readings.len(),
            });
        }
        let mut values = [0.0; MAX_PPG_CHANNELS];
        values[..readings.len()].copy_from_slice(readings);
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self { timestamp, values, len: readings.len() as u8 })
    }

    /// Optical readings present in this sample
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values[..usize::from(self.len)]
    }

    /// Reading used for beat detection: infrared when present, else the first
    #[must_use]
    pub fn pulse_value(&self) -> f64 {
        if self.len >= 2 {
            self.values[1]
        } else {
            self.values[0]
        }
    }
}

/// One accelerometer (g) or gyroscope (°/s) reading
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    /// Device timestamp in seconds
    pub timestamp: f64,
    /// Three-axis reading
    pub value: Vec3,
}

impl MotionSample {
    /// Create a new motion sample
    #[must_use]
    pub const fn new(timestamp: f64, value: Vec3) -> Self {
        Self { timestamp, value }
    }
}

/// A single timestamped reading from any stream group
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stream", rename_all = "snake_case")]
pub enum RawSample {
    /// Brain electrodes
    Eeg(EegSample),
    /// Pulse sensor
    Ppg(PpgSample),
    /// Accelerometer
    Accel(MotionSample),
    /// Gyroscope
    Gyro(MotionSample),
}

impl RawSample {
    /// Stream group this sample belongs to
    #[must_use]
    pub const fn stream(&self) -> StreamKind {
        match self {
            Self::Eeg(_) => StreamKind::Eeg,
            Self::Ppg(_) => StreamKind::Ppg,
            Self::Accel(_) => StreamKind::Accel,
            Self::Gyro(_) => StreamKind::Gyro,
        }
    }

    /// Device timestamp in seconds
    #[must_use]
    pub const fn timestamp(&self) -> f64 {
        match self {
            Self::Eeg(s) => s.timestamp,
            Self::Ppg(s) => s.timestamp,
            Self::Accel(s) | Self::Gyro(s) => s.timestamp,
        }
    }

    /// Reject samples carrying non-finite values or timestamps
    ///
    /// # Errors
    ///
    /// Returns [`SampleError::NonFinite`] naming the offending stream.
    pub fn validate(&self) -> Result<(), SampleError> {
        let finite = self.timestamp().is_finite()
            && match self {
                Self::Eeg(s) => s.channels.iter().all(|v| v.is_finite()),
                Self::Ppg(s) => s.values().iter().all(|v| v.is_finite()),
                Self::Accel(s) | Self::Gyro(s) => s.value.is_finite(),
            };
        if finite {
            Ok(())
        } else {
            Err(SampleError::NonFinite { stream: self.stream() })
        }
    }
}

// ============================================================================
// Frequency Bands
// ============================================================================

/// EEG frequency bands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EegBand {
    /// Delta: 0.5-4 Hz (deep sleep)
    Delta,
    /// Theta: 4-8 Hz (drowsiness, memory)
    Theta,
    /// Alpha: 8-13 Hz (relaxed, eyes closed)
    Alpha,
    /// Beta: 13-30 Hz (active thinking)
    Beta,
    /// Gamma: 30-50 Hz (cognitive processing, EMG leakage)
    Gamma,
}

impl EegBand {
    /// All bands in ascending frequency order
    pub const ALL: [Self; 5] = [Self::Delta, Self::Theta, Self::Alpha, Self::Beta, Self::Gamma];

    /// Get the frequency range for this band (low, high) in Hz
    #[inline]
    #[must_use]
    pub const fn range_hz(self) -> (f64, f64) {
        match self {
            Self::Delta => (0.5, 4.0),
            Self::Theta => (4.0, 8.0),
            Self::Alpha => (8.0, 13.0),
            Self::Beta => (13.0, 30.0),
            Self::Gamma => (30.0, 50.0),
        }
    }

    /// Get the band name
    #[inline]
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Delta => "Delta",
            Self::Theta => "Theta",
            Self::Alpha => "Alpha",
            Self::Beta => "Beta",
            Self::Gamma => "Gamma",
        }
    }
}

/// Power per EEG band
///
/// After normalization the five values are percentages summing to 100.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    /// Delta band power (0.5-4 Hz)
    pub delta: f64,
    /// Theta band power (4-8 Hz)
    pub theta: f64,
    /// Alpha band power (8-13 Hz)
    pub alpha: f64,
    /// Beta band power (13-30 Hz)
    pub beta: f64,
    /// Gamma band power (30-50 Hz)
    pub gamma: f64,
}

impl BandPowers {
    /// Equal share in every band
    #[must_use]
    pub const fn uniform() -> Self {
        Self { delta: 20.0, theta: 20.0, alpha: 20.0, beta: 20.0, gamma: 20.0 }
    }

    /// Build from a per-band accessor
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(EegBand) -> f64) -> Self {
        Self {
            delta: f(EegBand::Delta),
            theta: f(EegBand::Theta),
            alpha: f(EegBand::Alpha),
            beta: f(EegBand::Beta),
            gamma: f(EegBand::Gamma),
        }
    }

    /// Get the power for one band
    #[must_use]
    pub const fn get(&self, band: EegBand) -> f64 {
        match band {
            EegBand::Delta => self.delta,
            EegBand::Theta => self.theta,
            EegBand::Alpha => self.alpha,
            EegBand::Beta => self.beta,
            EegBand::Gamma => self.gamma,
        }
    }

    /// Total power across all bands
    #[must_use]
    pub fn total(&self) -> f64 {
        self.delta + self.theta + self.alpha + self.beta + self.gamma
    }

    /// Rescale to percentages summing to 100
    ///
    /// A distribution with no energy carries no information and maps to
    /// [`BandPowers::uniform`].
    #[must_use]
    pub fn normalized(&self) -> Self {
        let clamped = Self::from_fn(|band| self.get(band).max(0.0));
        let total = clamped.total();
        if total > f64::EPSILON && total.is_finite() {
            Self::from_fn(|band| clamped.get(band) / total * 100.0)
        } else {
            Self::uniform()
        }
    }

    /// Arithmetic mean of several band-power records
    #[must_use]
    pub fn mean<'a>(records: impl IntoIterator<Item = &'a Self>) -> Option<Self> {
        let mut sum = Self::default();
        let mut count = 0usize;
        for r in records {
            sum = Self::from_fn(|band| sum.get(band) + r.get(band));
            count += 1;
        }
        if count == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = count as f64;
        Some(Self::from_fn(|band| sum.get(band) / n))
    }

    /// Beta/alpha ratio (engagement metric)
    #[must_use]
    pub fn beta_alpha_ratio(&self) -> f64 {
        if self.alpha > 0.0 {
            self.beta / self.alpha
        } else {
            0.0
        }
    }

    /// Alpha/theta ratio (attention/relaxation metric)
    #[must_use]
    pub fn alpha_theta_ratio(&self) -> f64 {
        if self.theta > 0.0 {
            self.alpha / self.theta
        } else {
            0.0
        }
    }
}

// ============================================================================
// Classification Labels
// ============================================================================

/// Mental-state label derived from band-power ratios
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrainState {
    /// Dominant beta, low gamma
    Focused,
    /// Elevated beta and gamma together
    PeakFocus,
    /// Dominant alpha
    Relaxed,
    /// Elevated theta with moderate alpha
    Creative,
    /// Moderately elevated delta with theta
    Drowsy,
    /// Ambiguous ratios or implausibly high delta
    Mixed,
    /// Window quality too low to classify
    LowConfidence,
    /// Strong theta and alpha (meditation mode)
    DeepMeditation,
    /// Dominant alpha (meditation mode)
    Meditative,
    /// Rising alpha with quiet beta (meditation mode)
    EnteringMeditation,
    /// Leaving the meditative state (meditation mode)
    Returning,
    /// No classification yet
    #[default]
    Unknown,
}

impl BrainState {
    /// Get the label as emitted in snapshots
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Focused => "focused",
            Self::PeakFocus => "peak_focus",
            Self::Relaxed => "relaxed",
            Self::Creative => "creative",
            Self::Drowsy => "drowsy",
            Self::Mixed => "mixed",
            Self::LowConfidence => "low_confidence",
            Self::DeepMeditation => "deep_meditation",
            Self::Meditative => "meditative",
            Self::EnteringMeditation => "entering_meditation",
            Self::Returning => "returning",
            Self::Unknown => "unknown",
        }
    }
}

/// Head-posture label derived from the motion channels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureLabel {
    /// Head level
    Good,
    /// Small but persistent tilt
    SlightTilt,
    /// Head pitched forward
    ForwardTilt,
    /// Head pitched back
    BackwardTilt,
    /// Head rolled to one side
    SideTilt,
    /// Angles fluctuating without gross motion
    Unstable,
    /// Head rotating
    Moving,
    /// Not enough motion data
    #[default]
    Unknown,
}

/// Speech activity inferred from jaw motion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechActivity {
    /// No jaw rhythm
    #[default]
    Quiet,
    /// Rhythmic jaw movement at syllable rate
    Talking,
}

// ============================================================================
// Tests
// ============================================================================
