//! Centralized pipeline configuration
//!
//! Every threshold the pipeline uses lives here, grouped by the component
//! that consumes it. Each component receives its section at construction.
//! All sections implement [`Default`] with the values the pipeline was tuned
//! against and are `#[serde(default)]`, so a partial JSON document only
//! overrides the fields it names.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ============================================================================
// Top Level
// ============================================================================

/// Configuration for one device session
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Link watchdog and reconnection
    pub link: LinkConfig,
    /// Window assembly
    pub window: WindowConfig,
    /// Filters and blind source separation
    pub conditioner: ConditionerConfig,
    /// Welch spectral estimate
    pub spectral: SpectralConfig,
    /// Artifact detectors
    pub artifact: ArtifactConfig,
    /// Heart rate extraction
    pub cardiac: CardiacConfig,
    /// Brain-state smoothing
    pub smoothing: SmoothingConfig,
    /// Posture estimation and smoothing
    pub posture: PostureConfig,
    /// Jaw-motion talking detection
    pub talking: TalkingConfig,
    /// State-label rules
    pub classification: ClassificationConfig,
}

impl PipelineConfig {
    /// Check that every section describes a realizable pipeline
    ///
    /// # Errors
    ///
    /// Returns the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.link.validate()?;
        self.window.validate()?;
        self.conditioner.validate(self.window.eeg_rate_hz)?;
        self.spectral.validate(self.window.window_samples())?;
        self.artifact.validate()?;
        self.cardiac.validate()?;
        self.smoothing.brain.validate("smoothing.brain")?;
        self.posture.smoothing.validate("posture.smoothing")?;
        self.talking.validate()?;
        if self.smoothing.numeric_window == 0 {
            return Err(ConfigError::new("smoothing.numeric_window", "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.smoothing.artifact_ratio) {
            return Err(ConfigError::new("smoothing.artifact_ratio", "must be in [0, 1)"));
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("must be positive, got {value}")))
    }
}

fn band(field: &'static str, (low, high): (f64, f64)) -> Result<(), ConfigError> {
    if low >= 0.0 && high > low {
        Ok(())
    } else {
        Err(ConfigError::new(field, format!("invalid band {low}-{high} Hz")))
    }
}

// ============================================================================
// Link
// ============================================================================

/// Watchdog and bounded-reconnect settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// A stream silent this long counts as link loss (seconds)
    pub silence_timeout_s: f64,
    /// Consecutive read errors that count as link loss
    pub max_consecutive_errors: u32,
    /// Wait after tearing down subscriptions before resubscribing (seconds)
    pub reconnect_delay_s: f64,
    /// Wait between failed reconnect attempts (seconds)
    pub retry_delay_s: f64,
    /// Upper bound on a single connect attempt (seconds)
    pub connect_timeout_s: f64,
    /// Attempts per outage before the session fails
    pub max_reconnect_attempts: u32,
    /// Watchdog polling period (seconds)
    pub watchdog_interval_s: f64,
    /// Capacity of the per-connection event queue
    pub event_queue_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            silence_timeout_s: 5.0,
            max_consecutive_errors: 100,
            reconnect_delay_s: 2.0,
            retry_delay_s: 5.0,
            connect_timeout_s: 10.0,
            max_reconnect_attempts: 5,
            watchdog_interval_s: 0.25,
            event_queue_capacity: 4096,
        }
    }
}

impl LinkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("link.silence_timeout_s", self.silence_timeout_s)?;
        positive("link.connect_timeout_s", self.connect_timeout_s)?;
        positive("link.watchdog_interval_s", self.watchdog_interval_s)?;
        if self.reconnect_delay_s < 0.0 || self.retry_delay_s < 0.0 {
            return Err(ConfigError::new("link.reconnect_delay_s", "delays must be non-negative"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::new("link.max_reconnect_attempts", "must be at least 1"));
        }
        if self.event_queue_capacity == 0 {
            return Err(ConfigError::new("link.event_queue_capacity", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Windowing
// ============================================================================

/// Window assembly settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// EEG sample rate (Hz)
    pub eeg_rate_hz: f64,
    /// Window length (seconds)
    pub window_s: f64,
    /// Pulse/motion groups must reach this close to the window end (seconds)
    pub alignment_tolerance_s: f64,
    /// Longest wait for pulse/motion groups once EEG is complete (seconds)
    pub alignment_grace_s: f64,
    /// Pulse/motion history retained by ingestion (seconds)
    pub side_buffer_s: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            eeg_rate_hz: 256.0,
            window_s: 1.0,
            alignment_tolerance_s: 0.1,
            alignment_grace_s: 0.5,
            side_buffer_s: 5.0,
        }
    }
}

impl WindowConfig {
    /// EEG samples per window
    #[must_use]
    pub fn window_samples(&self) -> usize {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (self.eeg_rate_hz * self.window_s).round() as usize;
        n.max(1)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive("window.eeg_rate_hz", self.eeg_rate_hz)?;
        positive("window.window_s", self.window_s)?;
        positive("window.side_buffer_s", self.side_buffer_s)?;
        if self.alignment_grace_s < 0.0 || self.alignment_tolerance_s < 0.0 {
            return Err(ConfigError::new("window.alignment_grace_s", "must be non-negative"));
        }
        Ok(())
    }
}

// ============================================================================
// Conditioner
// ============================================================================

/// Filter and separation settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConditionerConfig {
    /// Bandpass lower edge (Hz)
    pub bandpass_low_hz: f64,
    /// Bandpass upper edge (Hz)
    pub bandpass_high_hz: f64,
    /// Local mains frequency (Hz)
    pub mains_hz: f64,
    /// Notch quality factor
    pub notch_q: f64,
    /// Baseline duration collected before the separation fit (seconds)
    pub calibration_s: f64,
    /// Fixed-point iterations per fit
    pub ica_max_iterations: usize,
    /// Convergence tolerance on unmixing-row alignment
    pub ica_tolerance: f64,
    /// Share of a component's mixing weight on frontal electrodes marking it ocular
    pub eye_frontal_share: f64,
    /// Share of a component's power below 4 Hz marking it ocular
    pub eye_low_freq_fraction: f64,
    /// Excess kurtosis marking a spiky ocular component
    pub eye_kurtosis: f64,
    /// Share of a component's power above `muscle_cutoff_hz` marking it muscular
    pub muscle_high_freq_fraction: f64,
    /// Lower edge of the muscle template band (Hz)
    pub muscle_cutoff_hz: f64,
}

impl Default for ConditionerConfig {
    fn default() -> Self {
        Self {
            bandpass_low_hz: 0.5,
            bandpass_high_hz: 50.0,
            mains_hz: 60.0,
            notch_q: 30.0,
            calibration_s: 30.0,
            ica_max_iterations: 200,
            ica_tolerance: 1e-6,
            eye_frontal_share: 0.7,
            eye_low_freq_fraction: 0.6,
            eye_kurtosis: 5.0,
            muscle_high_freq_fraction: 0.5,
            muscle_cutoff_hz: 20.0,
        }
    }
}

impl ConditionerConfig {
    fn validate(&self, sample_rate: f64) -> Result<(), ConfigError> {
        band("conditioner.bandpass", (self.bandpass_low_hz, self.bandpass_high_hz))?;
        if self.bandpass_high_hz >= sample_rate / 2.0 {
            return Err(ConfigError::new("conditioner.bandpass_high_hz", "must be below Nyquist"));
        }
        positive("conditioner.notch_q", self.notch_q)?;
        positive("conditioner.calibration_s", self.calibration_s)?;
        if self.ica_max_iterations == 0 {
            return Err(ConfigError::new("conditioner.ica_max_iterations", "must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Spectral
// ============================================================================

/// Welch estimate settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    /// Samples per Welch segment
    pub segment_len: usize,
    /// Fractional overlap between segments
    pub overlap: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self { segment_len: 128, overlap: 0.5 }
    }
}

impl SpectralConfig {
    fn validate(&self, window_samples: usize) -> Result<(), ConfigError> {
        if self.segment_len < 8 || self.segment_len > window_samples {
            return Err(ConfigError::new(
                "spectral.segment_len",
                format!("must be in 8..={window_samples}"),
            ));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return Err(ConfigError::new("spectral.overlap", "must be in [0, 1)"));
        }
        Ok(())
    }
}

// ============================================================================
// Artifacts
// ============================================================================

/// Whether a saturated channel may rejoin the average immediately
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BadChannelPolicy {
    /// Re-evaluate every window
    #[default]
    PerWindow,
    /// Keep a channel excluded until it stays clean for a number of windows
    Sticky {
        /// Consecutive clean windows needed to heal
        heal_after_windows: u32,
    },
}

/// Detector thresholds
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Frontal peak amplitude marking a blink (µV)
    pub blink_threshold_uv: f64,
    /// Shortest blink above half the threshold (seconds)
    pub blink_min_duration_s: f64,
    /// Longest blink above half the threshold (seconds)
    pub blink_max_duration_s: f64,
    /// Rotation rate that corroborates a blink (°/s)
    pub blink_gyro_threshold_dps: f64,
    /// Gyroscope axis checked for blink corroboration (0 = x, 1 = y, 2 = z)
    pub blink_gyro_axis: usize,
    /// EMG sub-band (Hz)
    pub emg_band_hz: (f64, f64),
    /// Share of raw power inside the EMG sub-band marking muscle activity
    pub emg_ratio_threshold: f64,
    /// Accelerometer axis aligned with jaw motion
    pub jaw_axis: usize,
    /// Jaw-axis acceleration variance corroborating muscle activity (g²)
    pub jaw_variance_g2: f64,
    /// Acceleration-magnitude change versus baseline marking motion (g)
    pub motion_accel_delta_g: f64,
    /// Rotation-magnitude change versus baseline marking motion (°/s)
    pub motion_gyro_delta_dps: f64,
    /// Within-window acceleration-magnitude variance marking motion (g²)
    pub motion_variance_g2: f64,
    /// Mains power over its session baseline marking interference
    pub line_factor: f64,
    /// Windows averaged before the mains baseline is trusted
    pub line_baseline_windows: u32,
    /// Deviation from the recent channel mean counted as an outlier (σ)
    pub statistical_sigma: f64,
    /// Share of samples beyond `statistical_sigma` that fires the detector
    pub statistical_min_fraction: f64,
    /// Windows averaged before channel statistics are trusted
    pub statistical_baseline_windows: u32,
    /// Amplitude used by the statistical detector before a baseline exists (µV)
    pub statistical_fallback_uv: f64,
    /// Amplitude marking a saturated channel (µV)
    pub saturation_uv: f64,
    /// Share of the window above `saturation_uv` for the saturation to count as sustained
    pub saturation_min_fraction: f64,
    /// Quality penalty of one fully confident detector
    pub detector_penalty: f64,
    /// Hysteresis for the bad-channel set
    pub bad_channel_policy: BadChannelPolicy,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            blink_threshold_uv: 150.0,
            blink_min_duration_s: 0.08,
            blink_max_duration_s: 0.32,
            blink_gyro_threshold_dps: 200.0,
            blink_gyro_axis: 2,
            emg_band_hz: (50.0, 100.0),
            emg_ratio_threshold: 0.15,
            jaw_axis: 0,
            jaw_variance_g2: 1e-4,
            motion_accel_delta_g: 0.15,
            motion_gyro_delta_dps: 100.0,
            motion_variance_g2: 0.1,
            line_factor: 2.0,
            line_baseline_windows: 5,
            statistical_sigma: 3.0,
            statistical_min_fraction: 0.01,
            statistical_baseline_windows: 5,
            statistical_fallback_uv: 150.0,
            saturation_uv: 200.0,
            saturation_min_fraction: 0.5,
            detector_penalty: 0.4,
            bad_channel_policy: BadChannelPolicy::PerWindow,
        }
    }
}

impl ArtifactConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        band("artifact.emg_band_hz", self.emg_band_hz)?;
        positive("artifact.blink_threshold_uv", self.blink_threshold_uv)?;
        positive("artifact.saturation_uv", self.saturation_uv)?;
        positive("artifact.statistical_sigma", self.statistical_sigma)?;
        positive("artifact.line_factor", self.line_factor)?;
        if self.blink_min_duration_s >= self.blink_max_duration_s {
            return Err(ConfigError::new("artifact.blink_min_duration_s", "must be below the maximum"));
        }
        if self.blink_gyro_axis > 2 || self.jaw_axis > 2 {
            return Err(ConfigError::new("artifact.jaw_axis", "axis must be 0, 1 or 2"));
        }
        if !(0.0..=1.0).contains(&self.detector_penalty) {
            return Err(ConfigError::new("artifact.detector_penalty", "must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.saturation_min_fraction) {
            return Err(ConfigError::new("artifact.saturation_min_fraction", "must be in [0, 1]"));
        }
        Ok(())
    }
}

// ============================================================================
// Cardiac
// ============================================================================

/// Pulse extraction settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardiacConfig {
    /// Pulse sample rate (Hz)
    pub ppg_rate_hz: f64,
    /// Bandpass lower edge (Hz)
    pub filter_low_hz: f64,
    /// Bandpass upper edge (Hz)
    pub filter_high_hz: f64,
    /// Skip the bandpass below this sample rate (Hz)
    pub min_filter_rate_hz: f64,
    /// Rolling beat buffer (seconds)
    pub buffer_s: f64,
    /// Buffer needed before peak detection runs (seconds)
    pub min_buffer_s: f64,
    /// Filter settling time excluded from peak search (seconds)
    pub settle_s: f64,
    /// Beats required for a valid reading
    pub min_peaks: usize,
    /// Physiological ceiling (beats per minute)
    pub max_bpm: f64,
    /// Physiological floor (beats per minute)
    pub min_bpm: f64,
    /// Peak prominence on the z-scored signal
    pub prominence: f64,
    /// Prominence retried when the first pass finds fewer than two peaks
    pub fallback_prominence: f64,
    /// No pulse sample for this long reports signal loss (seconds)
    pub signal_lost_s: f64,
}

impl Default for CardiacConfig {
    fn default() -> Self {
        Self {
            ppg_rate_hz: 64.0,
            filter_low_hz: 0.5,
            filter_high_hz: 4.0,
            min_filter_rate_hz: 10.0,
            buffer_s: 60.0,
            min_buffer_s: 3.0,
            settle_s: 2.0,
            min_peaks: 6,
            max_bpm: 200.0,
            min_bpm: 30.0,
            prominence: 0.3,
            fallback_prominence: 0.1,
            signal_lost_s: 5.0,
        }
    }
}

impl CardiacConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("cardiac.ppg_rate_hz", self.ppg_rate_hz)?;
        band("cardiac.filter", (self.filter_low_hz, self.filter_high_hz))?;
        band("cardiac.bpm", (self.min_bpm, self.max_bpm))?;
        positive("cardiac.buffer_s", self.buffer_s)?;
        if self.min_peaks < 2 {
            return Err(ConfigError::new("cardiac.min_peaks", "need at least two beats"));
        }
        Ok(())
    }
}

// ============================================================================
// Smoothing
// ============================================================================

/// Majority-vote plus dwell-lock settings for one categorical signal
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CategoricalSmoothing {
    /// Labels kept in the voting window
    pub history: usize,
    /// Share of the window a challenger needs to take over
    pub consensus_ratio: f64,
    /// Minimum time a label is held before it can be replaced (seconds)
    pub dwell_s: f64,
    /// Labels required before the first label is emitted
    pub min_samples: usize,
}

impl Default for CategoricalSmoothing {
    fn default() -> Self {
        Self { history: 10, consensus_ratio: 0.6, dwell_s: 10.0, min_samples: 1 }
    }
}

impl CategoricalSmoothing {
    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.history == 0 || self.min_samples == 0 || self.min_samples > self.history {
            return Err(ConfigError::new(field, "need 1 <= min_samples <= history"));
        }
        if !(self.consensus_ratio > 0.5 && self.consensus_ratio <= 1.0) {
            return Err(ConfigError::new(field, "consensus_ratio must be in (0.5, 1]"));
        }
        if self.dwell_s < 0.0 {
            return Err(ConfigError::new(field, "dwell_s must be non-negative"));
        }
        Ok(())
    }
}

/// Brain-state smoothing settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    /// Windows in the band-power and quality moving average
    pub numeric_window: usize,
    /// Share of recent windows a detector must fire in to raise `has_artifact`
    pub artifact_ratio: f64,
    /// State-label vote
    pub brain: CategoricalSmoothing,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self { numeric_window: 10, artifact_ratio: 0.5, brain: CategoricalSmoothing::default() }
    }
}

// ============================================================================
// Posture
// ============================================================================

/// Head-pose thresholds (degrees, °/s)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostureConfig {
    /// Angle samples kept for the history-based rules
    pub angle_history: usize,
    /// History needed before the history-based rules apply
    pub min_history: usize,
    /// Rotation rate that means the head is moving
    pub moving_gyro_dps: f64,
    /// Pitch or roll spread that means the pose is unstable
    pub unstable_std_deg: f64,
    /// Pitch and roll below this are level
    pub level_deg: f64,
    /// Pitch beyond this is a forward or backward tilt
    pub pitch_tilt_deg: f64,
    /// Roll beyond this is a side tilt
    pub roll_tilt_deg: f64,
    /// Instantaneous angle below this is level
    pub instant_level_deg: f64,
    /// Instantaneous angle beyond this is a tilt
    pub instant_tilt_deg: f64,
    /// Label vote
    pub smoothing: CategoricalSmoothing,
}

impl Default for PostureConfig {
    fn default() -> Self {
        Self {
            angle_history: 60,
            min_history: 15,
            moving_gyro_dps: 30.0,
            unstable_std_deg: 10.0,
            level_deg: 10.0,
            pitch_tilt_deg: 20.0,
            roll_tilt_deg: 15.0,
            instant_level_deg: 15.0,
            instant_tilt_deg: 30.0,
            smoothing: CategoricalSmoothing {
                history: 60,
                consensus_ratio: 0.6,
                dwell_s: 15.0,
                min_samples: 5,
            },
        }
    }
}

// ============================================================================
// Talking
// ============================================================================

/// Jaw-motion talking detector settings
///
/// Confidence blends three scores, each capped at 1: gyro variance on
/// `gyro_axis` over `gyro_variance_dps2`, the speech-band share of that axis
/// over `rhythm_share`, and mean accelerometer variance over
/// `accel_variance_g2`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TalkingConfig {
    /// Motion history analysed per window (seconds)
    pub buffer_s: f64,
    /// Gyroscope axis the jaw rotates about (0 = x, 1 = y, 2 = z)
    pub gyro_axis: usize,
    /// Gyro variance that scores 1 (°²/s²)
    pub gyro_variance_dps2: f64,
    /// Syllable-rate band (Hz)
    pub speech_band_hz: (f64, f64),
    /// Speech-band share of gyro power that scores 1
    pub rhythm_share: f64,
    /// Accelerometer variance that scores 1 (g²)
    pub accel_variance_g2: f64,
    /// Weights of the (variance, rhythm, accel) scores
    pub weights: (f64, f64, f64),
    /// Confidence needed in standard mode
    pub threshold: f64,
    /// Confidence needed in meditation mode
    pub meditation_threshold: f64,
    /// Respiration band checked in meditation mode (Hz)
    pub breathing_band_hz: (f64, f64),
    /// Breathing score above which the rhythm is treated as respiration
    pub breathing_score: f64,
    /// Factor applied to the rhythm score when breathing dominates
    pub breathing_rhythm_factor: f64,
    /// Confidence needed while breathing dominates
    pub breathing_threshold: f64,
    /// Label vote
    pub smoothing: CategoricalSmoothing,
}

impl Default for TalkingConfig {
    fn default() -> Self {
        Self {
            buffer_s: 3.0,
            gyro_axis: 1,
            gyro_variance_dps2: 5.0,
            speech_band_hz: (2.0, 5.0),
            rhythm_share: 0.3,
            accel_variance_g2: 0.01,
            weights: (0.4, 0.5, 0.1),
            threshold: 0.6,
            meditation_threshold: 0.75,
            breathing_band_hz: (0.2, 0.5),
            breathing_score: 0.5,
            breathing_rhythm_factor: 0.3,
            breathing_threshold: 0.85,
            smoothing: CategoricalSmoothing {
                history: 5,
                consensus_ratio: 0.6,
                dwell_s: 2.0,
                min_samples: 1,
            },
        }
    }
}

impl TalkingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        positive("talking.buffer_s", self.buffer_s)?;
        positive("talking.gyro_variance_dps2", self.gyro_variance_dps2)?;
        positive("talking.rhythm_share", self.rhythm_share)?;
        positive("talking.accel_variance_g2", self.accel_variance_g2)?;
        band("talking.speech_band_hz", self.speech_band_hz)?;
        band("talking.breathing_band_hz", self.breathing_band_hz)?;
        if self.gyro_axis > 2 {
            return Err(ConfigError::new("talking.gyro_axis", "axis must be 0, 1 or 2"));
        }
        for (field, value) in [
            ("talking.threshold", self.threshold),
            ("talking.meditation_threshold", self.meditation_threshold),
            ("talking.breathing_threshold", self.breathing_threshold),
            ("talking.breathing_rhythm_factor", self.breathing_rhythm_factor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::new(field, "must be in [0, 1]"));
            }
        }
        self.smoothing.validate("talking.smoothing")
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Which label family the band-power rules produce
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Focus / relaxation labels
    #[default]
    Standard,
    /// Meditation-depth labels
    Meditation,
}

/// State-label rule settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    /// Label family
    pub mode: SessionMode,
    /// Windows below this quality are labelled low-confidence
    pub min_quality: f64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self { mode: SessionMode::Standard, min_quality: 0.3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.window_samples(), 256);
        assert_eq!(config.link.max_reconnect_attempts, 5);
        assert!((config.posture.smoothing.dwell_s - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_partial_json_overrides() {
        let json = r#"{ "conditioner": { "mains_hz": 50.0 }, "artifact": { "emg_band_hz": [40.0, 120.0] } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert!((config.conditioner.mains_hz - 50.0).abs() < 1e-9);
        assert!((config.conditioner.notch_q - 30.0).abs() < 1e-9);
        assert_eq!(config.artifact.emg_band_hz, (40.0, 120.0));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sticky_policy_roundtrip() {
        let json = r#"{ "artifact": { "bad_channel_policy": { "policy": "sticky", "heal_after_windows": 3 } } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            config.artifact.bad_channel_policy,
            BadChannelPolicy::Sticky { heal_after_windows: 3 }
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.link.max_reconnect_attempts = 0;
        assert_eq!(config.validate().unwrap_err().field, "link.max_reconnect_attempts");

        let mut config = PipelineConfig::default();
        config.smoothing.brain.consensus_ratio = 0.5;
        assert_eq!(config.validate().unwrap_err().field, "smoothing.brain");

        let mut config = PipelineConfig::default();
        config.conditioner.bandpass_high_hz = 200.0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.talking.gyro_axis = 3;
        assert_eq!(config.validate().unwrap_err().field, "talking.gyro_axis");

        let mut config = PipelineConfig::default();
        config.talking.speech_band_hz = (5.0, 2.0);
        assert_eq!(config.validate().unwrap_err().field, "talking.speech_band_hz");
    }

    #[test]
    fn test_talking_defaults_and_override() {
        let json = r#"{ "talking": { "gyro_axis": 0, "threshold": 0.7 } }"#;
        let config: PipelineConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.talking.gyro_axis, 0);
        assert!((config.talking.threshold - 0.7).abs() < 1e-12);
        assert!((config.talking.meditation_threshold - 0.75).abs() < 1e-12);
        assert_eq!(config.talking.speech_band_hz, (2.0, 5.0));
        assert!(config.validate().is_ok());
    }
}
