//! Per-second snapshot emitted to downstream consumers
//!
//! A [`Snapshot`] is immutable once built. Every streaming field always
//! carries a value; missing data is expressed through explicit status flags
//! (`cardiac.valid`, `calibration.fitted`, `artifact.quality_score`).

use serde::{Deserialize, Serialize};

use crate::types::{BandPowers, BrainState, EegChannel, PostureLabel, SpeechActivity};

// ============================================================================
// Artifacts
// ============================================================================

/// Artifact category reported by a detector
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// No detector fired
    #[default]
    Clean,
    /// Frontal transient co-occurring with head rotation
    EyeBlink,
    /// High-frequency muscle power
    Muscle,
    /// Head movement
    Motion,
    /// Mains pickup above its session baseline
    LineInterference,
    /// Samples far outside recent channel statistics
    Statistical,
    /// Channel railed above the amplitude ceiling
    Saturation,
}

impl ArtifactKind {
    /// The six detectors, in reporting order
    pub const DETECTORS: [Self; 6] = [
        Self::EyeBlink,
        Self::Muscle,
        Self::Motion,
        Self::LineInterference,
        Self::Statistical,
        Self::Saturation,
    ];

    /// Detector name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::EyeBlink => "eye_blink",
            Self::Muscle => "muscle",
            Self::Motion => "motion",
            Self::LineInterference => "line_interference",
            Self::Statistical => "statistical",
            Self::Saturation => "saturation",
        }
    }
}

/// Fixed-shape per-detector boolean map
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorFlags {
    /// Transient-spike detector
    pub eye_blink: bool,
    /// Muscle-frequency detector
    pub muscle: bool,
    /// Motion-correlation detector
    pub motion: bool,
    /// Line-interference detector
    pub line_interference: bool,
    /// Statistical-outlier detector
    pub statistical: bool,
    /// Per-channel saturation detector
    pub saturation: bool,
}

impl DetectorFlags {
    /// Get the flag for one detector (`Clean` is never flagged)
    #[must_use]
    pub const fn get(&self, kind: ArtifactKind) -> bool {
        match kind {
            ArtifactKind::Clean => false,
            ArtifactKind::EyeBlink => self.eye_blink,
            ArtifactKind::Muscle => self.muscle,
            ArtifactKind::Motion => self.motion,
            ArtifactKind::LineInterference => self.line_interference,
            ArtifactKind::Statistical => self.statistical,
            ArtifactKind::Saturation => self.saturation,
        }
    }

    /// Set the flag for one detector
    pub fn set(&mut self, kind: ArtifactKind, fired: bool) {
        match kind {
            ArtifactKind::Clean => {}
            ArtifactKind::EyeBlink => self.eye_blink = fired,
            ArtifactKind::Muscle => self.muscle = fired,
            ArtifactKind::Motion => self.motion = fired,
            ArtifactKind::LineInterference => self.line_interference = fired,
            ArtifactKind::Statistical => self.statistical = fired,
            ArtifactKind::Saturation => self.saturation = fired,
        }
    }

    /// Number of detectors that fired
    #[must_use]
    pub fn count(&self) -> usize {
        ArtifactKind::DETECTORS.iter().filter(|&&k| self.get(k)).count()
    }

    /// Whether any detector fired
    #[must_use]
    pub fn any(&self) -> bool {
        self.count() > 0
    }
}

/// Merged artifact verdict for one window
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVerdict {
    /// A detector fired in more than the configured share of the smoothing window
    pub has_artifact: bool,
    /// Most confident detector behind `has_artifact`
    pub primary_type: ArtifactKind,
    /// Raw per-window detector results
    pub per_detector: DetectorFlags,
    /// Confidence that this window's features are trustworthy, in [0, 1]
    pub quality_score: f64,
}

impl Default for ArtifactVerdict {
    fn default() -> Self {
        Self {
            has_artifact: false,
            primary_type: ArtifactKind::Clean,
            per_detector: DetectorFlags::default(),
            quality_score: 1.0,
        }
    }
}

/// Continuous artifact intensities, each in [0, 1]
///
/// Muscle tension and movement are kept as features rather than removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactFeatures {
    /// High-frequency share of raw EEG power
    pub emg_intensity: f64,
    /// Mean frontal amplitude
    pub forehead_emg: f64,
    /// Frontal peak above the blink threshold
    pub blink_intensity: f64,
    /// Acceleration variance or rotation rate
    pub movement_intensity: f64,
}

// ============================================================================
// Cardiac
// ============================================================================

/// Pulse-channel status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardiacStatus {
    /// Enough beats detected
    Valid,
    /// Pulse samples arriving but too few beats yet
    #[default]
    Calibrating,
    /// No pulse samples recently
    SignalLost,
}

/// Heart rate and variability
///
/// Numeric fields are withheld (not zeroed) unless the reading is valid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CardiacMetrics {
    valid: bool,
    status: CardiacStatus,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    heart_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    rmssd: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    sdnn: Option<f64>,
    beats: usize,
}

impl CardiacMetrics {
    /// A valid reading
    #[must_use]
    pub const fn measured(heart_rate: f64, rmssd: f64, sdnn: f64, beats: usize) -> Self {
        Self {
            valid: true,
            status: CardiacStatus::Valid,
            heart_rate: Some(heart_rate),
            rmssd: Some(rmssd),
            sdnn: Some(sdnn),
            beats,
        }
    }

    /// No reading, with the reason
    #[must_use]
    pub const fn unavailable(status: CardiacStatus, beats: usize) -> Self {
        Self { valid: false, status, heart_rate: None, rmssd: None, sdnn: None, beats }
    }

    /// Whether the numeric fields are present
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Status behind the reading
    #[must_use]
    pub const fn status(&self) -> CardiacStatus {
        self.status
    }

    /// Beats per minute
    #[must_use]
    pub const fn heart_rate(&self) -> Option<f64> {
        self.heart_rate
    }

    /// Root mean square of successive RR differences (ms)
    #[must_use]
    pub const fn rmssd(&self) -> Option<f64> {
        self.rmssd
    }

    /// Standard deviation of RR intervals (ms)
    #[must_use]
    pub const fn sdnn(&self) -> Option<f64> {
        self.sdnn
    }

    /// Beats detected in the rolling buffer
    #[must_use]
    pub const fn beats(&self) -> usize {
        self.beats
    }
}

// ============================================================================
// Calibration, Link, Posture
// ============================================================================

/// Separation-model calibration progress
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    /// Model fitted and applied
    pub fitted: bool,
    /// Baseline collected, 0-100
    pub progress: f64,
    /// Fit attempted and failed; conditioning continues unseparated
    pub failed: bool,
}

/// Link state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Streaming
    Connected,
    /// Not connected
    #[default]
    Disconnected,
    /// Bounded reconnect in progress
    Reconnecting,
    /// Reconnect attempts exhausted; terminal
    Failed,
}

/// Link bookkeeping owned by ingestion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSession {
    /// Current link state
    pub status: ConnectionStatus,
    /// Read errors since the last good sample
    pub consecutive_errors: u32,
    /// Attempts made in the current (or last) outage
    pub attempt_count: u32,
    /// Successful reconnections this session
    pub reconnects: u32,
}

/// Head pose
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PostureReading {
    /// Smoothed posture label
    pub label: PostureLabel,
    /// Forward (+) / backward (-) tilt in degrees
    pub pitch_deg: f64,
    /// Side tilt in degrees
    pub roll_deg: f64,
}

/// Talking state; EEG during talking is kept and labelled, not discarded
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TalkingStatus {
    /// Smoothed, dwell-locked activity
    pub activity: SpeechActivity,
    /// This window's detector confidence, 0-1
    pub confidence: f64,
    /// Seconds spent in the current talking period (0 when quiet)
    pub duration_s: f64,
}

/// Scalar indices derived from band powers and heart rate, each in [0, 1]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedMetrics {
    /// High-frequency (beta + gamma) share
    pub cognitive_load: f64,
    /// Beta share blended with heart-rate deviation
    pub stress_index: f64,
}

// ============================================================================
// Snapshot
// ============================================================================

/// Everything the pipeline knows about one second
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Monotonic window counter
    pub sequence: u64,
    /// Device time at the end of the window (seconds)
    pub timestamp: f64,
    /// Smoothed band powers (percent)
    pub band_powers: BandPowers,
    /// This window's band powers (percent)
    pub window_band_powers: BandPowers,
    /// Smoothed, dwell-locked state label
    pub state_label: BrainState,
    /// When the current state label took over
    pub state_entered_at: f64,
    /// Artifact verdict
    pub artifact: ArtifactVerdict,
    /// Smoothed window quality
    pub quality_avg: f64,
    /// Continuous artifact intensities
    pub features: ArtifactFeatures,
    /// Channels excluded from averaging in this window
    pub bad_channels: Vec<EegChannel>,
    /// Heart rate and variability
    pub cardiac: CardiacMetrics,
    /// Separation-model calibration
    pub calibration: CalibrationStatus,
    /// Head pose
    pub posture: PostureReading,
    /// Speech activity from jaw motion
    pub talking: TalkingStatus,
    /// Derived indices
    pub derived: DerivedMetrics,
    /// Link state when the window was produced
    pub link: ConnectionSession,
}

impl Snapshot {
    /// The normalized brain-state view offered to conversational consumers
    #[must_use]
    pub fn brain_state_view(&self) -> BrainStateView {
        BrainStateView {
            band_powers: self.band_powers,
            state_label: self.state_label,
            heart_rate: self.cardiac.heart_rate(),
            quality_score: self.artifact.quality_score,
        }
    }
}

/// Minimal read-only view of a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BrainStateView {
    /// Smoothed band powers (percent)
    pub band_powers: BandPowers,
    /// Smoothed state label
    pub state_label: BrainState,
    /// Beats per minute when valid
    pub heart_rate: Option<f64>,
    /// Window quality in [0, 1]
    pub quality_score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_flags_count() {
        let mut flags = DetectorFlags::default();
        assert!(!flags.any());
        flags.set(ArtifactKind::Muscle, true);
        flags.set(ArtifactKind::Saturation, true);
        flags.set(ArtifactKind::Clean, true);
        assert_eq!(flags.count(), 2);
        assert!(flags.get(ArtifactKind::Muscle));
        assert!(!flags.get(ArtifactKind::Clean));
    }

    #[test]
    fn test_invalid_cardiac_withholds_numbers() {
        let metrics = CardiacMetrics::unavailable(CardiacStatus::Calibrating, 2);
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["valid"], false);
        assert_eq!(json["status"], "calibrating");
        assert!(json.get("heart_rate").is_none());
        assert!(json.get("rmssd").is_none());

        let metrics = CardiacMetrics::measured(61.0, 12.0, 20.0, 40);
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["valid"], true);
        assert_eq!(json["heart_rate"], 61.0);
    }

    #[test]
    fn test_snapshot_field_names() {
        let snapshot = Snapshot { bad_channels: vec![EegChannel::Tp9], ..Snapshot::default() };
        let json = serde_json::to_value(&snapshot).unwrap();
        for field in
            ["timestamp", "band_powers", "state_label", "artifact", "bad_channels", "cardiac", "calibration", "talking"]
        {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert_eq!(json["talking"]["activity"], "quiet");
        assert_eq!(json["bad_channels"][0], "TP9");
        assert_eq!(json["artifact"]["per_detector"]["line_interference"], false);
        assert_eq!(json["calibration"]["fitted"], false);
    }

    #[test]
    fn test_brain_state_view() {
        let snapshot = Snapshot {
            state_label: BrainState::Relaxed,
            cardiac: CardiacMetrics::measured(58.0, 30.0, 40.0, 20),
            ..Snapshot::default()
        };
        let view = snapshot.brain_state_view();
        assert_eq!(view.state_label, BrainState::Relaxed);
        assert_eq!(view.heart_rate, Some(58.0));
        assert!((view.quality_score - 1.0).abs() < 1e-12);
    }
}
