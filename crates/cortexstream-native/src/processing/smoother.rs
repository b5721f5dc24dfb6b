//! Temporal smoothing with hysteresis
//!
//! Two kinds of history are kept per session:
//!
//! - **Numeric**: moving averages of band powers and window quality
//! - **Categorical**: a majority vote that needs a consensus share to switch,
//!   plus a dwell lock that holds each accepted label for a minimum time
//!
//! The same [`CategoricalSmoother`] serves the brain-state label and the
//! posture label, each with its own window and dwell constants. Detector
//! fire ratios over the same window decide `has_artifact`.

use std::collections::VecDeque;

use cortexstream_core::config::{CategoricalSmoothing, PostureConfig, SmoothingConfig};
use cortexstream_core::snapshot::{ArtifactKind, ArtifactVerdict, DetectorFlags};
use cortexstream_core::types::{BandPowers, BrainState, PostureLabel};

use super::posture::{AngleHistory, HeadAngles};

// ============================================================================
// Categorical
// ============================================================================

/// Majority vote with a consensus threshold and a dwell lock
#[derive(Clone, Debug)]
pub struct CategoricalSmoother<L> {
    config: CategoricalSmoothing,
    history: VecDeque<L>,
    current: Option<L>,
    entered_at: f64,
}

impl<L: Copy + PartialEq> CategoricalSmoother<L> {
    /// Create an empty smoother
    #[must_use]
    pub fn new(config: &CategoricalSmoothing) -> Self {
        Self {
            config: config.clone(),
            history: VecDeque::with_capacity(config.history),
            current: None,
            entered_at: 0.0,
        }
    }

    /// Add a raw label observed at `now` (seconds) and return the held label
    ///
    /// The first label is emitted once `min_samples` labels exist. After that
    /// a challenger replaces the held label only if it holds at least
    /// `consensus_ratio` of the window and the held label is at least
    /// `dwell_s` old.
    pub fn push(&mut self, label: L, now: f64) -> Option<L> {
        if self.history.len() == self.config.history {
            self.history.pop_front();
        }
        self.history.push_back(label);

        let Some((leader, count)) = self.mode() else {
            return self.current;
        };

        match self.current {
            None => {
                if self.history.len() >= self.config.min_samples {
                    self.current = Some(leader);
                    self.entered_at = now;
                }
            }
            Some(held) if held != leader => {
                #[allow(clippy::cast_precision_loss)]
                let share = count as f64 / self.history.len() as f64;
                if share >= self.config.consensus_ratio && now - self.entered_at >= self.config.dwell_s {
                    self.current = Some(leader);
                    self.entered_at = now;
                }
            }
            Some(_) => {}
        }
        self.current
    }

    /// Held label
    #[must_use]
    pub fn current(&self) -> Option<L> {
        self.current
    }

    /// When the held label was accepted
    #[must_use]
    pub fn entered_at(&self) -> Option<f64> {
        self.current.map(|_| self.entered_at)
    }

    /// Raw labels in the voting window
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no labels have been seen
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Most frequent label; ties go to the most recently seen
    fn mode(&self) -> Option<(L, usize)> {
        let mut counts: Vec<(L, usize)> = Vec::new();
        for &label in self.history.iter().rev() {
            match counts.iter_mut().find(|(l, _)| *l == label) {
                Some((_, n)) => *n += 1,
                None => counts.push((label, 1)),
            }
        }
        counts.into_iter().fold(None, |best, (l, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((l, n)),
        })
    }
}

// ============================================================================
// Session Smoother
// ============================================================================

/// Smoothed view of the recent windows
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmoothedState {
    /// Mean relative band powers over the window
    pub band_powers_avg: BandPowers,
    /// Held brain-state label
    pub state_label: BrainState,
    /// When the held label was accepted (seconds)
    pub state_entered_at: f64,
    /// Mean window quality
    pub quality_avg: f64,
}

/// One window's contribution to the smoother
#[derive(Clone, Copy, Debug)]
pub struct WindowObservation {
    /// Relative band powers of the window
    pub band_powers: BandPowers,
    /// Window quality, 0-1
    pub quality: f64,
    /// Detectors that fired
    pub flags: DetectorFlags,
    /// Detector confidences in [`ArtifactKind::DETECTORS`] order
    pub confidences: [f64; 6],
    /// Unsmoothed state label
    pub label: BrainState,
}

/// All per-session rolling history
#[derive(Clone, Debug)]
pub struct TemporalSmoother {
    numeric_window: usize,
    artifact_ratio: f64,
    band_history: VecDeque<BandPowers>,
    quality_history: VecDeque<f64>,
    detector_history: VecDeque<DetectorFlags>,
    confidence_history: VecDeque<[f64; 6]>,
    brain: CategoricalSmoother<BrainState>,
    posture: CategoricalSmoother<PostureLabel>,
    angles: AngleHistory,
}

impl TemporalSmoother {
    /// Create an empty smoother
    #[must_use]
    pub fn new(smoothing: &SmoothingConfig, posture: &PostureConfig) -> Self {
        let numeric_window = smoothing.numeric_window.max(1);
        Self {
            numeric_window,
            artifact_ratio: smoothing.artifact_ratio,
            band_history: VecDeque::with_capacity(numeric_window),
            quality_history: VecDeque::with_capacity(numeric_window),
            detector_history: VecDeque::with_capacity(numeric_window),
            confidence_history: VecDeque::with_capacity(numeric_window),
            brain: CategoricalSmoother::new(&smoothing.brain),
            posture: CategoricalSmoother::new(&posture.smoothing),
            angles: AngleHistory::new(posture.angle_history),
        }
    }

    /// Fold one window in and return the smoothed state
    pub fn record(&mut self, obs: &WindowObservation, now: f64) -> SmoothedState {
        push_bounded(&mut self.band_history, obs.band_powers, self.numeric_window);
        push_bounded(&mut self.quality_history, obs.quality, self.numeric_window);
        push_bounded(&mut self.detector_history, obs.flags, self.numeric_window);
        let confidences = obs.confidences.map(|c| c.clamp(0.0, 1.0));
        push_bounded(&mut self.confidence_history, confidences, self.numeric_window);

        let state_label = self.brain.push(obs.label, now).unwrap_or_default();
        self.smoothed(state_label)
    }

    fn smoothed(&self, state_label: BrainState) -> SmoothedState {
        let band_powers_avg = BandPowers::mean(&self.band_history)
            .map_or_else(BandPowers::uniform, |mean| mean.normalized());
        #[allow(clippy::cast_precision_loss)]
        let quality_avg = if self.quality_history.is_empty() {
            1.0
        } else {
            self.quality_history.iter().sum::<f64>() / self.quality_history.len() as f64
        };
        SmoothedState {
            band_powers_avg,
            state_label,
            state_entered_at: self.brain.entered_at().unwrap_or(0.0),
            quality_avg,
        }
    }

    /// Share of the window in which `kind` fired
    #[must_use]
    pub fn detector_ratio(&self, kind: ArtifactKind) -> f64 {
        if self.detector_history.is_empty() {
            return 0.0;
        }
        let fired = self.detector_history.iter().filter(|f| f.get(kind)).count();
        #[allow(clippy::cast_precision_loss)]
        let ratio = fired as f64 / self.detector_history.len() as f64;
        ratio
    }

    /// Mean confidence of `kind` over the window, counting silent windows as 0
    #[must_use]
    pub fn detector_confidence(&self, kind: ArtifactKind) -> f64 {
        let Some(slot) = ArtifactKind::DETECTORS.iter().position(|k| *k == kind) else {
            return 0.0;
        };
        if self.confidence_history.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = self.confidence_history.iter().map(|c| c[slot]).sum::<f64>()
            / self.confidence_history.len() as f64;
        mean
    }

    /// Merge the newest window with the detector history
    ///
    /// `has_artifact` needs a detector to fire in more than `artifact_ratio`
    /// of the window. Among those detectors the primary type is the one with
    /// the highest mean confidence over the window, ties going to the more
    /// persistent one. Per-window flags and quality are reported as they are.
    #[must_use]
    pub fn verdict(&self, flags: DetectorFlags, quality: f64) -> ArtifactVerdict {
        let primary = ArtifactKind::DETECTORS
            .iter()
            .map(|kind| (*kind, self.detector_ratio(*kind), self.detector_confidence(*kind)))
            .filter(|(_, ratio, _)| *ratio > self.artifact_ratio)
            .max_by(|a, b| a.2.total_cmp(&b.2).then(a.1.total_cmp(&b.1)))
            .map(|(kind, _, _)| kind);

        ArtifactVerdict {
            has_artifact: primary.is_some(),
            primary_type: primary.unwrap_or(ArtifactKind::Clean),
            per_detector: flags,
            quality_score: quality.clamp(0.0, 1.0),
        }
    }

    /// Add this window's head angles
    pub fn record_angles(&mut self, angles: HeadAngles) {
        self.angles.push(angles);
    }

    /// Angle history for posture rules
    #[must_use]
    pub fn angles(&self) -> &AngleHistory {
        &self.angles
    }

    /// Vote on a raw posture label
    pub fn smooth_posture(&mut self, raw: PostureLabel, now: f64) -> PostureLabel {
        self.posture.push(raw, now).unwrap_or_default()
    }

    /// Windows in the numeric history
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.band_history.len()
    }

    /// Brain-state voter
    #[must_use]
    pub fn brain(&self) -> &CategoricalSmoother<BrainState> {
        &self.brain
    }
}

fn push_bounded<T>(buf: &mut VecDeque<T>, value: T, capacity: usize) {
    if buf.len() == capacity {
        buf.pop_front();
    }
    buf.push_back(value);
}
