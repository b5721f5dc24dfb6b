//! Talking detection from jaw motion
//!
//! Speech rocks the headband at syllable rate, which shows up on the
//! gyroscope long before it is obvious in the EEG. Three scores are blended
//! into a confidence:
//!
//! 1. Gyro variance on the jaw axis
//! 2. Share of that axis' power in the speech band
//! 3. Mean accelerometer variance
//!
//! In meditation mode slow respiratory sway can mimic a rhythm, so a
//! dominant breathing band damps the rhythm score and raises the threshold.
//! EEG recorded while talking is kept; the label only annotates it.

use std::collections::VecDeque;

use cortexstream_core::config::{SpectralConfig, TalkingConfig};
use cortexstream_core::snapshot::TalkingStatus;
use cortexstream_core::types::{MotionSample, SpeechActivity, StreamKind};

use super::smoother::CategoricalSmoother;
use super::spectral::{Psd, SpectralAnalyzer};

/// Lower edge of the power counted by the breathing check (Hz)
const BREATHING_FLOOR_HZ: f64 = 0.1;

/// Upper edge of the power counted by the breathing check (Hz)
const BREATHING_CEILING_HZ: f64 = 10.0;

/// Speech share below which breathing is taken as the only rhythm
const QUIET_SPEECH_SHARE: f64 = 0.1;

/// One evaluation of the motion history
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TalkingReading {
    /// Confidence cleared the active threshold
    pub talking: bool,
    /// Weighted blend of the three scores, 0-1
    pub confidence: f64,
    /// Variance of the jaw axis (°²/s²)
    pub gyro_variance: f64,
    /// Speech-band score after any breathing damping, 0-1
    pub rhythm_score: f64,
    /// Respiration dominated the slow band (meditation mode only)
    pub breathing: bool,
}

// ============================================================================
// Motion History
// ============================================================================

/// Last few seconds of gyroscope and accelerometer samples
#[derive(Clone, Debug, Default)]
pub struct MotionHistory {
    gyro: VecDeque<MotionSample>,
    accel: VecDeque<MotionSample>,
    span_s: f64,
}

impl MotionHistory {
    /// History holding the last `span_s` seconds of each stream
    #[must_use]
    pub fn new(span_s: f64) -> Self {
        Self { gyro: VecDeque::new(), accel: VecDeque::new(), span_s }
    }

    /// Append one window's motion samples
    pub fn extend(&mut self, gyro: &[MotionSample], accel: &[MotionSample]) {
        append_trimmed(&mut self.gyro, gyro, self.span_s);
        append_trimmed(&mut self.accel, accel, self.span_s);
    }

    /// Gyro samples held
    #[must_use]
    pub fn gyro_len(&self) -> usize {
        self.gyro.len()
    }

    /// Accelerometer samples held
    #[must_use]
    pub fn accel_len(&self) -> usize {
        self.accel.len()
    }

    fn gyro_axis(&self, axis: usize) -> Vec<f64> {
        self.gyro.iter().map(|s| s.value.axis(axis)).collect()
    }

    fn accel_axis(&self, axis: usize) -> Vec<f64> {
        self.accel.iter().map(|s| s.value.axis(axis)).collect()
    }
}

fn append_trimmed(buf: &mut VecDeque<MotionSample>, samples: &[MotionSample], span_s: f64) {
    for sample in samples {
        if buf.back().is_some_and(|last| sample.timestamp <= last.timestamp) {
            continue;
        }
        buf.push_back(*sample);
    }
    if let Some(newest) = buf.back().map(|s| s.timestamp) {
        while buf.front().is_some_and(|first| newest - first.timestamp > span_s) {
            buf.pop_front();
        }
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Scores a motion history for talking
pub struct TalkingDetector {
    config: TalkingConfig,
    rate: f64,
    min_samples: usize,
    speech: SpectralAnalyzer,
    breathing: SpectralAnalyzer,
}

impl TalkingDetector {
    /// Detector for motion sampled at the nominal gyroscope rate
    #[must_use]
    pub fn new(config: &TalkingConfig) -> Self {
        let rate = StreamKind::Gyro.nominal_rate_hz();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let min_samples = rate.round() as usize;
        Self {
            config: config.clone(),
            rate,
            min_samples,
            speech: SpectralAnalyzer::new(&SpectralConfig { segment_len: min_samples, overlap: 0.5 }, rate),
            breathing: SpectralAnalyzer::new(&SpectralConfig { segment_len: 2 * min_samples, overlap: 0.5 }, rate),
        }
    }

    /// Motion sample rate assumed by the spectra (Hz)
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.rate
    }

    /// Score the history
    ///
    /// Needs one second of gyro samples; less yields a silent reading. The
    /// breathing check needs two seconds and runs only in meditation mode.
    #[must_use]
    pub fn detect(&self, history: &MotionHistory, meditation: bool) -> TalkingReading {
        if history.gyro_len() < self.min_samples {
            return TalkingReading::default();
        }
        let cfg = &self.config;
        let jaw = history.gyro_axis(cfg.gyro_axis);
        let gyro_variance = variance(&jaw);

        let (speech_lo, speech_hi) = cfg.speech_band_hz;
        let speech_psd = self.speech.welch(&jaw);
        let speech_total = bin_sum(&speech_psd, 0.0, f64::INFINITY);
        let mut rhythm_score = if speech_total > 0.0 {
            (bin_sum(&speech_psd, speech_lo, speech_hi) / speech_total / cfg.rhythm_share).min(1.0)
        } else {
            0.0
        };

        let breathing = meditation
            && jaw.len() >= 2 * self.min_samples
            && self.breathing_score(&jaw) > cfg.breathing_score;
        if breathing {
            rhythm_score *= cfg.breathing_rhythm_factor;
        }

        let accel_score = if history.accel_len() >= self.min_samples {
            let mean_variance = (0..3).map(|axis| variance(&history.accel_axis(axis))).sum::<f64>() / 3.0;
            (mean_variance / cfg.accel_variance_g2).min(1.0)
        } else {
            0.0
        };
        let variance_score = (gyro_variance / cfg.gyro_variance_dps2).min(1.0);

        let (w_variance, w_rhythm, w_accel) = cfg.weights;
        let confidence =
            (w_variance * variance_score + w_rhythm * rhythm_score + w_accel * accel_score).clamp(0.0, 1.0);

        let mut threshold = if meditation { cfg.meditation_threshold } else { cfg.threshold };
        if breathing {
            threshold = threshold.max(cfg.breathing_threshold);
        }

        TalkingReading { talking: confidence > threshold, confidence, gyro_variance, rhythm_score, breathing }
    }

    /// How strongly the slow respiratory band dominates, 0-1
    fn breathing_score(&self, jaw: &[f64]) -> f64 {
        let psd = self.breathing.welch(jaw);
        let total = bin_sum(&psd, BREATHING_FLOOR_HZ, BREATHING_CEILING_HZ);
        if total <= 0.0 {
            return 0.0;
        }
        let (breath_lo, breath_hi) = self.config.breathing_band_hz;
        let (speech_lo, speech_hi) = self.config.speech_band_hz;
        let breath_share = bin_sum(&psd, breath_lo, breath_hi) / total;
        let speech_share = bin_sum(&psd, speech_lo, speech_hi) / total;
        if speech_share < QUIET_SPEECH_SHARE {
            (breath_share * 2.0).min(1.0)
        } else {
            (breath_share - speech_share).max(0.0)
        }
    }
}

/// Sum of the density bins whose frequency lies in `[low_hz, high_hz]`
fn bin_sum(psd: &Psd, low_hz: f64, high_hz: f64) -> f64 {
    psd.power
        .iter()
        .enumerate()
        .filter(|(bin, _)| {
            let f = psd.frequency(*bin);
            f >= low_hz - 1e-9 && f <= high_hz + 1e-9
        })
        .map(|(_, p)| p)
        .sum()
}

fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

// ============================================================================
// Tracker
// ============================================================================

/// Per-session talking state: motion history plus a dwell-locked vote
#[derive(Clone, Debug)]
pub struct TalkingTracker {
    history: MotionHistory,
    vote: CategoricalSmoother<SpeechActivity>,
}

impl TalkingTracker {
    /// Cold tracker
    #[must_use]
    pub fn new(config: &TalkingConfig) -> Self {
        Self { history: MotionHistory::new(config.buffer_s), vote: CategoricalSmoother::new(&config.smoothing) }
    }

    /// Fold one window's motion in and return the smoothed status
    pub fn update(
        &mut self,
        detector: &TalkingDetector,
        gyro: &[MotionSample],
        accel: &[MotionSample],
        meditation: bool,
        now: f64,
    ) -> TalkingStatus {
        self.history.extend(gyro, accel);
        let reading = detector.detect(&self.history, meditation);
        let raw = if reading.talking { SpeechActivity::Talking } else { SpeechActivity::Quiet };

        let activity = self.vote.push(raw, now).unwrap_or_default();
        let duration_s = match (activity, self.vote.entered_at()) {
            (SpeechActivity::Talking, Some(since)) => (now - since).max(0.0),
            _ => 0.0,
        };
        TalkingStatus { activity, confidence: reading.confidence, duration_s }
    }

    /// Buffered motion
    #[must_use]
    pub fn history(&self) -> &MotionHistory {
        &self.history
    }
}
