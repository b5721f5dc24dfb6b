//! Per-session state and the per-window processing pass
//!
//! [`SessionContext`] owns everything that must survive from one window to
//! the next: the calibration of the separation stage, detector baselines,
//! the bad-channel set, the pulse buffer and the temporal smoother. It is
//! created cold for every session and is never shared between sessions.
//!
//! [`WindowProcessor`] holds the immutable processing units and turns one
//! [`ProcessingWindow`] plus the context into a [`Snapshot`]:
//!
//! | Step | Unit | Context touched |
//! |------|------|-----------------|
//! | 1 | Conditioner | calibration |
//! | 2 | Artifact classifier | detector baseline, bad channels |
//! | 3 | Spectral analyzer | - |
//! | 4 | Cardiac extractor | pulse buffer |
//! | 5 | Posture estimator | angle history, posture smoother |
//! | 6 | Talking detector | motion history, talking vote |
//! | 7 | Temporal smoother | numeric and label history |

use cortexstream_core::config::{PipelineConfig, SessionMode};
use cortexstream_core::snapshot::{CardiacMetrics, ConnectionSession, DerivedMetrics, PostureReading, Snapshot};
use cortexstream_core::types::{BandPowers, BrainState};

use crate::bridge::ProcessingWindow;
use crate::processing::artifact::{ArtifactBaseline, ArtifactClassifier, ArtifactInput, BadChannelTracker};
use crate::processing::cardiac::{CardiacExtractor, PulseBuffer};
use crate::processing::conditioner::{CalibrationState, SignalConditioner};
use crate::processing::posture::{HeadAngles, PostureEstimator};
use crate::processing::smoother::{TemporalSmoother, WindowObservation};
use crate::processing::spectral::{classify_state, SpectralAnalyzer};
use crate::processing::talking::{TalkingDetector, TalkingTracker};

/// Heart rate treated as resting when deriving the stress index (bpm)
const RESTING_HEART_RATE: f64 = 70.0;

/// Deviation from resting heart rate that saturates the stress term (bpm)
const HEART_RATE_SPAN: f64 = 30.0;

// ============================================================================
// Session Context
// ============================================================================

/// Mutable state of one device session
#[derive(Clone, Debug)]
pub struct SessionContext {
    calibration: CalibrationState,
    artifact_baseline: ArtifactBaseline,
    bad_channels: BadChannelTracker,
    pulse: PulseBuffer,
    smoother: TemporalSmoother,
    talking: TalkingTracker,
    windows: u64,
}

impl SessionContext {
    /// Create a cold context
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            calibration: CalibrationState::default(),
            artifact_baseline: ArtifactBaseline::new(),
            bad_channels: BadChannelTracker::new(config.artifact.bad_channel_policy),
            pulse: PulseBuffer::new(config.cardiac.buffer_s),
            smoother: TemporalSmoother::new(&config.smoothing, &config.posture),
            talking: TalkingTracker::new(&config.talking),
            windows: 0,
        }
    }

    /// Separation-stage calibration
    #[must_use]
    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    /// Rolling histories
    #[must_use]
    pub fn smoother(&self) -> &TemporalSmoother {
        &self.smoother
    }

    /// Talking vote and motion history
    #[must_use]
    pub fn talking(&self) -> &TalkingTracker {
        &self.talking
    }

    /// Buffered pulse samples
    #[must_use]
    pub fn pulse(&self) -> &PulseBuffer {
        &self.pulse
    }

    /// Windows folded into this context
    #[must_use]
    pub fn windows_processed(&self) -> u64 {
        self.windows
    }
}

// ============================================================================
// Window Processor
// ============================================================================

/// Stateless processing units of a session
pub struct WindowProcessor {
    conditioner: SignalConditioner,
    analyzer: SpectralAnalyzer,
    classifier: ArtifactClassifier,
    cardiac: CardiacExtractor,
    posture: PostureEstimator,
    talking: TalkingDetector,
    config: PipelineConfig,
}

impl WindowProcessor {
    /// Build every unit from the configuration
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let rate = config.window.eeg_rate_hz;
        Self {
            conditioner: SignalConditioner::new(&config.conditioner, &config.spectral, rate),
            analyzer: SpectralAnalyzer::new(&config.spectral, rate),
            classifier: ArtifactClassifier::new(&config.artifact, &config.spectral, rate, config.conditioner.mains_hz),
            cardiac: CardiacExtractor::new(&config.cardiac),
            posture: PostureEstimator::new(&config.posture),
            talking: TalkingDetector::new(&config.talking),
            config: config.clone(),
        }
    }

    /// Configuration the units were built from
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one window into a snapshot
    ///
    /// Recoverable conditions (fit failure, missing pulse, poor signal) are
    /// reflected in the snapshot fields rather than returned as errors.
    pub fn process(&self, ctx: &mut SessionContext, window: &ProcessingWindow, link: ConnectionSession) -> Snapshot {
        let now = window.end;

        let conditioned = self.conditioner.condition(&mut ctx.calibration, &window.with_context(), window.lead_in());

        let report = self.classifier.classify(
            &ArtifactInput { raw: &window.eeg, accel: &window.accel, gyro: &window.gyro },
            &ctx.artifact_baseline,
        );
        ctx.artifact_baseline.absorb(&report);
        let bad = ctx.bad_channels.update(&report.saturated);

        let spectral = self.analyzer.average_band_powers(&conditioned.channels, &bad);
        let label = if report.quality < self.config.classification.min_quality {
            BrainState::LowConfidence
        } else {
            classify_state(&spectral.band_powers, self.config.classification.mode)
        };

        ctx.pulse.extend(&window.ppg);
        let cardiac = self.cardiac.extract(&ctx.pulse, now);

        if let Some(angles) = HeadAngles::from_accel(&window.accel) {
            ctx.smoother.record_angles(angles);
        }
        let raw_posture = self.posture.classify(&window.accel, &window.gyro, ctx.smoother.angles());
        let posture = PostureReading { label: ctx.smoother.smooth_posture(raw_posture.label, now), ..raw_posture };

        let meditation = self.config.classification.mode == SessionMode::Meditation;
        let talking = ctx.talking.update(&self.talking, &window.gyro, &window.accel, meditation, now);

        let flags = report.flags();
        let smoothed = ctx.smoother.record(
            &WindowObservation {
                band_powers: spectral.band_powers,
                quality: report.quality,
                flags,
                confidences: report.readings.map(|r| r.confidence),
                label,
            },
            now,
        );
        let artifact = ctx.smoother.verdict(flags, report.quality);

        ctx.windows += 1;
        tracing::debug!(
            sequence = window.sequence,
            quality = report.quality,
            bad = bad.len(),
            raw_label = ?label,
            state = ?smoothed.state_label,
            talking = ?talking.activity,
            "Window processed"
        );

        Snapshot {
            sequence: window.sequence,
            timestamp: now,
            band_powers: smoothed.band_powers_avg,
            window_band_powers: spectral.band_powers,
            state_label: smoothed.state_label,
            state_entered_at: smoothed.state_entered_at,
            artifact,
            quality_avg: smoothed.quality_avg,
            features: report.features,
            bad_channels: bad.iter().collect(),
            derived: derived_metrics(&smoothed.band_powers_avg, &cardiac),
            cardiac,
            calibration: conditioned.calibration,
            posture,
            talking,
            link,
        }
    }
}

/// Cognitive load and stress index from band powers and heart rate
#[must_use]
pub fn derived_metrics(powers: &BandPowers, cardiac: &CardiacMetrics) -> DerivedMetrics {
    let cognitive_load = ((powers.beta + powers.gamma) / 100.0).clamp(0.0, 1.0);
    let beta_share = (powers.beta / 100.0).clamp(0.0, 1.0);
    let stress_index = match cardiac.heart_rate() {
        Some(hr) => {
            let deviation = ((hr - RESTING_HEART_RATE).abs() / HEART_RATE_SPAN).min(1.0);
            0.6 * beta_share + 0.4 * deviation
        }
        None => beta_share,
    };
    DerivedMetrics { cognitive_load, stress_index: stress_index.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::simulate::XorShift;
    use cortexstream_core::config::ConditionerConfig;
    use cortexstream_core::snapshot::CardiacStatus;
    use cortexstream_core::types::{EegBand, EegChannel, MotionSample, PpgSample, Vec3};
    use std::f64::consts::PI;

    const RATE: f64 = 256.0;

    /// Continuous multi-channel recording: alpha plus noise, TP9 optionally railed
    struct Recording {
        channels: Vec<Vec<f64>>,
    }

    impl Recording {
        fn new(seconds: usize, railed: bool) -> Self {
            let n = seconds * RATE as usize;
            let mut rng = XorShift::new(7);
            let channels = (0..4)
                .map(|c| {
                    (0..n)
                        .map(|i| {
                            let t = i as f64 / RATE;
                            if railed && c == 0 {
                                return 500.0;
                            }
                            let alpha = 14.0 * (2.0 * PI * (9.5 + 0.5 * c as f64) * t + c as f64).sin();
                            let theta = 4.0 * (2.0 * PI * 6.0 * t).sin();
                            alpha + theta + 4.0 * rng.symmetric()
                        })
                        .collect()
                })
                .collect();
            Self { channels }
        }

        fn window(&self, second: usize, with_pulse: bool) -> ProcessingWindow {
            let n = RATE as usize;
            let start = second * n;
            let lead = second.min(1) * n;
            let start_t = second as f64;
            let end_t = start_t + 1.0;
            let ppg = if with_pulse {
                (0..64)
                    .filter_map(|i| {
                        let t = start_t + f64::from(i) / 64.0;
                        PpgSample::new(t, &[(0.5 + 0.5 * (2.0 * PI * t).sin()).powi(8)]).ok()
                    })
                    .collect()
            } else {
                Vec::new()
            };
            let accel = (0..52)
                .map(|i| MotionSample::new(start_t + f64::from(i) / 52.0, Vec3::new(0.0, 0.0, 1.0)))
                .collect();
            ProcessingWindow {
                sequence: second as u64,
                start: start_t,
                end: end_t,
                sample_rate: RATE,
                eeg: self.channels.iter().map(|ch| ch[start..start + n].to_vec()).collect(),
                context: self.channels.iter().map(|ch| ch[start - lead..start].to_vec()).collect(),
                ppg,
                accel,
                gyro: Vec::new(),
                aligned: true,
            }
        }
    }

    fn short_calibration() -> PipelineConfig {
        PipelineConfig {
            conditioner: ConditionerConfig { calibration_s: 4.0, ..ConditionerConfig::default() },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_band_powers_sum_to_hundred() {
        let config = PipelineConfig::default();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let clean = Recording::new(6, false);
        let railed = Recording::new(6, true);

        for second in 0..6 {
            let recording = if second % 2 == 0 { &clean } else { &railed };
            let snap = processor.process(&mut ctx, &recording.window(second, true), ConnectionSession::default());
            for powers in [snap.band_powers, snap.window_band_powers] {
                assert!((powers.total() - 100.0).abs() < 1e-6, "total {}", powers.total());
                assert!(EegBand::ALL.iter().all(|b| powers.get(*b) >= 0.0));
            }
        }
        assert_eq!(ctx.windows_processed(), 6);
    }

    #[test]
    fn test_railed_channel_excluded_from_average() {
        let config = PipelineConfig::default();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let recording = Recording::new(3, true);
        let window = recording.window(2, false);

        let snap = processor.process(&mut ctx, &window, ConnectionSession::default());
        assert_eq!(snap.bad_channels, vec![EegChannel::Tp9]);
        assert!(snap.artifact.per_detector.get(cortexstream_core::ArtifactKind::Saturation));

        let conditioner = SignalConditioner::new(&config.conditioner, &config.spectral, RATE);
        let filtered = conditioner.filter(&window.with_context(), window.lead_in());
        let analyzer = SpectralAnalyzer::new(&config.spectral, RATE);
        let all_four = analyzer.average_band_powers(&filtered, &cortexstream_core::BadChannelSet::new());
        assert_eq!(all_four.used_channels.len(), 4);

        let diff: f64 = EegBand::ALL
            .iter()
            .map(|b| (snap.window_band_powers.get(*b) - all_four.band_powers.get(*b)).abs())
            .sum();
        assert!(diff > 1.0, "three- and four-channel averages differ by only {diff}");
    }

    #[test]
    fn test_calibration_progress_then_fitted() {
        let config = short_calibration();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let recording = Recording::new(8, false);

        let mut last = 0.0;
        for second in 0..8 {
            let snap = processor.process(&mut ctx, &recording.window(second, true), ConnectionSession::default());
            assert!(snap.calibration.progress >= last);
            last = snap.calibration.progress;
            if second < 3 {
                assert!(!snap.calibration.fitted);
            } else {
                assert!(snap.calibration.fitted, "not fitted after window {second}");
                assert!((snap.calibration.progress - 100.0).abs() < 1e-9);
            }
        }
        assert!(ctx.calibration().is_fitted());
    }

    #[test]
    fn test_missing_pulse_reports_signal_lost() {
        let config = PipelineConfig::default();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let recording = Recording::new(2, false);

        let snap = processor.process(&mut ctx, &recording.window(1, false), ConnectionSession::default());
        assert!(!snap.cardiac.is_valid());
        assert_eq!(snap.cardiac.status(), CardiacStatus::SignalLost);
        assert!(snap.cardiac.heart_rate().is_none());
    }

    #[test]
    fn test_pulse_becomes_valid_after_enough_beats() {
        let config = PipelineConfig::default();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let recording = Recording::new(12, false);

        let mut last = None;
        for second in 0..12 {
            let snap = processor.process(&mut ctx, &recording.window(second, true), ConnectionSession::default());
            if second == 0 {
                assert_eq!(snap.cardiac.status(), CardiacStatus::Calibrating);
            }
            last = Some(snap);
        }
        let snap = last.unwrap();
        assert!(snap.cardiac.is_valid());
        let hr = snap.cardiac.heart_rate().unwrap();
        assert!((hr - 60.0).abs() < 3.0, "heart rate {hr}");
    }

    #[test]
    fn test_level_head_settles_to_good_posture() {
        let config = PipelineConfig::default();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let recording = Recording::new(20, false);

        let mut snap = Snapshot::default();
        for second in 0..20 {
            snap = processor.process(&mut ctx, &recording.window(second, false), ConnectionSession::default());
        }
        assert_eq!(snap.posture.label, cortexstream_core::PostureLabel::Good);
        assert!(snap.posture.pitch_deg.abs() < 1.0);
        assert_eq!(ctx.smoother().angles().len(), 20);
    }

    #[test]
    fn test_jaw_motion_marks_talking_without_dropping_eeg() {
        let config = PipelineConfig::default();
        let processor = WindowProcessor::new(&config);
        let mut ctx = SessionContext::new(&config);
        let recording = Recording::new(10, false);

        let mut snap = Snapshot::default();
        for second in 0..10 {
            let mut window = recording.window(second, false);
            window.gyro = (0..52)
                .map(|i| {
                    let t = second as f64 + f64::from(i) / 52.0;
                    MotionSample::new(t, Vec3::new(0.0, 6.0 * (2.0 * PI * 3.0 * t).sin(), 0.0))
                })
                .collect();
            snap = processor.process(&mut ctx, &window, ConnectionSession::default());
        }
        assert_eq!(snap.talking.activity, cortexstream_core::SpeechActivity::Talking);
        assert!(snap.talking.confidence > 0.6);
        assert!((snap.talking.duration_s - 9.0).abs() < 1e-9);
        assert!((snap.band_powers.total() - 100.0).abs() < 1e-6);
        assert!(ctx.talking().history().gyro_len() > 52);
    }

    #[test]
    fn test_derived_metrics() {
        let powers = BandPowers { delta: 10.0, theta: 10.0, alpha: 30.0, beta: 40.0, gamma: 10.0 };

        let without_hr = derived_metrics(&powers, &CardiacMetrics::unavailable(CardiacStatus::SignalLost, 0));
        assert!((without_hr.cognitive_load - 0.5).abs() < 1e-12);
        assert!((without_hr.stress_index - 0.4).abs() < 1e-12);

        let resting = derived_metrics(&powers, &CardiacMetrics::measured(70.0, 20.0, 30.0, 10));
        assert!((resting.stress_index - 0.24).abs() < 1e-12);

        let racing = derived_metrics(&powers, &CardiacMetrics::measured(130.0, 20.0, 30.0, 10));
        assert!((racing.stress_index - 0.64).abs() < 1e-12);
    }
}
