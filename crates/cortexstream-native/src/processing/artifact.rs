//! Multi-detector artifact classification
//!
//! Six detectors run independently on every window:
//!
//! | Detector | Signal | Fires when |
//! |----------|--------|------------|
//! | Eye blink | frontal EEG + gyro | short frontal spike with a rotation spike |
//! | Muscle | EEG spectrum + accel | EMG sub-band share high, jaw axis moving |
//! | Motion | accel + gyro | magnitude departs from the previous window |
//! | Line interference | EEG spectrum | mains power over its session baseline |
//! | Statistical | EEG | samples beyond `k` sigma of the channel baseline |
//! | Saturation | EEG | channel held above the rail threshold |
//!
//! Detectors are pure: session-scoped baselines live in an
//! [`ArtifactBaseline`] owned by the caller, which folds each window's
//! measurements back in after classification.

use cortexstream_core::config::{ArtifactConfig, BadChannelPolicy, SpectralConfig};
use cortexstream_core::snapshot::{ArtifactFeatures, ArtifactKind, DetectorFlags};
use cortexstream_core::types::{BadChannelSet, EegChannel, MotionSample};

use super::spectral::{Psd, SpectralAnalyzer};

/// Weight of the newest window in exponential baselines
const BASELINE_ALPHA: f64 = 0.2;

/// Samples a blink peak must keep from the window edges
const BLINK_EDGE_MARGIN: usize = 10;

/// Half-width of the band treated as mains power (Hz)
const MAINS_HALF_WIDTH_HZ: f64 = 1.0;

/// Half-width of the mains line cut out of the EMG estimate, wide enough
/// for the Hann main lobe at 2 Hz resolution (Hz)
const EMG_MAINS_GUARD_HZ: f64 = 4.0;

/// Consecutive flagged windows a channel is kept out of its statistics
/// before the baseline starts following it
const MAX_HELD_WINDOWS: u32 = 5;

// ============================================================================
// Readings
// ============================================================================

/// Outcome of one detector on one window
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DetectorReading {
    /// Detector fired
    pub fired: bool,
    /// Strength of the evidence, 0-1 (0 when not fired)
    pub confidence: f64,
}

impl DetectorReading {
    /// No artifact
    pub const CLEAR: Self = Self { fired: false, confidence: 0.0 };

    fn fired(confidence: f64) -> Self {
        Self { fired: true, confidence: confidence.clamp(0.0, 1.0) }
    }

    fn when(fired: bool, confidence: f64) -> Self {
        if fired { Self::fired(confidence) } else { Self::CLEAR }
    }
}

/// Per-window quantities the session baselines are updated from
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowMeasurements {
    /// Raw power around the mains frequency
    pub mains_power: f64,
    /// Per-channel (mean, variance) of the raw window
    pub channel_stats: Vec<(f64, f64)>,
    /// Mean acceleration magnitude, if accelerometer samples were present (g)
    pub accel_magnitude: Option<f64>,
    /// Mean rotation magnitude, if gyroscope samples were present (°/s)
    pub gyro_magnitude: Option<f64>,
}

/// Everything the classifier concluded about one window
#[derive(Clone, Debug, PartialEq)]
pub struct ArtifactReport {
    /// Detector readings in [`ArtifactKind::DETECTORS`] order
    pub readings: [DetectorReading; 6],
    /// Channels saturated in this window
    pub saturated: BadChannelSet,
    /// Channels the statistical detector flagged in this window
    pub outliers: BadChannelSet,
    /// Confidence blend of every fired detector, 0-1
    pub quality: f64,
    /// Continuous intensities
    pub features: ArtifactFeatures,
    /// Inputs for the session baselines
    pub measurements: WindowMeasurements,
}

impl ArtifactReport {
    /// Reading of one detector
    #[must_use]
    pub fn reading(&self, kind: ArtifactKind) -> DetectorReading {
        ArtifactKind::DETECTORS
            .iter()
            .position(|k| *k == kind)
            .map_or(DetectorReading::CLEAR, |i| self.readings[i])
    }

    /// Fixed-shape fired flags
    #[must_use]
    pub fn flags(&self) -> DetectorFlags {
        let mut flags = DetectorFlags::default();
        for (kind, reading) in ArtifactKind::DETECTORS.iter().zip(&self.readings) {
            flags.set(*kind, reading.fired);
        }
        flags
    }

    /// Fired detector with the highest confidence
    #[must_use]
    pub fn strongest(&self) -> ArtifactKind {
        ArtifactKind::DETECTORS
            .iter()
            .zip(&self.readings)
            .filter(|(_, r)| r.fired)
            .max_by(|a, b| a.1.confidence.total_cmp(&b.1.confidence))
            .map_or(ArtifactKind::Clean, |(k, _)| *k)
    }
}

// ============================================================================
// Session Baselines
// ============================================================================

/// Detector baselines carried across windows of one session
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArtifactBaseline {
    line_power: f64,
    line_windows: u32,
    channel_mean: Vec<f64>,
    channel_var: Vec<f64>,
    held: Vec<u32>,
    stat_windows: u32,
    prev_accel_magnitude: Option<f64>,
    prev_gyro_magnitude: Option<f64>,
}

impl ArtifactBaseline {
    /// Empty baseline
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Windows folded into the mains baseline
    #[must_use]
    pub fn line_windows(&self) -> u32 {
        self.line_windows
    }

    /// Windows folded into the channel statistics
    #[must_use]
    pub fn stat_windows(&self) -> u32 {
        self.stat_windows
    }

    /// Fold one window in
    ///
    /// Mains power is only absorbed from windows where line interference did
    /// not fire, so a sustained hum cannot become its own baseline. Likewise a
    /// channel that is saturated or statistically flagged keeps its previous
    /// statistics, for up to `MAX_HELD_WINDOWS` consecutive windows.
    pub fn absorb(&mut self, report: &ArtifactReport) {
        let m = &report.measurements;

        if !report.reading(ArtifactKind::LineInterference).fired {
            self.line_power = if self.line_windows == 0 {
                m.mains_power
            } else {
                ema(self.line_power, m.mains_power)
            };
            self.line_windows = self.line_windows.saturating_add(1);
        }

        if self.channel_mean.len() != m.channel_stats.len() {
            self.channel_mean = m.channel_stats.iter().map(|s| s.0).collect();
            self.channel_var = m.channel_stats.iter().map(|s| s.1).collect();
            self.held = vec![0; m.channel_stats.len()];
            self.stat_windows = 1;
        } else {
            for (i, &(mean, var)) in m.channel_stats.iter().enumerate() {
                let flagged = EegChannel::from_index(i)
                    .is_some_and(|ch| report.saturated.contains(ch) || report.outliers.contains(ch));
                if flagged {
                    if self.held[i] < MAX_HELD_WINDOWS {
                        self.held[i] += 1;
                        continue;
                    }
                } else {
                    self.held[i] = 0;
                }
                self.channel_mean[i] = ema(self.channel_mean[i], mean);
                self.channel_var[i] = ema(self.channel_var[i], var);
            }
            self.stat_windows = self.stat_windows.saturating_add(1);
        }

        if m.accel_magnitude.is_some() {
            self.prev_accel_magnitude = m.accel_magnitude;
        }
        if m.gyro_magnitude.is_some() {
            self.prev_gyro_magnitude = m.gyro_magnitude;
        }
    }
}

fn ema(previous: f64, current: f64) -> f64 {
    previous + BASELINE_ALPHA * (current - previous)
}

// ============================================================================
// Classifier
// ============================================================================

/// Signals one window offers the detectors
#[derive(Clone, Copy, Debug)]
pub struct ArtifactInput<'a> {
    /// Unfiltered EEG, `raw[channel][sample]` (µV)
    pub raw: &'a [Vec<f64>],
    /// Accelerometer samples inside the window (g)
    pub accel: &'a [MotionSample],
    /// Gyroscope samples inside the window (°/s)
    pub gyro: &'a [MotionSample],
}

/// Runs the six detectors and blends their confidences
pub struct ArtifactClassifier {
    config: ArtifactConfig,
    analyzer: SpectralAnalyzer,
    sample_rate: f64,
    mains_hz: f64,
}

impl ArtifactClassifier {
    /// Create a classifier
    ///
    /// # Arguments
    ///
    /// * `config` - Detector thresholds
    /// * `spectral` - Welch settings used for the raw spectrum
    /// * `sample_rate` - EEG sample rate in Hz
    /// * `mains_hz` - Local mains frequency
    #[must_use]
    pub fn new(config: &ArtifactConfig, spectral: &SpectralConfig, sample_rate: f64, mains_hz: f64) -> Self {
        Self {
            config: config.clone(),
            analyzer: SpectralAnalyzer::new(spectral, sample_rate),
            sample_rate,
            mains_hz,
        }
    }

    /// Classify one window against the session baselines
    #[must_use]
    pub fn classify(&self, input: &ArtifactInput<'_>, baseline: &ArtifactBaseline) -> ArtifactReport {
        let psd = self.mean_psd(input.raw);
        let mains_power = self.mains_power(&psd);
        let (saturation, saturated) = self.detect_saturation(input.raw);
        let (statistical, outliers) = self.detect_statistical(input.raw, baseline);

        let readings = [
            self.detect_eye_blink(input.raw, input.gyro),
            self.detect_muscle(&psd, input.accel),
            self.detect_motion(input.accel, input.gyro, baseline),
            self.detect_line_interference(mains_power, baseline),
            statistical,
            saturation,
        ];

        let quality = readings
            .iter()
            .filter(|r| r.fired)
            .fold(1.0, |q, r| q * (1.0 - self.config.detector_penalty * r.confidence))
            .clamp(0.0, 1.0);

        let measurements = WindowMeasurements {
            mains_power,
            channel_stats: input.raw.iter().map(|ch| mean_var(ch)).collect(),
            accel_magnitude: mean_magnitude(input.accel),
            gyro_magnitude: mean_magnitude(input.gyro),
        };

        ArtifactReport {
            readings,
            saturated,
            outliers,
            quality,
            features: self.features(input, &psd),
            measurements,
        }
    }

    /// Frontal spike of blink duration, corroborated by a rotation spike
    ///
    /// Without gyroscope samples in the window the EEG pattern alone fires,
    /// at lower confidence.
    #[must_use]
    pub fn detect_eye_blink(&self, raw: &[Vec<f64>], gyro: &[MotionSample]) -> DetectorReading {
        let c = &self.config;
        let Some((peak, channel, idx)) = frontal_peak(raw) else {
            return DetectorReading::CLEAR;
        };
        if peak <= c.blink_threshold_uv {
            return DetectorReading::CLEAR;
        }

        let signal = centered(&raw[channel]);
        if idx < BLINK_EDGE_MARGIN || idx + BLINK_EDGE_MARGIN >= signal.len() {
            return DetectorReading::CLEAR;
        }

        // Contiguous run above half threshold around the peak
        let half = c.blink_threshold_uv / 2.0;
        let start = signal[..idx].iter().rposition(|x| x.abs() <= half).map_or(0, |i| i + 1);
        let end = signal[idx..].iter().position(|x| x.abs() <= half).map_or(signal.len(), |i| idx + i);
        #[allow(clippy::cast_precision_loss)]
        let duration = (end - start) as f64 / self.sample_rate;
        if duration < c.blink_min_duration_s || duration > c.blink_max_duration_s {
            return DetectorReading::CLEAR;
        }

        let strength = (peak / (2.0 * c.blink_threshold_uv)).min(1.0);
        if gyro.is_empty() {
            return DetectorReading::fired(0.6 * strength);
        }
        let rotation = gyro
            .iter()
            .map(|s| s.value.axis(c.blink_gyro_axis).abs())
            .fold(0.0, f64::max);
        DetectorReading::when(rotation > c.blink_gyro_threshold_dps, strength)
    }

    /// EMG sub-band share of raw power, corroborated by jaw-axis acceleration
    #[must_use]
    pub fn detect_muscle(&self, psd: &Psd, accel: &[MotionSample]) -> DetectorReading {
        let c = &self.config;
        let ratio = self.emg_ratio(psd);
        if ratio <= c.emg_ratio_threshold {
            return DetectorReading::CLEAR;
        }
        let confidence = ratio / (2.0 * c.emg_ratio_threshold);
        if accel.is_empty() {
            return DetectorReading::fired(confidence);
        }
        let jaw: Vec<f64> = accel.iter().map(|s| s.value.axis(c.jaw_axis)).collect();
        DetectorReading::when(mean_var(&jaw).1 > c.jaw_variance_g2, confidence)
    }

    /// Magnitude change against the previous window, or a restless window
    #[must_use]
    pub fn detect_motion(
        &self,
        accel: &[MotionSample],
        gyro: &[MotionSample],
        baseline: &ArtifactBaseline,
    ) -> DetectorReading {
        let c = &self.config;
        let accel_mags: Vec<f64> = accel.iter().map(|s| s.value.magnitude()).collect();
        let gyro_mags: Vec<f64> = gyro.iter().map(|s| s.value.magnitude()).collect();

        let accel_jump = baseline
            .prev_accel_magnitude
            .map_or(0.0, |prev| max_deviation(&accel_mags, prev));
        let gyro_jump = baseline
            .prev_gyro_magnitude
            .map_or(0.0, |prev| max_deviation(&gyro_mags, prev));
        let variance = if accel_mags.len() > 1 { mean_var(&accel_mags).1 } else { 0.0 };

        let score = (accel_jump / c.motion_accel_delta_g)
            .max(gyro_jump / c.motion_gyro_delta_dps)
            .max(variance / c.motion_variance_g2);
        DetectorReading::when(score > 1.0, score / 2.0)
    }

    /// Mains power over `line_factor` times its session baseline
    #[must_use]
    pub fn detect_line_interference(&self, mains_power: f64, baseline: &ArtifactBaseline) -> DetectorReading {
        let c = &self.config;
        if baseline.line_windows < c.line_baseline_windows || baseline.line_power <= 0.0 {
            return DetectorReading::CLEAR;
        }
        let ratio = mains_power / baseline.line_power;
        DetectorReading::when(ratio > c.line_factor, (ratio - 1.0) / (2.0 * c.line_factor))
    }

    /// Share of samples beyond `statistical_sigma` of the channel baseline
    ///
    /// Until the baseline has enough windows a fixed amplitude limit is used.
    /// Also returns the channels that crossed the limit on their own.
    #[must_use]
    pub fn detect_statistical(&self, raw: &[Vec<f64>], baseline: &ArtifactBaseline) -> (DetectorReading, BadChannelSet) {
        let c = &self.config;
        let trusted = baseline.stat_windows >= c.statistical_baseline_windows
            && baseline.channel_mean.len() == raw.len();
        let mut outliers = BadChannelSet::new();

        if !trusted {
            let mut peak: f64 = 0.0;
            for (i, ch) in raw.iter().enumerate() {
                let channel_peak = centered(ch).iter().fold(0.0, |m, x| f64::max(m, x.abs()));
                if channel_peak > c.statistical_fallback_uv {
                    if let Some(channel) = EegChannel::from_index(i) {
                        outliers.insert(channel);
                    }
                }
                peak = peak.max(channel_peak);
            }
            let reading = DetectorReading::when(
                peak > c.statistical_fallback_uv,
                peak / (2.0 * c.statistical_fallback_uv),
            );
            return (reading, outliers);
        }

        let mut worst: f64 = 0.0;
        for (i, ch) in raw.iter().enumerate() {
            let std = baseline.channel_var[i].sqrt().max(1e-6);
            let limit = c.statistical_sigma * std;
            let count = ch.iter().filter(|x| (*x - baseline.channel_mean[i]).abs() > limit).count();
            #[allow(clippy::cast_precision_loss)]
            let fraction = if ch.is_empty() { 0.0 } else { count as f64 / ch.len() as f64 };
            if fraction >= c.statistical_min_fraction && fraction > 0.0 {
                if let Some(channel) = EegChannel::from_index(i) {
                    outliers.insert(channel);
                }
            }
            worst = worst.max(fraction);
        }

        let reading = DetectorReading::when(
            worst >= c.statistical_min_fraction && worst > 0.0,
            worst / (10.0 * c.statistical_min_fraction),
        );
        (reading, outliers)
    }

    /// Channels held above the rail threshold for most of the window
    #[must_use]
    pub fn detect_saturation(&self, raw: &[Vec<f64>]) -> (DetectorReading, BadChannelSet) {
        let c = &self.config;
        let mut saturated = BadChannelSet::new();
        let mut worst: f64 = 0.0;
        for (i, ch) in raw.iter().enumerate() {
            if ch.is_empty() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let fraction = ch.iter().filter(|x| x.abs() > c.saturation_uv).count() as f64 / ch.len() as f64;
            if fraction >= c.saturation_min_fraction && fraction > 0.0 {
                if let Some(channel) = EegChannel::from_index(i) {
                    saturated.insert(channel);
                }
                worst = worst.max(fraction);
            }
        }
        (DetectorReading::when(!saturated.is_empty(), worst), saturated)
    }

    fn features(&self, input: &ArtifactInput<'_>, psd: &Psd) -> ArtifactFeatures {
        let nyquist = self.sample_rate / 2.0;
        let total = psd.total_power();
        let emg_intensity = if total > 0.0 {
            psd.band_power(30.0, 100.0_f64.min(nyquist)) / total / 0.3
        } else {
            0.0
        };

        let frontal: Vec<Vec<f64>> = EegChannel::FRONTAL
            .iter()
            .filter_map(|ch| input.raw.get(ch.index()))
            .map(|ch| centered(ch))
            .collect();
        let count: usize = frontal.iter().map(Vec::len).sum();
        #[allow(clippy::cast_precision_loss)]
        let forehead_emg = if count == 0 {
            0.0
        } else {
            frontal.iter().flatten().map(|x| x.abs()).sum::<f64>() / count as f64 / 100.0
        };

        let threshold = self.config.blink_threshold_uv;
        let blink_intensity = match frontal_peak(input.raw) {
            Some((peak, _, _)) if peak > threshold => (peak - threshold) / threshold + 0.5,
            _ => 0.0,
        };

        let accel_mags: Vec<f64> = input.accel.iter().map(|s| s.value.magnitude()).collect();
        let accel_term = if accel_mags.len() > 1 { mean_var(&accel_mags).1 / 0.5 } else { 0.0 };
        let gyro_term = mean_magnitude(input.gyro).map_or(0.0, |g| g / 500.0);

        ArtifactFeatures {
            emg_intensity: emg_intensity.clamp(0.0, 1.0),
            forehead_emg: forehead_emg.clamp(0.0, 1.0),
            blink_intensity: blink_intensity.clamp(0.0, 1.0),
            movement_intensity: accel_term.max(gyro_term).clamp(0.0, 1.0),
        }
    }

    /// Channel-averaged Welch PSD of the raw window
    fn mean_psd(&self, raw: &[Vec<f64>]) -> Psd {
        let psds: Vec<Psd> = raw.iter().map(|ch| self.analyzer.welch(ch)).collect();
        let resolution = self.analyzer.frequency_resolution();
        let Some(first) = psds.first() else {
            return Psd { resolution, power: Vec::new() };
        };
        #[allow(clippy::cast_precision_loss)]
        let n = psds.len() as f64;
        let power = (0..first.power.len())
            .map(|bin| psds.iter().map(|p| p.power[bin]).sum::<f64>() / n)
            .collect();
        Psd { resolution, power }
    }

    fn mains_power(&self, psd: &Psd) -> f64 {
        if self.mains_hz <= 0.0 || self.mains_hz >= self.sample_rate / 2.0 {
            return 0.0;
        }
        psd.band_power(self.mains_hz - MAINS_HALF_WIDTH_HZ, self.mains_hz + MAINS_HALF_WIDTH_HZ)
    }

    /// EMG sub-band share with the mains line cut out
    fn emg_ratio(&self, psd: &Psd) -> f64 {
        let total = psd.total_power();
        if total <= 0.0 {
            return 0.0;
        }
        let (low, high) = self.config.emg_band_hz;
        let high = high.min(self.sample_rate / 2.0);
        let mut emg = psd.band_power(low, high);
        if self.mains_hz > low && self.mains_hz < high {
            emg -= psd.band_power(self.mains_hz - EMG_MAINS_GUARD_HZ, self.mains_hz + EMG_MAINS_GUARD_HZ);
        }
        (emg.max(0.0) / total).clamp(0.0, 1.0)
    }
}

// ============================================================================
// Bad Channels
// ============================================================================

/// Applies the [`BadChannelPolicy`] to per-window saturation results
#[derive(Clone, Debug, Default)]
pub struct BadChannelTracker {
    policy: BadChannelPolicy,
    current: BadChannelSet,
    clean_streak: [u32; EegChannel::COUNT],
}

impl BadChannelTracker {
    /// Create a tracker
    #[must_use]
    pub fn new(policy: BadChannelPolicy) -> Self {
        Self { policy, ..Self::default() }
    }

    /// Bad channels for this window given this window's saturated channels
    pub fn update(&mut self, saturated: &BadChannelSet) -> BadChannelSet {
        match self.policy {
            BadChannelPolicy::PerWindow => {
                self.current = *saturated;
            }
            BadChannelPolicy::Sticky { heal_after_windows } => {
                for ch in EegChannel::ALL {
                    let i = ch.index();
                    if saturated.contains(ch) {
                        self.current.insert(ch);
                        self.clean_streak[i] = 0;
                    } else if self.current.contains(ch) {
                        self.clean_streak[i] += 1;
                        if self.clean_streak[i] >= heal_after_windows {
                            self.current.remove(ch);
                            self.clean_streak[i] = 0;
                            tracing::debug!(channel = ch.name(), "Channel healed");
                        }
                    }
                }
            }
        }
        self.current
    }

    /// Current bad set
    #[must_use]
    pub fn current(&self) -> BadChannelSet {
        self.current
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn mean_var(x: &[f64]) -> (f64, f64) {
    if x.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = x.len() as f64;
    let mean = x.iter().sum::<f64>() / n;
    let var = x.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

fn centered(x: &[f64]) -> Vec<f64> {
    let (mean, _) = mean_var(x);
    x.iter().map(|v| v - mean).collect()
}

fn mean_magnitude(samples: &[MotionSample]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = samples.len() as f64;
    Some(samples.iter().map(|s| s.value.magnitude()).sum::<f64>() / n)
}

fn max_deviation(values: &[f64], reference: f64) -> f64 {
    values.iter().map(|v| (v - reference).abs()).fold(0.0, f64::max)
}

/// Largest centered frontal amplitude as `(peak, channel index, sample index)`
fn frontal_peak(raw: &[Vec<f64>]) -> Option<(f64, usize, usize)> {
    EegChannel::FRONTAL
        .iter()
        .filter_map(|ch| raw.get(ch.index()).map(|s| (ch.index(), centered(s))))
        .filter_map(|(ch, s)| {
            s.iter()
                .enumerate()
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
                .map(|(idx, v)| (v.abs(), ch, idx))
        })
        .max_by(|a, b| a.0.total_cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexstream_core::types::Vec3;
    use std::f64::consts::PI;

    const RATE: f64 = 256.0;
    const N: usize = 256;

    fn noise(seed: u64, n: usize) -> Vec<f64> {
        let mut x = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
        (0..n)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                (x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
            })
            .collect()
    }

    fn clean(seed: u64) -> Vec<Vec<f64>> {
        (0..4)
            .map(|c| {
                let hiss = noise(seed * 10 + c, N);
                (0..N)
                    .map(|i| 10.0 * (2.0 * PI * 10.0 * i as f64 / RATE).sin() + 3.0 * hiss[i])
                    .collect()
            })
            .collect()
    }

    fn classifier() -> ArtifactClassifier {
        ArtifactClassifier::new(&ArtifactConfig::default(), &SpectralConfig::default(), RATE, 60.0)
    }

    fn motion(values: &[Vec3]) -> Vec<MotionSample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| MotionSample::new(i as f64 / 52.0, *v))
            .collect()
    }

    fn still_accel() -> Vec<MotionSample> {
        motion(&[Vec3::new(0.0, 0.0, 1.0); 52])
    }

    fn warmed_baseline(cls: &ArtifactClassifier) -> ArtifactBaseline {
        let mut baseline = ArtifactBaseline::new();
        let accel = still_accel();
        let gyro = motion(&[Vec3::new(1.0, 1.0, 1.0); 52]);
        for seed in 0..8 {
            let raw = clean(seed);
            let report = cls.classify(&ArtifactInput { raw: &raw, accel: &accel, gyro: &gyro }, &baseline);
            baseline.absorb(&report);
        }
        baseline
    }

    fn with_blink(mut raw: Vec<Vec<f64>>, width_s: f64) -> Vec<Vec<f64>> {
        let width = (width_s * RATE) as usize;
        let start = N / 2 - width / 2;
        for ch in [1, 2] {
            for k in 0..width {
                raw[ch][start + k] += 300.0 * (PI * k as f64 / width as f64).sin();
            }
        }
        raw
    }

    #[test]
    fn test_clean_window_has_full_quality() {
        let cls = classifier();
        let baseline = warmed_baseline(&cls);
        let raw = clean(99);
        let accel = still_accel();
        let report = cls.classify(&ArtifactInput { raw: &raw, accel: &accel, gyro: &[] }, &baseline);
        assert!(!report.flags().any(), "{:?}", report.flags());
        assert!((report.quality - 1.0).abs() < 1e-12);
        assert_eq!(report.strongest(), ArtifactKind::Clean);
    }

    #[test]
    fn test_blink_requires_rotation_when_gyro_present() {
        let cls = classifier();
        let raw = with_blink(clean(1), 0.25);

        let spike = motion(&[Vec3::new(0.0, 0.0, 250.0); 5]);
        assert!(cls.detect_eye_blink(&raw, &spike).fired);

        let calm = motion(&[Vec3::new(0.0, 0.0, 5.0); 5]);
        assert!(!cls.detect_eye_blink(&raw, &calm).fired);

        let eeg_only = cls.detect_eye_blink(&raw, &[]);
        assert!(eeg_only.fired);
        assert!(eeg_only.confidence < cls.detect_eye_blink(&raw, &spike).confidence);
    }

    #[test]
    fn test_blink_duration_window() {
        let cls = classifier();
        let spike = motion(&[Vec3::new(0.0, 0.0, 250.0); 5]);
        // Far longer than a blink
        let slow = with_blink(clean(2), 0.9);
        assert!(!cls.detect_eye_blink(&slow, &spike).fired);
    }

    #[test]
    fn test_muscle_needs_jaw_motion() {
        let cls = classifier();
        let raw: Vec<Vec<f64>> = clean(3)
            .into_iter()
            .map(|ch| {
                ch.iter()
                    .enumerate()
                    .map(|(i, x)| x + 25.0 * (2.0 * PI * 75.0 * i as f64 / RATE).sin())
                    .collect()
            })
            .collect();
        let psd = cls.mean_psd(&raw);

        let chewing: Vec<Vec3> = (0..52).map(|i| Vec3::new(if i % 2 == 0 { 0.05 } else { -0.05 }, 0.0, 1.0)).collect();
        assert!(cls.detect_muscle(&psd, &motion(&chewing)).fired);
        assert!(!cls.detect_muscle(&psd, &still_accel()).fired);
        assert!(cls.detect_muscle(&psd, &[]).fired);

        let quiet = cls.mean_psd(&clean(3));
        assert!(!cls.detect_muscle(&quiet, &motion(&chewing)).fired);
    }

    #[test]
    fn test_mains_is_not_muscle() {
        let cls = classifier();
        let raw: Vec<Vec<f64>> = clean(4)
            .into_iter()
            .map(|ch| {
                ch.iter()
                    .enumerate()
                    .map(|(i, x)| x + 40.0 * (2.0 * PI * 60.0 * i as f64 / RATE).sin())
                    .collect()
            })
            .collect();
        let psd = cls.mean_psd(&raw);
        assert!(cls.emg_ratio(&psd) < 0.15);
    }

    #[test]
    fn test_motion_against_previous_window() {
        let cls = classifier();
        let baseline = warmed_baseline(&cls);

        let jolt = motion(&[Vec3::new(0.0, 0.0, 1.3); 52]);
        assert!(cls.detect_motion(&jolt, &[], &baseline).fired);

        let spin = motion(&[Vec3::new(0.0, 150.0, 0.0); 10]);
        assert!(cls.detect_motion(&still_accel(), &spin, &baseline).fired);

        assert!(!cls.detect_motion(&still_accel(), &[], &baseline).fired);
        // No history, no jump
        assert!(!cls.detect_motion(&jolt, &[], &ArtifactBaseline::new()).fired);
    }

    #[test]
    fn test_line_interference_against_session_baseline() {
        let cls = classifier();
        let baseline = warmed_baseline(&cls);
        assert!(baseline.line_windows() >= 5);

        let hum: Vec<Vec<f64>> = clean(5)
            .into_iter()
            .map(|ch| {
                ch.iter()
                    .enumerate()
                    .map(|(i, x)| x + 30.0 * (2.0 * PI * 60.0 * i as f64 / RATE).sin())
                    .collect()
            })
            .collect();
        let psd = cls.mean_psd(&hum);
        assert!(cls.detect_line_interference(cls.mains_power(&psd), &baseline).fired);

        let quiet = cls.mean_psd(&clean(6));
        assert!(!cls.detect_line_interference(cls.mains_power(&quiet), &baseline).fired);
        // Baseline not yet trusted
        assert!(!cls.detect_line_interference(cls.mains_power(&psd), &ArtifactBaseline::new()).fired);
    }

    #[test]
    fn test_statistical_outliers() {
        let cls = classifier();
        let baseline = warmed_baseline(&cls);
        assert!(!cls.detect_statistical(&clean(7), &baseline).0.fired);

        let mut raw = clean(7);
        for k in 0..6 {
            raw[3][40 + k * 30] += 120.0;
        }
        let (reading, outliers) = cls.detect_statistical(&raw, &baseline);
        assert!(reading.fired);
        assert_eq!(outliers.to_vec(), vec![EegChannel::Tp10]);

        // Before the baseline exists only large excursions count
        assert!(!cls.detect_statistical(&raw, &ArtifactBaseline::new()).0.fired);
        raw[0][100] += 400.0;
        let (reading, outliers) = cls.detect_statistical(&raw, &ArtifactBaseline::new());
        assert!(reading.fired);
        assert_eq!(outliers.to_vec(), vec![EegChannel::Tp9]);
    }

    #[test]
    fn test_railed_window_does_not_poison_channel_baseline() {
        let cls = classifier();
        let mut baseline = warmed_baseline(&cls);
        let accel = still_accel();
        let gyro = motion(&[Vec3::new(1.0, 1.0, 1.0); 52]);

        let mut railed = clean(20);
        railed[0] = vec![500.0; N];
        let report = cls.classify(&ArtifactInput { raw: &railed, accel: &accel, gyro: &gyro }, &baseline);
        assert!(report.saturated.contains(EegChannel::Tp9));
        baseline.absorb(&report);

        let mut flagged = 0;
        for seed in 21..51 {
            let raw = clean(seed);
            let report = cls.classify(&ArtifactInput { raw: &raw, accel: &accel, gyro: &gyro }, &baseline);
            if report.reading(ArtifactKind::Statistical).fired {
                flagged += 1;
            }
            baseline.absorb(&report);
        }
        assert_eq!(flagged, 0);
    }

    #[test]
    fn test_persistent_shift_is_eventually_absorbed() {
        let cls = classifier();
        let mut baseline = warmed_baseline(&cls);
        let accel = still_accel();

        // Electrode re-seated with a new offset
        let shifted = |seed: u64| -> Vec<Vec<f64>> {
            let mut raw = clean(seed);
            raw[3] = raw[3].iter().map(|x| x + 60.0).collect();
            raw
        };
        for seed in 30..60 {
            let raw = shifted(seed);
            let report = cls.classify(&ArtifactInput { raw: &raw, accel: &accel, gyro: &[] }, &baseline);
            baseline.absorb(&report);
        }
        let raw = shifted(60);
        assert!(!cls.detect_statistical(&raw, &baseline).0.fired);
    }

    #[test]
    fn test_saturated_channel_is_flagged() {
        let cls = classifier();
        let mut raw = clean(8);
        raw[0] = vec![500.0; N];
        let (reading, saturated) = cls.detect_saturation(&raw);
        assert!(reading.fired);
        assert_eq!(saturated.to_vec(), vec![EegChannel::Tp9]);

        // A brief excursion is not sustained
        let mut raw = clean(8);
        for x in raw[2].iter_mut().take(20) {
            *x = 450.0;
        }
        assert!(!cls.detect_saturation(&raw).0.fired);
    }

    #[test]
    fn test_quality_falls_with_each_detector() {
        let cls = classifier();
        let baseline = warmed_baseline(&cls);
        let spin = motion(&[Vec3::new(0.0, 300.0, 0.0); 10]);

        let mut one = clean(9);
        one[0] = vec![500.0; N];
        let q1 = cls.classify(&ArtifactInput { raw: &one, accel: &still_accel(), gyro: &[] }, &baseline);

        let q2 = cls.classify(&ArtifactInput { raw: &one, accel: &still_accel(), gyro: &spin }, &baseline);

        assert!(q1.flags().count() < q2.flags().count());
        assert!(q1.quality < 1.0);
        assert!(q2.quality < q1.quality);
        assert!(q2.quality > 0.0);
    }

    #[test]
    fn test_features_are_clipped() {
        let cls = classifier();
        let mut raw = with_blink(clean(10), 0.2);
        raw[1] = raw[1].iter().map(|x| x * 10.0).collect();
        let gyro = motion(&[Vec3::new(0.0, 0.0, 900.0); 5]);
        let report = cls.classify(&ArtifactInput { raw: &raw, accel: &[], gyro: &gyro }, &ArtifactBaseline::new());
        let f = report.features;
        for v in [f.emg_intensity, f.forehead_emg, f.blink_intensity, f.movement_intensity] {
            assert!((0.0..=1.0).contains(&v));
        }
        assert!((f.blink_intensity - 1.0).abs() < 1e-12);
        assert!((f.movement_intensity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sticky_bad_channels_heal() {
        let bad: BadChannelSet = [EegChannel::Af7].into_iter().collect();
        let clear = BadChannelSet::new();

        let mut per_window = BadChannelTracker::new(BadChannelPolicy::PerWindow);
        assert_eq!(per_window.update(&bad), bad);
        assert!(per_window.update(&clear).is_empty());

        let mut sticky = BadChannelTracker::new(BadChannelPolicy::Sticky { heal_after_windows: 3 });
        assert_eq!(sticky.update(&bad), bad);
        assert_eq!(sticky.update(&clear), bad);
        assert_eq!(sticky.update(&clear), bad);
        assert!(sticky.update(&clear).is_empty());
    }
}
