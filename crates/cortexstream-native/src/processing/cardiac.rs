//! Heart rate and variability from the pulse channel
//!
//! Pipeline per window:
//!
//! 1. The session appends pulse samples to a rolling [`PulseBuffer`]
//! 2. The buffer is z-scored and bandpassed (0.5-4 Hz)
//! 3. Peaks are found with a prominence test and a minimum spacing derived
//!    from the physiological BPM ceiling
//! 4. RR intervals outside the physiological range are discarded
//! 5. Heart rate, RMSSD and SDNN are reported only when enough beats exist
//!
//! Numeric values are never fabricated: a reading is either
//! [`CardiacStatus::Valid`] with every field present, or carries the reason
//! it is unavailable.

use std::collections::VecDeque;

use cortexstream_core::config::CardiacConfig;
use cortexstream_core::snapshot::{CardiacMetrics, CardiacStatus};
use cortexstream_core::types::PpgSample;

use super::filters::FilterChain;

/// Samples needed before any peak search
const MIN_SAMPLES: usize = 10;

/// Allowed drift of the measured pulse rate from nominal before it is used
const RATE_DRIFT_HZ: f64 = 10.0;

// ============================================================================
// Rolling Buffer
// ============================================================================

/// Rolling window of pulse samples as `(timestamp, value)`
#[derive(Clone, Debug, Default)]
pub struct PulseBuffer {
    samples: VecDeque<(f64, f64)>,
    span_s: f64,
}

impl PulseBuffer {
    /// Buffer holding the last `span_s` seconds
    #[must_use]
    pub fn new(span_s: f64) -> Self {
        Self { samples: VecDeque::new(), span_s }
    }

    /// Append one sample, using its infrared reading when present
    pub fn push(&mut self, sample: &PpgSample) {
        self.push_value(sample.timestamp, sample.pulse_value());
    }

    /// Append a raw value
    pub fn push_value(&mut self, timestamp: f64, value: f64) {
        if let Some(&(last, _)) = self.samples.back() {
            if timestamp <= last {
                return;
            }
        }
        self.samples.push_back((timestamp, value));
        while let Some(&(first, _)) = self.samples.front() {
            if timestamp - first > self.span_s {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Append many samples
    pub fn extend<'a>(&mut self, samples: impl IntoIterator<Item = &'a PpgSample>) {
        for s in samples {
            self.push(s);
        }
    }

    /// Number of samples held
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether no samples are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time covered by the buffer (seconds)
    #[must_use]
    pub fn duration(&self) -> f64 {
        match (self.samples.front(), self.samples.back()) {
            (Some(first), Some(last)) => last.0 - first.0,
            _ => 0.0,
        }
    }

    /// Timestamp of the newest sample
    #[must_use]
    pub fn last_timestamp(&self) -> Option<f64> {
        self.samples.back().map(|s| s.0)
    }

    fn split(&self) -> (Vec<f64>, Vec<f64>) {
        self.samples.iter().copied().unzip()
    }
}

// ============================================================================
// Peak Detection
// ============================================================================

/// Indices of local maxima with at least `prominence`, no two closer than
/// `min_distance` samples
///
/// When two candidates are too close the higher one is kept.
#[must_use]
pub fn find_peaks(signal: &[f64], min_distance: usize, prominence: f64) -> Vec<usize> {
    let n = signal.len();
    if n < 3 {
        return Vec::new();
    }

    // Local maxima, plateaus reported at their first sample
    let mut candidates = Vec::new();
    let mut i = 1;
    while i < n - 1 {
        if signal[i] > signal[i - 1] {
            let mut j = i;
            while j + 1 < n && signal[j + 1] == signal[i] {
                j += 1;
            }
            if j + 1 < n && signal[j + 1] < signal[i] {
                candidates.push(i);
            }
            i = j + 1;
        } else {
            i += 1;
        }
    }

    // Spacing: visit by height, suppress lower neighbours
    let mut keep = vec![true; candidates.len()];
    if min_distance > 1 {
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| signal[candidates[b]].total_cmp(&signal[candidates[a]]));
        for &k in &order {
            if !keep[k] {
                continue;
            }
            let pos = candidates[k];
            for (other, flag) in keep.iter_mut().enumerate() {
                if other != k && candidates[other].abs_diff(pos) < min_distance {
                    *flag = false;
                }
            }
        }
    }

    candidates
        .into_iter()
        .zip(keep)
        .filter(|&(idx, kept)| kept && peak_prominence(signal, idx) >= prominence)
        .map(|(idx, _)| idx)
        .collect()
}

/// Height of a peak over the higher of its two bases
fn peak_prominence(signal: &[f64], idx: usize) -> f64 {
    let peak = signal[idx];

    let mut left_min = peak;
    for &v in signal[..idx].iter().rev() {
        if v > peak {
            break;
        }
        left_min = left_min.min(v);
    }

    let mut right_min = peak;
    for &v in &signal[idx + 1..] {
        if v > peak {
            break;
        }
        right_min = right_min.min(v);
    }

    peak - left_min.max(right_min)
}

// ============================================================================
// Variability
// ============================================================================

/// Heart rate and variability over a set of RR intervals
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HrvStats {
    /// Beats per minute
    pub heart_rate: f64,
    /// Root mean square of successive differences (ms)
    pub rmssd: f64,
    /// Standard deviation of intervals (ms)
    pub sdnn: f64,
}

impl HrvStats {
    /// Statistics of RR intervals given in seconds; `None` with fewer than two
    #[must_use]
    pub fn from_intervals(rr: &[f64]) -> Option<Self> {
        if rr.len() < 2 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = rr.len() as f64;
        let mean = rr.iter().sum::<f64>() / n;
        if mean <= 0.0 {
            return None;
        }
        let sdnn = (rr.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n).sqrt();
        #[allow(clippy::cast_precision_loss)]
        let rmssd = (rr.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f64>() / (rr.len() - 1) as f64).sqrt();

        Some(Self { heart_rate: 60.0 / mean, rmssd: rmssd * 1000.0, sdnn: sdnn * 1000.0 })
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Beat detection and variability over a [`PulseBuffer`]
#[derive(Clone, Debug)]
pub struct CardiacExtractor {
    config: CardiacConfig,
}

impl CardiacExtractor {
    /// Create an extractor
    #[must_use]
    pub fn new(config: &CardiacConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Reading for the buffer as of `now` (device clock, seconds)
    #[must_use]
    pub fn extract(&self, buffer: &PulseBuffer, now: f64) -> CardiacMetrics {
        let c = &self.config;
        let Some(last) = buffer.last_timestamp() else {
            return CardiacMetrics::unavailable(CardiacStatus::SignalLost, 0);
        };
        if now - last >= c.signal_lost_s {
            return CardiacMetrics::unavailable(CardiacStatus::SignalLost, 0);
        }

        let beats = self.detect_beats(buffer);
        let (min_rr, max_rr) = (60.0 / c.max_bpm, 60.0 / c.min_bpm);
        let rr: Vec<f64> = beats
            .windows(2)
            .map(|w| w[1] - w[0])
            .filter(|r| (min_rr..=max_rr).contains(r))
            .collect();

        match HrvStats::from_intervals(&rr) {
            Some(stats) if beats.len() >= c.min_peaks => {
                CardiacMetrics::measured(stats.heart_rate, stats.rmssd, stats.sdnn, beats.len())
            }
            _ => CardiacMetrics::unavailable(CardiacStatus::Calibrating, beats.len()),
        }
    }

    /// Timestamps of detected beats
    #[must_use]
    pub fn detect_beats(&self, buffer: &PulseBuffer) -> Vec<f64> {
        let c = &self.config;
        let duration = buffer.duration();
        if buffer.len() < MIN_SAMPLES || duration < c.min_buffer_s {
            return Vec::new();
        }

        #[allow(clippy::cast_precision_loss)]
        let measured = (buffer.len() - 1) as f64 / duration;
        let rate = if (measured - c.ppg_rate_hz).abs() > RATE_DRIFT_HZ {
            tracing::debug!(measured, nominal = c.ppg_rate_hz, "Using measured pulse rate");
            measured
        } else {
            c.ppg_rate_hz
        };

        let (timestamps, values) = buffer.split();
        let normalized = z_score(&values);
        let filtered = if rate >= c.min_filter_rate_hz && c.filter_high_hz < rate / 2.0 {
            FilterChain::butterworth_bandpass(rate, c.filter_low_hz, c.filter_high_hz, 2).filtered(&normalized)
        } else {
            normalized
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let settle = ((c.settle_s * rate).round() as usize).min(filtered.len());
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let min_distance = ((rate * 60.0 / c.max_bpm).ceil() as usize).max(1);

        let search = &filtered[settle..];
        let mut peaks = find_peaks(search, min_distance, c.prominence);
        if peaks.len() < 2 {
            peaks = find_peaks(search, min_distance, c.fallback_prominence);
        }

        peaks.into_iter().map(|i| timestamps[settle + i]).collect()
    }
}

fn z_score(values: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
    if std > 0.0 {
        values.iter().map(|v| (v - mean) / std).collect()
    } else {
        values.iter().map(|v| v - mean).collect()
    }
}
