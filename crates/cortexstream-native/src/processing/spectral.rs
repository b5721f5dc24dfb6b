//! Welch spectral analysis and band-power state rules
//!
//! Provides power spectral density estimates (Hann-windowed, overlapping,
//! averaged periodograms), band-power integration, cross-channel averaging
//! that skips bad channels, and the rule table mapping band ratios to a
//! [`BrainState`].

use std::f64::consts::PI;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use cortexstream_core::config::{SessionMode, SpectralConfig};
use cortexstream_core::types::{BadChannelSet, BandPowers, BrainState, EegBand, EegChannel};

/// One-sided power spectral density
#[derive(Clone, Debug, PartialEq)]
pub struct Psd {
    /// Hz per bin
    pub resolution: f64,
    /// Power density per bin, starting at 0 Hz
    pub power: Vec<f64>,
}

impl Psd {
    /// Frequency of a bin
    #[must_use]
    pub fn frequency(&self, bin: usize) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let f = bin as f64 * self.resolution;
        f
    }

    /// Density at the bin nearest to `freq`
    #[must_use]
    pub fn power_at(&self, freq: f64) -> f64 {
        if self.power.is_empty() || freq < 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bin = (freq / self.resolution).round() as usize;
        self.power.get(bin).copied().unwrap_or(0.0)
    }

    /// Integrated power over `[low_hz, high_hz]` (trapezoidal rule)
    #[must_use]
    pub fn band_power(&self, low_hz: f64, high_hz: f64) -> f64 {
        let bins: Vec<f64> = self
            .power
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                let f = self.frequency(*i);
                f >= low_hz - 1e-9 && f <= high_hz + 1e-9
            })
            .map(|(_, &p)| p)
            .collect();

        match bins.len() {
            0 => 0.0,
            1 => bins[0] * self.resolution,
            _ => bins.windows(2).map(|w| (w[0] + w[1]) * 0.5 * self.resolution).sum(),
        }
    }

    /// Integrated power over every bin
    #[must_use]
    pub fn total_power(&self) -> f64 {
        self.band_power(0.0, self.frequency(self.power.len().saturating_sub(1)))
    }

    /// Absolute power per EEG band
    #[must_use]
    pub fn band_powers(&self) -> BandPowers {
        BandPowers::from_fn(|band| {
            let (low, high) = band.range_hz();
            self.band_power(low, high)
        })
    }
}

/// Band powers averaged across good channels
#[derive(Clone, Debug, PartialEq)]
pub struct SpectralEstimate {
    /// Mean relative band powers (percent, sums to 100)
    pub band_powers: BandPowers,
    /// Relative band powers per channel, in acquisition order
    pub per_channel: Vec<BandPowers>,
    /// Channels that entered the average
    pub used_channels: Vec<EegChannel>,
}

/// Welch spectral analyzer
///
/// Immutable after construction; a single analyzer can serve every window
/// of a session.
pub struct SpectralAnalyzer {
    segment_len: usize,
    step: usize,
    sample_rate: f64,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    window_energy: f64,
}

impl SpectralAnalyzer {
    /// Create a new spectral analyzer
    ///
    /// # Arguments
    ///
    /// * `config` - Welch segment length and overlap
    /// * `sample_rate` - Sample rate in Hz
    #[must_use]
    pub fn new(config: &SpectralConfig, sample_rate: f64) -> Self {
        let segment_len = config.segment_len.max(2);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let overlap = (segment_len as f64 * config.overlap).round() as usize;
        let step = (segment_len - overlap.min(segment_len - 1)).max(1);

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(segment_len);
        let window = hann_window(segment_len);
        let window_energy = window.iter().map(|w| w * w).sum();

        Self { segment_len, step, sample_rate, fft, window, window_energy }
    }

    /// Sample rate in Hz
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frequency resolution (Hz per bin)
    #[must_use]
    pub fn frequency_resolution(&self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let n = self.segment_len as f64;
        self.sample_rate / n
    }

    /// Welch PSD of a signal
    ///
    /// Each segment has its mean removed and is Hann windowed; periodograms
    /// are averaged and scaled to a one-sided density. Signals shorter than
    /// one segment are zero padded.
    #[must_use]
    pub fn welch(&self, signal: &[f64]) -> Psd {
        let n_freqs = self.segment_len / 2 + 1;
        let mut power = vec![0.0; n_freqs];

        let starts: Vec<usize> = if signal.len() >= self.segment_len {
            (0..=signal.len() - self.segment_len).step_by(self.step).collect()
        } else {
            vec![0]
        };

        let short_window;
        let (window, energy) = if signal.len() >= self.segment_len || signal.is_empty() {
            (&self.window[..], self.window_energy)
        } else {
            short_window = hann_window(signal.len());
            let e = short_window.iter().map(|w| w * w).sum::<f64>();
            (&short_window[..], e)
        };

        let mut buffer = vec![Complex::new(0.0, 0.0); self.segment_len];
        let mut scratch = vec![Complex::new(0.0, 0.0); self.fft.get_inplace_scratch_len()];

        for &start in &starts {
            let end = (start + self.segment_len).min(signal.len());
            let segment = &signal[start..end];
            #[allow(clippy::cast_precision_loss)]
            let mean = if segment.is_empty() {
                0.0
            } else {
                segment.iter().sum::<f64>() / segment.len() as f64
            };

            buffer.fill(Complex::new(0.0, 0.0));
            for (slot, (&s, &w)) in buffer.iter_mut().zip(segment.iter().zip(window.iter())) {
                *slot = Complex::new((s - mean) * w, 0.0);
            }

            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            for (bin, p) in power.iter_mut().enumerate() {
                *p += buffer[bin].norm_sqr();
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let segments = starts.len() as f64;
        let scale = if energy > 0.0 { 1.0 / (self.sample_rate * energy * segments) } else { 0.0 };
        let nyquist = if self.segment_len % 2 == 0 { Some(n_freqs - 1) } else { None };
        for (bin, p) in power.iter_mut().enumerate() {
            *p *= scale;
            if bin != 0 && Some(bin) != nyquist {
                *p *= 2.0;
            }
        }

        Psd { resolution: self.frequency_resolution(), power }
    }

    /// Relative band powers of one channel (percent)
    #[must_use]
    pub fn relative_band_powers(&self, signal: &[f64]) -> BandPowers {
        self.welch(signal).band_powers().normalized()
    }

    /// Average relative band powers over the channels not in `bad`
    ///
    /// When every channel is bad the average falls back to all channels.
    #[must_use]
    pub fn average_band_powers(&self, channels: &[Vec<f64>], bad: &BadChannelSet) -> SpectralEstimate {
        let per_channel: Vec<BandPowers> =
            channels.iter().map(|ch| self.relative_band_powers(ch)).collect();

        let mut used_channels: Vec<EegChannel> = EegChannel::ALL
            .into_iter()
            .take(per_channel.len())
            .filter(|ch| !bad.contains(*ch))
            .collect();
        if used_channels.is_empty() {
            used_channels = EegChannel::ALL.into_iter().take(per_channel.len()).collect();
        }

        let band_powers = BandPowers::mean(used_channels.iter().map(|ch| &per_channel[ch.index()]))
            .map_or_else(BandPowers::uniform, |mean| mean.normalized());

        SpectralEstimate { band_powers, per_channel, used_channels }
    }
}

/// Generate Hann window coefficients
fn hann_window(size: usize) -> Vec<f64> {
    if size < 2 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            #[allow(clippy::cast_precision_loss)]
            let phase = 2.0 * PI * i as f64 / (size - 1) as f64;
            0.5 * (1.0 - phase.cos())
        })
        .collect()
}

// ============================================================================
// State Rules
// ============================================================================

/// Map normalized band powers to a state label
#[must_use]
pub fn classify_state(powers: &BandPowers, mode: SessionMode) -> BrainState {
    if powers.total() <= f64::EPSILON {
        return BrainState::Unknown;
    }
    match mode {
        SessionMode::Standard => classify_standard(powers),
        SessionMode::Meditation => classify_meditation(powers),
    }
}

fn classify_standard(p: &BandPowers) -> BrainState {
    // Awake wearers rarely show this much delta; it is usually movement or
    // electrode drift, so it is never read as drowsiness.
    if p.delta > 40.0 {
        return BrainState::Mixed;
    }
    if p.beta > 30.0 && p.beta_alpha_ratio() > 1.5 && p.gamma <= 15.0 {
        return BrainState::Focused;
    }
    if p.gamma > 15.0 && p.beta > 25.0 {
        return BrainState::PeakFocus;
    }
    if p.alpha > 30.0 && p.beta < 20.0 {
        return BrainState::Relaxed;
    }
    if p.theta > 25.0 && p.alpha > 20.0 {
        return BrainState::Creative;
    }
    if p.delta > 30.0 && p.theta > 20.0 {
        return BrainState::Drowsy;
    }
    BrainState::Mixed
}

fn classify_meditation(p: &BandPowers) -> BrainState {
    if p.theta > 30.0 && p.alpha > 25.0 {
        BrainState::DeepMeditation
    } else if p.alpha > 30.0 {
        BrainState::Meditative
    } else if p.alpha > 20.0 && p.beta < 25.0 {
        BrainState::EnteringMeditation
    } else {
        BrainState::Returning
    }
}

/// Share of normalized power in the gamma band, in [0, 1]
#[must_use]
pub fn gamma_fraction(powers: &BandPowers) -> f64 {
    (powers.get(EegBand::Gamma) / 100.0).clamp(0.0, 1.0)
}
