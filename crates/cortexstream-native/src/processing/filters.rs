//! Digital filters for EEG and pulse processing
//!
//! Provides floating-point IIR filters (transposed direct form II biquads)
//! and Butterworth cascades built from them.
//!
//! Filters used by the per-window pipeline are stored as prototypes: every
//! call to [`FilterChain::filtered`] runs on a fresh copy, so filtering a
//! window never depends on what was filtered before it.

use std::f64::consts::PI;

use rustfft::num_complex::Complex;

/// Butterworth IIR filter coefficients (second-order section)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiquadCoeffs {
    /// Numerator coefficients [b0, b1, b2]
    pub b: [f64; 3],
    /// Denominator coefficients [a0=1, a1, a2]
    pub a: [f64; 3],
}

impl BiquadCoeffs {
    /// Magnitude response at `freq` Hz
    #[must_use]
    pub fn magnitude_at(&self, sample_rate: f64, freq: f64) -> f64 {
        let w = 2.0 * PI * freq / sample_rate;
        let z1 = Complex::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = self.b[0] + z1 * self.b[1] + z2 * self.b[2];
        let den = self.a[0] + z1 * self.a[1] + z2 * self.a[2];
        (num / den).norm()
    }
}

/// Second-order biquad filter section
#[derive(Clone, Debug)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    /// State: [z1, z2]
    state: [f64; 2],
}

impl Biquad {
    /// Create a new biquad section with given coefficients
    #[must_use]
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self { coeffs, state: [0.0, 0.0] }
    }

    /// Second-order lowpass with quality factor `q` (bilinear, prewarped)
    #[must_use]
    pub fn lowpass_q(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self::new(BiquadCoeffs {
            b: [k2 * norm, 2.0 * k2 * norm, k2 * norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        })
    }

    /// Second-order highpass with quality factor `q` (bilinear, prewarped)
    #[must_use]
    pub fn highpass_q(sample_rate: f64, cutoff: f64, q: f64) -> Self {
        let k = (PI * cutoff / sample_rate).tan();
        let k2 = k * k;
        let norm = 1.0 / (1.0 + k / q + k2);

        Self::new(BiquadCoeffs {
            b: [norm, -2.0 * norm, norm],
            a: [1.0, 2.0 * (k2 - 1.0) * norm, (1.0 - k / q + k2) * norm],
        })
    }

    /// Create a second-order Butterworth lowpass filter
    #[must_use]
    pub fn lowpass(sample_rate: f64, cutoff: f64) -> Self {
        Self::lowpass_q(sample_rate, cutoff, std::f64::consts::FRAC_1_SQRT_2)
    }

    /// Create a second-order Butterworth highpass filter
    #[must_use]
    pub fn highpass(sample_rate: f64, cutoff: f64) -> Self {
        Self::highpass_q(sample_rate, cutoff, std::f64::consts::FRAC_1_SQRT_2)
    }

    /// Create a notch filter for power line interference
    #[must_use]
    pub fn notch(sample_rate: f64, notch_freq: f64, q: f64) -> Self {
        let omega = 2.0 * PI * notch_freq / sample_rate;
        let cos_omega = omega.cos();
        let alpha = omega.sin() / (2.0 * q);

        let norm = 1.0 / (1.0 + alpha);

        Self::new(BiquadCoeffs {
            b: [norm, -2.0 * cos_omega * norm, norm],
            a: [1.0, -2.0 * cos_omega * norm, (1.0 - alpha) * norm],
        })
    }

    /// Section coefficients
    #[must_use]
    pub fn coeffs(&self) -> &BiquadCoeffs {
        &self.coeffs
    }

    /// Process a single sample
    pub fn filter(&mut self, input: f64) -> f64 {
        let BiquadCoeffs { b, a } = self.coeffs;
        let output = b[0] * input + self.state[0];
        self.state[0] = b[1] * input - a[1] * output + self.state[1];
        self.state[1] = b[2] * input - a[2] * output;
        output
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        self.state = [0.0, 0.0];
    }
}

/// Quality factors of the sections of an even-order Butterworth filter
fn butterworth_qs(order: usize) -> Vec<f64> {
    let sections = (order / 2).max(1);
    #[allow(clippy::cast_precision_loss)]
    let n = (2 * sections) as f64;
    (0..sections)
        .map(|k| {
            #[allow(clippy::cast_precision_loss)]
            let theta = PI * (2 * k + 1) as f64 / (2.0 * n);
            1.0 / (2.0 * theta.cos())
        })
        .collect()
}

/// Cascade of biquad sections
#[derive(Clone, Debug, Default)]
pub struct FilterChain {
    sections: Vec<Biquad>,
}

impl FilterChain {
    /// Empty (identity) chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Butterworth bandpass of the given even order per edge
    #[must_use]
    pub fn butterworth_bandpass(sample_rate: f64, low_hz: f64, high_hz: f64, order: usize) -> Self {
        let qs = butterworth_qs(order);
        let mut sections = Vec::with_capacity(qs.len() * 2);
        sections.extend(qs.iter().map(|&q| Biquad::highpass_q(sample_rate, low_hz, q)));
        sections.extend(qs.iter().map(|&q| Biquad::lowpass_q(sample_rate, high_hz, q)));
        Self { sections }
    }

    /// Append a notch section
    #[must_use]
    pub fn with_notch(mut self, sample_rate: f64, freq: f64, q: f64) -> Self {
        if freq > 0.0 && freq < sample_rate / 2.0 {
            self.sections.push(Biquad::notch(sample_rate, freq, q));
        }
        self
    }

    /// Number of sections
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Whether the chain passes input through unchanged
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Process a single sample through every section
    pub fn filter(&mut self, input: f64) -> f64 {
        self.sections.iter_mut().fold(input, |x, s| s.filter(x))
    }

    /// Filter a block in place
    pub fn process_block(&mut self, block: &mut [f64]) {
        for x in block.iter_mut() {
            *x = self.filter(*x);
        }
    }

    /// Filter a signal with a fresh copy of this chain
    #[must_use]
    pub fn filtered(&self, signal: &[f64]) -> Vec<f64> {
        let mut chain = self.clone();
        chain.reset();
        let mut out = signal.to_vec();
        chain.process_block(&mut out);
        out
    }

    /// Cascade magnitude response at `freq` Hz
    #[must_use]
    pub fn magnitude_at(&self, sample_rate: f64, freq: f64) -> f64 {
        self.sections
            .iter()
            .map(|s| s.coeffs().magnitude_at(sample_rate, freq))
            .product()
    }

    /// Reset filter state
    pub fn reset(&mut self) {
        for s in &mut self.sections {
            s.reset();
        }
    }
}

/// Per-channel EEG conditioning filters (bandpass + mains notch)
#[derive(Clone, Debug)]
pub struct EegFilterBank {
    prototype: FilterChain,
    sample_rate: f64,
}

impl EegFilterBank {
    /// Create a filter bank
    ///
    /// # Arguments
    ///
    /// * `sample_rate` - EEG sample rate in Hz
    /// * `low_hz`, `high_hz` - passband edges
    /// * `notch_hz`, `notch_q` - mains notch
    #[must_use]
    pub fn new(sample_rate: f64, low_hz: f64, high_hz: f64, notch_hz: f64, notch_q: f64) -> Self {
        let prototype = FilterChain::butterworth_bandpass(sample_rate, low_hz, high_hz, 4)
            .with_notch(sample_rate, notch_hz, notch_q);
        Self { prototype, sample_rate }
    }

    /// Sample rate the bank was designed for
    #[must_use]
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Filter one channel independently of any other call
    ///
    /// The channel mean is removed first so the highpass does not ring on the
    /// electrode offset.
    #[must_use]
    pub fn filter_channel(&self, signal: &[f64]) -> Vec<f64> {
        if signal.is_empty() {
            return Vec::new();
        }
        #[allow(clippy::cast_precision_loss)]
        let mean = signal.iter().sum::<f64>() / signal.len() as f64;
        let centered: Vec<f64> = signal.iter().map(|x| x - mean).collect();
        self.prototype.filtered(&centered)
    }

    /// Filter every channel
    #[must_use]
    pub fn filter_channels(&self, channels: &[Vec<f64>]) -> Vec<Vec<f64>> {
        channels.iter().map(|ch| self.filter_channel(ch)).collect()
    }

    /// Magnitude response of the bank at `freq` Hz
    #[must_use]
    pub fn magnitude_at(&self, freq: f64) -> f64 {
        self.prototype.magnitude_at(self.sample_rate, freq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / rate).sin()).collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_butterworth_qs() {
        let qs = butterworth_qs(4);
        assert_eq!(qs.len(), 2);
        assert!((qs[0] - 0.5412).abs() < 1e-3);
        assert!((qs[1] - 1.3066).abs() < 1e-3);
        assert!((butterworth_qs(2)[0] - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_lowpass_dc_gain_and_cutoff() {
        let lp = Biquad::lowpass(256.0, 30.0);
        assert!((lp.coeffs().magnitude_at(256.0, 0.0) - 1.0).abs() < 1e-9);
        assert!((lp.coeffs().magnitude_at(256.0, 30.0) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-3);
    }

    #[test]
    fn test_filter_bank_response() {
        let bank = EegFilterBank::new(256.0, 0.5, 50.0, 60.0, 30.0);
        assert!((bank.magnitude_at(10.0) - 1.0).abs() < 0.02);
        assert!(bank.magnitude_at(60.0) < 1e-3);
        assert!(bank.magnitude_at(0.05) < 0.01);
        assert!(bank.magnitude_at(100.0) < 0.05);
    }

    #[test]
    fn test_time_domain_matches_response() {
        let bank = EegFilterBank::new(256.0, 0.5, 50.0, 60.0, 30.0);
        let n = 256 * 4;
        let passed = bank.filter_channel(&sine(10.0, 256.0, n));
        let rejected = bank.filter_channel(&sine(60.0, 256.0, n));

        // Compare the settled second half
        let tail = n / 2..n;
        assert!((rms(&passed[tail.clone()]) - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.05);
        assert!(rms(&rejected[tail]) < 0.05);
    }

    #[test]
    fn test_filtered_is_stateless() {
        let chain = FilterChain::butterworth_bandpass(64.0, 0.5, 4.0, 2);
        let signal = sine(1.0, 64.0, 128);
        assert_eq!(chain.filtered(&signal), chain.filtered(&signal));
    }

    #[test]
    fn test_notch_skipped_above_nyquist() {
        let chain = FilterChain::new().with_notch(100.0, 60.0, 30.0);
        assert!(chain.is_empty());
    }
}
