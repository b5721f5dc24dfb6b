//! EEG conditioning: fixed filters, then calibrated source separation
//!
//! The conditioner itself is immutable. The session owns a
//! [`CalibrationState`] and passes it in with every window:
//!
//! - `Collecting`: filtered output passes through while the baseline grows
//! - `Fitted`: ocular and muscular components are zeroed before re-mixing
//! - `Passthrough`: the fit failed; filtered output passes through for the
//!   rest of the session
//!
//! Once the state leaves `Collecting` it never returns to it.

use cortexstream_core::config::{ConditionerConfig, SpectralConfig};
use cortexstream_core::error::FitError;
use cortexstream_core::snapshot::CalibrationStatus;
use cortexstream_core::types::EegChannel;

use super::filters::EegFilterBank;
use super::ica::{excess_kurtosis, IcaModel};
use super::spectral::SpectralAnalyzer;

// ============================================================================
// Component Classification
// ============================================================================

/// Template a separated component matched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentClass {
    /// Kept
    Neural,
    /// Eye movement or blink
    Ocular,
    /// Muscle tension
    Muscular,
}

/// Statistics a component is classified on
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ComponentProfile {
    /// Share of squared mixing weight on AF7/AF8
    pub frontal_share: f64,
    /// Share of power below 4 Hz
    pub low_freq_fraction: f64,
    /// Share of power above the muscle cutoff
    pub high_freq_fraction: f64,
    /// Excess kurtosis of the time course
    pub kurtosis: f64,
    /// Template match
    pub class: ComponentClass,
}

impl ComponentProfile {
    fn artifact_score(&self) -> f64 {
        match self.class {
            ComponentClass::Neural => 0.0,
            ComponentClass::Ocular => self.frontal_share,
            ComponentClass::Muscular => self.high_freq_fraction,
        }
    }
}

// ============================================================================
// Calibration State
// ============================================================================

/// Fitted separation and the components it removes
#[derive(Clone, Debug)]
pub struct Separation {
    model: IcaModel,
    profiles: Vec<ComponentProfile>,
    excluded: Vec<usize>,
}

impl Separation {
    /// Component profiles in model order
    #[must_use]
    pub fn profiles(&self) -> &[ComponentProfile] {
        &self.profiles
    }

    /// Indices of the zeroed components
    #[must_use]
    pub fn excluded(&self) -> &[usize] {
        &self.excluded
    }

    /// Underlying unmixing model
    #[must_use]
    pub fn model(&self) -> &IcaModel {
        &self.model
    }
}

/// Per-session calibration of the separation stage
#[derive(Clone, Debug)]
pub enum CalibrationState {
    /// Accumulating filtered baseline (`baseline[channel][sample]`)
    Collecting {
        /// Baseline so far
        baseline: Vec<Vec<f64>>,
    },
    /// Model fitted and applied to every later window
    Fitted(Box<Separation>),
    /// Fit failed; separation disabled for the session
    Passthrough {
        /// Why the fit failed
        reason: FitError,
    },
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::Collecting { baseline: vec![Vec::new(); EegChannel::COUNT] }
    }
}

impl CalibrationState {
    /// Whether a model is being applied
    #[must_use]
    pub fn is_fitted(&self) -> bool {
        matches!(self, Self::Fitted(_))
    }

    /// Whether the baseline is still growing
    #[must_use]
    pub fn is_collecting(&self) -> bool {
        matches!(self, Self::Collecting { .. })
    }

    /// Baseline samples collected per channel
    #[must_use]
    pub fn collected(&self) -> usize {
        match self {
            Self::Collecting { baseline } => baseline.first().map_or(0, Vec::len),
            _ => 0,
        }
    }

    /// Snapshot view given the baseline target
    #[must_use]
    pub fn status(&self, target_samples: usize) -> CalibrationStatus {
        match self {
            Self::Collecting { .. } => {
                #[allow(clippy::cast_precision_loss)]
                let progress = if target_samples == 0 {
                    100.0
                } else {
                    (self.collected() as f64 / target_samples as f64 * 100.0).min(100.0)
                };
                CalibrationStatus { fitted: false, progress, failed: false }
            }
            Self::Fitted(_) => CalibrationStatus { fitted: true, progress: 100.0, failed: false },
            Self::Passthrough { .. } => CalibrationStatus { fitted: false, progress: 100.0, failed: true },
        }
    }
}

// ============================================================================
// Conditioner
// ============================================================================

/// Conditioned window plus the calibration status it was produced under
#[derive(Clone, Debug)]
pub struct ConditionedWindow {
    /// `channels[channel][sample]`, lead-in removed
    pub channels: Vec<Vec<f64>>,
    /// Calibration after this window
    pub calibration: CalibrationStatus,
}

/// Filters plus blind source separation
pub struct SignalConditioner {
    config: ConditionerConfig,
    filters: EegFilterBank,
    analyzer: SpectralAnalyzer,
    sample_rate: f64,
    target_samples: usize,
}

impl SignalConditioner {
    /// Create a conditioner for EEG at `sample_rate`
    #[must_use]
    pub fn new(config: &ConditionerConfig, spectral: &SpectralConfig, sample_rate: f64) -> Self {
        let filters = EegFilterBank::new(
            sample_rate,
            config.bandpass_low_hz,
            config.bandpass_high_hz,
            config.mains_hz,
            config.notch_q,
        );
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target_samples = (config.calibration_s * sample_rate).round() as usize;

        Self {
            config: config.clone(),
            filters,
            analyzer: SpectralAnalyzer::new(spectral, sample_rate),
            sample_rate,
            target_samples,
        }
    }

    /// Baseline samples per channel needed before the fit
    #[must_use]
    pub fn target_samples(&self) -> usize {
        self.target_samples
    }

    /// Stage (a): band-limit and notch each channel, dropping the first
    /// `lead_in` samples of the output
    #[must_use]
    pub fn filter(&self, channels: &[Vec<f64>], lead_in: usize) -> Vec<Vec<f64>> {
        channels
            .iter()
            .map(|ch| {
                let filtered = self.filters.filter_channel(ch);
                let skip = lead_in.min(filtered.len());
                filtered[skip..].to_vec()
            })
            .collect()
    }

    /// Run both stages on one window
    ///
    /// The window that completes the baseline triggers the fit and is itself
    /// separated when the fit succeeds.
    pub fn condition(
        &self,
        state: &mut CalibrationState,
        channels: &[Vec<f64>],
        lead_in: usize,
    ) -> ConditionedWindow {
        let filtered = self.filter(channels, lead_in);

        if let CalibrationState::Collecting { baseline } = state {
            for (acc, ch) in baseline.iter_mut().zip(&filtered) {
                acc.extend_from_slice(ch);
            }
            let collected = baseline.first().map_or(0, Vec::len);
            if collected >= self.target_samples {
                let baseline = std::mem::take(baseline);
                *state = match self.fit(&baseline) {
                    Ok(separation) => {
                        tracing::info!(
                            excluded = ?separation.excluded,
                            iterations = separation.model.iterations(),
                            "Calibration fitted"
                        );
                        CalibrationState::Fitted(Box::new(separation))
                    }
                    Err(reason) => {
                        tracing::warn!(%reason, "Calibration fit failed, continuing without separation");
                        CalibrationState::Passthrough { reason }
                    }
                };
            }
        }

        let channels = match state {
            CalibrationState::Fitted(sep) if !sep.excluded.is_empty() => {
                sep.model.reconstruct(&filtered, &sep.excluded)
            }
            _ => filtered,
        };

        ConditionedWindow { channels, calibration: state.status(self.target_samples) }
    }

    /// Fit the separation model on a filtered baseline and classify its components
    ///
    /// # Errors
    ///
    /// Returns the [`FitError`] of the underlying model.
    pub fn fit(&self, baseline: &[Vec<f64>]) -> Result<Separation, FitError> {
        let model = IcaModel::fit(baseline, self.config.ica_max_iterations, self.config.ica_tolerance)?;
        let sources = model.sources(baseline);

        let mut profiles: Vec<ComponentProfile> = sources
            .iter()
            .enumerate()
            .map(|(k, s)| self.profile(&model.mixing_column(k), s))
            .collect();

        // Keep at least one component
        let flagged = profiles.iter().filter(|p| p.class != ComponentClass::Neural).count();
        if flagged == profiles.len() {
            if let Some(weakest) = profiles
                .iter_mut()
                .min_by(|a, b| a.artifact_score().total_cmp(&b.artifact_score()))
            {
                weakest.class = ComponentClass::Neural;
            }
        }

        let excluded = profiles
            .iter()
            .enumerate()
            .filter(|(_, p)| p.class != ComponentClass::Neural)
            .map(|(k, _)| k)
            .collect();

        Ok(Separation { model, profiles, excluded })
    }

    fn profile(&self, mixing: &[f64], source: &[f64]) -> ComponentProfile {
        let weight: f64 = mixing.iter().map(|w| w * w).sum();
        let frontal: f64 = EegChannel::FRONTAL
            .iter()
            .filter_map(|ch| mixing.get(ch.index()))
            .map(|w| w * w)
            .sum();
        let frontal_share = if weight > 0.0 { frontal / weight } else { 0.0 };

        let psd = self.analyzer.welch(source);
        let total = psd.total_power();
        let nyquist = self.sample_rate / 2.0;
        let (low_freq_fraction, high_freq_fraction) = if total > 0.0 {
            (
                psd.band_power(0.0, 4.0) / total,
                psd.band_power(self.config.muscle_cutoff_hz, nyquist) / total,
            )
        } else {
            (0.0, 0.0)
        };
        let kurtosis = excess_kurtosis(source);

        let c = &self.config;
        let class = if frontal_share >= c.eye_frontal_share
            && (low_freq_fraction >= c.eye_low_freq_fraction || kurtosis >= c.eye_kurtosis)
        {
            ComponentClass::Ocular
        } else if high_freq_fraction >= c.muscle_high_freq_fraction {
            ComponentClass::Muscular
        } else {
            ComponentClass::Neural
        };

        ComponentProfile { frontal_share, low_freq_fraction, high_freq_fraction, kurtosis, class }
    }
}
