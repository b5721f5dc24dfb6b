//! Independent component analysis (FastICA)
//!
//! Fits a full-rank unmixing model on a multichannel baseline:
//!
//! 1. Center each channel and whiten through the eigendecomposition of the
//!    channel covariance (`K = D^-1/2 E^T`).
//! 2. Run the symmetric fixed-point iteration with the `tanh` contrast,
//!    decorrelating all rows together after every step.
//! 3. Compose `unmixing = W K` and invert it for the mixing matrix.
//!
//! Because the model is square, reconstructing with no excluded components
//! reproduces the input.

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use cortexstream_core::error::FitError;

/// Smallest accepted eigenvalue ratio of the baseline covariance
const MIN_EIGEN_RATIO: f64 = 1e-10;

/// Samples required per channel
const MIN_SAMPLES_PER_CHANNEL: usize = 32;

/// Fitted unmixing model
#[derive(Clone, Debug)]
pub struct IcaModel {
    mean: DVector<f64>,
    unmixing: DMatrix<f64>,
    mixing: DMatrix<f64>,
    iterations: usize,
    converged: bool,
}

impl IcaModel {
    /// Fit on channel-major data (`data[channel][sample]`)
    ///
    /// # Errors
    ///
    /// - [`FitError::TooFewSamples`] if the baseline is too short
    /// - [`FitError::RankDeficient`] if channels are (nearly) linearly dependent
    /// - [`FitError::NonFinite`] if the iteration diverges
    pub fn fit(data: &[Vec<f64>], max_iterations: usize, tolerance: f64) -> Result<Self, FitError> {
        let n = data.len();
        let m = data.iter().map(Vec::len).min().unwrap_or(0);
        let need = (n * MIN_SAMPLES_PER_CHANNEL).max(MIN_SAMPLES_PER_CHANNEL);
        if n == 0 || m < need {
            return Err(FitError::TooFewSamples { got: m, need });
        }
        #[allow(clippy::cast_precision_loss)]
        let mf = m as f64;

        let mean = DVector::from_fn(n, |i, _| data[i][..m].iter().sum::<f64>() / mf);
        let x = DMatrix::from_fn(n, m, |i, j| data[i][j] - mean[i]);

        // Whitening
        let cov = (&x * x.transpose()) / mf;
        let eig = SymmetricEigen::new(cov);
        let max_ev = eig.eigenvalues.max();
        let min_ev = eig.eigenvalues.min();
        let ratio = if max_ev > 0.0 { min_ev / max_ev } else { 0.0 };
        if !(ratio > MIN_EIGEN_RATIO) {
            return Err(FitError::RankDeficient { ratio });
        }
        let inv_sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(|d| 1.0 / d.sqrt()));
        let whitening = inv_sqrt * eig.eigenvectors.transpose();
        let z = &whitening * &x;

        let mut w = symmetric_decorrelation(&initial_unmixing(n))?;

        let mut iterations = 0;
        let mut converged = false;
        while iterations < max_iterations {
            iterations += 1;

            let g = (&w * &z).map(f64::tanh);
            let g_prime_mean = DVector::from_fn(n, |i, _| {
                g.row(i).iter().map(|v| 1.0 - v * v).sum::<f64>() / mf
            });
            let update = (&g * z.transpose()) / mf - DMatrix::from_diagonal(&g_prime_mean) * &w;
            let w_new = symmetric_decorrelation(&update)?;

            let limit = (0..n)
                .map(|i| (w_new.row(i).dot(&w.row(i)).abs() - 1.0).abs())
                .fold(0.0, f64::max);
            w = w_new;

            if limit < tolerance {
                converged = true;
                break;
            }
        }

        let unmixing = &w * &whitening;
        let mixing = unmixing.clone().try_inverse().ok_or(FitError::NonFinite)?;
        if !unmixing.iter().chain(mixing.iter()).all(|v| v.is_finite()) {
            return Err(FitError::NonFinite);
        }

        if !converged {
            tracing::debug!(iterations, "ICA stopped at iteration limit");
        }

        Ok(Self { mean, unmixing, mixing, iterations, converged })
    }

    /// Number of components (equal to the channel count)
    #[must_use]
    pub fn n_components(&self) -> usize {
        self.unmixing.nrows()
    }

    /// Iterations used by the fit
    #[must_use]
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Whether the fixed-point iteration met its tolerance
    #[must_use]
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Channel weights of one component in the mixing matrix
    #[must_use]
    pub fn mixing_column(&self, component: usize) -> Vec<f64> {
        self.mixing.column(component).iter().copied().collect()
    }

    /// Component time courses (`sources[component][sample]`)
    #[must_use]
    pub fn sources(&self, data: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let x = self.centered(data);
        let s = &self.unmixing * x;
        (0..s.nrows()).map(|i| s.row(i).iter().copied().collect()).collect()
    }

    /// Re-mix with the `excluded` components zeroed
    #[must_use]
    pub fn reconstruct(&self, data: &[Vec<f64>], excluded: &[usize]) -> Vec<Vec<f64>> {
        let x = self.centered(data);
        let mut s = &self.unmixing * x;
        for &k in excluded {
            if k < s.nrows() {
                s.row_mut(k).fill(0.0);
            }
        }
        let y = &self.mixing * s;
        (0..y.nrows())
            .map(|i| y.row(i).iter().map(|v| v + self.mean[i]).collect())
            .collect()
    }

    fn centered(&self, data: &[Vec<f64>]) -> DMatrix<f64> {
        let n = self.mean.len();
        let m = data.iter().take(n).map(Vec::len).min().unwrap_or(0);
        DMatrix::from_fn(n, m, |i, j| data.get(i).map_or(0.0, |ch| ch[j] - self.mean[i]))
    }
}

/// Deterministic full-rank starting point
///
/// Seeded uniform entries in `[-1, 1)` plus `n + 1` on the diagonal, which
/// keeps the matrix strictly diagonally dominant and therefore invertible.
fn initial_unmixing(n: usize) -> DMatrix<f64> {
    let mut state: u64 = 0x2545_F491_4F6C_DD1D;
    #[allow(clippy::cast_precision_loss)]
    let diagonal = (n + 1) as f64;
    DMatrix::from_fn(n, n, |p, i| {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        #[allow(clippy::cast_precision_loss)]
        let r = (state >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0;
        if p == i { r + diagonal } else { r }
    })
}

/// `W <- (W W^T)^-1/2 W`
fn symmetric_decorrelation(w: &DMatrix<f64>) -> Result<DMatrix<f64>, FitError> {
    let eig = SymmetricEigen::new(w * w.transpose());
    if eig.eigenvalues.iter().any(|&d| !(d > 0.0) || !d.is_finite()) {
        return Err(FitError::NonFinite);
    }
    let inv_sqrt = DMatrix::from_diagonal(&eig.eigenvalues.map(|d| 1.0 / d.sqrt()));
    Ok(&eig.eigenvectors * inv_sqrt * eig.eigenvectors.transpose() * w)
}

/// Excess kurtosis of a signal
#[must_use]
pub fn excess_kurtosis(signal: &[f64]) -> f64 {
    if signal.len() < 4 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = signal.len() as f64;
    let mean = signal.iter().sum::<f64>() / n;
    let var = signal.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    if var <= f64::EPSILON {
        return 0.0;
    }
    let m4 = signal.iter().map(|x| (x - mean).powi(4)).sum::<f64>() / n;
    m4 / (var * var) - 3.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn correlation(a: &[f64], b: &[f64]) -> f64 {
        let n = a.len() as f64;
        let ma = a.iter().sum::<f64>() / n;
        let mb = b.iter().sum::<f64>() / n;
        let cov: f64 = a.iter().zip(b).map(|(x, y)| (x - ma) * (y - mb)).sum();
        let va: f64 = a.iter().map(|x| (x - ma).powi(2)).sum();
        let vb: f64 = b.iter().map(|y| (y - mb).powi(2)).sum();
        cov / (va * vb).sqrt()
    }

    fn sources(m: usize) -> Vec<Vec<f64>> {
        let rate = 256.0;
        let sine: Vec<f64> = (0..m).map(|i| (2.0 * PI * 7.0 * i as f64 / rate).sin()).collect();
        let square: Vec<f64> = (0..m)
            .map(|i| if (2.0 * PI * 3.0 * i as f64 / rate).sin() >= 0.0 { 1.0 } else { -1.0 })
            .collect();
        let saw: Vec<f64> = (0..m).map(|i| ((i as f64 * 11.0 / rate) % 1.0) * 2.0 - 1.0).collect();
        vec![sine, square, saw]
    }

    fn mix(src: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let a = [[1.0, 0.5, 0.2], [0.3, 1.0, 0.4], [0.6, 0.2, 1.0]];
        (0..3)
            .map(|i| {
                (0..src[0].len())
                    .map(|t| (0..3).map(|k| a[i][k] * src[k][t]).sum::<f64>() + 10.0 * i as f64)
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_recovers_independent_sources() {
        let src = sources(2048);
        let data = mix(&src);
        let model = IcaModel::fit(&data, 200, 1e-6).unwrap();
        assert_eq!(model.n_components(), 3);

        let recovered = model.sources(&data);
        for truth in &src {
            let best = recovered
                .iter()
                .map(|r| correlation(r, truth).abs())
                .fold(0.0, f64::max);
            assert!(best > 0.9, "best correlation {best}");
        }
    }

    #[test]
    fn test_reconstruct_without_exclusions_is_identity() {
        let data = mix(&sources(1024));
        let model = IcaModel::fit(&data, 200, 1e-6).unwrap();
        let rebuilt = model.reconstruct(&data, &[]);
        for (orig, back) in data.iter().zip(&rebuilt) {
            for (a, b) in orig.iter().zip(back) {
                assert!((a - b).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_excluding_component_removes_source() {
        let src = sources(2048);
        let data = mix(&src);
        let model = IcaModel::fit(&data, 200, 1e-6).unwrap();
        let recovered = model.sources(&data);

        let square_idx = (0..3)
            .max_by(|&a, &b| {
                correlation(&recovered[a], &src[1])
                    .abs()
                    .total_cmp(&correlation(&recovered[b], &src[1]).abs())
            })
            .unwrap();
        let cleaned = model.reconstruct(&data, &[square_idx]);
        for ch in &cleaned {
            assert!(correlation(ch, &src[1]).abs() < 0.2);
        }
    }

    #[test]
    fn test_initial_unmixing_is_full_rank() {
        for n in 1..=8 {
            let init = initial_unmixing(n);
            assert_eq!(init.rank(1e-9), n);
            assert!(symmetric_decorrelation(&init).is_ok());
        }
    }

    #[test]
    fn test_fits_independent_noise_channels() {
        let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
        let data: Vec<Vec<f64>> = (0..4)
            .map(|_| {
                (0..7680)
                    .map(|_| {
                        x ^= x << 13;
                        x ^= x >> 7;
                        x ^= x << 17;
                        (x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
                    })
                    .collect()
            })
            .collect();

        let model = IcaModel::fit(&data, 200, 1e-6).unwrap();
        assert_eq!(model.n_components(), 4);
        let rebuilt = model.reconstruct(&data, &[]);
        for (orig, back) in data.iter().zip(&rebuilt) {
            for (a, b) in orig.iter().zip(back) {
                assert!((a - b).abs() < 1e-8);
            }
        }
    }

    #[test]
    fn test_rank_deficient_baseline() {
        let src = sources(1024);
        let data = vec![src[0].clone(), src[0].clone(), src[1].clone()];
        assert!(matches!(
            IcaModel::fit(&data, 200, 1e-6),
            Err(FitError::RankDeficient { .. })
        ));
    }

    #[test]
    fn test_too_few_samples() {
        let data = vec![vec![1.0, 2.0, 3.0]; 4];
        assert!(matches!(IcaModel::fit(&data, 200, 1e-6), Err(FitError::TooFewSamples { .. })));
    }

    #[test]
    fn test_kurtosis() {
        let square: Vec<f64> = (0..1000).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert!((excess_kurtosis(&square) + 2.0).abs() < 1e-9);

        let mut spiky = vec![0.0; 1000];
        spiky[500] = 100.0;
        assert!(excess_kurtosis(&spiky) > 50.0);
    }
}
