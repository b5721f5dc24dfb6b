//! Benchmarks for signal processing modules

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use cortexstream_core::config::{PipelineConfig, SpectralConfig};
use cortexstream_core::snapshot::ConnectionSession;
use cortexstream_core::types::{BadChannelSet, MotionSample, PpgSample, Vec3};
use cortexstream_native::bridge::ProcessingWindow;
use cortexstream_native::processing::{filters::EegFilterBank, ica::IcaModel, spectral::SpectralAnalyzer};
use cortexstream_native::session::{SessionContext, WindowProcessor};

const RATE: f64 = 256.0;

/// Generate synthetic EEG data (sinusoidal with noise)
fn generate_eeg_samples(n: usize, freq_hz: f64, offset: usize) -> Vec<f64> {
    use std::f64::consts::PI;

    (0..n)
        .map(|i| {
            let t = (i + offset) as f64 / RATE;
            let signal = (2.0 * PI * freq_hz * t).sin();
            let noise = ((i + offset) as f64 * 0.123).sin() * (i as f64 * 0.071).cos() * 0.3; // Pseudo-noise
            (signal + noise) * 20.0 // Scale to ~20 µV
        })
        .collect()
}

fn generate_channels(n: usize, offset: usize) -> Vec<Vec<f64>> {
    (0..4).map(|c| generate_eeg_samples(n, 9.0 + c as f64 * 1.5, offset + c * 31)).collect()
}

fn bench_filter_bank(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_bank");
    let bank = EegFilterBank::new(RATE, 0.5, 50.0, 60.0, 30.0);

    for size in [256, 512, 1024, 2048].iter() {
        let samples = generate_eeg_samples(*size, 10.0, 0);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(bank.filter_channel(black_box(&samples))));
        });
    }

    group.finish();
}

fn bench_welch(c: &mut Criterion) {
    let mut group = c.benchmark_group("welch");
    let analyzer = SpectralAnalyzer::new(&SpectralConfig::default(), RATE);

    for size in [256, 512, 1024].iter() {
        let samples = generate_eeg_samples(*size, 10.0, 0);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(analyzer.welch(black_box(&samples))));
        });
    }

    let channels = generate_channels(256, 0);
    group.bench_function("average_band_powers", |b| {
        b.iter(|| black_box(analyzer.average_band_powers(black_box(&channels), &BadChannelSet::new())));
    });

    group.finish();
}

fn bench_ica_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("ica_fit");
    group.sample_size(10);

    for seconds in [10, 30].iter() {
        let baseline = generate_channels(seconds * RATE as usize, 0);
        group.bench_with_input(BenchmarkId::from_parameter(seconds), seconds, |b, _| {
            b.iter(|| black_box(IcaModel::fit(black_box(&baseline), 200, 1e-6)));
        });
    }

    group.finish();
}

fn synthetic_window(second: usize) -> ProcessingWindow {
    let n = RATE as usize;
    let start = second as f64;
    ProcessingWindow {
        sequence: second as u64,
        start,
        end: start + 1.0,
        sample_rate: RATE,
        eeg: generate_channels(n, second * n),
        context: if second == 0 { vec![Vec::new(); 4] } else { generate_channels(n, (second - 1) * n) },
        ppg: (0..64)
            .filter_map(|i| PpgSample::new(start + f64::from(i) / 64.0, &[f64::from(i % 64).sin()]).ok())
            .collect(),
        accel: (0..52)
            .map(|i| MotionSample::new(start + f64::from(i) / 52.0, Vec3::new(0.02, 0.01, 1.0)))
            .collect(),
        gyro: (0..52)
            .map(|i| MotionSample::new(start + f64::from(i) / 52.0, Vec3::new(0.5, -0.3, 0.2)))
            .collect(),
        aligned: true,
    }
}

fn bench_full_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_window");
    let config = PipelineConfig::default();
    let processor = WindowProcessor::new(&config);

    // Warm past calibration so the separation stage is applied
    let mut ctx = SessionContext::new(&config);
    for second in 0..31 {
        processor.process(&mut ctx, &synthetic_window(second), ConnectionSession::default());
    }
    let window = synthetic_window(31);

    group.bench_function("process", |b| {
        b.iter(|| black_box(processor.process(&mut ctx, black_box(&window), ConnectionSession::default())));
    });

    group.finish();
}

criterion_group!(benches, bench_filter_bank, bench_welch, bench_ica_fit, bench_full_window);

criterion_main!(benches);
