//! Head posture from the motion channels
//!
//! Pitch and roll come from the gravity vector seen by the accelerometer.
//! Once enough angle history exists the mean pose and its spread are
//! classified; before that the instantaneous pose is used with wider
//! thresholds.

use std::collections::VecDeque;

use cortexstream_core::config::PostureConfig;
use cortexstream_core::snapshot::PostureReading;
use cortexstream_core::types::{MotionSample, PostureLabel, Vec3};

/// Accelerometer magnitude below which the gravity vector is unusable (g)
const MIN_GRAVITY_G: f64 = 0.5;

/// Pitch and roll in degrees
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct HeadAngles {
    /// Forward (+) / backward (-)
    pub pitch_deg: f64,
    /// Right (+) / left (-)
    pub roll_deg: f64,
}

impl HeadAngles {
    /// Angles of a single gravity vector, `None` if it is too weak
    #[must_use]
    pub fn from_gravity(g: Vec3) -> Option<Self> {
        let magnitude = g.magnitude();
        if magnitude < MIN_GRAVITY_G || !magnitude.is_finite() {
            return None;
        }
        let x = (g.x / magnitude).clamp(-1.0, 1.0);
        let y = (g.y / magnitude).clamp(-1.0, 1.0);
        Some(Self { pitch_deg: (-x).asin().to_degrees(), roll_deg: y.asin().to_degrees() })
    }

    /// Angles of the mean accelerometer vector over a window
    #[must_use]
    pub fn from_accel(samples: &[MotionSample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = samples.len() as f64;
        let sum = samples.iter().fold(Vec3::default(), |acc, s| {
            Vec3::new(acc.x + s.value.x, acc.y + s.value.y, acc.z + s.value.z)
        });
        Self::from_gravity(Vec3::new(sum.x / n, sum.y / n, sum.z / n))
    }
}

/// Rolling pitch/roll history
#[derive(Clone, Debug)]
pub struct AngleHistory {
    pitch: VecDeque<f64>,
    roll: VecDeque<f64>,
    capacity: usize,
}

impl AngleHistory {
    /// History of at most `capacity` readings
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { pitch: VecDeque::with_capacity(capacity), roll: VecDeque::with_capacity(capacity), capacity }
    }

    /// Append a reading
    pub fn push(&mut self, angles: HeadAngles) {
        if self.capacity == 0 {
            return;
        }
        if self.pitch.len() == self.capacity {
            self.pitch.pop_front();
            self.roll.pop_front();
        }
        self.pitch.push_back(angles.pitch_deg);
        self.roll.push_back(angles.roll_deg);
    }

    /// Readings held
    #[must_use]
    pub fn len(&self) -> usize {
        self.pitch.len()
    }

    /// Whether no readings are held
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pitch.is_empty()
    }

    /// Mean pose
    #[must_use]
    pub fn mean(&self) -> HeadAngles {
        HeadAngles { pitch_deg: mean_std(&self.pitch).0, roll_deg: mean_std(&self.roll).0 }
    }

    /// Spread of (pitch, roll)
    #[must_use]
    pub fn spread(&self) -> (f64, f64) {
        (mean_std(&self.pitch).1, mean_std(&self.roll).1)
    }
}

fn mean_std(values: &VecDeque<f64>) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

/// Rule-based posture labelling
#[derive(Clone, Debug)]
pub struct PostureEstimator {
    config: PostureConfig,
}

impl PostureEstimator {
    /// Create an estimator
    #[must_use]
    pub fn new(config: &PostureConfig) -> Self {
        Self { config: config.clone() }
    }

    /// Unsmoothed label for one window
    ///
    /// `history` should already contain this window's angles.
    #[must_use]
    pub fn classify(
        &self,
        accel: &[MotionSample],
        gyro: &[MotionSample],
        history: &AngleHistory,
    ) -> PostureReading {
        let c = &self.config;
        let current = HeadAngles::from_accel(accel);

        if !gyro.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            let rotation = gyro.iter().map(|s| s.value.magnitude()).sum::<f64>() / gyro.len() as f64;
            if rotation > c.moving_gyro_dps {
                let angles = current.unwrap_or_default();
                return reading(PostureLabel::Moving, angles);
            }
        }

        if history.len() > c.min_history {
            let mean = history.mean();
            let (pitch_std, roll_std) = history.spread();
            if pitch_std > c.unstable_std_deg || roll_std > c.unstable_std_deg {
                return reading(PostureLabel::Unstable, mean);
            }
            let label = if mean.pitch_deg.abs() < c.level_deg && mean.roll_deg.abs() < c.level_deg {
                PostureLabel::Good
            } else if mean.pitch_deg > c.pitch_tilt_deg {
                PostureLabel::ForwardTilt
            } else if mean.pitch_deg < -c.pitch_tilt_deg {
                PostureLabel::BackwardTilt
            } else if mean.roll_deg.abs() > c.roll_tilt_deg {
                PostureLabel::SideTilt
            } else {
                PostureLabel::SlightTilt
            };
            return reading(label, mean);
        }

        match current {
            None if accel.is_empty() => reading(PostureLabel::Unknown, HeadAngles::default()),
            None => reading(PostureLabel::Unstable, HeadAngles::default()),
            Some(angles) => {
                let label = if angles.pitch_deg.abs() < c.instant_level_deg
                    && angles.roll_deg.abs() < c.instant_level_deg
                {
                    PostureLabel::Good
                } else if angles.pitch_deg > c.instant_tilt_deg {
                    PostureLabel::ForwardTilt
                } else if angles.pitch_deg < -c.instant_tilt_deg {
                    PostureLabel::BackwardTilt
                } else if angles.roll_deg.abs() > c.instant_tilt_deg {
                    PostureLabel::SideTilt
                } else {
                    PostureLabel::SlightTilt
                };
                reading(label, angles)
            }
        }
    }
}

fn reading(label: PostureLabel, angles: HeadAngles) -> PostureReading {
    PostureReading { label, pitch_deg: angles.pitch_deg, roll_deg: angles.roll_deg }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accel(x: f64, y: f64, z: f64) -> Vec<MotionSample> {
        (0..52).map(|i| MotionSample::new(i as f64 / 52.0, Vec3::new(x, y, z))).collect()
    }

    fn tilted(pitch_deg: f64) -> Vec<MotionSample> {
        let p = pitch_deg.to_radians();
        accel(-p.sin(), 0.0, p.cos())
    }

    fn filled_history(pitch_deg: f64, n: usize) -> AngleHistory {
        let mut history = AngleHistory::new(60);
        for _ in 0..n {
            history.push(HeadAngles { pitch_deg, roll_deg: 0.0 });
        }
        history
    }

    #[test]
    fn test_angles_from_gravity() {
        let level = HeadAngles::from_gravity(Vec3::new(0.0, 0.0, 1.0)).unwrap();
        assert!(level.pitch_deg.abs() < 1e-9 && level.roll_deg.abs() < 1e-9);

        let forward = HeadAngles::from_accel(&tilted(25.0)).unwrap();
        assert!((forward.pitch_deg - 25.0).abs() < 1e-6);

        assert!(HeadAngles::from_gravity(Vec3::new(0.0, 0.0, 0.1)).is_none());
    }

    #[test]
    fn test_moving_takes_priority() {
        let est = PostureEstimator::new(&PostureConfig::default());
        let gyro: Vec<MotionSample> =
            (0..10).map(|i| MotionSample::new(i as f64, Vec3::new(0.0, 40.0, 0.0))).collect();
        let r = est.classify(&accel(0.0, 0.0, 1.0), &gyro, &filled_history(0.0, 30));
        assert_eq!(r.label, PostureLabel::Moving);
    }

    #[test]
    fn test_history_rules() {
        let est = PostureEstimator::new(&PostureConfig::default());
        let none: [MotionSample; 0] = [];

        assert_eq!(est.classify(&none, &none, &filled_history(2.0, 20)).label, PostureLabel::Good);
        assert_eq!(est.classify(&none, &none, &filled_history(25.0, 20)).label, PostureLabel::ForwardTilt);
        assert_eq!(est.classify(&none, &none, &filled_history(-25.0, 20)).label, PostureLabel::BackwardTilt);
        assert_eq!(est.classify(&none, &none, &filled_history(15.0, 20)).label, PostureLabel::SlightTilt);

        let mut wobbly = AngleHistory::new(60);
        for i in 0..20 {
            wobbly.push(HeadAngles { pitch_deg: if i % 2 == 0 { 20.0 } else { -20.0 }, roll_deg: 0.0 });
        }
        assert_eq!(est.classify(&none, &none, &wobbly).label, PostureLabel::Unstable);
    }

    #[test]
    fn test_instant_rules_without_history() {
        let est = PostureEstimator::new(&PostureConfig::default());
        let none: [MotionSample; 0] = [];
        let short = filled_history(0.0, 3);

        assert_eq!(est.classify(&tilted(5.0), &none, &short).label, PostureLabel::Good);
        assert_eq!(est.classify(&tilted(20.0), &none, &short).label, PostureLabel::SlightTilt);
        assert_eq!(est.classify(&tilted(40.0), &none, &short).label, PostureLabel::ForwardTilt);
        assert_eq!(est.classify(&none, &none, &short).label, PostureLabel::Unknown);
    }

    #[test]
    fn test_history_is_bounded() {
        let history = filled_history(1.0, 100);
        assert_eq!(history.len(), 60);
    }
}
