//! Synthetic headband
//!
//! Produces all four stream groups at their nominal rates on the tokio clock,
//! so tests running with paused time see a full session in milliseconds.
//! Connect outcomes and per-connection link faults are scripted, which makes
//! the reconnect path reproducible.
//!
//! # Signals
//!
//! | Stream | Content |
//! |--------|---------|
//! | EEG    | 10 Hz alpha, 6 Hz theta, 20 Hz beta plus independent noise per channel |
//! | PPG    | ambient, infrared, red; infrared carries a pulse at `heart_bpm` |
//! | Accel  | gravity on z with sensor noise |
//! | Gyro   | sensor noise |

use std::f64::consts::PI;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use cortexstream_core::types::{
    EegChannel, EegSample, MotionSample, PpgSample, RawSample, StreamKind, Vec3,
};

use super::transport::{DeviceTransport, LinkError, LinkEvent, Subscription};

/// How one connect attempt ends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Link opens
    Accept,
    /// Attempt fails immediately
    Refuse,
    /// Attempt never completes
    Hang,
}

/// Fault injected into one established connection
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LinkFault {
    /// Device closes the link after `after_s` seconds
    Close {
        /// Seconds after connect
        after_s: f64,
    },
    /// Samples stop after `after_s` seconds but the link stays open
    Stall {
        /// Seconds after connect
        after_s: f64,
    },
    /// Every notification fails to decode after `after_s` seconds
    ReadErrors {
        /// Seconds after connect
        after_s: f64,
    },
}

impl LinkFault {
    fn after(self) -> f64 {
        match self {
            Self::Close { after_s } | Self::Stall { after_s } | Self::ReadErrors { after_s } => after_s,
        }
    }
}

/// Simulator settings
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Noise seed
    pub seed: u64,
    /// Alpha amplitude (µV)
    pub alpha_uv: f64,
    /// Theta amplitude (µV)
    pub theta_uv: f64,
    /// Beta amplitude (µV)
    pub beta_uv: f64,
    /// Peak uniform noise per channel (µV)
    pub noise_uv: f64,
    /// Pulse rate (beats per minute)
    pub heart_bpm: f64,
    /// Channel held at a constant amplitude
    pub saturated: Option<(EegChannel, f64)>,
    /// Delivery period of sample batches (seconds)
    pub tick_s: f64,
    /// Outcome of each connect attempt in order; attempts past the end accept
    pub connect_script: Vec<ConnectOutcome>,
    /// Fault of each established connection in order
    pub faults: Vec<Option<LinkFault>>,
    /// Whether the pulse sensor is present
    pub with_ppg: bool,
    /// Whether the motion sensors are present
    pub with_motion: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed_cafe,
            alpha_uv: 12.0,
            theta_uv: 5.0,
            beta_uv: 4.0,
            noise_uv: 6.0,
            heart_bpm: 60.0,
            saturated: None,
            tick_s: 12.0 / 256.0,
            connect_script: Vec::new(),
            faults: Vec::new(),
            with_ppg: true,
            with_motion: true,
        }
    }
}

/// Scripted synthetic headband
pub struct SimulatedHeadband {
    config: SimulationConfig,
    origin: Option<Instant>,
    attempts: usize,
    connections: usize,
    task: Option<JoinHandle<()>>,
}

impl SimulatedHeadband {
    /// Create a simulator
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self { config, origin: None, attempts: 0, connections: 0, task: None }
    }

    /// Connect attempts made so far
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Connections established so far
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections
    }

    fn streams(&self) -> Vec<StreamKind> {
        let mut streams = vec![StreamKind::Eeg];
        if self.config.with_ppg {
            streams.push(StreamKind::Ppg);
        }
        if self.config.with_motion {
            streams.extend([StreamKind::Accel, StreamKind::Gyro]);
        }
        streams
    }
}

impl DeviceTransport for SimulatedHeadband {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn connect(&mut self, queue_capacity: usize) -> Result<Subscription, LinkError> {
        let outcome = self
            .config
            .connect_script
            .get(self.attempts)
            .copied()
            .unwrap_or(ConnectOutcome::Accept);
        self.attempts += 1;

        match outcome {
            ConnectOutcome::Refuse => return Err(LinkError::NoDevice("simulated refusal".into())),
            ConnectOutcome::Hang => std::future::pending::<()>().await,
            ConnectOutcome::Accept => {}
        }

        self.disconnect().await;
        let origin = *self.origin.get_or_insert_with(Instant::now);
        let fault = self.config.faults.get(self.connections).copied().flatten();
        self.connections += 1;

        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let generator = Generator::new(&self.config, origin, self.connections);
        self.task = Some(tokio::spawn(generator.run(tx, fault)));

        tracing::debug!(connection = self.connections, ?fault, "Simulator connected");
        Ok(Subscription { events: rx, streams: self.streams() })
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ============================================================================
// Generator
// ============================================================================

struct Generator {
    config: SimulationConfig,
    origin: Instant,
    rng: XorShift,
    next: [u64; 4],
}

impl Generator {
    fn new(config: &SimulationConfig, origin: Instant, connection: usize) -> Self {
        let elapsed = origin.elapsed().as_secs_f64();
        let next = StreamKind::ALL.map(|s| first_index(elapsed, s.nominal_rate_hz()));
        Self {
            config: config.clone(),
            origin,
            rng: XorShift::new(config.seed ^ (connection as u64).wrapping_mul(0x9e37_79b9)),
            next,
        }
    }

    async fn run(mut self, tx: mpsc::Sender<LinkEvent>, fault: Option<LinkFault>) {
        let connected_at = self.origin.elapsed().as_secs_f64();
        let mut ticker = tokio::time::interval(Duration::from_secs_f64(self.config.tick_s));

        loop {
            ticker.tick().await;
            let now = self.origin.elapsed().as_secs_f64();
            let active_fault = fault.filter(|f| now - connected_at >= f.after());

            let events = match active_fault {
                Some(LinkFault::Close { .. }) => {
                    let _ = tx.send(LinkEvent::Closed { reason: "simulated disconnect".into() }).await;
                    return;
                }
                Some(LinkFault::Stall { .. }) => {
                    // Hold the sender so the link stays open but silent
                    std::future::pending::<()>().await;
                    return;
                }
                Some(LinkFault::ReadErrors { .. }) => vec![LinkEvent::ReadError {
                    stream: StreamKind::Eeg,
                    reason: "simulated decode failure".into(),
                }],
                None => self.samples_until(now),
            };

            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    }

    fn samples_until(&mut self, now: f64) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        for (slot, stream) in StreamKind::ALL.into_iter().enumerate() {
            let enabled = match stream {
                StreamKind::Eeg => true,
                StreamKind::Ppg => self.config.with_ppg,
                StreamKind::Accel | StreamKind::Gyro => self.config.with_motion,
            };
            let rate = stream.nominal_rate_hz();
            #[allow(clippy::cast_precision_loss)]
            while (self.next[slot] as f64) / rate <= now {
                #[allow(clippy::cast_precision_loss)]
                let t = self.next[slot] as f64 / rate;
                self.next[slot] += 1;
                if let Some(sample) = enabled.then(|| self.sample(stream, t)).flatten() {
                    events.push(LinkEvent::Sample(sample));
                }
            }
        }
        events
    }

    fn sample(&mut self, stream: StreamKind, t: f64) -> Option<RawSample> {
        let c = &self.config;
        match stream {
            StreamKind::Eeg => {
                let mut channels = [0.0; EegChannel::COUNT];
                for (i, value) in channels.iter_mut().enumerate() {
                    #[allow(clippy::cast_precision_loss)]
                    let phase = i as f64 * 0.7;
                    *value = c.alpha_uv * (2.0 * PI * 10.0 * t + phase).sin()
                        + c.theta_uv * (2.0 * PI * 6.0 * t + 2.0 * phase).sin()
                        + c.beta_uv * (2.0 * PI * 20.0 * t + 3.0 * phase).sin()
                        + c.noise_uv * self.rng.symmetric();
                }
                if let Some((channel, level)) = c.saturated {
                    channels[channel.index()] = level;
                }
                Some(RawSample::Eeg(EegSample::new(t, channels)))
            }
            StreamKind::Ppg => {
                let beat_phase = (t * c.heart_bpm / 60.0).fract();
                let pulse = (-(beat_phase - 0.2).powi(2) / 0.004).exp();
                let infrared = 1000.0 + 80.0 * pulse + 2.0 * self.rng.symmetric();
                let readings = [200.0 + self.rng.symmetric(), infrared, 900.0 + 40.0 * pulse];
                PpgSample::new(t, &readings).ok().map(RawSample::Ppg)
            }
            StreamKind::Accel => {
                let noise = Vec3::new(self.rng.symmetric(), self.rng.symmetric(), self.rng.symmetric());
                Some(RawSample::Accel(MotionSample::new(
                    t,
                    Vec3::new(0.005 * noise.x, 0.005 * noise.y, 1.0 + 0.005 * noise.z),
                )))
            }
            StreamKind::Gyro => {
                let value = Vec3::new(self.rng.symmetric(), self.rng.symmetric(), self.rng.symmetric());
                Some(RawSample::Gyro(MotionSample::new(t, Vec3::new(0.5 * value.x, 0.5 * value.y, 0.5 * value.z))))
            }
        }
    }
}

fn first_index(elapsed: f64, rate: f64) -> u64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = (elapsed * rate).floor() as u64;
    index + 1
}

/// xorshift64* noise source
#[derive(Clone, Debug)]
pub(crate) struct XorShift(u64);

impl XorShift {
    pub(crate) fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    pub(crate) fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform in [-1, 1)
    pub(crate) fn symmetric(&mut self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        unit * 2.0 - 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE: usize = 1024;

    async fn collect_for(sub: &mut Subscription, seconds: f64) -> Vec<LinkEvent> {
        let deadline = Instant::now() + Duration::from_secs_f64(seconds);
        let mut events = Vec::new();
        while let Ok(Some(ev)) = tokio::time::timeout_at(deadline, sub.events.recv()).await {
            events.push(ev);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_at_nominal_rates() {
        let mut sim = SimulatedHeadband::new(SimulationConfig::default());
        let mut sub = sim.connect(QUEUE).await.unwrap();
        assert_eq!(sub.streams.len(), 4);

        let events = collect_for(&mut sub, 2.0).await;
        let count = |kind: StreamKind| {
            events
                .iter()
                .filter(|e| matches!(e, LinkEvent::Sample(s) if s.stream() == kind))
                .count()
        };
        assert!((500..=530).contains(&count(StreamKind::Eeg)), "eeg {}", count(StreamKind::Eeg));
        assert!((120..=135).contains(&count(StreamKind::Ppg)));
        assert!((98..=110).contains(&count(StreamKind::Accel)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_queue_uses_requested_capacity() {
        let mut sim = SimulatedHeadband::new(SimulationConfig::default());
        let sub = sim.connect(32).await.unwrap();
        assert_eq!(sub.events.max_capacity(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_script_and_close_fault() {
        let config = SimulationConfig {
            connect_script: vec![ConnectOutcome::Refuse],
            faults: vec![Some(LinkFault::Close { after_s: 0.5 })],
            ..SimulationConfig::default()
        };
        let mut sim = SimulatedHeadband::new(config);
        assert!(matches!(sim.connect(QUEUE).await, Err(LinkError::NoDevice(_))));

        let mut sub = sim.connect(QUEUE).await.unwrap();
        let events = collect_for(&mut sub, 2.0).await;
        assert!(matches!(events.last(), Some(LinkEvent::Closed { .. })));
        assert_eq!(sim.attempts(), 2);
        assert_eq!(sim.connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_time_continues_across_connections() {
        let mut sim = SimulatedHeadband::new(SimulationConfig::default());
        let mut first = sim.connect(QUEUE).await.unwrap();
        let before = collect_for(&mut first, 1.0).await;
        sim.disconnect().await;
        tokio::time::sleep(Duration::from_secs(3)).await;

        let mut second = sim.connect(QUEUE).await.unwrap();
        let after = collect_for(&mut second, 0.5).await;

        let last_before = before.iter().rev().find_map(|e| match e {
            LinkEvent::Sample(s) => Some(s.timestamp()),
            _ => None,
        });
        let first_after = after.iter().find_map(|e| match e {
            LinkEvent::Sample(s) => Some(s.timestamp()),
            _ => None,
        });
        assert!(first_after.unwrap() > last_before.unwrap() + 2.9);
    }

    #[test]
    fn test_noise_is_bounded() {
        let mut rng = XorShift::new(7);
        for _ in 0..10_000 {
            let v = rng.symmetric();
            assert!((-1.0..1.0).contains(&v));
        }
    }
}
