//! Stream ingestion
//!
//! [`StreamIngestor`] owns the device link. It validates and buffers incoming
//! samples, assembles one-second [`ProcessingWindow`]s, and runs the link
//! watchdog. On link loss it reconnects a bounded number of times and resumes
//! the same logical session; calibration and smoothing live elsewhere and are
//! never touched here.
//!
//! # Watchdog
//!
//! - Any subscribed stream silent for `silence_timeout_s` → link lost
//! - More than `max_consecutive_errors` read errors or malformed samples
//!   without a good sample in between → link lost
//! - The device closing the link → link lost
//!
//! # Reconnect
//!
//! Tear down, wait `reconnect_delay_s`, then try up to
//! `max_reconnect_attempts` connects (each bounded by `connect_timeout_s`,
//! `retry_delay_s` apart). Exhausting the attempts marks the session
//! [`ConnectionStatus::Failed`] and returns
//! [`PipelineError::ReconnectExhausted`].

use std::collections::VecDeque;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration, Instant};

use cortexstream_core::config::{LinkConfig, WindowConfig};
use cortexstream_core::error::{PipelineError, PipelineResult};
use cortexstream_core::snapshot::{ConnectionSession, ConnectionStatus};
use cortexstream_core::types::{EegChannel, EegSample, MotionSample, PpgSample, RawSample, StreamKind};

use super::transport::{DeviceTransport, LinkEvent, Subscription};

/// Capacity of the raw-sample tap
const RAW_TAP_CAPACITY: usize = 4096;

/// Events drained per wake-up before the watchdog is consulted
const DRAIN_LIMIT: usize = 2048;

// ============================================================================
// Windows
// ============================================================================

/// One second of aligned samples
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingWindow {
    /// Window counter since session start
    pub sequence: u64,
    /// Timestamp of the first EEG sample
    pub start: f64,
    /// One sample period past the last EEG sample
    pub end: f64,
    /// EEG sample rate (Hz)
    pub sample_rate: f64,
    /// `eeg[channel][sample]` for this window (µV)
    pub eeg: Vec<Vec<f64>>,
    /// Samples preceding the window, `context[channel][sample]`, for filter lead-in
    pub context: Vec<Vec<f64>>,
    /// Pulse samples inside `[start, end)`
    pub ppg: Vec<PpgSample>,
    /// Accelerometer samples inside `[start, end)`
    pub accel: Vec<MotionSample>,
    /// Gyroscope samples inside `[start, end)`
    pub gyro: Vec<MotionSample>,
    /// Whether every side stream had caught up to `end`
    pub aligned: bool,
}

impl ProcessingWindow {
    /// EEG samples per channel in the window proper
    #[must_use]
    pub fn len(&self) -> usize {
        self.eeg.first().map_or(0, Vec::len)
    }

    /// Whether the window holds no EEG
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lead-in samples per channel
    #[must_use]
    pub fn lead_in(&self) -> usize {
        self.context.first().map_or(0, Vec::len)
    }

    /// Lead-in followed by the window, per channel
    #[must_use]
    pub fn with_context(&self) -> Vec<Vec<f64>> {
        self.context
            .iter()
            .zip(&self.eeg)
            .map(|(pre, cur)| pre.iter().chain(cur).copied().collect())
            .collect()
    }
}

/// Samples accepted during one [`StreamIngestor::next_batch`] call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleBatch {
    /// EEG frames
    pub eeg: Vec<EegSample>,
    /// Pulse samples
    pub ppg: Vec<PpgSample>,
    /// Accelerometer samples
    pub accel: Vec<MotionSample>,
    /// Gyroscope samples
    pub gyro: Vec<MotionSample>,
}

impl SampleBatch {
    /// Total samples across groups
    #[must_use]
    pub fn len(&self) -> usize {
        self.eeg.len() + self.ppg.len() + self.accel.len() + self.gyro.len()
    }

    /// Whether nothing arrived
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, sample: RawSample) {
        match sample {
            RawSample::Eeg(s) => self.eeg.push(s),
            RawSample::Ppg(s) => self.ppg.push(s),
            RawSample::Accel(s) => self.accel.push(s),
            RawSample::Gyro(s) => self.gyro.push(s),
        }
    }

    fn append(&mut self, other: Self) {
        self.eeg.extend(other.eeg);
        self.ppg.extend(other.ppg);
        self.accel.extend(other.accel);
        self.gyro.extend(other.gyro);
    }
}

/// Counters for diagnostics
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Samples accepted
    pub accepted: u64,
    /// Samples rejected as malformed
    pub malformed: u64,
    /// Read errors reported by the transport
    pub read_errors: u64,
    /// EEG frames skipped because processing fell behind
    pub stale_dropped: u64,
    /// Windows emitted before every side stream caught up
    pub unaligned_windows: u64,
}

// ============================================================================
// Ingestor
// ============================================================================

struct StreamClock {
    kind: StreamKind,
    last_seen: Instant,
    latest_timestamp: Option<f64>,
}

/// Owns the link, the watchdog and window assembly
pub struct StreamIngestor<T> {
    transport: T,
    link: LinkConfig,
    sample_rate: f64,
    window_samples: usize,
    alignment_tolerance: f64,
    alignment_grace: Duration,
    side_buffer_s: f64,

    events: Option<mpsc::Receiver<LinkEvent>>,
    clocks: Vec<StreamClock>,
    session: ConnectionSession,
    stats: IngestStats,

    eeg: VecDeque<EegSample>,
    pending: usize,
    ready_since: Option<Instant>,
    ppg: VecDeque<PpgSample>,
    accel: VecDeque<MotionSample>,
    gyro: VecDeque<MotionSample>,
    sequence: u64,

    tap: broadcast::Sender<RawSample>,
}

impl<T: DeviceTransport> StreamIngestor<T> {
    /// Create an ingestor; nothing is opened until [`connect`](Self::connect)
    #[must_use]
    pub fn new(transport: T, link: &LinkConfig, window: &WindowConfig) -> Self {
        let (tap, _) = broadcast::channel(RAW_TAP_CAPACITY);
        Self {
            transport,
            link: link.clone(),
            sample_rate: window.eeg_rate_hz,
            window_samples: window.window_samples(),
            alignment_tolerance: window.alignment_tolerance_s,
            alignment_grace: Duration::from_secs_f64(window.alignment_grace_s),
            side_buffer_s: window.side_buffer_s,
            events: None,
            clocks: Vec::new(),
            session: ConnectionSession::default(),
            stats: IngestStats::default(),
            eeg: VecDeque::new(),
            pending: 0,
            ready_since: None,
            ppg: VecDeque::new(),
            accel: VecDeque::new(),
            gyro: VecDeque::new(),
            sequence: 0,
            tap,
        }
    }

    /// Link bookkeeping
    #[must_use]
    pub fn session(&self) -> ConnectionSession {
        self.session
    }

    /// Diagnostic counters
    #[must_use]
    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Underlying transport
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Every accepted sample at native rate; slow receivers lose the oldest
    #[must_use]
    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawSample> {
        self.tap.subscribe()
    }

    /// Open the link
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LinkUnavailable`] if the device cannot be
    /// reached within `connect_timeout_s`.
    pub async fn connect(&mut self) -> PipelineResult<()> {
        tracing::info!(transport = self.transport.name(), "Connecting");
        match self.try_connect().await {
            Ok(subscription) => {
                self.install(subscription);
                tracing::info!(streams = self.clocks.len(), "Connected");
                Ok(())
            }
            Err(reason) => {
                self.session.status = ConnectionStatus::Disconnected;
                Err(PipelineError::LinkUnavailable(reason))
            }
        }
    }

    /// Close the link
    pub async fn shutdown(&mut self) {
        self.events = None;
        self.transport.disconnect().await;
        if self.session.status != ConnectionStatus::Failed {
            self.session.status = ConnectionStatus::Disconnected;
        }
    }

    /// Wait up to `wait` for new samples and return them
    ///
    /// Returns an empty batch on timeout. Link loss is handled (and
    /// reconnected) inside the call.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ReconnectExhausted`] when the link cannot be
    /// restored, or [`PipelineError::LinkLost`] if called before `connect`.
    /// Dropping the future mid-reconnect is safe; the next call resumes it.
    pub async fn next_batch(&mut self, wait: Duration) -> PipelineResult<SampleBatch> {
        let deadline = Instant::now() + wait;
        let mut batch = SampleBatch::default();
        loop {
            let now = Instant::now();
            if !batch.is_empty() || now >= deadline {
                return Ok(batch);
            }
            let step = (deadline - now).min(self.watchdog_interval());
            batch.append(self.pump(step).await?);
        }
    }

    /// Wait for the next complete window
    ///
    /// # Errors
    ///
    /// As [`next_batch`](Self::next_batch).
    pub async fn next_window(&mut self) -> PipelineResult<ProcessingWindow> {
        loop {
            if let Some(window) = self.assemble(Instant::now()) {
                return Ok(window);
            }
            self.pump(self.watchdog_interval()).await?;
        }
    }

    fn watchdog_interval(&self) -> Duration {
        Duration::from_secs_f64(self.link.watchdog_interval_s)
    }

    // ------------------------------------------------------------------------
    // Link
    // ------------------------------------------------------------------------

    async fn try_connect(&mut self) -> Result<Subscription, String> {
        let limit = Duration::from_secs_f64(self.link.connect_timeout_s);
        match timeout(limit, self.transport.connect(self.link.event_queue_capacity)).await {
            Ok(Ok(subscription)) => Ok(subscription),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!("connect timed out after {:.1}s", self.link.connect_timeout_s)),
        }
    }

    fn install(&mut self, subscription: Subscription) {
        let now = Instant::now();
        self.clocks = subscription
            .streams
            .iter()
            .map(|&kind| StreamClock { kind, last_seen: now, latest_timestamp: None })
            .collect();
        self.events = Some(subscription.events);
        self.session.status = ConnectionStatus::Connected;
        self.session.consecutive_errors = 0;
    }

    /// Receive for up to `wait`, then run the watchdog
    async fn pump(&mut self, wait: Duration) -> PipelineResult<SampleBatch> {
        let mut batch = SampleBatch::default();
        if self.events.is_none() {
            // A reconnect that was cancelled part way resumes here
            if self.session.status == ConnectionStatus::Reconnecting {
                self.recover("reconnect interrupted").await?;
                return Ok(batch);
            }
            return Err(PipelineError::LinkLost("not connected".into()));
        }
        let received = match self.events.as_mut() {
            Some(events) => timeout(wait, events.recv()).await,
            None => return Ok(batch),
        };

        let mut lost = match received {
            Ok(Some(event)) => self.handle(event, &mut batch),
            Ok(None) => Some("event stream ended".to_string()),
            Err(_) => None,
        };

        let mut drained = 0;
        while lost.is_none() && drained < DRAIN_LIMIT {
            let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) else {
                break;
            };
            lost = self.handle(event, &mut batch);
            drained += 1;
        }

        if let Some(reason) = lost.or_else(|| self.watchdog(Instant::now())) {
            self.recover(&reason).await?;
        }
        Ok(batch)
    }

    /// Apply one event; returns a link-loss reason if the device closed
    fn handle(&mut self, event: LinkEvent, batch: &mut SampleBatch) -> Option<String> {
        match event {
            LinkEvent::Sample(sample) => {
                if let Err(err) = sample.validate() {
                    self.stats.malformed += 1;
                    self.session.consecutive_errors += 1;
                    tracing::warn!(%err, "Dropping malformed sample");
                    return None;
                }
                self.accept(sample);
                batch.push(sample);
                None
            }
            LinkEvent::ReadError { stream, reason } => {
                self.stats.read_errors += 1;
                self.session.consecutive_errors += 1;
                tracing::debug!(stream = stream.name(), %reason, "Read error");
                None
            }
            LinkEvent::Closed { reason } => Some(reason),
        }
    }

    fn accept(&mut self, sample: RawSample) {
        self.stats.accepted += 1;
        self.session.consecutive_errors = 0;
        let stream = sample.stream();
        let now = Instant::now();
        if let Some(clock) = self.clocks.iter_mut().find(|c| c.kind == stream) {
            clock.last_seen = now;
            clock.latest_timestamp = Some(sample.timestamp());
        }

        match sample {
            RawSample::Eeg(s) => {
                self.eeg.push_back(s);
                self.pending += 1;
            }
            RawSample::Ppg(s) => self.ppg.push_back(s),
            RawSample::Accel(s) => self.accel.push_back(s),
            RawSample::Gyro(s) => self.gyro.push_back(s),
        }
        let _ = self.tap.send(sample);
    }

    fn watchdog(&self, now: Instant) -> Option<String> {
        if self.session.consecutive_errors > self.link.max_consecutive_errors {
            return Some(format!("{} consecutive read errors", self.session.consecutive_errors));
        }
        let silence = Duration::from_secs_f64(self.link.silence_timeout_s);
        self.clocks
            .iter()
            .find(|c| now.duration_since(c.last_seen) >= silence)
            .map(|c| format!("{} stream silent for {:.1}s", c.kind.name(), self.link.silence_timeout_s))
    }

    async fn recover(&mut self, reason: &str) -> PipelineResult<()> {
        tracing::warn!(%reason, "Link lost, reconnecting");
        self.session.status = ConnectionStatus::Reconnecting;
        self.events = None;
        self.transport.disconnect().await;
        self.clear_buffers();
        tokio::time::sleep(Duration::from_secs_f64(self.link.reconnect_delay_s)).await;

        let max = self.link.max_reconnect_attempts;
        for attempt in 1..=max {
            self.session.attempt_count = attempt;
            tracing::info!(attempt, max, "Reconnect attempt");
            match self.try_connect().await {
                Ok(subscription) => {
                    self.install(subscription);
                    self.session.attempt_count = 0;
                    self.session.reconnects += 1;
                    tracing::info!(attempt, reconnects = self.session.reconnects, "Reconnected");
                    return Ok(());
                }
                Err(err) => {
                    tracing::warn!(attempt, max, %err, "Reconnect attempt failed");
                    if attempt < max {
                        tokio::time::sleep(Duration::from_secs_f64(self.link.retry_delay_s)).await;
                    }
                }
            }
        }

        self.session.status = ConnectionStatus::Failed;
        tracing::error!(attempts = max, "Reconnect attempts exhausted");
        Err(PipelineError::ReconnectExhausted { attempts: max })
    }

    /// Samples on either side of an outage cannot share a window
    fn clear_buffers(&mut self) {
        self.eeg.clear();
        self.pending = 0;
        self.ready_since = None;
        self.ppg.clear();
        self.accel.clear();
        self.gyro.clear();
        for clock in &mut self.clocks {
            clock.latest_timestamp = None;
        }
    }

    // ------------------------------------------------------------------------
    // Windows
    // ------------------------------------------------------------------------

    fn assemble(&mut self, now: Instant) -> Option<ProcessingWindow> {
        let n = self.window_samples;
        if self.pending < n {
            self.ready_since = None;
            return None;
        }
        if self.pending >= 2 * n {
            let stale = self.pending - n;
            self.pending = n;
            self.stats.stale_dropped += stale as u64;
            tracing::debug!(stale, "Processing behind, dropping stale EEG");
        }

        let start_idx = self.eeg.len() - self.pending;
        let end_idx = start_idx + n;
        let start = self.eeg[start_idx].timestamp;
        let end = self.eeg[end_idx - 1].timestamp + 1.0 / self.sample_rate;

        let aligned = self
            .clocks
            .iter()
            .filter(|c| c.kind != StreamKind::Eeg)
            .all(|c| c.latest_timestamp.is_some_and(|t| t >= end - self.alignment_tolerance));
        let ready_since = *self.ready_since.get_or_insert(now);
        if !aligned && now.duration_since(ready_since) < self.alignment_grace {
            return None;
        }

        let context_start = start_idx.saturating_sub(n);
        let channel_major = |range: std::ops::Range<usize>| -> Vec<Vec<f64>> {
            EegChannel::ALL
                .iter()
                .map(|ch| self.eeg.range(range.clone()).map(|s| s.channel(*ch)).collect())
                .collect()
        };
        let window = ProcessingWindow {
            sequence: self.sequence,
            start,
            end,
            sample_rate: self.sample_rate,
            eeg: channel_major(start_idx..end_idx),
            context: channel_major(context_start..start_idx),
            ppg: in_span(&self.ppg, start, end, |s| s.timestamp),
            accel: in_span(&self.accel, start, end, |s| s.timestamp),
            gyro: in_span(&self.gyro, start, end, |s| s.timestamp),
            aligned,
        };

        if !aligned {
            self.stats.unaligned_windows += 1;
            tracing::debug!(sequence = self.sequence, "Window emitted before side streams caught up");
        }
        self.sequence += 1;
        self.pending -= n;
        self.ready_since = None;

        // Keep one window of lead-in ahead of whatever is still pending
        let keep = self.pending + n;
        while self.eeg.len() > keep {
            self.eeg.pop_front();
        }
        let horizon = end - self.side_buffer_s;
        trim_before(&mut self.ppg, horizon, |s| s.timestamp);
        trim_before(&mut self.accel, horizon, |s| s.timestamp);
        trim_before(&mut self.gyro, horizon, |s| s.timestamp);

        Some(window)
    }
}

fn in_span<S: Copy>(buf: &VecDeque<S>, start: f64, end: f64, ts: impl Fn(&S) -> f64) -> Vec<S> {
    buf.iter().filter(|s| (start..end).contains(&ts(s))).copied().collect()
}

fn trim_before<S>(buf: &mut VecDeque<S>, horizon: f64, ts: impl Fn(&S) -> f64) {
    while buf.front().is_some_and(|s| ts(s) < horizon) {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::simulate::{ConnectOutcome, LinkFault, SimulatedHeadband, SimulationConfig};

    fn ingestor(config: SimulationConfig) -> StreamIngestor<SimulatedHeadband> {
        StreamIngestor::new(SimulatedHeadband::new(config), &LinkConfig::default(), &WindowConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_aligned_and_contiguous() {
        let mut ing = ingestor(SimulationConfig::default());
        ing.connect().await.unwrap();

        let first = ing.next_window().await.unwrap();
        let second = ing.next_window().await.unwrap();

        assert_eq!(first.len(), 256);
        assert_eq!(first.eeg.len(), 4);
        assert_eq!(first.lead_in(), 0);
        assert_eq!(second.lead_in(), 256);
        assert!((second.start - first.end).abs() < 1e-9);
        assert!(second.aligned);
        assert!((60..=68).contains(&second.ppg.len()), "ppg {}", second.ppg.len());
        assert!((48..=56).contains(&second.accel.len()));
        assert!(second.ppg.iter().all(|s| s.timestamp >= second.start && s.timestamp < second.end));
        assert_eq!(second.with_context()[0].len(), 512);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_side_streams_emit_after_grace() {
        let config = SimulationConfig { with_ppg: false, with_motion: false, ..SimulationConfig::default() };
        let mut ing = ingestor(config);
        ing.connect().await.unwrap();
        let window = ing.next_window().await.unwrap();
        assert!(window.aligned);
        assert!(window.ppg.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_backlog_is_dropped() {
        let mut ing = ingestor(SimulationConfig::default());
        ing.connect().await.unwrap();
        ing.next_window().await.unwrap();

        // Fall behind by several seconds without consuming windows
        let until = Instant::now() + Duration::from_secs(4);
        while Instant::now() < until {
            ing.next_batch(Duration::from_millis(100)).await.unwrap();
        }
        let caught_up = ing.next_window().await.unwrap();
        assert!(ing.stats().stale_dropped > 0);
        assert!(ing.pending < 256);
        assert!(caught_up.end > 4.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_unavailable_at_start() {
        let config = SimulationConfig {
            connect_script: vec![ConnectOutcome::Refuse],
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        let err = ing.connect().await.unwrap_err();
        assert!(matches!(err, PipelineError::LinkUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_counts_as_unavailable() {
        let config = SimulationConfig {
            connect_script: vec![ConnectOutcome::Hang],
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        let started = Instant::now();
        assert!(ing.connect().await.is_err());
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_close_and_keeps_streaming() {
        let config = SimulationConfig {
            faults: vec![Some(LinkFault::Close { after_s: 2.5 })],
            connect_script: vec![ConnectOutcome::Accept, ConnectOutcome::Refuse],
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        ing.connect().await.unwrap();

        for _ in 0..6 {
            ing.next_window().await.unwrap();
        }
        let session = ing.session();
        assert_eq!(session.status, ConnectionStatus::Connected);
        assert_eq!(session.reconnects, 1);
        assert_eq!(session.attempt_count, 0);
        assert_eq!(ing.transport().attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_triggers_reconnect() {
        let config = SimulationConfig {
            faults: vec![Some(LinkFault::Stall { after_s: 1.5 })],
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        ing.connect().await.unwrap();
        ing.next_window().await.unwrap();
        let started = Instant::now();
        ing.next_window().await.unwrap();
        ing.next_window().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(ing.session().reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_errors_trigger_reconnect() {
        let config = SimulationConfig {
            faults: vec![Some(LinkFault::ReadErrors { after_s: 1.5 })],
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        ing.connect().await.unwrap();
        for _ in 0..3 {
            ing.next_window().await.unwrap();
        }
        assert_eq!(ing.session().reconnects, 1);
        assert!(ing.stats().read_errors > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_fails_session() {
        let mut script = vec![ConnectOutcome::Accept];
        script.extend([ConnectOutcome::Refuse; 5]);
        let config = SimulationConfig {
            faults: vec![Some(LinkFault::Close { after_s: 1.5 })],
            connect_script: script,
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        ing.connect().await.unwrap();
        ing.next_window().await.unwrap();

        let err = loop {
            match ing.next_window().await {
                Ok(_) => continue,
                Err(err) => break err,
            }
        };
        assert_eq!(err, PipelineError::ReconnectExhausted { attempts: 5 });
        assert_eq!(ing.session().status, ConnectionStatus::Failed);
        assert_eq!(ing.session().attempt_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_reconnect_resumes_on_next_call() {
        let config = SimulationConfig {
            faults: vec![Some(LinkFault::Close { after_s: 0.5 })],
            ..SimulationConfig::default()
        };
        let mut ing = ingestor(config);
        ing.connect().await.unwrap();

        // Dropped while waiting out the reconnect delay
        let cut = tokio::time::timeout(Duration::from_millis(1500), ing.next_window()).await;
        assert!(cut.is_err());
        assert_eq!(ing.session().status, ConnectionStatus::Reconnecting);

        let window = ing.next_window().await.unwrap();
        assert_eq!(window.len(), 256);
        assert_eq!(ing.session().status, ConnectionStatus::Connected);
        assert_eq!(ing.session().reconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_queue_capacity_reaches_transport() {
        let link = LinkConfig { event_queue_capacity: 64, ..LinkConfig::default() };
        let mut ing =
            StreamIngestor::new(SimulatedHeadband::new(SimulationConfig::default()), &link, &WindowConfig::default());
        ing.connect().await.unwrap();
        assert_eq!(ing.events.as_ref().map(mpsc::Receiver::max_capacity), Some(64));
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_tap_sees_samples() {
        let mut ing = ingestor(SimulationConfig::default());
        let mut tap = ing.subscribe_raw();
        ing.connect().await.unwrap();
        let batch = ing.next_batch(Duration::from_millis(200)).await.unwrap();
        assert!(!batch.is_empty());
        let first = tap.recv().await.unwrap();
        assert!(first.timestamp() > 0.0);
    }
}
