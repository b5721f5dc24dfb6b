//! Per-second session loop
//!
//! The driver owns the ingestor, the processing units and the session
//! context. Each turn waits for the next complete window (the only
//! suspension point), processes it and hands the snapshot to every sink.
//!
//! Only [`PipelineError::LinkUnavailable`] and
//! [`PipelineError::ReconnectExhausted`] end a session with an error; every
//! other condition is reflected in the snapshots. A stop signal may arrive
//! at any point: the window in flight is discarded and snapshots already
//! published stay with their sinks.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};

use cortexstream_core::config::PipelineConfig;
use cortexstream_core::error::{PipelineError, PipelineResult};
use cortexstream_core::snapshot::{CalibrationStatus, ConnectionSession, Snapshot};
use cortexstream_core::types::RawSample;

use super::context::{SessionContext, WindowProcessor};
use super::sink::SnapshotSink;
use crate::bridge::{DeviceTransport, IngestStats, ProcessingWindow, StreamIngestor};

/// Why a session ended without error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Stop signal received
    Cancelled,
    /// Configured window count reached
    WindowLimit,
}

/// Outcome of a session that ended without error
#[derive(Clone, Debug)]
pub struct SessionSummary {
    /// Why the session ended
    pub reason: StopReason,
    /// Snapshots published
    pub windows: u64,
    /// Link state before shutdown
    pub link: ConnectionSession,
    /// Final calibration
    pub calibration: CalibrationStatus,
    /// Ingestion counters
    pub stats: IngestStats,
    /// Last published snapshot
    pub last: Option<Arc<Snapshot>>,
}

/// Drives one device session
pub struct SessionDriver<T> {
    ingestor: StreamIngestor<T>,
    processor: WindowProcessor,
    context: SessionContext,
    sinks: Vec<Box<dyn SnapshotSink>>,
    stop_after: Option<u64>,
    last: Option<Arc<Snapshot>>,
}

impl<T: DeviceTransport> SessionDriver<T> {
    /// Create a driver with a cold session context
    #[must_use]
    pub fn new(transport: T, config: &PipelineConfig) -> Self {
        Self {
            ingestor: StreamIngestor::new(transport, &config.link, &config.window),
            processor: WindowProcessor::new(config),
            context: SessionContext::new(config),
            sinks: Vec::new(),
            stop_after: None,
            last: None,
        }
    }

    /// Add a snapshot consumer
    #[must_use]
    pub fn with_sink(mut self, sink: impl SnapshotSink + 'static) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    /// Add a snapshot consumer
    pub fn add_sink(&mut self, sink: Box<dyn SnapshotSink>) {
        self.sinks.push(sink);
    }

    /// End the session after `windows` snapshots
    pub fn stop_after_windows(&mut self, windows: u64) {
        self.stop_after = Some(windows);
    }

    /// Session state
    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Current link bookkeeping
    #[must_use]
    pub fn session(&self) -> ConnectionSession {
        self.ingestor.session()
    }

    /// Raw samples at native rate
    #[must_use]
    pub fn subscribe_raw(&self) -> broadcast::Receiver<RawSample> {
        self.ingestor.subscribe_raw()
    }

    /// Run until stopped, the window limit is reached, or the link fails
    ///
    /// `stop` ends the session when it becomes `true` or its sender is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::LinkUnavailable`] if the device cannot be
    /// reached at start, and [`PipelineError::ReconnectExhausted`] if a lost
    /// link cannot be restored.
    pub async fn run(&mut self, mut stop: watch::Receiver<bool>) -> PipelineResult<SessionSummary> {
        if let Err(err) = self.ingestor.connect().await {
            tracing::error!(%err, "Session could not start");
            self.close_sinks();
            return Err(err);
        }
        tracing::info!("Session started");

        let reason = loop {
            if *stop.borrow() {
                break StopReason::Cancelled;
            }
            if self.stop_after.is_some_and(|n| self.context.windows_processed() >= n) {
                break StopReason::WindowLimit;
            }

            // Only a `true` stop (or a dropped sender) abandons the in-flight window
            let next = tokio::select! {
                biased;
                _ = stop.wait_for(|stopped| *stopped) => break StopReason::Cancelled,
                next = self.ingestor.next_window() => next,
            };

            match next {
                Ok(window) => self.emit(&window),
                Err(err) if err.is_fatal() => {
                    tracing::error!(%err, windows = self.context.windows_processed(), "Session failed");
                    self.ingestor.shutdown().await;
                    self.close_sinks();
                    return Err(err);
                }
                Err(err) => tracing::warn!(%err, "Window skipped"),
            }
        };

        let link = self.ingestor.session();
        self.ingestor.shutdown().await;
        self.close_sinks();
        tracing::info!(?reason, windows = self.context.windows_processed(), "Session stopped");

        Ok(SessionSummary {
            reason,
            windows: self.context.windows_processed(),
            link,
            calibration: self.last.as_ref().map(|s| s.calibration).unwrap_or_default(),
            stats: self.ingestor.stats(),
            last: self.last.clone(),
        })
    }

    fn emit(&mut self, window: &ProcessingWindow) {
        let snapshot = Arc::new(self.processor.process(&mut self.context, window, self.ingestor.session()));
        for sink in &mut self.sinks {
            sink.publish(Arc::clone(&snapshot));
        }
        self.last = Some(snapshot);
    }

    fn close_sinks(&mut self) {
        let link = self.ingestor.session();
        for sink in &mut self.sinks {
            sink.close(link);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ConnectOutcome, LinkFault, SimulatedHeadband, SimulationConfig};
    use crate::session::sink::{BroadcastSink, SessionRecorder};
    use cortexstream_core::config::{ConditionerConfig, SmoothingConfig};
    use cortexstream_core::snapshot::ConnectionStatus;
    use std::time::Duration;

    fn driver(sim: SimulationConfig, config: &PipelineConfig) -> (SessionDriver<SimulatedHeadband>, SessionRecorder) {
        let recorder = SessionRecorder::new();
        recorder.start();
        let driver = SessionDriver::new(SimulatedHeadband::new(sim), config).with_sink(recorder.clone());
        (driver, recorder)
    }

    fn quick_config() -> PipelineConfig {
        PipelineConfig {
            conditioner: ConditionerConfig { calibration_s: 4.0, ..ConditionerConfig::default() },
            smoothing: SmoothingConfig { numeric_window: 60, ..SmoothingConfig::default() },
            ..PipelineConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_window_limit() {
        let (mut driver, recorder) = driver(SimulationConfig::default(), &PipelineConfig::default());
        driver.stop_after_windows(3);
        let (_tx, rx) = watch::channel(false);

        let summary = driver.run(rx).await.unwrap();
        assert_eq!(summary.reason, StopReason::WindowLimit);
        assert_eq!(summary.windows, 3);
        assert_eq!(summary.link.status, ConnectionStatus::Connected);
        assert_eq!(recorder.len(), 3);
        for snap in recorder.snapshots() {
            assert!((snap.band_powers.total() - 100.0).abs() < 1e-6);
        }
        assert_eq!(driver.session().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_ends_session() {
        let (mut driver, recorder) = driver(SimulationConfig::default(), &PipelineConfig::default());
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let result = driver.run(rx).await;
            (driver, result)
        });
        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(true).unwrap();

        let (driver, result) = task.await.unwrap();
        let summary = result.unwrap();
        assert_eq!(summary.reason, StopReason::Cancelled);
        assert!((2..=4).contains(&summary.windows), "windows {}", summary.windows);
        assert_eq!(recorder.len() as u64, summary.windows);
        assert_eq!(driver.context().windows_processed(), summary.windows);
    }

    #[tokio::test(start_paused = true)]
    async fn test_false_stop_during_reconnect_keeps_session_running() {
        let sim = SimulationConfig {
            faults: vec![Some(LinkFault::Close { after_s: 2.5 })],
            ..SimulationConfig::default()
        };
        let (mut driver, recorder) = driver(sim, &PipelineConfig::default());
        driver.stop_after_windows(6);
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let result = driver.run(rx).await;
            (driver, result)
        });
        // Lands inside the reconnect delay
        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(false).unwrap();

        let (_driver, result) = task.await.unwrap();
        let summary = result.unwrap();
        assert_eq!(summary.reason, StopReason::WindowLimit);
        assert_eq!(summary.windows, 6);
        assert_eq!(summary.link.reconnects, 1);
        assert_eq!(recorder.len(), 6);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_unavailable_is_fatal_at_start() {
        let sim = SimulationConfig { connect_script: vec![ConnectOutcome::Refuse], ..SimulationConfig::default() };
        let (mut driver, recorder) = driver(sim, &PipelineConfig::default());
        let (_tx, rx) = watch::channel(false);

        let err = driver.run(rx).await.unwrap_err();
        assert!(matches!(err, PipelineError::LinkUnavailable(_)));
        assert!(recorder.is_empty());
        assert!(recorder.final_link().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_preserves_calibration_and_history() {
        let config = quick_config();
        let sim = SimulationConfig {
            faults: vec![Some(LinkFault::Close { after_s: 6.5 })],
            connect_script: vec![
                ConnectOutcome::Accept,
                ConnectOutcome::Refuse,
                ConnectOutcome::Refuse,
                ConnectOutcome::Refuse,
            ],
            ..SimulationConfig::default()
        };
        let (mut driver, recorder) = driver(sim, &config);
        driver.stop_after_windows(12);
        let (_tx, rx) = watch::channel(false);

        let summary = driver.run(rx).await.unwrap();
        assert_eq!(summary.link.status, ConnectionStatus::Connected);
        assert_eq!(summary.link.reconnects, 1);
        assert_eq!(summary.link.attempt_count, 0);

        let snapshots = recorder.snapshots();
        let split = snapshots.iter().position(|s| s.link.reconnects == 1).unwrap();
        assert!(split >= 5);
        let (before, after) = (&snapshots[split - 1], &snapshots[split]);
        assert!(before.calibration.fitted);
        assert!(after.calibration.fitted);
        assert!(after.timestamp - before.timestamp > 10.0);

        // Nothing was reset across the outage
        assert_eq!(driver.context().windows_processed(), 12);
        assert_eq!(driver.context().smoother().history_len(), 12);
        assert!(driver.context().calibration().is_fitted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_reconnect_fails_and_keeps_snapshots() {
        let mut script = vec![ConnectOutcome::Accept];
        script.extend([ConnectOutcome::Refuse; 5]);
        let sim = SimulationConfig {
            faults: vec![Some(LinkFault::Close { after_s: 5.5 })],
            connect_script: script,
            ..SimulationConfig::default()
        };
        let (mut driver, recorder) = driver(sim, &quick_config());
        let (_tx, rx) = watch::channel(false);

        let err = driver.run(rx).await.unwrap_err();
        assert_eq!(err, PipelineError::ReconnectExhausted { attempts: 5 });
        assert_eq!(driver.session().status, ConnectionStatus::Failed);
        assert_eq!(recorder.final_link().map(|l| l.status), Some(ConnectionStatus::Failed));

        let snapshots = recorder.snapshots();
        assert!(snapshots.len() >= 4, "kept {} snapshots", snapshots.len());
        assert!(snapshots.windows(2).all(|w| w[1].sequence > w[0].sequence));
    }

    #[tokio::test(start_paused = true)]
    async fn test_calibration_completes_at_thirty_seconds() {
        let (mut driver, recorder) = driver(SimulationConfig::default(), &PipelineConfig::default());
        driver.stop_after_windows(35);
        let (_tx, rx) = watch::channel(false);
        driver.run(rx).await.unwrap();

        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 35);
        let first_full = snapshots.iter().position(|s| s.calibration.progress >= 100.0).unwrap();
        assert_eq!(first_full, 29);
        assert!((snapshots[first_full].timestamp - 30.0).abs() < 0.5);

        let mut last = 0.0;
        for (i, snap) in snapshots.iter().enumerate() {
            assert!(snap.calibration.progress >= last);
            last = snap.calibration.progress;
            assert_eq!(snap.calibration.fitted, i >= first_full, "window {i}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_receivers_see_every_snapshot() {
        let broadcast = BroadcastSink::new(64);
        let mut rx_snap = broadcast.subscribe();
        let mut driver = SessionDriver::new(SimulatedHeadband::new(SimulationConfig::default()), &PipelineConfig::default())
            .with_sink(broadcast);
        driver.stop_after_windows(4);
        let mut raw = driver.subscribe_raw();
        let (_tx, rx) = watch::channel(false);
        driver.run(rx).await.unwrap();

        let mut sequences = Vec::new();
        while let Ok(snap) = rx_snap.try_recv() {
            sequences.push(snap.sequence);
        }
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert!(raw.try_recv().is_ok());
    }
}
