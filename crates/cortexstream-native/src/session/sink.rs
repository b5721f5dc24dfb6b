//! Snapshot consumers
//!
//! The session driver hands every snapshot to its sinks without waiting on
//! them. A sink that cannot keep up loses data; it never slows the window
//! cadence.
//!
//! - [`BroadcastSink`]: fan-out to any number of live receivers
//! - [`SessionRecorder`]: in-memory recording with start/stop and markers;
//!   talking onsets and ends are marked automatically

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use cortexstream_core::snapshot::{ConnectionSession, Snapshot};
use cortexstream_core::types::{RawSample, SpeechActivity};

/// Receives snapshots from the session driver
pub trait SnapshotSink: Send {
    /// Take one snapshot; must not block
    fn publish(&mut self, snapshot: Arc<Snapshot>);

    /// The session has ended with the given link state
    fn close(&mut self, _link: ConnectionSession) {}
}

// ============================================================================
// Broadcast
// ============================================================================

/// Live fan-out of snapshots
///
/// Receivers that fall more than `capacity` snapshots behind skip the oldest.
#[derive(Clone, Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Arc<Snapshot>>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` snapshots per receiver
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver seeing snapshots published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    /// Number of live receivers
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(16)
    }
}

impl SnapshotSink for BroadcastSink {
    fn publish(&mut self, snapshot: Arc<Snapshot>) {
        // No receivers is not an error
        let _ = self.tx.send(snapshot);
    }
}

// ============================================================================
// Recorder
// ============================================================================

/// Errors writing a recording
#[derive(Debug, Error)]
pub enum RecorderError {
    /// File could not be written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Recording could not be serialized
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Marker placed when smoothed talking begins
pub const TALKING_STARTED: &str = "talking";

/// Marker placed when smoothed talking ends
pub const TALKING_STOPPED: &str = "talking_stopped";

/// Named point in a recording
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    /// User-supplied label
    pub label: String,
    /// Device time of the latest snapshot when the marker was placed
    pub timestamp: f64,
    /// Sequence of that snapshot
    pub sequence: u64,
}

#[derive(Debug, Default)]
struct Recording {
    active: bool,
    started_at: Option<f64>,
    stopped_at: Option<f64>,
    snapshots: Vec<Arc<Snapshot>>,
    raw: Vec<RawSample>,
    raw_dropped: u64,
    markers: Vec<Marker>,
    final_link: Option<ConnectionSession>,
}

impl Recording {
    fn latest(&self) -> (f64, u64) {
        self.snapshots.last().map_or((0.0, 0), |s| (s.timestamp, s.sequence))
    }
}

#[derive(Serialize)]
struct Export<'a> {
    started_at: Option<f64>,
    stopped_at: Option<f64>,
    final_link: Option<ConnectionSession>,
    markers: &'a [Marker],
    snapshots: Vec<&'a Snapshot>,
    raw_samples: &'a [RawSample],
    raw_dropped: u64,
}

/// In-memory session recording
///
/// Cheap to clone; clones share the same recording, so one handle can be
/// given to the driver while another places markers and reads results.
/// Snapshots are kept after the session ends, including when it fails.
#[derive(Clone, Debug, Default)]
pub struct SessionRecorder {
    inner: Arc<Mutex<Recording>>,
}

impl SessionRecorder {
    /// Create an idle recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begin appending snapshots; returns false if already recording
    pub fn start(&self) -> bool {
        let mut rec = self.lock();
        if rec.active {
            return false;
        }
        rec.active = true;
        let (now, _) = rec.latest();
        rec.started_at.get_or_insert(now);
        rec.stopped_at = None;
        tracing::info!("Recording started");
        true
    }

    /// Stop appending; returns false if not recording
    pub fn stop(&self) -> bool {
        let mut rec = self.lock();
        if !rec.active {
            return false;
        }
        rec.active = false;
        let (now, _) = rec.latest();
        rec.stopped_at = Some(now);
        tracing::info!(snapshots = rec.snapshots.len(), "Recording stopped");
        true
    }

    /// Whether snapshots are being appended
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.lock().active
    }

    /// Label the current point of the recording
    pub fn marker(&self, label: impl Into<String>) -> Marker {
        let mut rec = self.lock();
        let (timestamp, sequence) = rec.latest();
        let marker = Marker { label: label.into(), timestamp, sequence };
        tracing::debug!(label = %marker.label, timestamp, "Marker placed");
        rec.markers.push(marker.clone());
        marker
    }

    /// Recorded snapshots
    #[must_use]
    pub fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        self.lock().snapshots.clone()
    }

    /// Number of recorded snapshots
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().snapshots.len()
    }

    /// Whether nothing has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().snapshots.is_empty()
    }

    /// Placed markers
    #[must_use]
    pub fn markers(&self) -> Vec<Marker> {
        self.lock().markers.clone()
    }

    /// Number of recorded raw samples
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.lock().raw.len()
    }

    /// Link state reported when the session closed
    #[must_use]
    pub fn final_link(&self) -> Option<ConnectionSession> {
        self.lock().final_link
    }

    /// Append raw samples from a tap while recording
    ///
    /// Samples the task could not keep up with are counted, not recorded.
    /// The task ends when the tap closes.
    #[must_use]
    pub fn capture_raw(&self, mut tap: broadcast::Receiver<RawSample>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                match tap.recv().await {
                    Ok(sample) => {
                        let mut rec = inner.lock().unwrap_or_else(PoisonError::into_inner);
                        if rec.active {
                            rec.raw.push(sample);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        inner.lock().unwrap_or_else(PoisonError::into_inner).raw_dropped += n;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Serialize the recording
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, RecorderError> {
        let rec = self.lock();
        Ok(serde_json::to_string(&export(&rec))?)
    }

    /// Write the recording to `path` as JSON
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), RecorderError> {
        let file = std::fs::File::create(path.as_ref())?;
        let rec = self.lock();
        serde_json::to_writer(std::io::BufWriter::new(file), &export(&rec))?;
        tracing::info!(path = %path.as_ref().display(), snapshots = rec.snapshots.len(), "Recording written");
        Ok(())
    }
}

fn export(rec: &Recording) -> Export<'_> {
    Export {
        started_at: rec.started_at,
        stopped_at: rec.stopped_at,
        final_link: rec.final_link,
        markers: &rec.markers,
        snapshots: rec.snapshots.iter().map(AsRef::as_ref).collect(),
        raw_samples: &rec.raw,
        raw_dropped: rec.raw_dropped,
    }
}

impl SnapshotSink for SessionRecorder {
    fn publish(&mut self, snapshot: Arc<Snapshot>) {
        let mut rec = self.lock();
        if !rec.active {
            return;
        }
        let before = rec.snapshots.last().map_or(SpeechActivity::Quiet, |s| s.talking.activity);
        let label = match (before, snapshot.talking.activity) {
            (SpeechActivity::Quiet, SpeechActivity::Talking) => Some(TALKING_STARTED),
            (SpeechActivity::Talking, SpeechActivity::Quiet) => Some(TALKING_STOPPED),
            _ => None,
        };
        if let Some(label) = label {
            tracing::debug!(label, timestamp = snapshot.timestamp, "Talking marker");
            rec.markers.push(Marker { label: label.into(), timestamp: snapshot.timestamp, sequence: snapshot.sequence });
        }
        rec.snapshots.push(snapshot);
    }

    fn close(&mut self, link: ConnectionSession) {
        let mut rec = self.lock();
        rec.final_link = Some(link);
        if rec.active {
            rec.active = false;
            rec.stopped_at = Some(rec.latest().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortexstream_core::snapshot::ConnectionStatus;
    use cortexstream_core::types::EegSample;

    fn snapshot(sequence: u64) -> Arc<Snapshot> {
        #[allow(clippy::cast_precision_loss)]
        let timestamp = sequence as f64 + 1.0;
        Arc::new(Snapshot { sequence, timestamp, ..Snapshot::default() })
    }

    #[test]
    fn test_recorder_only_appends_while_recording() {
        let mut recorder = SessionRecorder::new();
        recorder.publish(snapshot(0));
        assert!(recorder.is_empty());

        assert!(recorder.start());
        assert!(!recorder.start());
        recorder.publish(snapshot(1));
        recorder.publish(snapshot(2));
        assert!(recorder.stop());
        recorder.publish(snapshot(3));

        let seqs: Vec<u64> = recorder.snapshots().iter().map(|s| s.sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert!(!recorder.stop());
    }

    #[test]
    fn test_markers_take_latest_snapshot_time() {
        let mut recorder = SessionRecorder::new();
        recorder.start();
        recorder.publish(snapshot(4));
        let marker = recorder.marker("eyes closed");
        assert_eq!(marker.sequence, 4);
        assert!((marker.timestamp - 5.0).abs() < 1e-12);
        assert_eq!(recorder.markers(), vec![marker]);
    }

    #[test]
    fn test_talking_transitions_are_marked() {
        let mut recorder = SessionRecorder::new();
        let talking = |sequence: u64, activity| {
            let mut snap = (*snapshot(sequence)).clone();
            snap.talking.activity = activity;
            Arc::new(snap)
        };

        // Not recording yet: no markers
        recorder.publish(talking(0, SpeechActivity::Talking));
        recorder.start();
        for (seq, activity) in [
            (1, SpeechActivity::Quiet),
            (2, SpeechActivity::Talking),
            (3, SpeechActivity::Talking),
            (4, SpeechActivity::Quiet),
            (5, SpeechActivity::Quiet),
        ] {
            recorder.publish(talking(seq, activity));
        }

        let marks: Vec<(String, u64)> = recorder.markers().into_iter().map(|m| (m.label, m.sequence)).collect();
        assert_eq!(marks, vec![(TALKING_STARTED.to_owned(), 2), (TALKING_STOPPED.to_owned(), 4)]);
        assert!((recorder.markers()[1].timestamp - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_snapshots_survive_failed_session() {
        let mut recorder = SessionRecorder::new();
        let handle = recorder.clone();
        recorder.start();
        recorder.publish(snapshot(0));
        recorder.publish(snapshot(1));
        recorder.close(ConnectionSession { status: ConnectionStatus::Failed, ..ConnectionSession::default() });

        assert_eq!(handle.len(), 2);
        assert!(!handle.is_recording());
        assert_eq!(handle.final_link().map(|l| l.status), Some(ConnectionStatus::Failed));
    }

    #[test]
    fn test_json_export() {
        let mut recorder = SessionRecorder::new();
        recorder.start();
        recorder.publish(snapshot(0));
        recorder.marker("start task");

        let json: serde_json::Value = serde_json::from_str(&recorder.to_json().unwrap()).unwrap();
        assert_eq!(json["snapshots"].as_array().unwrap().len(), 1);
        assert_eq!(json["markers"][0]["label"], "start task");
        assert_eq!(json["snapshots"][0]["state_label"], "unknown");
    }

    #[test]
    fn test_write_json_to_file() {
        let mut recorder = SessionRecorder::new();
        recorder.start();
        recorder.publish(snapshot(0));

        let path = std::env::temp_dir().join(format!("cortexstream-recording-{}.json", std::process::id()));
        recorder.write_json(&path).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert!(written.contains("\"snapshots\""));
    }

    #[test]
    fn test_broadcast_never_blocks_on_slow_receiver() {
        let mut sink = BroadcastSink::new(4);
        let mut slow = sink.subscribe();
        for seq in 0..10 {
            sink.publish(snapshot(seq));
        }
        assert!(matches!(slow.try_recv(), Err(broadcast::error::TryRecvError::Lagged(6))));
        assert_eq!(slow.try_recv().unwrap().sequence, 6);
    }

    #[test]
    fn test_broadcast_without_receivers() {
        let mut sink = BroadcastSink::default();
        sink.publish(snapshot(0));
        assert_eq!(sink.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_raw_capture_while_recording() {
        let recorder = SessionRecorder::new();
        let (tx, rx) = broadcast::channel(16);
        let task = recorder.capture_raw(rx);

        tx.send(RawSample::Eeg(EegSample::new(0.0, [1.0; 4]))).unwrap();
        while tx.len() > 0 {
            tokio::task::yield_now().await;
        }
        recorder.start();
        tx.send(RawSample::Eeg(EegSample::new(0.1, [2.0; 4]))).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(recorder.raw_len(), 1);
    }
}
