//! Device connection capability
//!
//! Ingestion only needs a way to open a link that yields timestamped samples
//! for the four stream groups plus a per-stream error signal. How the link is
//! realized (Bluetooth, a replay file, a simulator) is up to the implementor.

use std::future::Future;

use thiserror::Error;
use tokio::sync::mpsc;

use cortexstream_core::types::{RawSample, StreamKind};

/// Why a connect attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No headband found or reachable
    #[error("no device found: {0}")]
    NoDevice(String),

    /// Device found but a required stream could not be subscribed
    #[error("{} stream unavailable", .0.name())]
    MissingStream(StreamKind),

    /// Platform or radio failure
    #[error("transport error: {0}")]
    Transport(String),
}

/// Item delivered on an open link
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// One decoded sample
    Sample(RawSample),
    /// A notification for `stream` could not be read or decoded
    ReadError {
        /// Stream group the failure belongs to
        stream: StreamKind,
        /// Human-readable cause
        reason: String,
    },
    /// The device closed the link
    Closed {
        /// Human-readable cause
        reason: String,
    },
}

/// An open link
#[derive(Debug)]
pub struct Subscription {
    /// Events in arrival order
    pub events: mpsc::Receiver<LinkEvent>,
    /// Stream groups the device is delivering
    pub streams: Vec<StreamKind>,
}

/// A device that can be connected to and torn down repeatedly
///
/// `connect` may be called again after `disconnect` for the same logical
/// session; implementations keep device time monotonic across connections.
pub trait DeviceTransport: Send {
    /// Short label for logs
    fn name(&self) -> &str;

    /// Open the link and subscribe to every available stream
    ///
    /// Events are queued in a channel holding at most `queue_capacity` items.
    fn connect(&mut self, queue_capacity: usize) -> impl Future<Output = Result<Subscription, LinkError>> + Send;

    /// Tear the link down; idempotent
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;
}
