//! Device sessions
//!
//! - [`context`]: Per-session state and the per-window processing pass
//! - [`driver`]: The per-second loop with cancellation
//! - [`sink`]: Non-blocking snapshot consumers

pub mod context;
pub mod driver;
pub mod sink;

pub use context::{derived_metrics, SessionContext, WindowProcessor};
pub use driver::{SessionDriver, SessionSummary, StopReason};
pub use sink::{BroadcastSink, Marker, RecorderError, SessionRecorder, SnapshotSink, TALKING_STARTED, TALKING_STOPPED};
