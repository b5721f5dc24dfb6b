//! Device links and stream ingestion
//!
//! - [`transport`]: The connection capability a device must provide
//! - [`ingest`]: Watchdog, bounded reconnect and window assembly
//! - [`simulate`]: Scripted synthetic headband
//! - [`muse`]: Headband GATT packet codec
//! - [`ble`]: Bluetooth LE transport (requires `ble` feature)
//!
//! ```rust,ignore
//! use cortexstream_native::bridge::{SimulatedHeadband, SimulationConfig, StreamIngestor};
//!
//! let transport = SimulatedHeadband::new(SimulationConfig::default());
//! let mut ingestor = StreamIngestor::new(transport, &config.link, &config.window);
//! ingestor.connect().await?;
//!
//! loop {
//!     let window = ingestor.next_window().await?;
//!     // condition, analyze, smooth...
//! }
//! ```

#[cfg(feature = "ble")]
pub mod ble;

pub mod ingest;
pub mod muse;
pub mod simulate;
pub mod transport;

// Re-export key types
pub use ingest::{IngestStats, ProcessingWindow, SampleBatch, StreamIngestor};
pub use muse::{CodecError, MuseDecoder};
pub use simulate::{ConnectOutcome, LinkFault, SimulatedHeadband, SimulationConfig};
pub use transport::{DeviceTransport, LinkError, LinkEvent, Subscription};

#[cfg(feature = "ble")]
pub use ble::{BleHeadband, HeadbandInfo, HEADBAND_SERVICE_UUID};
