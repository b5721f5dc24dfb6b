//! Bluetooth LE transport for the four-electrode headband
//!
//! Scans for the headband service, subscribes to every sample characteristic,
//! sends the preset and start commands, and forwards decoded samples as
//! [`LinkEvent`]s. Decode failures become per-stream read errors; the end of
//! the notification stream closes the link.
//!
//! # Services
//!
//! - `0000fe8d-0000-1000-8000-00805f9b34fb` - headband service
//! - `273e0001-4c4d-454d-96be-f03bac821358` - control (write/notify)
//! - `273e0003` .. `273e0006` - TP9, AF7, AF8, TP10
//! - `273e0009`, `273e000a` - gyroscope, accelerometer
//! - `273e000f` .. `273e0011` - PPG ambient, infrared, red

use std::time::{Duration, Instant};

use btleplug::api::{Central, Characteristic as GattCharacteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use uuid::Uuid;

use cortexstream_core::types::StreamKind;

use super::muse::{service_uuid, Characteristic, Command, MuseDecoder};
use super::transport::{DeviceTransport, LinkError, LinkEvent, Subscription};

/// Headband service UUID
pub const HEADBAND_SERVICE_UUID: Uuid = Uuid::from_u128(service_uuid());

/// Advertised name prefix of the headband
const NAME_PREFIX: &str = "Muse";

/// Channel preset streaming EEG, motion and PPG
const PRESET: u8 = 21;

/// Headband found during a scan
#[derive(Clone, Debug)]
pub struct HeadbandInfo {
    /// Platform address
    pub address: String,
    /// Advertised name
    pub name: Option<String>,
    /// Signal strength (dBm)
    pub rssi: Option<i16>,
}

/// BLE link to one headband
pub struct BleHeadband {
    address: Option<String>,
    scan_duration: Duration,
    origin: Instant,
    peripheral: Option<Peripheral>,
    task: Option<JoinHandle<()>>,
}

impl BleHeadband {
    /// Connect to the headband at `address`, or the first one found
    #[must_use]
    pub fn new(address: Option<String>) -> Self {
        Self {
            address,
            scan_duration: Duration::from_secs(5),
            origin: Instant::now(),
            peripheral: None,
            task: None,
        }
    }

    /// Set scan duration
    pub fn set_scan_duration(&mut self, duration: Duration) {
        self.scan_duration = duration;
    }

    /// List nearby headbands
    ///
    /// # Errors
    ///
    /// Returns an error if no Bluetooth adapter is available.
    pub async fn scan(duration: Duration) -> Result<Vec<HeadbandInfo>, anyhow::Error> {
        let adapter = first_adapter().await?;
        let found = scan_peripherals(&adapter, duration).await?;
        let mut devices = Vec::with_capacity(found.len());
        for peripheral in found {
            if let Some(properties) = peripheral.properties().await? {
                devices.push(HeadbandInfo {
                    address: peripheral.address().to_string(),
                    name: properties.local_name,
                    rssi: properties.rssi,
                });
            }
        }
        tracing::info!("Scan complete: found {} headbands", devices.len());
        Ok(devices)
    }

    async fn find(&self) -> Result<Option<Peripheral>, anyhow::Error> {
        let adapter = first_adapter().await?;
        for peripheral in scan_peripherals(&adapter, self.scan_duration).await? {
            let matches = match &self.address {
                Some(address) => peripheral.address().to_string().eq_ignore_ascii_case(address),
                None => true,
            };
            if matches {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn open(&mut self, peripheral: Peripheral, queue_capacity: usize) -> Result<Subscription, anyhow::Error> {
        peripheral.connect().await?;
        peripheral.discover_services().await?;

        let mut control: Option<GattCharacteristic> = None;
        let mut streams = Vec::new();
        for gatt in peripheral.characteristics() {
            let Some(characteristic) = Characteristic::from_uuid(gatt.uuid.as_u128()) else {
                continue;
            };
            peripheral.subscribe(&gatt).await?;
            match characteristic.stream() {
                Some(stream) if !streams.contains(&stream) => streams.push(stream),
                Some(_) => {}
                None => control = Some(gatt),
            }
        }
        if !streams.contains(&StreamKind::Eeg) {
            return Err(LinkError::MissingStream(StreamKind::Eeg).into());
        }
        let control = control.ok_or_else(|| anyhow::anyhow!("control characteristic not found"))?;

        for command in [Command::Halt, Command::Preset(PRESET), Command::Resume] {
            peripheral.write(&control, &command.encode(), WriteType::WithoutResponse).await?;
        }
        tracing::debug!(?streams, "Subscribed to headband streams");

        let notifications = peripheral.notifications().await?;
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let origin = self.origin;
        self.task = Some(tokio::spawn(forward(notifications, tx, origin)));
        self.peripheral = Some(peripheral);

        Ok(Subscription { events: rx, streams })
    }
}

impl DeviceTransport for BleHeadband {
    fn name(&self) -> &str {
        "ble"
    }

    async fn connect(&mut self, queue_capacity: usize) -> Result<Subscription, LinkError> {
        self.disconnect().await;
        let peripheral = self
            .find()
            .await
            .map_err(|e| LinkError::Transport(format!("{e:#}")))?
            .ok_or_else(|| LinkError::NoDevice(self.address.clone().unwrap_or_else(|| NAME_PREFIX.to_string())))?;
        tracing::info!(address = %peripheral.address(), "Opening headband");

        self.open(peripheral, queue_capacity).await.map_err(|e| match e.downcast::<LinkError>() {
            Ok(link) => link,
            Err(other) => LinkError::Transport(format!("{other:#}")),
        })
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(err) = peripheral.disconnect().await {
                tracing::debug!(%err, "Disconnect failed");
            }
        }
    }
}

async fn first_adapter() -> Result<Adapter, anyhow::Error> {
    let manager = Manager::new().await?;
    manager
        .adapters()
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))
}

async fn scan_peripherals(adapter: &Adapter, duration: Duration) -> Result<Vec<Peripheral>, anyhow::Error> {
    tracing::info!("Starting BLE scan for headbands...");
    adapter.start_scan(ScanFilter { services: vec![HEADBAND_SERVICE_UUID] }).await?;
    tokio::time::sleep(duration).await;
    adapter.stop_scan().await?;

    let mut found = Vec::new();
    for peripheral in adapter.peripherals().await? {
        let Some(properties) = peripheral.properties().await? else {
            continue;
        };
        let advertises_service = properties.services.contains(&HEADBAND_SERVICE_UUID);
        let named = properties.local_name.as_deref().is_some_and(|n| n.starts_with(NAME_PREFIX));
        if advertises_service || named {
            found.push(peripheral);
        }
    }
    Ok(found)
}

async fn forward(
    mut notifications: std::pin::Pin<Box<dyn tokio_stream::Stream<Item = btleplug::api::ValueNotification> + Send>>,
    tx: mpsc::Sender<LinkEvent>,
    origin: Instant,
) {
    let mut decoder = MuseDecoder::new();
    while let Some(notification) = notifications.next().await {
        let Some(characteristic) = Characteristic::from_uuid(notification.uuid.as_u128()) else {
            continue;
        };
        let Some(stream) = characteristic.stream() else {
            continue;
        };
        let host_time = origin.elapsed().as_secs_f64();
        let events = match decoder.decode(characteristic, &notification.value, host_time) {
            Ok(samples) => samples.into_iter().map(LinkEvent::Sample).collect(),
            Err(err) => vec![LinkEvent::ReadError { stream, reason: err.to_string() }],
        };
        for event in events {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    }
    let _ = tx.send(LinkEvent::Closed { reason: "notification stream ended".into() }).await;
}
