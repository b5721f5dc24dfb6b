//! Four-electrode headband packet codec
//!
//! The headband publishes each electrode, each optical channel and each
//! motion sensor on its own GATT characteristic. Every notification is 20
//! bytes: a big-endian `u16` packet index followed by an 18-byte payload.
//!
//! | Characteristic | Payload | Rate |
//! |----------------|---------|------|
//! | TP9/AF7/AF8/TP10 | 12 × 12-bit unsigned | 256 Hz |
//! | Accelerometer, gyroscope | 3 × (x, y, z) `i16` | 52 Hz |
//! | PPG ambient/IR/red | 6 × 24-bit unsigned | 64 Hz |
//!
//! Samples of one packet index from all electrodes (or all optical
//! channels) are merged into multi-channel frames by [`PacketAssembler`].
//! Frame timestamps come from the packet index, anchored to the host time
//! of the first packet, so BLE jitter does not reach the signal.

use std::collections::VecDeque;

use thiserror::Error;

use cortexstream_core::types::{
    EegChannel, EegSample, MotionSample, PpgSample, RawSample, StreamKind, Vec3, MAX_PPG_CHANNELS,
};

/// EEG µV per LSB
pub const EEG_SCALE_UV: f64 = 0.488_281_25;
/// Accelerometer g per LSB
pub const ACCEL_SCALE_G: f64 = 0.000_061_035_2;
/// Gyroscope °/s per LSB
pub const GYRO_SCALE_DPS: f64 = 0.007_476_8;

/// EEG samples per notification
pub const EEG_SAMPLES_PER_PACKET: usize = 12;
/// Motion samples per notification
pub const IMU_SAMPLES_PER_PACKET: usize = 3;
/// PPG samples per notification
pub const PPG_SAMPLES_PER_PACKET: usize = 6;

const PACKET_LEN: usize = 20;
/// Incomplete packet indices kept while waiting for the remaining channels
const MAX_PENDING: usize = 4;

/// Packet decode failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Notification shorter than a full packet
    #[error("{characteristic:?} packet has {got} bytes, need 20")]
    TooShort {
        /// Source characteristic
        characteristic: Characteristic,
        /// Bytes received
        got: usize,
    },

    /// Notification on a characteristic that carries no samples
    #[error("{0:?} does not carry samples")]
    NotASampleStream(Characteristic),
}

// ============================================================================
// Characteristics
// ============================================================================

/// GATT characteristics of the headband service
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Characteristic {
    /// Command channel (write) and status replies (notify)
    Control,
    /// EEG electrode
    Eeg(EegChannel),
    /// Gyroscope
    Gyro,
    /// Accelerometer
    Accel,
    /// Optical channel 0 (ambient), 1 (infrared) or 2 (red)
    Ppg(u8),
}

/// Base of the vendor characteristic UUIDs; the short id fills bits 96..112
const VENDOR_UUID_BASE: u128 = 0x273e_0000_4c4d_454d_96be_f03b_ac82_1358;

/// Primary service short id
pub const SERVICE_SHORT_ID: u16 = 0xfe8d;

impl Characteristic {
    /// Every characteristic that is subscribed for notifications
    pub const NOTIFYING: [Self; 10] = [
        Self::Control,
        Self::Eeg(EegChannel::Tp9),
        Self::Eeg(EegChannel::Af7),
        Self::Eeg(EegChannel::Af8),
        Self::Eeg(EegChannel::Tp10),
        Self::Gyro,
        Self::Accel,
        Self::Ppg(0),
        Self::Ppg(1),
        Self::Ppg(2),
    ];

    /// 16-bit id inside the vendor UUID
    #[must_use]
    pub const fn short_id(self) -> u16 {
        match self {
            Self::Control => 0x0001,
            Self::Eeg(EegChannel::Tp9) => 0x0003,
            Self::Eeg(EegChannel::Af7) => 0x0004,
            Self::Eeg(EegChannel::Af8) => 0x0005,
            Self::Eeg(EegChannel::Tp10) => 0x0006,
            Self::Gyro => 0x0009,
            Self::Accel => 0x000a,
            Self::Ppg(0) => 0x000f,
            Self::Ppg(1) => 0x0010,
            Self::Ppg(_) => 0x0011,
        }
    }

    /// Full 128-bit UUID
    #[allow(clippy::cast_lossless)]
    #[must_use]
    pub const fn uuid(self) -> u128 {
        VENDOR_UUID_BASE | ((self.short_id() as u128) << 96)
    }

    /// Look up a characteristic by its 128-bit UUID
    #[must_use]
    pub fn from_uuid(uuid: u128) -> Option<Self> {
        Self::NOTIFYING.into_iter().find(|c| c.uuid() == uuid)
    }

    /// Stream group carried by this characteristic
    #[must_use]
    pub const fn stream(self) -> Option<StreamKind> {
        match self {
            Self::Control => None,
            Self::Eeg(_) => Some(StreamKind::Eeg),
            Self::Gyro => Some(StreamKind::Gyro),
            Self::Accel => Some(StreamKind::Accel),
            Self::Ppg(_) => Some(StreamKind::Ppg),
        }
    }
}

/// Short-id service UUID expanded over the Bluetooth base UUID
#[allow(clippy::cast_lossless)]
#[must_use]
pub const fn service_uuid() -> u128 {
    0x0000_0000_0000_1000_8000_0080_5f9b_34fb | ((SERVICE_SHORT_ID as u128) << 96)
}

// ============================================================================
// Commands
// ============================================================================

/// Control-channel commands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Stop streaming
    Halt,
    /// Select a channel preset (21 = EEG + motion + PPG)
    Preset(u8),
    /// Start or resume streaming
    Resume,
    /// Keep the link alive
    KeepAlive,
}

impl Command {
    /// Wire encoding: length byte, ASCII command, newline
    #[must_use]
    pub fn encode(self) -> Vec<u8> {
        let text = match self {
            Self::Halt => "h".to_string(),
            Self::Preset(p) => format!("p{p}"),
            Self::Resume => "d".to_string(),
            Self::KeepAlive => "k".to_string(),
        };
        let mut bytes = Vec::with_capacity(text.len() + 2);
        #[allow(clippy::cast_possible_truncation)]
        bytes.push(text.len() as u8 + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

// ============================================================================
// Packet decoding
// ============================================================================

fn split(characteristic: Characteristic, data: &[u8]) -> Result<(u16, &[u8]), CodecError> {
    if data.len() < PACKET_LEN {
        return Err(CodecError::TooShort { characteristic, got: data.len() });
    }
    Ok((u16::from_be_bytes([data[0], data[1]]), &data[2..PACKET_LEN]))
}

/// Unpack twelve 12-bit samples and scale to µV
#[must_use]
pub fn unpack_eeg(payload: &[u8]) -> [f64; EEG_SAMPLES_PER_PACKET] {
    let mut out = [0.0; EEG_SAMPLES_PER_PACKET];
    for (pair, chunk) in payload.chunks_exact(3).take(EEG_SAMPLES_PER_PACKET / 2).enumerate() {
        let hi = u16::from(chunk[0]) << 4 | u16::from(chunk[1]) >> 4;
        let lo = (u16::from(chunk[1]) & 0x0f) << 8 | u16::from(chunk[2]);
        out[2 * pair] = EEG_SCALE_UV * (f64::from(hi) - 2048.0);
        out[2 * pair + 1] = EEG_SCALE_UV * (f64::from(lo) - 2048.0);
    }
    out
}

/// Unpack three big-endian `i16` (x, y, z) triples and scale
#[must_use]
pub fn unpack_imu(payload: &[u8], scale: f64) -> [Vec3; IMU_SAMPLES_PER_PACKET] {
    let mut out = [Vec3::default(); IMU_SAMPLES_PER_PACKET];
    for (sample, chunk) in out.iter_mut().zip(payload.chunks_exact(6)) {
        let axis = |i: usize| scale * f64::from(i16::from_be_bytes([chunk[2 * i], chunk[2 * i + 1]]));
        *sample = Vec3::new(axis(0), axis(1), axis(2));
    }
    out
}

/// Unpack six big-endian 24-bit optical samples (raw ADC counts)
#[must_use]
pub fn unpack_ppg(payload: &[u8]) -> [f64; PPG_SAMPLES_PER_PACKET] {
    let mut out = [0.0; PPG_SAMPLES_PER_PACKET];
    for (value, chunk) in out.iter_mut().zip(payload.chunks_exact(3)) {
        *value = f64::from(u32::from_be_bytes([0, chunk[0], chunk[1], chunk[2]]));
    }
    out
}

// ============================================================================
// Assembly
// ============================================================================

/// Maps a wrapping `u16` packet index to a monotonic timestamp
#[derive(Clone, Debug)]
struct IndexClock {
    rate: f64,
    samples_per_packet: usize,
    anchor: Option<(f64, u64)>,
    last: u16,
    wraps: u64,
}

impl IndexClock {
    fn new(rate: f64, samples_per_packet: usize) -> Self {
        Self { rate, samples_per_packet, anchor: None, last: 0, wraps: 0 }
    }

    /// Timestamp of the first sample of packet `index`
    fn packet_time(&mut self, index: u16, host_time: f64) -> f64 {
        if self.anchor.is_some() && index < self.last && self.last - index > u16::MAX / 2 {
            self.wraps += 1;
        }
        self.last = index;
        let unwrapped = self.wraps * 65_536 + u64::from(index);
        let (t0, first) = *self.anchor.get_or_insert((host_time, unwrapped));
        #[allow(clippy::cast_precision_loss)]
        let offset = (unwrapped as f64 - first as f64) * self.samples_per_packet as f64 / self.rate;
        t0 + offset
    }
}

#[derive(Clone, Debug)]
struct PendingPacket {
    index: u16,
    channels: Vec<Option<Vec<f64>>>,
}

/// Merges per-channel notifications sharing a packet index into frames
#[derive(Clone, Debug)]
pub struct PacketAssembler {
    channels: usize,
    clock: IndexClock,
    pending: VecDeque<PendingPacket>,
    dropped: u64,
}

impl PacketAssembler {
    /// Assembler for `channels` characteristics at `rate` Hz
    #[must_use]
    pub fn new(channels: usize, rate: f64, samples_per_packet: usize) -> Self {
        Self {
            channels,
            clock: IndexClock::new(rate, samples_per_packet),
            pending: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Packets discarded because a channel never arrived
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Add one channel's samples; returns `(timestamp, values)` frames once
    /// every channel of the packet has arrived
    pub fn push(&mut self, channel: usize, index: u16, samples: &[f64], host_time: f64) -> Vec<(f64, Vec<f64>)> {
        if channel >= self.channels {
            return Vec::new();
        }
        let slot = match self.pending.iter().position(|p| p.index == index) {
            Some(slot) => slot,
            None => {
                if self.pending.len() == MAX_PENDING {
                    self.pending.pop_front();
                    self.dropped += 1;
                }
                self.pending.push_back(PendingPacket { index, channels: vec![None; self.channels] });
                self.pending.len() - 1
            }
        };
        self.pending[slot].channels[channel] = Some(samples.to_vec());
        if self.pending[slot].channels.iter().any(Option::is_none) {
            return Vec::new();
        }

        let Some(packet) = self.pending.remove(slot) else {
            return Vec::new();
        };
        let t0 = self.clock.packet_time(index, host_time);
        let columns: Vec<Vec<f64>> = packet.channels.into_iter().flatten().collect();
        let len = columns.iter().map(Vec::len).min().unwrap_or(0);
        (0..len)
            .map(|i| {
                #[allow(clippy::cast_precision_loss)]
                let t = t0 + i as f64 / self.clock.rate;
                (t, columns.iter().map(|c| c[i]).collect())
            })
            .collect()
    }
}

/// Turns raw notifications into [`RawSample`]s
#[derive(Clone, Debug)]
pub struct MuseDecoder {
    eeg: PacketAssembler,
    ppg: PacketAssembler,
    accel: PacketAssembler,
    gyro: PacketAssembler,
}

impl Default for MuseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl MuseDecoder {
    /// Decoder at the nominal stream rates
    #[must_use]
    pub fn new() -> Self {
        Self {
            eeg: PacketAssembler::new(EegChannel::COUNT, StreamKind::Eeg.nominal_rate_hz(), EEG_SAMPLES_PER_PACKET),
            ppg: PacketAssembler::new(MAX_PPG_CHANNELS, StreamKind::Ppg.nominal_rate_hz(), PPG_SAMPLES_PER_PACKET),
            accel: PacketAssembler::new(1, StreamKind::Accel.nominal_rate_hz(), IMU_SAMPLES_PER_PACKET),
            gyro: PacketAssembler::new(1, StreamKind::Gyro.nominal_rate_hz(), IMU_SAMPLES_PER_PACKET),
        }
    }

    /// Decode one notification received at `host_time` seconds
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] for short packets or non-sample characteristics.
    pub fn decode(
        &mut self,
        characteristic: Characteristic,
        data: &[u8],
        host_time: f64,
    ) -> Result<Vec<RawSample>, CodecError> {
        let (index, payload) = split(characteristic, data)?;
        let samples = match characteristic {
            Characteristic::Control => return Err(CodecError::NotASampleStream(characteristic)),
            Characteristic::Eeg(ch) => self
                .eeg
                .push(ch.index(), index, &unpack_eeg(payload), host_time)
                .into_iter()
                .filter_map(|(t, v)| {
                    let channels: [f64; EegChannel::COUNT] = v.try_into().ok()?;
                    Some(RawSample::Eeg(EegSample::new(t, channels)))
                })
                .collect(),
            Characteristic::Ppg(ch) => self
                .ppg
                .push(usize::from(ch), index, &unpack_ppg(payload), host_time)
                .into_iter()
                .filter_map(|(t, v)| PpgSample::new(t, &v).ok().map(RawSample::Ppg))
                .collect(),
            Characteristic::Accel | Characteristic::Gyro => {
                let (assembler, scale) = if characteristic == Characteristic::Accel {
                    (&mut self.accel, ACCEL_SCALE_G)
                } else {
                    (&mut self.gyro, GYRO_SCALE_DPS)
                };
                let vectors = unpack_imu(payload, scale);
                let flat: Vec<f64> = vectors.iter().map(|v| v.x).collect();
                assembler
                    .push(0, index, &flat, host_time)
                    .into_iter()
                    .zip(vectors)
                    .map(|((t, _), v)| {
                        let sample = MotionSample::new(t, v);
                        if characteristic == Characteristic::Accel {
                            RawSample::Accel(sample)
                        } else {
                            RawSample::Gyro(sample)
                        }
                    })
                    .collect()
            }
        };
        Ok(samples)
    }

    /// Packets lost to incomplete channel sets
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.eeg.dropped() + self.ppg.dropped()
    }
}
