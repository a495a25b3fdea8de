// Process-wide store of the latest sample of each telemetry kind
//
// One slot per sample kind. The listener replaces whole samples; readers
// clone whole samples out. A reader can never observe fields from two
// different packets mixed in one sample.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::messages::{AliveSample, EncoderSample, ImuSample, RangeSample, TelemetryMessage};

/// A sample plus its local arrival instant.
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub sample: T,
    pub received: Instant,
}

impl<T> Stamped<T> {
    fn new(sample: T) -> Self {
        Self {
            sample,
            received: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.received.elapsed()
    }
}

#[derive(Default)]
struct Slots {
    encoders: RwLock<Option<Stamped<EncoderSample>>>,
    imu: RwLock<Option<Stamped<ImuSample>>>,
    range: RwLock<Option<Stamped<RangeSample>>>,
    alive: RwLock<Option<Stamped<AliveSample>>>,
    /// Latest-known device address; the newest heartbeat wins.
    peer: RwLock<Option<SocketAddr>>,
    dropped: AtomicU64,
}

/// Shared handle to the telemetry slots. Cheap to clone; the listener
/// holds one as the sole writer, supervisors and visualizers read.
#[derive(Clone, Default)]
pub struct TelemetryState {
    slots: Arc<Slots>,
}

/// Point-in-time copy of every slot, safe to hand to external consumers.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub encoders: Option<EncoderSample>,
    pub imu: Option<ImuSample>,
    pub range: Option<RangeSample>,
    pub alive: Option<AliveSample>,
    pub peer: Option<SocketAddr>,
    pub dropped_packets: u64,
}

impl TelemetryState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the slot for this sample kind.
    pub fn record(&self, msg: TelemetryMessage) {
        match msg {
            TelemetryMessage::Encoders(s) => {
                if let Ok(mut slot) = self.slots.encoders.write() {
                    *slot = Some(Stamped::new(s));
                }
            }
            TelemetryMessage::Imu(s) => {
                if let Ok(mut slot) = self.slots.imu.write() {
                    *slot = Some(Stamped::new(s));
                }
            }
            TelemetryMessage::Tfluna(s) => {
                if let Ok(mut slot) = self.slots.range.write() {
                    *slot = Some(Stamped::new(s));
                }
            }
            TelemetryMessage::Alive(s) => {
                if let Ok(mut slot) = self.slots.alive.write() {
                    *slot = Some(Stamped::new(s));
                }
            }
        }
    }

    pub fn encoders(&self) -> Option<Stamped<EncoderSample>> {
        self.slots.encoders.read().ok()?.clone()
    }

    pub fn imu(&self) -> Option<Stamped<ImuSample>> {
        self.slots.imu.read().ok()?.clone()
    }

    pub fn range(&self) -> Option<Stamped<RangeSample>> {
        self.slots.range.read().ok()?.clone()
    }

    pub fn alive(&self) -> Option<Stamped<AliveSample>> {
        self.slots.alive.read().ok()?.clone()
    }

    /// Age of the newest encoder sample, if any has arrived.
    pub fn encoder_age(&self) -> Option<Duration> {
        self.encoders().map(|s| s.age())
    }

    /// Record the device address learned from a heartbeat. Returns true
    /// if the address changed. The newest heartbeat always wins.
    pub fn learn_peer(&self, addr: SocketAddr) -> bool {
        if let Ok(mut slot) = self.slots.peer.write() {
            let changed = *slot != Some(addr);
            *slot = Some(addr);
            changed
        } else {
            false
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        *self.slots.peer.read().ok()?
    }

    pub fn note_dropped(&self) {
        self.slots.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_packets(&self) -> u64 {
        self.slots.dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            encoders: self.encoders().map(|s| s.sample),
            imu: self.imu().map(|s| s.sample),
            range: self.range().map(|s| s.sample),
            alive: self.alive().map(|s| s.sample),
            peer: self.peer(),
            dropped_packets: self.dropped_packets(),
        }
    }
}
