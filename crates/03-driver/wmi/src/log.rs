//! Per-handle diagnostic ring buffers.
//!
//! Each traffic class owns a fixed-capacity circular array allocated when the
//! handle is created. Recording copies a short payload snapshot into a
//! preallocated slot, so writes never allocate. A full ring overwrites its
//! oldest entry.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::LogConfig;

/// Traffic class recorded by a ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogClass {
    /// Commands handed to the transport.
    Command,
    /// Command transmit completions.
    CommandTxComplete,
    /// Events delivered to a handler.
    Event,
    /// Events received from the transport, before routing.
    RxEvent,
    MgmtCommand,
    MgmtCommandTxComplete,
    MgmtEvent,
}

impl LogClass {
    pub const ALL: [LogClass; 7] = [
        LogClass::Command,
        LogClass::CommandTxComplete,
        LogClass::Event,
        LogClass::RxEvent,
        LogClass::MgmtCommand,
        LogClass::MgmtCommandTxComplete,
        LogClass::MgmtEvent,
    ];

    pub fn is_management(self) -> bool {
        matches!(
            self,
            LogClass::MgmtCommand | LogClass::MgmtCommandTxComplete | LogClass::MgmtEvent
        )
    }

    pub fn is_event(self) -> bool {
        matches!(self, LogClass::Event | LogClass::RxEvent | LogClass::MgmtEvent)
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// One entry copied out of a ring.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    /// Microseconds since the log was created.
    pub timestamp_us: u64,
    pub id: u32,
    pub data: Vec<u8>,
}

/// Configured ring capacities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LogSizes {
    pub max_entries: usize,
    pub mgmt_max_entries: usize,
}

struct Slot {
    at: Duration,
    id: u32,
    data: Box<[u8]>,
}

struct Ring {
    slots: Box<[Slot]>,
    tail: usize,
    length: usize,
}

impl Ring {
    fn new(capacity: usize, record_len: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                at: Duration::ZERO,
                id: 0,
                data: vec![0u8; record_len].into_boxed_slice(),
            })
            .collect();
        Self {
            slots,
            tail: 0,
            length: 0,
        }
    }

    fn push(&mut self, at: Duration, id: u32, snapshot: &[u8]) {
        let capacity = self.slots.len();
        let slot = &mut self.slots[self.tail];
        slot.at = at;
        slot.id = id;
        let n = snapshot.len().min(slot.data.len());
        slot.data[..n].copy_from_slice(&snapshot[..n]);
        slot.data[n..].fill(0);
        self.tail = (self.tail + 1) % capacity;
        if self.length < capacity {
            self.length += 1;
        }
    }

    /// Newest `max` entries, oldest first.
    fn newest(&self, max: usize) -> impl Iterator<Item = &Slot> {
        let capacity = self.slots.len();
        let count = max.min(self.length).min(capacity);
        let start = (capacity + self.tail - count) % capacity;
        (0..count).map(move |i| &self.slots[(start + i) % capacity])
    }

    fn clear(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.at = Duration::ZERO;
            slot.id = 0;
            slot.data.fill(0);
        }
        self.tail = 0;
        self.length = 0;
    }
}

pub struct WmiLog {
    rings: [Mutex<Ring>; 7],
    enabled: AtomicBool,
    epoch: Instant,
    sizes: LogSizes,
    display_size: usize,
    cmd_offset: usize,
    event_offset: usize,
}

impl WmiLog {
    pub fn new(config: &LogConfig) -> Self {
        let ring_for = |class: LogClass| {
            let capacity = if class.is_management() {
                config.mgmt_max_entries
            } else {
                config.max_entries
            };
            Mutex::new(Ring::new(capacity.max(1), config.record_len))
        };
        Self {
            rings: LogClass::ALL.map(ring_for),
            enabled: AtomicBool::new(config.enabled),
            epoch: Instant::now(),
            sizes: LogSizes {
                max_entries: config.max_entries,
                mgmt_max_entries: config.mgmt_max_entries,
            },
            display_size: config.display_size,
            cmd_offset: config.cmd_snapshot_offset,
            event_offset: config.event_snapshot_offset,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn sizes(&self) -> LogSizes {
        self.sizes
    }

    pub fn display_size(&self) -> usize {
        self.display_size
    }

    /// Appends an entry for `id`. `frame` is the wire message, header included;
    /// the snapshot starts at the class's configured offset.
    pub fn record(&self, class: LogClass, id: u32, frame: &[u8]) {
        if !self.is_enabled() {
            return;
        }
        let offset = if class.is_event() {
            self.event_offset
        } else {
            self.cmd_offset
        };
        let snapshot = frame.get(offset..).unwrap_or(&[]);
        let at = self.epoch.elapsed();
        self.rings[class.index()].lock().push(at, id, snapshot);
    }

    /// Number of live entries in a ring.
    pub fn len(&self, class: LogClass) -> usize {
        self.rings[class.index()].lock().length
    }

    pub fn capacity(&self, class: LogClass) -> usize {
        self.rings[class.index()].lock().slots.len()
    }

    /// Newest `max` entries of a ring, oldest first.
    pub fn read(&self, class: LogClass, max: usize) -> Vec<LogRecord> {
        let ring = self.rings[class.index()].lock();
        ring.newest(max)
            .map(|slot| LogRecord {
                timestamp_us: slot.at.as_micros() as u64,
                id: slot.id,
                data: slot.data.to_vec(),
            })
            .collect()
    }

    /// Text rendering of the newest `max` entries: a header line, then one
    /// line per entry with its timestamp, id and snapshot words.
    pub fn render(&self, class: LogClass, max: usize) -> String {
        let records = self.read(class, max);
        let mut out = String::new();
        let id_column = if class.is_event() {
            "Event Id             "
        } else {
            "Cmd Id              "
        };
        let _ = writeln!(out, "Time (seconds)      {id_column}Payload");
        for record in &records {
            let secs = record.timestamp_us / 1_000_000;
            let micros = record.timestamp_us % 1_000_000;
            let _ = write!(
                out,
                "{secs:>8}.{micros:06}    {id:>6} (0x{id:06x})    ",
                id = record.id
            );
            for word in record.data.chunks(4) {
                let mut bytes = [0u8; 4];
                bytes[..word.len()].copy_from_slice(word);
                let _ = write!(out, "0x{:08x} ", u32::from_le_bytes(bytes));
            }
            out.push('\n');
        }
        out
    }

    pub fn clear(&self, class: LogClass) {
        self.rings[class.index()].lock().clear();
    }
}
