//! Engine tunables.

use std::time::Duration;

use serde::Serialize;
use smallvec::SmallVec;

use crate::error::{WmiError, WmiResult};

/// Most radios (control endpoints) a single soc can bind.
pub const MAX_RADIOS: usize = 3;

/// Diagnostic ring sizing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    /// Start with logging enabled.
    pub enabled: bool,
    /// Capacity of each generic command/event ring.
    pub max_entries: usize,
    /// Capacity of each management ring.
    pub mgmt_max_entries: usize,
    /// Bytes of payload snapshot kept per entry. Must be a multiple of 4.
    pub record_len: usize,
    /// Entries shown when a ring is rendered without an explicit limit.
    pub display_size: usize,
    /// Offset into the wire frame at which command snapshots start.
    pub cmd_snapshot_offset: usize,
    /// Offset into the wire frame at which event snapshots start.
    pub event_snapshot_offset: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1024,
            mgmt_max_entries: 256,
            record_len: 16,
            display_size: 100,
            cmd_snapshot_offset: 4,
            event_snapshot_offset: 4,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WmiConfig {
    /// Commands allowed in flight per handle. Reaching it on send is fatal.
    pub max_pending_cmds: u32,
    /// Capacity of the shared event-handler table.
    pub max_event_handlers: usize,
    pub log: LogConfig,
    /// Commands still accepted while the target is suspended.
    pub resume_cmd_ids: SmallVec<[u32; 4]>,
    /// Deferred handlers running longer than this are reported.
    pub worker_watchdog: Duration,
}

impl Default for WmiConfig {
    fn default() -> Self {
        Self {
            max_pending_cmds: 1024,
            max_event_handlers: 256,
            log: LogConfig::default(),
            resume_cmd_ids: SmallVec::new(),
            worker_watchdog: Duration::from_secs(30),
        }
    }
}

impl WmiConfig {
    pub fn with_resume_cmds(mut self, ids: impl IntoIterator<Item = u32>) -> Self {
        self.resume_cmd_ids.extend(ids);
        self
    }

    pub fn is_resume_cmd(&self, id: u32) -> bool {
        self.resume_cmd_ids.contains(&id)
    }

    pub fn validate(&self) -> WmiResult<()> {
        if self.max_pending_cmds == 0 {
            return Err(WmiError::InvalidConfig("max_pending_cmds must be non-zero"));
        }
        if self.max_event_handlers == 0 {
            return Err(WmiError::InvalidConfig("max_event_handlers must be non-zero"));
        }
        let log = &self.log;
        if log.max_entries == 0 || log.mgmt_max_entries == 0 {
            return Err(WmiError::InvalidConfig("log capacities must be non-zero"));
        }
        if log.record_len == 0 || log.record_len % 4 != 0 {
            return Err(WmiError::InvalidConfig(
                "log record_len must be a non-zero multiple of 4",
            ));
        }
        if log.display_size == 0 {
            return Err(WmiError::InvalidConfig("log display_size must be non-zero"));
        }
        Ok(())
    }
}
