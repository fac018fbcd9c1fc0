//! Debugfs-style view over the diagnostic logs of every attached radio.
//!
//! Each radio gets a directory `wmi<N>/` holding one file per log ring plus
//! `wmi_enable` and `log_size`. Showing a log prints its newest entries;
//! writing `0` to a log clears it.

use std::fmt::Write as _;

use serde::Serialize;
use thiserror::Error;
use wmi::{Catalog, LogClass, WmiHandle, WmiResult, WmiSoc};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DebugFsError {
    #[error("no such file: {0}")]
    NoSuchFile(String),
    #[error("invalid value {value:?} for {file}")]
    InvalidValue { file: String, value: String },
    #[error("{0} is read-only")]
    ReadOnly(String),
    #[error("failed to encode line: {0}")]
    Encode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WmiFile {
    Log(LogClass),
    Enable,
    LogSize,
}

impl WmiFile {
    pub const ALL: [WmiFile; 9] = [
        WmiFile::Log(LogClass::Command),
        WmiFile::Log(LogClass::CommandTxComplete),
        WmiFile::Log(LogClass::Event),
        WmiFile::Log(LogClass::RxEvent),
        WmiFile::Log(LogClass::MgmtCommand),
        WmiFile::Log(LogClass::MgmtCommandTxComplete),
        WmiFile::Log(LogClass::MgmtEvent),
        WmiFile::Enable,
        WmiFile::LogSize,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WmiFile::Log(LogClass::Command) => "command_log",
            WmiFile::Log(LogClass::CommandTxComplete) => "command_tx_cmp_log",
            WmiFile::Log(LogClass::Event) => "event_log",
            WmiFile::Log(LogClass::RxEvent) => "rx_event_log",
            WmiFile::Log(LogClass::MgmtCommand) => "mgmt_command_log",
            WmiFile::Log(LogClass::MgmtCommandTxComplete) => "mgmt_command_tx_cmp_log",
            WmiFile::Log(LogClass::MgmtEvent) => "mgmt_event_log",
            WmiFile::Enable => "wmi_enable",
            WmiFile::LogSize => "log_size",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|file| file.name() == name)
    }
}

#[derive(Serialize)]
struct RecordLine<'a> {
    radio: usize,
    file: &'static str,
    timestamp_us: u64,
    id: u32,
    name: &'a str,
    data: String,
}

#[derive(Serialize)]
struct EnableLine {
    radio: usize,
    enabled: bool,
}

#[derive(Serialize)]
struct SizeLine {
    radio: usize,
    max_entries: usize,
    mgmt_max_entries: usize,
}

pub struct DebugFs<'a, C: Catalog> {
    soc: &'a WmiSoc<C>,
    handles: Vec<WmiHandle<C>>,
}

impl<'a, C: Catalog> DebugFs<'a, C> {
    pub fn new(soc: &'a WmiSoc<C>) -> WmiResult<Self> {
        let handles = (0..soc.radio_count())
            .map(|radio| soc.handle(radio))
            .collect::<WmiResult<Vec<_>>>()?;
        Ok(Self { soc, handles })
    }

    /// Every file path, radio by radio.
    pub fn paths(&self) -> Vec<String> {
        (0..self.handles.len())
            .flat_map(|radio| {
                WmiFile::ALL
                    .into_iter()
                    .map(move |file| format!("wmi{radio}/{}", file.name()))
            })
            .collect()
    }

    fn resolve(&self, path: &str) -> Result<(&WmiHandle<C>, WmiFile), DebugFsError> {
        let missing = || DebugFsError::NoSuchFile(path.to_string());
        let (dir, name) = path.trim_matches('/').split_once('/').ok_or_else(missing)?;
        let radio: usize = dir
            .strip_prefix("wmi")
            .and_then(|n| n.parse().ok())
            .ok_or_else(missing)?;
        let handle = self.handles.get(radio).ok_or_else(missing)?;
        let file = WmiFile::from_name(name).ok_or_else(missing)?;
        Ok((handle, file))
    }

    pub fn show(&self, path: &str) -> Result<String, DebugFsError> {
        let (handle, file) = self.resolve(path)?;
        let log = handle.log();
        Ok(match file {
            WmiFile::Log(class) => log.render(class, log.display_size()),
            WmiFile::Enable => format!("{}\n", u8::from(log.is_enabled())),
            WmiFile::LogSize => {
                let sizes = log.sizes();
                let mut out = String::new();
                let _ = writeln!(out, "WMI command/event log max size:{}", sizes.max_entries);
                let _ = writeln!(
                    out,
                    "WMI management command/events log max size:{}",
                    sizes.mgmt_max_entries
                );
                out
            }
        })
    }

    /// Same content as [`DebugFs::show`], one JSON object per line.
    pub fn show_ndjson(&self, path: &str) -> Result<String, DebugFsError> {
        let (handle, file) = self.resolve(path)?;
        let radio = handle.radio();
        let log = handle.log();
        let mut out = String::new();
        match file {
            WmiFile::Log(class) => {
                let catalog = self.soc.catalog();
                for record in log.read(class, log.display_size()) {
                    push_line(
                        &mut out,
                        &RecordLine {
                            radio,
                            file: file.name(),
                            timestamp_us: record.timestamp_us,
                            id: record.id,
                            name: catalog.id_to_name(record.id),
                            data: hex(&record.data),
                        },
                    )?;
                }
            }
            WmiFile::Enable => push_line(
                &mut out,
                &EnableLine {
                    radio,
                    enabled: log.is_enabled(),
                },
            )?,
            WmiFile::LogSize => {
                let sizes = log.sizes();
                push_line(
                    &mut out,
                    &SizeLine {
                        radio,
                        max_entries: sizes.max_entries,
                        mgmt_max_entries: sizes.mgmt_max_entries,
                    },
                )?;
            }
        }
        Ok(out)
    }

    pub fn write(&self, path: &str, value: &str) -> Result<(), DebugFsError> {
        let (handle, file) = self.resolve(path)?;
        let value = value.trim();
        let invalid = || DebugFsError::InvalidValue {
            file: path.to_string(),
            value: value.to_string(),
        };
        match file {
            WmiFile::Log(class) => {
                if value != "0" {
                    return Err(invalid());
                }
                handle.log().clear(class);
            }
            WmiFile::Enable => match value {
                "0" => handle.log().set_enabled(false),
                "1" => handle.log().set_enabled(true),
                _ => return Err(invalid()),
            },
            WmiFile::LogSize => return Err(DebugFsError::ReadOnly(path.to_string())),
        }
        Ok(())
    }
}

fn push_line<T: Serialize>(out: &mut String, line: &T) -> Result<(), DebugFsError> {
    let line = serde_json::to_string(line).map_err(|err| DebugFsError::Encode(err.to_string()))?;
    out.push_str(&line);
    out.push('\n');
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
