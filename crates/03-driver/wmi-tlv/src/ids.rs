//! Command and event ids, fixed-parameter tags and logical event ids.
//!
//! Ids are grouped: the upper bits select a group and the low 12 bits count
//! from 1 within it.

const fn grp_start(grp: u32) -> u32 {
    (grp << 12) | 1
}

const GRP_SCAN: u32 = 0x3;
const GRP_PDEV: u32 = 0x4;
const GRP_VDEV: u32 = 0x5;
const GRP_MGMT: u32 = 0x7;
const GRP_SUSPEND: u32 = 0x11;
const GRP_WOW: u32 = 0x13;

pub mod cmd {
    use super::*;

    pub const INIT: u32 = 0x1;
    pub const START_SCAN: u32 = grp_start(GRP_SCAN);
    pub const STOP_SCAN: u32 = START_SCAN + 1;
    pub const PDEV_SET_PARAM: u32 = grp_start(GRP_PDEV) + 2;
    pub const VDEV_CREATE: u32 = grp_start(GRP_VDEV);
    pub const VDEV_DELETE: u32 = VDEV_CREATE + 1;
    pub const MGMT_TX_SEND: u32 = grp_start(GRP_MGMT);
    pub const PDEV_SUSPEND: u32 = grp_start(GRP_SUSPEND);
    pub const PDEV_RESUME: u32 = PDEV_SUSPEND + 1;
    pub const WOW_ENABLE: u32 = grp_start(GRP_WOW) + 3;
    pub const WOW_HOSTWAKEUP_FROM_SLEEP: u32 = WOW_ENABLE + 1;
}

pub mod evt {
    use super::*;

    pub const SERVICE_READY: u32 = 0x1;
    pub const READY: u32 = 0x2;
    pub const SCAN: u32 = grp_start(GRP_SCAN);
    pub const PDEV_TPC_CONFIG: u32 = grp_start(GRP_PDEV);
    pub const VDEV_START_RESP: u32 = grp_start(GRP_VDEV);
    pub const MGMT_RX: u32 = grp_start(GRP_MGMT);
    pub const MGMT_TX_COMPLETION: u32 = MGMT_RX + 1;
    pub const WOW_WAKEUP_HOST: u32 = grp_start(GRP_WOW);
}

/// Host-side event names that do not depend on the firmware's numbering.
pub mod logical {
    pub const SERVICE_READY: u32 = 0;
    pub const READY: u32 = 1;
    pub const SCAN: u32 = 2;
    pub const PDEV_TPC_CONFIG: u32 = 3;
    pub const VDEV_START_RESP: u32 = 4;
    pub const MGMT_RX: u32 = 5;
    pub const MGMT_TX_COMPLETION: u32 = 6;
    pub const WOW_WAKEUP_HOST: u32 = 7;
    /// Known to the host but not supported by this firmware.
    pub const ROAM: u32 = 8;
}

/// Commands accepted while the target is suspended.
pub const RESUME_CMD_IDS: [u32; 2] = [cmd::WOW_HOSTWAKEUP_FROM_SLEEP, cmd::PDEV_RESUME];

/// Layout of one message: its fixed parameter TLV and host-side size.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsgDef {
    pub id: u32,
    pub name: &'static str,
    pub fixed_tag: u16,
    /// Size of the host's fixed parameter struct, in bytes.
    pub fixed_len: usize,
    pub mgmt: bool,
}

const fn def(id: u32, name: &'static str, fixed_tag: u16, fixed_len: usize) -> MsgDef {
    MsgDef {
        id,
        name,
        fixed_tag,
        fixed_len,
        mgmt: false,
    }
}

const fn mgmt(id: u32, name: &'static str, fixed_tag: u16, fixed_len: usize) -> MsgDef {
    MsgDef {
        id,
        name,
        fixed_tag,
        fixed_len,
        mgmt: true,
    }
}

pub const COMMANDS: &[MsgDef] = &[
    def(cmd::INIT, "WMI_INIT_CMDID", 0x01, 12),
    def(cmd::START_SCAN, "WMI_START_SCAN_CMDID", 0x02, 24),
    def(cmd::STOP_SCAN, "WMI_STOP_SCAN_CMDID", 0x03, 16),
    def(cmd::PDEV_SET_PARAM, "WMI_PDEV_SET_PARAM_CMDID", 0x04, 12),
    def(cmd::VDEV_CREATE, "WMI_VDEV_CREATE_CMDID", 0x05, 16),
    def(cmd::VDEV_DELETE, "WMI_VDEV_DELETE_CMDID", 0x06, 4),
    mgmt(cmd::MGMT_TX_SEND, "WMI_MGMT_TX_SEND_CMDID", 0x07, 16),
    def(cmd::PDEV_SUSPEND, "WMI_PDEV_SUSPEND_CMDID", 0x08, 4),
    def(cmd::PDEV_RESUME, "WMI_PDEV_RESUME_CMDID", 0x09, 4),
    def(cmd::WOW_ENABLE, "WMI_WOW_ENABLE_CMDID", 0x0A, 8),
    def(
        cmd::WOW_HOSTWAKEUP_FROM_SLEEP,
        "WMI_WOW_HOSTWAKEUP_FROM_SLEEP_CMDID",
        0x0B,
        4,
    ),
];

pub const EVENTS: &[MsgDef] = &[
    def(evt::SERVICE_READY, "WMI_SERVICE_READY_EVENTID", 0x101, 16),
    def(evt::READY, "WMI_READY_EVENTID", 0x102, 12),
    def(evt::SCAN, "WMI_SCAN_EVENTID", 0x103, 16),
    def(evt::PDEV_TPC_CONFIG, "WMI_PDEV_TPC_CONFIG_EVENTID", 0x104, 8),
    def(evt::VDEV_START_RESP, "WMI_VDEV_START_RESP_EVENTID", 0x105, 12),
    mgmt(evt::MGMT_RX, "WMI_MGMT_RX_EVENTID", 0x106, 20),
    mgmt(evt::MGMT_TX_COMPLETION, "WMI_MGMT_TX_COMPLETION_EVENTID", 0x107, 8),
    def(evt::WOW_WAKEUP_HOST, "WMI_WOW_WAKEUP_HOST_EVENTID", 0x108, 8),
];

/// Logical event id to wire event id. `logical::ROAM` is left unmapped.
pub const EVENT_TABLE: &[(u32, u32)] = &[
    (logical::SERVICE_READY, evt::SERVICE_READY),
    (logical::READY, evt::READY),
    (logical::SCAN, evt::SCAN),
    (logical::PDEV_TPC_CONFIG, evt::PDEV_TPC_CONFIG),
    (logical::VDEV_START_RESP, evt::VDEV_START_RESP),
    (logical::MGMT_RX, evt::MGMT_RX),
    (logical::MGMT_TX_COMPLETION, evt::MGMT_TX_COMPLETION),
    (logical::WOW_WAKEUP_HOST, evt::WOW_WAKEUP_HOST),
];

pub fn command(id: u32) -> Option<&'static MsgDef> {
    COMMANDS.iter().find(|def| def.id == id)
}

pub fn event(id: u32) -> Option<&'static MsgDef> {
    EVENTS.iter().find(|def| def.id == id)
}

/// Looks a command up by its `WMI_*_CMDID` name, case-insensitively, with or
/// without the `WMI_` prefix and `_CMDID` suffix.
pub fn command_by_name(name: &str) -> Option<&'static MsgDef> {
    let wanted = name.to_ascii_uppercase();
    let wanted = wanted.trim_start_matches("WMI_").trim_end_matches("_CMDID");
    COMMANDS.iter().find(|def| {
        def.name
            .trim_start_matches("WMI_")
            .trim_end_matches("_CMDID")
            == wanted
    })
}
