//! WMI command/event dispatch engine.
//!
//! The engine sits between a driver stack and a framed, credit flow-controlled
//! transport ([`transport::Htc`]). Outbound, a [`WmiHandle`] admits commands
//! (stop, suspend and pending-ceiling gates), asks the [`Catalog`] to check
//! them, prepends the wire header and hands them to the transport. Inbound,
//! frames are validated by the catalog, logged, looked up in the shared
//! [`Registry`] and routed to the handler's [`RxContext`].
//!
//! Every handle keeps its own [`WmiLog`] rings for diagnostics.

mod catalog;
mod config;
mod context;
mod error;
mod handle;
mod header;
mod log;
mod registry;
mod soc;
mod worker;

pub use catalog::{Catalog, CatalogError};
pub use config::{LogConfig, WmiConfig, MAX_RADIOS};
pub use context::{DefaultContext, EventHandler, InlineContext, RxContext, WmiEvent};
pub use error::{WmiError, WmiResult};
pub use handle::{HandleStatsSnapshot, WmiHandle};
pub use header::{WmiHeader, WMI_HDR_LEN, WMI_ID_MASK};
pub use log::{LogClass, LogRecord, LogSizes, WmiLog};
pub use registry::Registry;
pub use soc::{WmiSoc, WmiSocBuilder};
