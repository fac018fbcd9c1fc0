//! Payload catalog capability.
//!
//! The engine never interprets command or event payloads. A [`Catalog`] checks
//! outbound payloads, turns inbound payloads into typed views and names ids for
//! diagnostics.

use thiserror::Error;

use transport::HtcTag;

/// A payload the catalog refused.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason} (id {id:#x})")]
pub struct CatalogError {
    pub id: u32,
    pub reason: String,
}

impl CatalogError {
    pub fn new(id: u32, reason: impl Into<String>) -> Self {
        Self {
            id,
            reason: reason.into(),
        }
    }
}

pub trait Catalog: Send + Sync + 'static {
    /// Typed, padded view of an inbound payload.
    type View: Send + 'static;

    /// Structural check of an outbound command payload (header not included).
    fn check_command(&self, id: u32, payload: &[u8]) -> Result<(), CatalogError>;

    /// Validates an inbound event payload (header stripped) and builds its view.
    fn validate_and_pad(&self, id: u32, payload: &[u8]) -> Result<Self::View, CatalogError>;

    /// Releases a view produced by [`Catalog::validate_and_pad`].
    fn free_view(&self, _id: u32, view: Self::View) {
        drop(view);
    }

    fn id_to_name(&self, _id: u32) -> &'static str {
        "UNKNOWN"
    }

    /// Management traffic is logged to the management rings.
    fn is_management(&self, _id: u32) -> bool {
        false
    }

    /// Transmit tag used for `id` while a runtime-PM transition is in progress.
    fn htc_tx_tag(&self, _id: u32) -> HtcTag {
        HtcTag::NONE
    }

    /// Logical event id to wire event id pairs known to this catalog.
    fn event_table(&self) -> Vec<(u32, u32)>;
}
