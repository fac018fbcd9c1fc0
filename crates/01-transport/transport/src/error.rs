//! Error handling helpers for the transport crate.
//!
//! The transport layer keeps its error surface small: buffer sizing failures,
//! endpoint connection failures and enqueue refusals. The WMI layer translates
//! these into its own error kinds.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by message buffers and HTC implementations.
pub enum TransportError {
    /// Requested buffer (payload plus head-room, rounded) exceeds the negotiated maximum.
    NoResource { requested: usize, max: usize },
    /// A length or head adjustment does not fit inside the buffer.
    InvalidLength { len: usize, capacity: usize },
    /// The transport has no service registered under this id.
    ServiceUnavailable { service: u16 },
    /// The endpoint is unknown or has been torn down.
    NotConnected { endpoint: u8 },
    /// The endpoint's transmit queue cannot take another packet.
    QueueFull { endpoint: u8 },
    /// The transport has been shut down.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NoResource { requested, max } => {
                write!(
                    f,
                    "message of {requested} bytes exceeds maximum message length {max}"
                )
            }
            TransportError::InvalidLength { len, capacity } => {
                write!(f, "length {len} does not fit buffer capacity {capacity}")
            }
            TransportError::ServiceUnavailable { service } => {
                write!(f, "service {service:#06x} is not available")
            }
            TransportError::NotConnected { endpoint } => {
                write!(f, "endpoint {endpoint} is not connected")
            }
            TransportError::QueueFull { endpoint } => {
                write!(f, "transmit queue for endpoint {endpoint} is full")
            }
            TransportError::Closed => write!(f, "transport closed"),
        }
    }
}

impl std::error::Error for TransportError {}
