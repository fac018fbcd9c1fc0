//! Host-target communication (HTC) capability surface.
//!
//! The WMI engine never talks to a bus directly. It connects a service to
//! obtain an endpoint, sends [`HtcPacket`]s on that endpoint and is called back
//! through [`EndpointCallbacks`] when a packet finishes transmitting or when a
//! frame arrives. Implementations live elsewhere (a loopback harness, test
//! doubles, a real bus driver).

use std::fmt;
use std::sync::Arc;

use crate::{MsgBuf, TransportError, TransportResult};

/// Transport endpoint identifier assigned by `connect_service`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u8);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep{}", self.0)
    }
}

/// Service identifier requested at connect time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(pub u16);

impl ServiceId {
    /// Control service for the first radio.
    pub const WMI_CONTROL: ServiceId = ServiceId(0x0100);
    /// Control service for the second radio.
    pub const WMI_CONTROL_MAC1: ServiceId = ServiceId(0x0101);
    /// Control service for the third radio.
    pub const WMI_CONTROL_MAC2: ServiceId = ServiceId(0x0102);

    /// Control service used by radio `index`, if the index is supported.
    pub fn wmi_control(index: usize) -> Option<ServiceId> {
        match index {
            0 => Some(Self::WMI_CONTROL),
            1 => Some(Self::WMI_CONTROL_MAC1),
            2 => Some(Self::WMI_CONTROL_MAC2),
            _ => None,
        }
    }
}

/// Opaque transmit tag forwarded to the transport with a packet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct HtcTag(pub u16);

impl HtcTag {
    pub const NONE: HtcTag = HtcTag(0);
}

/// A message in flight between the engine and the transport.
#[derive(Debug)]
pub struct HtcPacket {
    pub endpoint: EndpointId,
    pub tag: HtcTag,
    pub buf: MsgBuf,
}

/// Result of a successful service connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceConnection {
    pub endpoint: EndpointId,
    pub max_msg_len: usize,
}

/// Enqueue refusal. The packet comes back so the caller still owns the buffer.
#[derive(Debug)]
pub struct SendError {
    pub error: TransportError,
    pub packet: HtcPacket,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "send on {} failed: {}", self.packet.endpoint, self.error)
    }
}

impl std::error::Error for SendError {}

/// Callbacks the transport invokes on its own completion/receive context.
pub trait EndpointCallbacks: Send + Sync {
    /// Transmission finished; ownership of the packet returns to the sender.
    fn tx_complete(&self, packet: HtcPacket);
    /// A frame arrived on `endpoint`; ownership passes to the receiver.
    fn rx(&self, endpoint: EndpointId, buf: MsgBuf);
}

/// Framed, credit flow-controlled link to the target.
pub trait Htc: Send + Sync {
    /// Binds `callbacks` to the service and returns its endpoint.
    fn connect_service(
        &self,
        service: ServiceId,
        callbacks: Arc<dyn EndpointCallbacks>,
    ) -> TransportResult<ServiceConnection>;

    /// Number of WMI control endpoints this transport can serve.
    fn wmi_endpoint_count(&self) -> usize;

    /// Queues a packet. On success the transport owns it until `tx_complete`.
    fn send(&self, packet: HtcPacket) -> Result<(), SendError>;

    /// Host-side transmit credits currently available on `endpoint`.
    fn host_credits(&self, endpoint: EndpointId) -> i32;

    /// Free-form credit/queue diagnostics for `endpoint`.
    fn dump_diagnostics(&self, endpoint: EndpointId) -> String;

    /// Drops anything the transport still holds for `endpoint`.
    fn flush_endpoint(&self, endpoint: EndpointId);
}
