//! Core transport primitives shared by the WMI engine and its HTC backends.
//!
//! * [`MsgBuf`] / [`BufPool`] – wire buffers with reserved head-room, bounded by
//!   the negotiated maximum message length.
//! * [`Htc`] / [`EndpointCallbacks`] – the framed transport capability the
//!   engine consumes.
//! * [`TransportError`] – lightweight error surface for sizing/enqueue failures.

mod buf;
mod error;
mod htc;

pub use buf::{BufPool, MsgBuf, PoolStats, BUF_ALIGNMENT, HEAD_ROOM};
pub use error::{TransportError, TransportResult};
pub use htc::{
    EndpointCallbacks, EndpointId, Htc, HtcPacket, HtcTag, SendError, ServiceConnection,
    ServiceId,
};
