//! Deterministic HTC and catalog doubles for engine tests.
//!
//! [`MockHtc`] holds every sent packet until the test completes it, so pending
//! counts and buffer ownership can be observed between steps. [`MockCatalog`]
//! accepts everything unless told otherwise and counts the views it hands out.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use transport::{
    BufPool, EndpointCallbacks, EndpointId, Htc, HtcPacket, HtcTag, SendError,
    ServiceConnection, ServiceId, TransportError, TransportResult,
};
use wmi::{Catalog, CatalogError, WmiHeader, WMI_HDR_LEN};

/// Default negotiated message length for mock endpoints.
pub const MOCK_MAX_MSG_LEN: usize = 2048;

struct Binding {
    service: ServiceId,
    endpoint: EndpointId,
    callbacks: Arc<dyn EndpointCallbacks>,
}

/// A command observed by [`MockHtc::send`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentCommand {
    pub endpoint: EndpointId,
    pub id: u32,
    pub tag: HtcTag,
    pub payload: Vec<u8>,
}

/// In-memory transport that never completes on its own.
pub struct MockHtc {
    max_msg_len: usize,
    wmi_endpoints: usize,
    bindings: Mutex<Vec<Binding>>,
    in_flight: Mutex<Vec<HtcPacket>>,
    sent: Mutex<Vec<SentCommand>>,
    fail_sends: AtomicBool,
    credits: AtomicI32,
    flushed: AtomicUsize,
    rx_pool: BufPool,
}

impl MockHtc {
    pub fn new() -> Arc<Self> {
        Self::with_max_msg_len(MOCK_MAX_MSG_LEN)
    }

    pub fn with_max_msg_len(max_msg_len: usize) -> Arc<Self> {
        Arc::new(Self {
            max_msg_len,
            wmi_endpoints: wmi::MAX_RADIOS,
            bindings: Mutex::new(Vec::new()),
            in_flight: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
            credits: AtomicI32::new(16),
            flushed: AtomicUsize::new(0),
            rx_pool: BufPool::new(max_msg_len),
        })
    }

    /// Makes every following `send` fail with a full queue until reset.
    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_credits(&self, credits: i32) {
        self.credits.store(credits, Ordering::SeqCst);
    }

    /// Endpoint bound to `service`, if connected.
    pub fn endpoint_for(&self, service: ServiceId) -> Option<EndpointId> {
        self.bindings
            .lock()
            .iter()
            .find(|binding| binding.service == service)
            .map(|binding| binding.endpoint)
    }

    pub fn sent(&self) -> Vec<SentCommand> {
        self.sent.lock().clone()
    }

    pub fn sent_ids(&self) -> Vec<u32> {
        self.sent.lock().iter().map(|cmd| cmd.id).collect()
    }

    /// Packets accepted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn flush_count(&self) -> usize {
        self.flushed.load(Ordering::SeqCst)
    }

    /// Completes every held packet, in send order, on the calling thread.
    pub fn complete_all(&self) -> usize {
        let packets: Vec<HtcPacket> = std::mem::take(&mut *self.in_flight.lock());
        let count = packets.len();
        for packet in packets {
            self.complete(packet);
        }
        count
    }

    /// Completes only the most recently sent packet.
    pub fn complete_last(&self) -> bool {
        let packet = self.in_flight.lock().pop();
        match packet {
            Some(packet) => {
                self.complete(packet);
                true
            }
            None => false,
        }
    }

    fn complete(&self, packet: HtcPacket) {
        match self.callbacks_for(packet.endpoint) {
            Some(callbacks) => callbacks.tx_complete(packet),
            None => drop(packet),
        }
    }

    /// Delivers a raw frame on `endpoint` as if it came from the target.
    pub fn deliver(&self, endpoint: EndpointId, frame: &[u8]) -> TransportResult<()> {
        let callbacks = self
            .callbacks_for(endpoint)
            .ok_or(TransportError::NotConnected {
                endpoint: endpoint.0,
            })?;
        let buf = self.rx_pool.alloc_frame(frame)?;
        callbacks.rx(endpoint, buf);
        Ok(())
    }

    /// Delivers event `id` with `payload` behind a WMI header.
    pub fn deliver_event(&self, endpoint: EndpointId, id: u32, payload: &[u8]) -> TransportResult<()> {
        self.deliver(endpoint, &event_frame(id, payload))
    }

    /// Inbound buffers not yet freed by the engine.
    pub fn rx_outstanding(&self) -> usize {
        self.rx_pool.outstanding()
    }

    fn callbacks_for(&self, endpoint: EndpointId) -> Option<Arc<dyn EndpointCallbacks>> {
        self.bindings
            .lock()
            .iter()
            .find(|binding| binding.endpoint == endpoint)
            .map(|binding| Arc::clone(&binding.callbacks))
    }
}

impl Htc for MockHtc {
    fn connect_service(
        &self,
        service: ServiceId,
        callbacks: Arc<dyn EndpointCallbacks>,
    ) -> TransportResult<ServiceConnection> {
        let mut bindings = self.bindings.lock();
        if let Some(binding) = bindings.iter_mut().find(|b| b.service == service) {
            binding.callbacks = callbacks;
            return Ok(ServiceConnection {
                endpoint: binding.endpoint,
                max_msg_len: self.max_msg_len,
            });
        }
        let endpoint = EndpointId(bindings.len() as u8 + 2);
        bindings.push(Binding {
            service,
            endpoint,
            callbacks,
        });
        Ok(ServiceConnection {
            endpoint,
            max_msg_len: self.max_msg_len,
        })
    }

    fn wmi_endpoint_count(&self) -> usize {
        self.wmi_endpoints
    }

    fn send(&self, packet: HtcPacket) -> Result<(), SendError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SendError {
                error: TransportError::QueueFull {
                    endpoint: packet.endpoint.0,
                },
                packet,
            });
        }
        let frame = packet.buf.data();
        let id = WmiHeader::decode(frame).map_or(0, |hdr| hdr.id);
        self.sent.lock().push(SentCommand {
            endpoint: packet.endpoint,
            id,
            tag: packet.tag,
            payload: frame.get(WMI_HDR_LEN..).unwrap_or_default().to_vec(),
        });
        self.in_flight.lock().push(packet);
        Ok(())
    }

    fn host_credits(&self, _endpoint: EndpointId) -> i32 {
        self.credits.load(Ordering::SeqCst)
    }

    fn dump_diagnostics(&self, endpoint: EndpointId) -> String {
        format!(
            "mock {endpoint}: {} in flight, {} credits",
            self.in_flight(),
            self.credits.load(Ordering::SeqCst)
        )
    }

    fn flush_endpoint(&self, endpoint: EndpointId) {
        self.in_flight
            .lock()
            .retain(|packet| packet.endpoint != endpoint);
        self.flushed.fetch_add(1, Ordering::SeqCst);
    }
}

/// WMI header followed by `payload`.
pub fn event_frame(id: u32, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; WMI_HDR_LEN + payload.len()];
    WmiHeader::new(id).encode(&mut frame);
    frame[WMI_HDR_LEN..].copy_from_slice(payload);
    frame
}

/// View produced by [`MockCatalog`]: a copy of the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockView {
    pub id: u32,
    pub payload: Vec<u8>,
}

/// Catalog that maps every logical id below `0x1000` to the same wire id.
#[derive(Default)]
pub struct MockCatalog {
    rejected_events: Mutex<HashSet<u32>>,
    rejected_commands: Mutex<HashSet<u32>>,
    mgmt_ids: Mutex<HashSet<u32>>,
    tx_tag: Mutex<HtcTag>,
    views_created: AtomicUsize,
    views_freed: AtomicUsize,
}

impl MockCatalog {
    pub const EVENT_ID_LIMIT: u32 = 0x1000;

    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reject_event(&self, id: u32) {
        self.rejected_events.lock().insert(id);
    }

    pub fn reject_command(&self, id: u32) {
        self.rejected_commands.lock().insert(id);
    }

    pub fn mark_management(&self, id: u32) {
        self.mgmt_ids.lock().insert(id);
    }

    pub fn set_tx_tag(&self, tag: HtcTag) {
        *self.tx_tag.lock() = tag;
    }

    pub fn views_created(&self) -> usize {
        self.views_created.load(Ordering::SeqCst)
    }

    pub fn views_freed(&self) -> usize {
        self.views_freed.load(Ordering::SeqCst)
    }

    /// Views handed out and not yet returned.
    pub fn live_views(&self) -> usize {
        self.views_created() - self.views_freed()
    }
}

impl Catalog for MockCatalog {
    type View = MockView;

    fn check_command(&self, id: u32, _payload: &[u8]) -> Result<(), CatalogError> {
        if self.rejected_commands.lock().contains(&id) {
            return Err(CatalogError::new(id, "rejected by mock"));
        }
        Ok(())
    }

    fn validate_and_pad(&self, id: u32, payload: &[u8]) -> Result<MockView, CatalogError> {
        if self.rejected_events.lock().contains(&id) {
            return Err(CatalogError::new(id, "rejected by mock"));
        }
        self.views_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockView {
            id,
            payload: payload.to_vec(),
        })
    }

    fn free_view(&self, _id: u32, view: MockView) {
        self.views_freed.fetch_add(1, Ordering::SeqCst);
        drop(view);
    }

    fn id_to_name(&self, _id: u32) -> &'static str {
        "MOCK"
    }

    fn is_management(&self, id: u32) -> bool {
        self.mgmt_ids.lock().contains(&id)
    }

    fn htc_tx_tag(&self, _id: u32) -> HtcTag {
        *self.tx_tag.lock()
    }

    fn event_table(&self) -> Vec<(u32, u32)> {
        (0..Self::EVENT_ID_LIMIT).map(|id| (id, id)).collect()
    }
}
