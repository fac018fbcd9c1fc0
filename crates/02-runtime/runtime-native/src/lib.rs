#![deny(missing_docs)]
//! Native loopback transport shared by integration tests and demos.
//!
//! [`LoopbackHtc`] runs a single "target" thread. Sent packets travel over a
//! bounded channel to that thread, which completes them and optionally feeds
//! them to a [`Responder`] that answers with events. Injected events take the
//! same path, so completions and receives always arrive on the target thread,
//! never on the caller's.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use transport::{
    BufPool, EndpointCallbacks, EndpointId, Htc, HtcPacket, SendError, ServiceConnection,
    ServiceId, TransportError, TransportResult,
};
use wmi::{WmiHeader, WMI_HDR_LEN};

/// Answers a command with zero or more `(event id, payload)` pairs.
pub type Responder = Box<dyn Fn(EndpointId, u32, &[u8]) -> Vec<(u32, Vec<u8>)> + Send>;

/// Sizing of the loopback link.
#[derive(Clone, Copy, Debug)]
pub struct LoopbackConfig {
    /// Negotiated maximum message length reported on connect.
    pub max_msg_len: usize,
    /// Control endpoints the link can serve.
    pub wmi_endpoints: usize,
    /// Host credits each endpoint starts with.
    pub credits: i32,
    /// Messages the target thread may have queued before sends are refused.
    pub queue_depth: usize,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            max_msg_len: 2048,
            wmi_endpoints: wmi::MAX_RADIOS,
            credits: 32,
            queue_depth: 256,
        }
    }
}

enum Msg {
    Tx(HtcPacket),
    Rx(EndpointId, Vec<u8>),
    Barrier(Sender<()>),
}

struct Binding {
    service: ServiceId,
    endpoint: EndpointId,
    callbacks: Arc<dyn EndpointCallbacks>,
    credits: i32,
}

struct Inner {
    config: LoopbackConfig,
    bindings: Mutex<Vec<Binding>>,
    responder: Mutex<Option<Responder>>,
    rx_pool: BufPool,
    sent: AtomicU64,
    completed: AtomicU64,
}

impl Inner {
    fn callbacks_for(&self, endpoint: EndpointId) -> Option<Arc<dyn EndpointCallbacks>> {
        self.bindings
            .lock()
            .iter()
            .find(|binding| binding.endpoint == endpoint)
            .map(|binding| Arc::clone(&binding.callbacks))
    }

    fn adjust_credits(&self, endpoint: EndpointId, delta: i32) {
        if let Some(binding) = self
            .bindings
            .lock()
            .iter_mut()
            .find(|binding| binding.endpoint == endpoint)
        {
            binding.credits += delta;
        }
    }

    fn deliver(&self, endpoint: EndpointId, frame: &[u8]) {
        let Some(callbacks) = self.callbacks_for(endpoint) else {
            warn!("loopback: no service bound to {endpoint}");
            return;
        };
        match self.rx_pool.alloc_frame(frame) {
            Ok(buf) => callbacks.rx(endpoint, buf),
            Err(err) => warn!("loopback: dropping inbound frame: {err}"),
        }
    }

    fn complete(&self, packet: HtcPacket) {
        let endpoint = packet.endpoint;
        let frame = packet.buf.data();
        let id = WmiHeader::decode(frame).map_or(0, |hdr| hdr.id);
        let replies = self
            .responder
            .lock()
            .as_ref()
            .map(|respond| respond(endpoint, id, frame.get(WMI_HDR_LEN..).unwrap_or_default()))
            .unwrap_or_default();

        self.adjust_credits(endpoint, 1);
        self.completed.fetch_add(1, Ordering::Relaxed);
        match self.callbacks_for(endpoint) {
            Some(callbacks) => callbacks.tx_complete(packet),
            None => drop(packet),
        }

        for (event_id, payload) in replies {
            let mut frame = vec![0u8; WMI_HDR_LEN + payload.len()];
            WmiHeader::new(event_id).encode(&mut frame);
            frame[WMI_HDR_LEN..].copy_from_slice(&payload);
            self.deliver(endpoint, &frame);
        }
    }

    fn run(&self, rx: Receiver<Msg>) {
        for msg in rx {
            match msg {
                Msg::Tx(packet) => self.complete(packet),
                Msg::Rx(endpoint, frame) => self.deliver(endpoint, &frame),
                Msg::Barrier(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("loopback target thread exiting");
    }
}

/// Threaded loopback implementation of [`Htc`].
pub struct LoopbackHtc {
    inner: Arc<Inner>,
    tx: Mutex<Option<Sender<Msg>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    target_thread: ThreadId,
}

impl LoopbackHtc {
    /// Starts a loopback link with default sizing.
    pub fn new() -> std::io::Result<Arc<Self>> {
        Self::with_config(LoopbackConfig::default())
    }

    /// Starts a loopback link.
    pub fn with_config(config: LoopbackConfig) -> std::io::Result<Arc<Self>> {
        let inner = Arc::new(Inner {
            config,
            bindings: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
            rx_pool: BufPool::new(config.max_msg_len),
            sent: AtomicU64::new(0),
            completed: AtomicU64::new(0),
        });
        let (tx, rx) = bounded(config.queue_depth);
        let worker = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("htc-loopback".into())
            .spawn(move || worker.run(rx))?;
        Ok(Arc::new(Self {
            inner,
            tx: Mutex::new(Some(tx)),
            target_thread: handle.thread().id(),
            thread: Mutex::new(Some(handle)),
        }))
    }

    /// Installs the function that answers commands with events.
    pub fn set_responder(&self, responder: Responder) {
        *self.inner.responder.lock() = Some(responder);
    }

    /// Id of the thread that runs completions and receives.
    pub fn target_thread(&self) -> ThreadId {
        self.target_thread
    }

    /// Endpoint bound to `service`, if connected.
    pub fn endpoint_for(&self, service: ServiceId) -> Option<EndpointId> {
        self.inner
            .bindings
            .lock()
            .iter()
            .find(|binding| binding.service == service)
            .map(|binding| binding.endpoint)
    }

    /// Queues event `id` for delivery on `endpoint` from the target thread.
    pub fn inject_event(&self, endpoint: EndpointId, id: u32, payload: &[u8]) -> TransportResult<()> {
        let mut frame = vec![0u8; WMI_HDR_LEN + payload.len()];
        WmiHeader::new(id).encode(&mut frame);
        frame[WMI_HDR_LEN..].copy_from_slice(payload);
        self.inject_frame(endpoint, frame)
    }

    /// Queues a raw frame for delivery on `endpoint`.
    pub fn inject_frame(&self, endpoint: EndpointId, frame: Vec<u8>) -> TransportResult<()> {
        let guard = self.tx.lock();
        let tx = guard.as_ref().ok_or(TransportError::Closed)?;
        tx.send(Msg::Rx(endpoint, frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Blocks until everything queued so far has been processed.
    ///
    /// Returns immediately when called from the target thread.
    pub fn sync(&self) {
        if thread::current().id() == self.target_thread {
            return;
        }
        let (done_tx, done_rx) = bounded(1);
        let queued = {
            let guard = self.tx.lock();
            guard
                .as_ref()
                .is_some_and(|tx| tx.send(Msg::Barrier(done_tx)).is_ok())
        };
        if queued {
            let _ = done_rx.recv();
        }
    }

    /// Commands accepted and commands completed so far.
    pub fn counts(&self) -> (u64, u64) {
        (
            self.inner.sent.load(Ordering::Relaxed),
            self.inner.completed.load(Ordering::Relaxed),
        )
    }

    /// Inbound buffers not yet freed by the receiver.
    pub fn rx_outstanding(&self) -> usize {
        self.inner.rx_pool.outstanding()
    }

    /// Stops the target thread after it drains its queue.
    pub fn shutdown(&self) {
        drop(self.tx.lock().take());
        let Some(handle) = self.thread.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!("loopback target thread panicked");
        }
    }
}

impl Drop for LoopbackHtc {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Htc for LoopbackHtc {
    fn connect_service(
        &self,
        service: ServiceId,
        callbacks: Arc<dyn EndpointCallbacks>,
    ) -> TransportResult<ServiceConnection> {
        let mut bindings = self.inner.bindings.lock();
        let endpoint = match bindings.iter_mut().find(|b| b.service == service) {
            Some(binding) => {
                binding.callbacks = callbacks;
                binding.endpoint
            }
            None => {
                if bindings.len() >= self.inner.config.wmi_endpoints {
                    return Err(TransportError::ServiceUnavailable { service: service.0 });
                }
                let endpoint = EndpointId(bindings.len() as u8 + 1);
                bindings.push(Binding {
                    service,
                    endpoint,
                    callbacks,
                    credits: self.inner.config.credits,
                });
                endpoint
            }
        };
        Ok(ServiceConnection {
            endpoint,
            max_msg_len: self.inner.config.max_msg_len,
        })
    }

    fn wmi_endpoint_count(&self) -> usize {
        self.inner.config.wmi_endpoints
    }

    fn send(&self, packet: HtcPacket) -> Result<(), SendError> {
        let endpoint = packet.endpoint;
        let guard = self.tx.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(SendError {
                error: TransportError::Closed,
                packet,
            });
        };
        match tx.try_send(Msg::Tx(packet)) {
            Ok(()) => {
                self.inner.adjust_credits(endpoint, -1);
                self.inner.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(Msg::Tx(packet))) => Err(SendError {
                error: TransportError::QueueFull {
                    endpoint: endpoint.0,
                },
                packet,
            }),
            Err(TrySendError::Disconnected(Msg::Tx(packet))) => Err(SendError {
                error: TransportError::Closed,
                packet,
            }),
            Err(_) => unreachable!("only tx messages are sent here"),
        }
    }

    fn host_credits(&self, endpoint: EndpointId) -> i32 {
        self.inner
            .bindings
            .lock()
            .iter()
            .find(|binding| binding.endpoint == endpoint)
            .map_or(0, |binding| binding.credits)
    }

    fn dump_diagnostics(&self, endpoint: EndpointId) -> String {
        let (sent, completed) = self.counts();
        let queued = self.tx.lock().as_ref().map_or(0, |tx| tx.len());
        format!(
            "loopback {endpoint}: credits {}, queued {queued}, sent {sent}, completed {completed}",
            self.host_credits(endpoint)
        )
    }

    fn flush_endpoint(&self, endpoint: EndpointId) {
        debug!("loopback: flushing {endpoint}");
        self.sync();
    }
}
