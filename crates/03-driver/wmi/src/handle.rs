//! Per-radio transport handle: admission control, the command send path,
//! transmit completion and inbound event dispatch.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use transport::{
    BufPool, EndpointId, Htc, HtcPacket, HtcTag, MsgBuf, PoolStats, SendError,
    ServiceConnection, TransportError,
};

use crate::catalog::Catalog;
use crate::config::WmiConfig;
use crate::context::{DefaultContext, EventHandler, RxContext, WmiEvent};
use crate::error::{WmiError, WmiResult};
use crate::header::{WmiHeader, WMI_HDR_LEN};
use crate::log::{LogClass, WmiLog};
use crate::registry::Registry;
use crate::worker::{DeferredEvent, Worker};

/// Pieces every handle of a soc shares.
pub(crate) struct SocParts<C: Catalog> {
    pub htc: Arc<dyn Htc>,
    pub catalog: Arc<C>,
    pub registry: Arc<Registry<C::View>>,
    pub default_ctx: Arc<dyn DefaultContext<C::View>>,
    pub config: Arc<WmiConfig>,
}

impl<C: Catalog> Clone for SocParts<C> {
    fn clone(&self) -> Self {
        Self {
            htc: Arc::clone(&self.htc),
            catalog: Arc::clone(&self.catalog),
            registry: Arc::clone(&self.registry),
            default_ctx: Arc::clone(&self.default_ctx),
            config: Arc::clone(&self.config),
        }
    }
}

#[derive(Default)]
struct HandleStats {
    cmds_sent: AtomicU64,
    cmds_completed: AtomicU64,
    send_failures: AtomicU64,
    rx_rejected: AtomicU64,
    rx_unhandled: AtomicU64,
    dispatched_immediate: AtomicU64,
    dispatched_deferred: AtomicU64,
    dispatched_default: AtomicU64,
    queued: AtomicU64,
    queue_dropped: AtomicU64,
    watchdog_overruns: AtomicU64,
}

impl HandleStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dispatch(&self, ctx: RxContext) {
        match ctx {
            RxContext::Immediate => Self::bump(&self.dispatched_immediate),
            RxContext::Deferred => Self::bump(&self.dispatched_deferred),
            RxContext::Default => Self::bump(&self.dispatched_default),
        }
    }

    fn snapshot(&self) -> HandleStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HandleStatsSnapshot {
            cmds_sent: load(&self.cmds_sent),
            cmds_completed: load(&self.cmds_completed),
            send_failures: load(&self.send_failures),
            rx_rejected: load(&self.rx_rejected),
            rx_unhandled: load(&self.rx_unhandled),
            dispatched_immediate: load(&self.dispatched_immediate),
            dispatched_deferred: load(&self.dispatched_deferred),
            dispatched_default: load(&self.dispatched_default),
            queued: load(&self.queued),
            queue_dropped: load(&self.queue_dropped),
            watchdog_overruns: load(&self.watchdog_overruns),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HandleStatsSnapshot {
    pub cmds_sent: u64,
    pub cmds_completed: u64,
    pub send_failures: u64,
    /// Inbound frames dropped by header or catalog validation.
    pub rx_rejected: u64,
    /// Inbound events with no registered handler.
    pub rx_unhandled: u64,
    pub dispatched_immediate: u64,
    pub dispatched_deferred: u64,
    pub dispatched_default: u64,
    pub queued: u64,
    /// Deferred events refused because the worker had stopped.
    pub queue_dropped: u64,
    /// Deferred handlers still running when the worker watchdog expired.
    pub watchdog_overruns: u64,
}

struct HandleShared<C: Catalog> {
    radio: usize,
    endpoint: EndpointId,
    pool: BufPool,
    parts: SocParts<C>,
    log: WmiLog,
    pending: AtomicU32,
    suspended: AtomicBool,
    stopping: AtomicBool,
    runtime_pm: AtomicBool,
    detached: AtomicBool,
    stats: HandleStats,
    worker: Worker,
}

/// Transport handle bound to one radio's control endpoint.
pub struct WmiHandle<C: Catalog> {
    shared: Arc<HandleShared<C>>,
}

impl<C: Catalog> Clone for WmiHandle<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Non-owning reference to a handle, used to route transmit completions.
pub(crate) struct WeakHandle<C: Catalog> {
    shared: Weak<HandleShared<C>>,
}

impl<C: Catalog> Default for WeakHandle<C> {
    fn default() -> Self {
        Self { shared: Weak::new() }
    }
}

impl<C: Catalog> WeakHandle<C> {
    pub fn upgrade(&self) -> Option<WmiHandle<C>> {
        self.shared.upgrade().map(|shared| WmiHandle { shared })
    }
}

impl<C: Catalog> WmiHandle<C> {
    pub(crate) fn downgrade(&self) -> WeakHandle<C> {
        WeakHandle {
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub(crate) fn create(
        radio: usize,
        connection: ServiceConnection,
        parts: SocParts<C>,
    ) -> WmiResult<Self> {
        let watchdog = parts.config.worker_watchdog;
        let shared = Arc::new(HandleShared {
            radio,
            endpoint: connection.endpoint,
            pool: BufPool::new(connection.max_msg_len),
            log: WmiLog::new(&parts.config.log),
            parts,
            pending: AtomicU32::new(0),
            suspended: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            runtime_pm: AtomicBool::new(false),
            detached: AtomicBool::new(false),
            stats: HandleStats::default(),
            worker: Worker::new(),
        });
        let weak = Arc::downgrade(&shared);
        let overruns = Arc::downgrade(&shared);
        shared.worker.start(
            format!("wmi-rx{radio}"),
            watchdog,
            move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.process_deferred(event);
                }
            },
            move |_, _| {
                if let Some(shared) = overruns.upgrade() {
                    HandleStats::bump(&shared.stats.watchdog_overruns);
                }
            },
        )?;
        info!(
            "wmi handle for radio {radio} bound to {} (max msg len {})",
            connection.endpoint, connection.max_msg_len
        );
        Ok(Self { shared })
    }

    pub fn radio(&self) -> usize {
        self.shared.radio
    }

    pub fn endpoint(&self) -> EndpointId {
        self.shared.endpoint
    }

    pub fn max_msg_len(&self) -> usize {
        self.shared.pool.max_msg_len()
    }

    /// Largest payload a single command may carry.
    pub fn max_payload_len(&self) -> usize {
        self.shared.pool.max_payload_len()
    }

    /// Allocates a zeroed command buffer with `len` payload bytes.
    pub fn alloc(&self, len: usize) -> WmiResult<MsgBuf> {
        self.shared.pool.alloc(len).map_err(WmiError::from_transport)
    }

    pub fn buf_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    /// Sends the first `len` payload bytes of `buf` as command `cmd_id`.
    ///
    /// The buffer is consumed on every path: on error it has already been
    /// freed, on success the transport owns it until completion.
    ///
    /// # Panics
    ///
    /// Panics after dumping transport diagnostics when the handle already has
    /// `max_pending_cmds` commands in flight.
    pub fn send(&self, buf: MsgBuf, len: usize, cmd_id: u32) -> WmiResult<()> {
        let s = &*self.shared;
        let catalog = &s.parts.catalog;
        let config = &s.parts.config;

        if s.detached.load(Ordering::Acquire) {
            return Err(WmiError::Detached);
        }
        if s.stopping.load(Ordering::Acquire) {
            return Err(WmiError::InvalidState);
        }
        let tag = if s.runtime_pm.load(Ordering::Acquire) {
            catalog.htc_tx_tag(cmd_id)
        } else {
            if s.suspended.load(Ordering::Acquire) && !config.is_resume_cmd(cmd_id) {
                error!(
                    "target suspended, refusing {} ({cmd_id:#x})",
                    catalog.id_to_name(cmd_id)
                );
                return Err(WmiError::Busy { id: cmd_id });
            }
            HtcTag::NONE
        };
        let max = config.max_pending_cmds;
        if s
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_err()
        {
            self.pending_overrun(cmd_id);
        }
        let sent = self.send_reserved(buf, len, cmd_id, tag);
        if sent.is_err() {
            s.pending.fetch_sub(1, Ordering::AcqRel);
        }
        sent
    }

    /// Second half of [`WmiHandle::send`], run with a pending slot held.
    fn send_reserved(
        &self,
        mut buf: MsgBuf,
        len: usize,
        cmd_id: u32,
        tag: HtcTag,
    ) -> WmiResult<()> {
        let s = &*self.shared;
        let catalog = &s.parts.catalog;

        buf.set_len(len).map_err(WmiError::from_transport)?;
        if let Err(source) = catalog.check_command(cmd_id, buf.data()) {
            error!(
                "invalid params for {} ({cmd_id:#x}): {source}",
                catalog.id_to_name(cmd_id)
            );
            return Err(WmiError::InvalidParams { id: cmd_id, source });
        }

        let headroom = buf.headroom();
        let hdr = buf.push_head(WMI_HDR_LEN).ok_or(WmiError::Transport(
            TransportError::InvalidLength {
                len: WMI_HDR_LEN,
                capacity: headroom,
            },
        ))?;
        WmiHeader::new(cmd_id).encode(hdr);

        let class = if catalog.is_management(cmd_id) {
            LogClass::MgmtCommand
        } else {
            LogClass::Command
        };
        s.log.record(class, cmd_id, buf.data());
        debug!(
            "send {} ({cmd_id:#x}) on {} tag {}",
            catalog.id_to_name(cmd_id),
            s.endpoint,
            tag.0
        );

        let packet = HtcPacket {
            endpoint: s.endpoint,
            tag,
            buf,
        };
        match s.parts.htc.send(packet) {
            Ok(()) => {
                HandleStats::bump(&s.stats.cmds_sent);
                Ok(())
            }
            Err(SendError { error, packet }) => {
                HandleStats::bump(&s.stats.send_failures);
                error!(
                    "failed to send {} ({cmd_id:#x}): {error}",
                    catalog.id_to_name(cmd_id)
                );
                drop(packet);
                Err(WmiError::Transport(error))
            }
        }
    }

    /// Allocates, fills and sends a command in one step.
    pub fn send_command(&self, cmd_id: u32, payload: &[u8]) -> WmiResult<()> {
        let mut buf = self.alloc(payload.len())?;
        buf.data_mut().copy_from_slice(payload);
        self.send(buf, payload.len(), cmd_id)
    }

    fn pending_overrun(&self, cmd_id: u32) -> ! {
        let s = &*self.shared;
        let max = s.parts.config.max_pending_cmds;
        let credits = s.parts.htc.host_credits(s.endpoint);
        let diagnostics = s.parts.htc.dump_diagnostics(s.endpoint);
        error!(
            "{max} commands pending on {} while sending {cmd_id:#x}; host credits {credits}; {diagnostics}",
            s.endpoint
        );
        panic!("wmi pending command ceiling ({max}) reached on {}", s.endpoint);
    }

    /// Records a management command sent outside [`WmiHandle::send`].
    pub fn record_mgmt_command(&self, cmd_id: u32, frame: &[u8]) {
        self.shared.log.record(LogClass::MgmtCommand, cmd_id, frame);
    }

    pub(crate) fn tx_complete(&self, mut packet: HtcPacket) {
        let s = &*self.shared;
        let id = WmiHeader::decode(packet.buf.data()).map_or(0, |hdr| hdr.id);
        let class = if s.parts.catalog.is_management(id) {
            LogClass::MgmtCommandTxComplete
        } else {
            LogClass::CommandTxComplete
        };
        s.log.record(class, id, packet.buf.data());
        HandleStats::bump(&s.stats.cmds_completed);
        packet.buf.wipe();
        drop(packet);
        if s
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_err()
        {
            error!("tx completion for {id:#x} on {} with nothing pending", s.endpoint);
        }
    }

    /// Dispatches one inbound frame. Runs on the transport's receive context.
    pub fn on_receive(&self, buf: MsgBuf) {
        self.shared.on_receive(buf);
    }

    pub fn register_event_handler<F>(
        &self,
        logical: u32,
        ctx: RxContext,
        handler: F,
    ) -> WmiResult<u32>
    where
        F: Fn(&WmiEvent<'_, C::View>) + Send + Sync + 'static,
    {
        self.shared
            .parts
            .registry
            .register(logical, Arc::new(handler), ctx)
    }

    pub fn unregister_event_handler(&self, logical: u32) -> WmiResult<()> {
        self.shared.parts.registry.unregister(logical)
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.shared.suspended.store(suspended, Ordering::Release);
    }

    pub fn is_suspended(&self) -> bool {
        self.shared.suspended.load(Ordering::Acquire)
    }

    pub fn set_runtime_pm_in_progress(&self, in_progress: bool) {
        self.shared.runtime_pm.store(in_progress, Ordering::Release);
    }

    /// Refuses further sends until the handle is fetched from the soc again.
    pub fn stop(&self) {
        self.shared.stopping.store(true, Ordering::Release);
        info!("wmi handle for radio {} stopping", self.shared.radio);
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::Acquire)
    }

    pub(crate) fn rebind(&self) {
        self.shared.stopping.store(false, Ordering::Release);
    }

    pub(crate) fn mark_detached(&self) {
        self.shared.detached.store(true, Ordering::Release);
    }

    pub fn pending_cmds(&self) -> u32 {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn host_credits(&self) -> i32 {
        self.shared.parts.htc.host_credits(self.shared.endpoint)
    }

    pub fn flush_endpoint(&self) {
        self.shared.parts.htc.flush_endpoint(self.shared.endpoint);
    }

    pub fn log(&self) -> &WmiLog {
        &self.shared.log
    }

    pub fn stats(&self) -> HandleStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Deferred events waiting for the rx worker.
    pub fn deferred_len(&self) -> usize {
        self.shared.worker.len()
    }

    pub fn is_worker_running(&self) -> bool {
        self.shared.worker.is_running()
    }

    /// Frees every queued deferred event and joins the rx worker.
    /// Returns how many events were discarded.
    pub fn remove_work(&self) -> usize {
        let drained = self.shared.worker.shutdown();
        info!(
            "wmi rx worker for radio {} stopped, {drained} queued events freed",
            self.shared.radio
        );
        drained
    }
}

impl<C: Catalog> HandleShared<C> {
    fn on_receive(&self, buf: MsgBuf) {
        let catalog = &self.parts.catalog;
        let Some(header) = WmiHeader::decode(buf.data()) else {
            HandleStats::bump(&self.stats.rx_rejected);
            error!("runt frame of {} bytes on {}", buf.len(), self.endpoint);
            return;
        };
        let id = header.id;
        let frame = buf.data();
        let payload = &frame[WMI_HDR_LEN..];
        let len = payload.len();

        let view = match catalog.validate_and_pad(id, payload) {
            Ok(view) => view,
            Err(err) => {
                HandleStats::bump(&self.stats.rx_rejected);
                error!("failed to validate {} ({id:#x}): {err}", catalog.id_to_name(id));
                return;
            }
        };
        self.log.record(LogClass::RxEvent, id, frame);

        let Some((handler, ctx)) = self.parts.registry.lookup(id) else {
            HandleStats::bump(&self.stats.rx_unhandled);
            debug!("no handler for {} ({id:#x})", catalog.id_to_name(id));
            catalog.free_view(id, view);
            return;
        };

        match ctx {
            RxContext::Immediate | RxContext::Default => {
                self.deliver(id, &view, len, frame, &handler, ctx);
                catalog.free_view(id, view);
            }
            RxContext::Deferred => {
                catalog.free_view(id, view);
                match self.worker.enqueue(DeferredEvent { id, buf }) {
                    Ok(()) => HandleStats::bump(&self.stats.queued),
                    Err(rejected) => {
                        HandleStats::bump(&self.stats.queue_dropped);
                        warn!(
                            "rx worker stopped, dropping {} ({:#x})",
                            catalog.id_to_name(rejected.id),
                            rejected.id
                        );
                    }
                }
            }
        }
    }

    fn process_deferred(&self, event: DeferredEvent) {
        let catalog = &self.parts.catalog;
        let DeferredEvent { id, buf } = event;
        let frame = buf.data();
        let payload = frame.get(WMI_HDR_LEN..).unwrap_or_default();

        let view = match catalog.validate_and_pad(id, payload) {
            Ok(view) => view,
            Err(err) => {
                HandleStats::bump(&self.stats.rx_rejected);
                error!("failed to validate deferred {id:#x}: {err}");
                return;
            }
        };
        match self.parts.registry.lookup(id) {
            Some((handler, _)) => {
                self.deliver(id, &view, payload.len(), frame, &handler, RxContext::Deferred);
            }
            None => {
                HandleStats::bump(&self.stats.rx_unhandled);
                debug!("handler for {id:#x} removed while queued");
            }
        }
        catalog.free_view(id, view);
    }

    fn deliver(
        &self,
        id: u32,
        view: &C::View,
        len: usize,
        frame: &[u8],
        handler: &EventHandler<C::View>,
        ctx: RxContext,
    ) {
        let class = if self.parts.catalog.is_management(id) {
            LogClass::MgmtEvent
        } else {
            LogClass::Event
        };
        self.log.record(class, id, frame);
        let event = WmiEvent { id, view, len };
        match ctx {
            RxContext::Default => self.parts.default_ctx.dispatch(&event, handler),
            RxContext::Immediate | RxContext::Deferred => handler(&event),
        }
        self.stats.record_dispatch(ctx);
    }
}
