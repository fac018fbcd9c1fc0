//! Soc lifecycle: attach, per-radio handles, endpoint routing and detach.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use tracing::{error, info, warn};

use transport::{EndpointCallbacks, EndpointId, Htc, HtcPacket, MsgBuf, ServiceConnection, ServiceId};

use crate::catalog::Catalog;
use crate::config::{WmiConfig, MAX_RADIOS};
use crate::context::{DefaultContext, InlineContext, RxContext, WmiEvent};
use crate::error::{WmiError, WmiResult};
use crate::handle::{SocParts, WeakHandle, WmiHandle};
use crate::registry::Registry;

/// Completion route for one radio. Outlives detach so commands still in
/// flight settle on the handle that sent them.
type TxRoute<C> = Arc<Mutex<WeakHandle<C>>>;

struct SocShared<C: Catalog> {
    parts: SocParts<C>,
    connections: Mutex<SmallVec<[ServiceConnection; MAX_RADIOS]>>,
    handles: Mutex<SmallVec<[Option<WmiHandle<C>>; MAX_RADIOS]>>,
    tx_routes: SmallVec<[TxRoute<C>; MAX_RADIOS]>,
    radio_count: usize,
    detached: AtomicBool,
}

impl<C: Catalog> SocShared<C> {
    fn handle_for(&self, endpoint: EndpointId) -> Option<WmiHandle<C>> {
        self.handles
            .lock()
            .iter()
            .flatten()
            .find(|handle| handle.endpoint() == endpoint)
            .cloned()
    }
}

/// Routes transport callbacks to the handle bound to the endpoint.
struct SocCallbacks<C: Catalog> {
    soc: Weak<SocShared<C>>,
    tx_route: TxRoute<C>,
}

impl<C: Catalog> EndpointCallbacks for SocCallbacks<C> {
    fn tx_complete(&self, packet: HtcPacket) {
        let handle = self.tx_route.lock().upgrade();
        match handle {
            Some(handle) => handle.tx_complete(packet),
            None => error!("tx completion for unbound {}", packet.endpoint),
        }
    }

    fn rx(&self, endpoint: EndpointId, buf: MsgBuf) {
        let handle = self.soc.upgrade().and_then(|soc| soc.handle_for(endpoint));
        match handle {
            Some(handle) => handle.on_receive(buf),
            None => warn!("dropping {}-byte frame on unbound {endpoint}", buf.len()),
        }
    }
}

/// Builder for a [`WmiSoc`].
pub struct WmiSocBuilder<C: Catalog> {
    htc: Arc<dyn Htc>,
    catalog: Arc<C>,
    config: WmiConfig,
    default_ctx: Arc<dyn DefaultContext<C::View>>,
    radios: usize,
}

impl<C: Catalog> WmiSocBuilder<C> {
    pub fn config(mut self, config: WmiConfig) -> Self {
        self.config = config;
        self
    }

    pub fn default_context(mut self, ctx: Arc<dyn DefaultContext<C::View>>) -> Self {
        self.default_ctx = ctx;
        self
    }

    pub fn radios(mut self, radios: usize) -> Self {
        self.radios = radios;
        self
    }

    pub fn attach(self) -> WmiResult<WmiSoc<C>> {
        WmiSoc::attach_with(self)
    }
}

/// Shared context owning every radio handle of one target.
pub struct WmiSoc<C: Catalog> {
    shared: Arc<SocShared<C>>,
}

impl<C: Catalog> WmiSoc<C> {
    pub fn builder(htc: Arc<dyn Htc>, catalog: Arc<C>) -> WmiSocBuilder<C> {
        WmiSocBuilder {
            htc,
            catalog,
            config: WmiConfig::default(),
            default_ctx: Arc::new(InlineContext),
            radios: 1,
        }
    }

    /// Attaches `radio_count` radios with the default configuration.
    pub fn attach(htc: Arc<dyn Htc>, catalog: Arc<C>, radio_count: usize) -> WmiResult<Self> {
        Self::builder(htc, catalog).radios(radio_count).attach()
    }

    fn attach_with(builder: WmiSocBuilder<C>) -> WmiResult<Self> {
        let WmiSocBuilder {
            htc,
            catalog,
            config,
            default_ctx,
            radios,
        } = builder;
        config.validate()?;

        let max = MAX_RADIOS.min(htc.wmi_endpoint_count());
        if radios == 0 || radios > max {
            return Err(WmiError::TooManyRadios {
                requested: radios,
                max,
            });
        }

        let registry = Registry::new(config.max_event_handlers, catalog.event_table());
        let shared = Arc::new(SocShared {
            parts: SocParts {
                htc: Arc::clone(&htc),
                catalog,
                registry: Arc::new(registry),
                default_ctx,
                config: Arc::new(config),
            },
            connections: Mutex::new(SmallVec::new()),
            handles: Mutex::new((0..radios).map(|_| None).collect()),
            tx_routes: (0..radios)
                .map(|_| Arc::new(Mutex::new(WeakHandle::default())))
                .collect(),
            radio_count: radios,
            detached: AtomicBool::new(false),
        });

        for radio in 0..radios {
            let service = ServiceId::wmi_control(radio).ok_or(WmiError::TooManyRadios {
                requested: radios,
                max: MAX_RADIOS,
            })?;
            let callbacks: Arc<dyn EndpointCallbacks> = Arc::new(SocCallbacks {
                soc: Arc::downgrade(&shared),
                tx_route: Arc::clone(&shared.tx_routes[radio]),
            });
            let connection = htc.connect_service(service, callbacks)?;
            shared.connections.lock().push(connection);
        }
        info!("wmi soc attached with {radios} radio(s)");
        Ok(Self { shared })
    }

    pub fn radio_count(&self) -> usize {
        self.shared.radio_count
    }

    /// Handle for `radio`, created on first use.
    ///
    /// Fetching a handle again re-binds it, which clears a pending stop.
    pub fn handle(&self, radio: usize) -> WmiResult<WmiHandle<C>> {
        if self.shared.detached.load(Ordering::Acquire) {
            return Err(WmiError::Detached);
        }
        let connection = self
            .shared
            .connections
            .lock()
            .get(radio)
            .copied()
            .ok_or(WmiError::InvalidRadio {
                radio,
                count: self.shared.radio_count,
            })?;
        let mut handles = self.shared.handles.lock();
        let slot = handles.get_mut(radio).ok_or(WmiError::InvalidRadio {
            radio,
            count: self.shared.radio_count,
        })?;
        if let Some(handle) = slot {
            handle.rebind();
            return Ok(handle.clone());
        }
        let handle = WmiHandle::create(radio, connection, self.shared.parts.clone())?;
        if let Some(route) = self.shared.tx_routes.get(radio) {
            *route.lock() = handle.downgrade();
        }
        *slot = Some(handle.clone());
        Ok(handle)
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

    pub fn registered_handlers(&self) -> usize {
        self.shared.parts.registry.len()
    }

    pub fn catalog(&self) -> &C {
        &self.shared.parts.catalog
    }

    pub fn config(&self) -> &WmiConfig {
        &self.shared.parts.config
    }

    pub fn is_detached(&self) -> bool {
        self.shared.detached.load(Ordering::Acquire)
    }

    /// Drains and joins every handle's rx worker, then releases the handles
    /// and the handler table. Idempotent.
    pub fn detach(&self) {
        if self.shared.detached.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles: SmallVec<[WmiHandle<C>; MAX_RADIOS]> = self
            .shared
            .handles
            .lock()
            .iter_mut()
            .filter_map(Option::take)
            .collect();
        for handle in &handles {
            handle.mark_detached();
            handle.remove_work();
        }
        drop(handles);
        self.shared.parts.registry.clear();
        info!("wmi soc detached");
    }
}

impl<C: Catalog> Drop for WmiSoc<C> {
    fn drop(&mut self) {
        self.detach();
    }
}
