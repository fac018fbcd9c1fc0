//! Execution contexts for inbound event handlers.

use std::sync::Arc;

use serde::Serialize;

/// Where a registered handler runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RxContext {
    /// Synchronously on the transport's receive context.
    Immediate,
    /// On the handle's rx worker thread, in arrival order.
    Deferred,
    /// Through the owner-supplied [`DefaultContext`].
    Default,
}

/// A validated inbound event as seen by a handler.
#[derive(Debug)]
pub struct WmiEvent<'a, V> {
    /// Wire event id.
    pub id: u32,
    pub view: &'a V,
    /// Payload length, header excluded.
    pub len: usize,
}

pub type EventHandler<V> = Arc<dyn Fn(&WmiEvent<'_, V>) + Send + Sync>;

/// Sink for handlers registered with [`RxContext::Default`].
pub trait DefaultContext<V>: Send + Sync {
    fn dispatch(&self, event: &WmiEvent<'_, V>, handler: &EventHandler<V>) {
        handler(event);
    }
}

/// Runs default-context handlers inline on the receive context.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineContext;

impl<V> DefaultContext<V> for InlineContext {}
