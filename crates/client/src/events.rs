//! In-process dispatch of push events to registered listeners.
//!
//! A transport decodes frames into [`ServerEvent`]s and hands them to
//! [`EventBus::emit`]; the state layer registers listeners per [`EventKind`]
//! and never looks at the wire.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use murmur_shared::{EventKind, ServerEvent};
use parking_lot::Mutex;

pub type EventHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(u64, EventHandler)>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    listeners: Arc<Mutex<Listeners>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for one event kind.
    pub fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerGuard {
        let mut listeners = self.listeners.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.by_kind.entry(kind).or_default().push((id, handler));

        ListenerGuard {
            listeners: Arc::downgrade(&self.listeners),
            kind,
            id,
            active: true,
        }
    }

    /// Deliver an event to every listener of its kind, in registration order.
    ///
    /// Handlers run outside the registry lock and may add or remove listeners.
    pub fn emit(&self, event: &ServerEvent) {
        let handlers: Vec<EventHandler> = {
            let listeners = self.listeners.lock();
            match listeners.by_kind.get(&event.kind()) {
                Some(entries) => entries.iter().map(|(_, h)| h.clone()).collect(),
                None => return,
            }
        };

        tracing::trace!(kind = %event.kind(), listeners = handlers.len(), "dispatching event");
        for handler in handlers {
            handler(event);
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners
            .lock()
            .by_kind
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Keeps a listener registered. Dropping it, or calling [`off`](Self::off),
/// removes the listener.
#[must_use = "dropping the guard removes the listener"]
pub struct ListenerGuard {
    listeners: Weak<Mutex<Listeners>>,
    kind: EventKind,
    id: u64,
    active: bool,
}

impl ListenerGuard {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn off(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(listeners) = self.listeners.upgrade() else {
            return;
        };
        let mut listeners = listeners.lock();
        if let Some(entries) = listeners.by_kind.get_mut(&self.kind) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                listeners.by_kind.remove(&self.kind);
            }
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerGuard")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
