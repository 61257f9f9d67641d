//! Connection state as reported by the client's lifecycle events.

use std::sync::Arc;

use murmur_shared::{EventKind, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::Mount;
use crate::context::ChatContext;
use crate::scope::StateCell;

/// Connection state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        )
    }
}

pub struct ConnectionStatus {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    mount: Mount,
    state: StateCell<ConnectionState>,
    last_disconnect_reason: Mutex<Option<String>>,
}

impl ConnectionStatus {
    pub fn mount(ctx: &ChatContext) -> Self {
        let inner = Arc::new(ConnectionInner {
            mount: Mount::new(ctx, "connection"),
            state: StateCell::new(ConnectionState::Disconnected),
            last_disconnect_reason: Mutex::new(None),
        });

        let client = ctx.client().clone();
        for kind in [
            EventKind::Connecting,
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Reconnecting,
        ] {
            let weak = Arc::downgrade(&inner);
            inner.mount.scope.listen(client.as_ref(), kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(event);
                }
            });
        }

        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.snapshot()
    }

    pub fn last_disconnect_reason(&self) -> Option<String> {
        self.inner.last_disconnect_reason.lock().clone()
    }

    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.watch()
    }
}

impl Drop for ConnectionStatus {
    fn drop(&mut self) {
        self.inner.mount.dispose();
    }
}

impl ConnectionInner {
    fn apply(&self, event: &ServerEvent) {
        let next = match event {
            ServerEvent::Connecting => ConnectionState::Connecting,
            ServerEvent::Connected => ConnectionState::Connected,
            ServerEvent::Disconnected { reason } => {
                *self.last_disconnect_reason.lock() = reason.clone();
                ConnectionState::Disconnected
            }
            ServerEvent::Reconnecting { attempt } => ConnectionState::Reconnecting { attempt: *attempt },
            _ => return,
        };
        tracing::debug!(state = ?next, "connection state changed");
        self.state.update(|s| {
            if *s == next {
                return false;
            }
            *s = next;
            true
        });
    }
}
