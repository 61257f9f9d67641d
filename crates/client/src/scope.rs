//! Mount/teardown bookkeeping shared by every hook.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use murmur_shared::{EventKind, ServerEvent};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::ChatClient;
use crate::events::ListenerGuard;

/// The lifetime of one mounted hook.
///
/// Handlers registered through [`Scope::listen`] stop running the moment the
/// scope is disposed, even if the event bus still holds them.
pub struct Scope {
    label: String,
    alive: Arc<AtomicBool>,
    runtime: Handle,
    listeners: Mutex<Vec<ListenerGuard>>,
}

impl Scope {
    /// Create a scope bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime. Hooks are mounted from
    /// async code, so this only fires on misuse.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            alive: Arc::new(AtomicBool::new(true)),
            runtime: Handle::current(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Register a handler that only runs while this scope is alive.
    pub fn listen(
        &self,
        client: &dyn ChatClient,
        kind: EventKind,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) {
        let alive = self.alive.clone();
        let guard = client.on(
            kind,
            Arc::new(move |event: &ServerEvent| {
                if alive.load(Ordering::Acquire) {
                    handler(event);
                }
            }),
        );
        self.listeners.lock().push(guard);
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(future)
    }

    /// Mark the scope dead and drop its listeners. Returns `true` only for
    /// the call that actually tore the scope down.
    pub fn dispose(&self) -> bool {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return false;
        }
        let listeners = std::mem::take(&mut *self.listeners.lock());
        tracing::debug!(scope = %self.label, listeners = listeners.len(), "scope disposed");
        drop(listeners);
        true
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Holds the most recently supplied callback.
///
/// Consumers may hand in a new closure on every render; swapping it here
/// never re-runs subscription setup.
pub struct LatestCallback<T> {
    current: RwLock<Option<Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T> Default for LatestCallback<T> {
    fn default() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }
}

impl<T> LatestCallback<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, callback: impl Fn(&T) + Send + Sync + 'static) {
        *self.current.write() = Some(Arc::new(callback));
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn is_set(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn call(&self, value: &T) {
        // Clone out so the callback may replace itself.
        let callback = self.current.read().clone();
        if let Some(callback) = callback {
            callback(value);
        }
    }
}

/// Reactive state owned by one hook.
///
/// Every accepted change bumps the watch channel, which is what a UI binding
/// waits on to re-render.
pub struct StateCell<T> {
    tx: watch::Sender<T>,
}

impl<T> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.tx.borrow())
    }

    /// Apply `f`; observers are notified only if it returns `true`.
    pub fn update(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.tx.send_if_modified(f)
    }

    pub fn watch(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone> StateCell<T> {
    pub fn snapshot(&self) -> T {
        self.tx.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn latest_callback_uses_newest_closure() {
        let hits = Arc::new(AtomicUsize::new(0));
        let cell: LatestCallback<u32> = LatestCallback::new();
        cell.call(&1);

        let first = hits.clone();
        cell.set(move |v| {
            first.fetch_add(*v as usize, Ordering::SeqCst);
        });
        cell.call(&1);

        let second = hits.clone();
        cell.set(move |v| {
            second.fetch_add(*v as usize * 10, Ordering::SeqCst);
        });
        cell.call(&1);

        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn state_cell_notifies_only_on_change() {
        let cell = StateCell::new(0u32);
        let mut rx = cell.watch();

        assert!(!cell.update(|_| false));
        assert!(!rx.has_changed().unwrap());

        assert!(cell.update(|v| {
            *v = 7;
            true
        }));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 7);
        assert_eq!(cell.snapshot(), 7);
    }

    #[tokio::test]
    async fn dispose_runs_once() {
        let scope = Scope::new("test");
        assert!(scope.is_alive());
        assert!(scope.dispose());
        assert!(!scope.dispose());
        assert!(!scope.is_alive());
    }
}
