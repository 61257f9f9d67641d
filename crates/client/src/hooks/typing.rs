//! Who is typing in a channel, and the local user's own typing broadcasts
//! (useTypingIndicator).
//!
//! Remote users expire individually: every `typing.start` replaces that
//! user's timer, so at most one timer per user is ever armed. The local side
//! sends one start per typing burst and an automatic stop after the same
//! timeout of inactivity.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use murmur_shared::{ClientError, EventKind, ServerEvent};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use super::Mount;
use crate::context::ChatContext;
use crate::scope::StateCell;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TypingState {
    /// Remote users currently typing, in the order they started.
    pub users: Vec<String>,
    /// Whether the local user is in a typing burst.
    pub local_typing: bool,
}

/// A timer tagged with the generation that armed it. A timer only acts if
/// its generation is still the current one for its key.
struct Armed {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    remote: HashMap<String, Armed>,
    local: Option<Armed>,
}

impl Timers {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

pub struct TypingIndicator {
    inner: Arc<TypingInner>,
}

struct TypingInner {
    mount: Mount,
    channel_id: String,
    timeout: Duration,
    state: StateCell<TypingState>,
    timers: Mutex<Timers>,
}

impl TypingIndicator {
    /// Start tracking typing in `channel_id`. No topic is leased; typing
    /// events ride on the channel subscription held by the message list.
    pub fn mount(ctx: &ChatContext, channel_id: impl Into<String>) -> Self {
        let channel_id = channel_id.into();
        let inner = Arc::new(TypingInner {
            mount: Mount::new(ctx, format!("typing:{channel_id}")),
            channel_id,
            timeout: ctx.config().typing_timeout,
            state: StateCell::new(TypingState::default()),
            timers: Mutex::new(Timers::default()),
        });

        let client = ctx.client().clone();
        for kind in [EventKind::TypingStart, EventKind::TypingStop] {
            let weak = Arc::downgrade(&inner);
            inner.mount.scope.listen(client.as_ref(), kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(event);
                }
            });
        }

        Self { inner }
    }

    pub fn typing_users(&self) -> Vec<String> {
        self.inner.state.read(|s| s.users.clone())
    }

    pub fn is_typing(&self, user_id: &str) -> bool {
        self.inner.state.read(|s| s.users.iter().any(|u| u == user_id))
    }

    pub fn snapshot(&self) -> TypingState {
        self.inner.state.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<TypingState> {
        self.inner.state.watch()
    }

    /// Note local typing activity. Only the first call of a burst sends a
    /// start; every call pushes the automatic stop further out.
    pub async fn start_typing(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        if !inner.mount.is_alive() {
            return Err(ClientError::Disposed);
        }
        let mut first = false;
        inner.state.update(|s| {
            first = !s.local_typing;
            s.local_typing = true;
            first
        });
        TypingInner::arm_local(inner);
        if !first {
            return Ok(());
        }

        let result = inner
            .mount
            .ctx
            .client()
            .send_typing_start(&inner.channel_id)
            .await;
        if let Err(err) = &result {
            tracing::warn!(channel_id = %inner.channel_id, error = %err, "typing start failed");
            // Let the next keystroke try again.
            inner.cancel_local();
            inner.state.update(|s| std::mem::take(&mut s.local_typing));
        }
        result
    }

    /// End the local typing burst now. A no-op when not typing.
    pub async fn stop_typing(&self) -> Result<(), ClientError> {
        self.inner.stop_local().await
    }

    pub async fn unmount(self) {
        self.inner.teardown();
        if self.inner.state.read(|s| s.local_typing) {
            let _ = self.inner.stop_local().await;
        }
        self.inner.mount.unmount().await;
    }
}

impl Drop for TypingIndicator {
    fn drop(&mut self) {
        self.inner.teardown();
        if self.inner.mount.is_alive() && self.inner.state.read(|s| s.local_typing) {
            let inner = self.inner.clone();
            self.inner.mount.scope.spawn(async move {
                let _ = inner.stop_local().await;
            });
        }
        self.inner.mount.dispose();
    }
}

impl TypingInner {
    fn apply(self: &Arc<Self>, event: &ServerEvent) {
        match event {
            ServerEvent::TypingStart {
                channel_id,
                user_id,
            } if *channel_id == self.channel_id => {
                if self.mount.ctx.is_current_user(user_id) {
                    return;
                }
                self.arm_remote(user_id);
                self.state.update(|s| {
                    if s.users.contains(user_id) {
                        return false;
                    }
                    s.users.push(user_id.clone());
                    true
                });
            }
            ServerEvent::TypingStop {
                channel_id,
                user_id,
            } if *channel_id == self.channel_id => {
                if let Some(armed) = self.timers.lock().remote.remove(user_id) {
                    armed.handle.abort();
                }
                self.remove_user(user_id);
            }
            _ => {}
        }
    }

    /// (Re)arm the expiry of one remote user, replacing any armed timer.
    fn arm_remote(self: &Arc<Self>, user_id: &str) {
        let deadline = Instant::now() + self.timeout;
        let mut timers = self.timers.lock();
        let generation = timers.bump();
        let weak: Weak<Self> = Arc::downgrade(self);
        let user = user_id.to_string();
        let handle = self.mount.scope.spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire_remote(&user, generation);
            }
        });
        if let Some(previous) = timers
            .remote
            .insert(user_id.to_string(), Armed { generation, handle })
        {
            previous.handle.abort();
        }
    }

    fn expire_remote(&self, user_id: &str, generation: u64) {
        {
            let mut timers = self.timers.lock();
            if timers.remote.get(user_id).map(|armed| armed.generation) != Some(generation) {
                return;
            }
            timers.remote.remove(user_id);
        }
        if self.mount.is_alive() {
            tracing::trace!(channel_id = %self.channel_id, %user_id, "typing expired");
            self.remove_user(user_id);
        }
    }

    fn remove_user(&self, user_id: &str) {
        self.state.update(|s| {
            let before = s.users.len();
            s.users.retain(|u| u != user_id);
            s.users.len() != before
        });
    }

    fn arm_local(self: &Arc<Self>) {
        let deadline = Instant::now() + self.timeout;
        let mut timers = self.timers.lock();
        let generation = timers.bump();
        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = self.mount.scope.spawn(async move {
            sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                inner.auto_stop(generation).await;
            }
        });
        if let Some(previous) = timers.local.replace(Armed { generation, handle }) {
            previous.handle.abort();
        }
    }

    async fn auto_stop(&self, generation: u64) {
        {
            let mut timers = self.timers.lock();
            if timers.local.as_ref().map(|armed| armed.generation) != Some(generation) {
                return;
            }
            // The running task is this one; dropping its handle does not abort it.
            timers.local = None;
        }
        if !self.mount.is_alive() || !self.state.update(|s| std::mem::take(&mut s.local_typing)) {
            return;
        }
        tracing::debug!(channel_id = %self.channel_id, "typing idle, sending stop");
        if let Err(err) = self
            .mount
            .ctx
            .client()
            .send_typing_stop(&self.channel_id)
            .await
        {
            tracing::warn!(channel_id = %self.channel_id, error = %err, "typing stop failed");
        }
    }

    fn cancel_local(&self) {
        if let Some(armed) = self.timers.lock().local.take() {
            armed.handle.abort();
        }
    }

    async fn stop_local(&self) -> Result<(), ClientError> {
        self.cancel_local();
        if !self.state.update(|s| std::mem::take(&mut s.local_typing)) {
            return Ok(());
        }
        let result = self
            .mount
            .ctx
            .client()
            .send_typing_stop(&self.channel_id)
            .await;
        if let Err(err) = &result {
            tracing::warn!(channel_id = %self.channel_id, error = %err, "typing stop failed");
        }
        result
    }

    /// Cancel every timer. Remote users are forgotten.
    fn teardown(&self) {
        let mut timers = self.timers.lock();
        for (_, armed) in timers.remote.drain() {
            armed.handle.abort();
        }
        if let Some(armed) = timers.local.take() {
            armed.handle.abort();
        }
    }
}
