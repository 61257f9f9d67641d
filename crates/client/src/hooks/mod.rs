//! Hook-equivalents: one state container per UI concern.
//!
//! Each hook is mounted from a [`ChatContext`], owns its state exclusively,
//! and tears everything down (listeners, timers, its topic lease) when it
//! is unmounted or dropped. Event handlers hold only a weak reference to the
//! hook, so a late event after teardown is a no-op.

mod channel_subscription;
mod channels;
mod connection;
mod messages;
mod read_state;
mod thread;
mod typing;

pub use channel_subscription::ChannelSubscription;
pub use channels::{Channels, ChannelsOptions, ChannelsState};
pub use connection::{ConnectionState, ConnectionStatus};
pub use messages::{Messages, MessagesState};
pub use read_state::{ReadStateHook, ReadStateView};
pub use thread::{Thread, ThreadState};
pub use typing::{TypingIndicator, TypingState};

use murmur_shared::ClientError;
use parking_lot::Mutex;

use crate::context::ChatContext;
use crate::scope::Scope;
use crate::subscription::SubscriptionLease;

/// What every mounted hook owns besides its state: the context it came
/// from, its scope, and at most one topic lease.
pub(crate) struct Mount {
    pub(crate) ctx: ChatContext,
    pub(crate) scope: Scope,
    lease: Mutex<Option<SubscriptionLease>>,
}

impl Mount {
    pub(crate) fn new(ctx: &ChatContext, label: impl Into<String>) -> Self {
        Self {
            ctx: ctx.clone(),
            scope: Scope::new(label),
            lease: Mutex::new(None),
        }
    }

    /// Lease `topic` for the lifetime of this mount.
    pub(crate) async fn subscribe(&self, topic: &str) -> Result<(), ClientError> {
        let lease = self.ctx.subscriptions().subscribe(topic).await?;
        if self.scope.is_alive() {
            *self.lease.lock() = Some(lease);
            Ok(())
        } else {
            lease.release().await;
            Err(ClientError::Disposed)
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.scope.is_alive()
    }

    pub(crate) fn current_user_id(&self) -> &str {
        self.ctx.current_user_id()
    }

    /// Synchronous teardown. Returns the lease so async callers can wait for
    /// the unsubscribe; dropping it releases in the background.
    pub(crate) fn dispose(&self) -> Option<SubscriptionLease> {
        if self.scope.dispose() {
            self.lease.lock().take()
        } else {
            None
        }
    }

    pub(crate) async fn unmount(&self) {
        if let Some(lease) = self.dispose() {
            lease.release().await;
        }
    }
}
