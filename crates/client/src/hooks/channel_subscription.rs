//! Raw event feed of one channel (useChannelSubscription).

use std::sync::Arc;

use murmur_shared::{EventKind, ServerEvent};
use tokio::sync::watch;

use super::Mount;
use crate::context::ChatContext;
use crate::scope::{LatestCallback, StateCell};
use crate::subscription::SubscriptionStatus;

/// Holds a lease on a channel and forwards every event scoped to it to the
/// most recently supplied handler.
pub struct ChannelSubscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    mount: Mount,
    channel_id: String,
    handler: LatestCallback<ServerEvent>,
    status: StateCell<SubscriptionStatus>,
}

impl ChannelSubscription {
    pub async fn mount(
        ctx: &ChatContext,
        channel_id: impl Into<String>,
        handler: impl Fn(&ServerEvent) + Send + Sync + 'static,
    ) -> Self {
        let channel_id = channel_id.into();
        let inner = Arc::new(SubscriptionInner {
            mount: Mount::new(ctx, format!("channel:{channel_id}")),
            channel_id,
            handler: LatestCallback::new(),
            status: StateCell::new(SubscriptionStatus::Subscribing),
        });
        inner.handler.set(handler);

        let client = ctx.client().clone();
        for kind in EventKind::ALL.into_iter().filter(|k| k.is_channel_scoped()) {
            let weak = Arc::downgrade(&inner);
            inner.mount.scope.listen(client.as_ref(), kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    if event.channel_id() == Some(inner.channel_id.as_str()) {
                        inner.handler.call(event);
                    }
                }
            });
        }

        let status = match inner.mount.subscribe(&inner.channel_id).await {
            Ok(()) => SubscriptionStatus::Subscribed,
            Err(err) => {
                tracing::warn!(channel_id = %inner.channel_id, error = %err, "channel subscribe failed");
                SubscriptionStatus::Error(err)
            }
        };
        inner.status.update(|s| {
            *s = status;
            true
        });

        Self { inner }
    }

    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    /// Swap the handler. The subscription is left alone.
    pub fn set_handler(&self, handler: impl Fn(&ServerEvent) + Send + Sync + 'static) {
        self.inner.handler.set(handler);
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.inner.status.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<SubscriptionStatus> {
        self.inner.status.watch()
    }

    pub async fn unmount(self) {
        self.inner.mount.unmount().await;
        self.inner.status.update(|s| {
            *s = SubscriptionStatus::Unsubscribed;
            true
        });
    }
}

impl Drop for ChannelSubscription {
    fn drop(&mut self) {
        self.inner.mount.dispose();
    }
}
