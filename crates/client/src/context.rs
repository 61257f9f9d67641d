//! The handle every hook is mounted from.

use std::sync::Arc;

use crate::client::ChatClient;
use crate::config::SyncConfig;
use crate::subscription::SubscriptionManager;

/// One application's connection to the chat backend.
///
/// Build it once at startup and hand clones to every view. Clones share the
/// client and the subscription registry. Call [`shutdown`](Self::shutdown)
/// before the application exits so server-side subscriptions are released.
#[derive(Clone)]
pub struct ChatContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    client: Arc<dyn ChatClient>,
    current_user_id: String,
    config: SyncConfig,
    subscriptions: SubscriptionManager,
}

impl ChatContext {
    pub fn new(
        client: Arc<dyn ChatClient>,
        current_user_id: impl Into<String>,
        config: SyncConfig,
    ) -> Self {
        let subscriptions = SubscriptionManager::new(client.clone(), &config);
        let current_user_id = current_user_id.into();
        tracing::info!(user_id = %current_user_id, "chat context created");
        Self {
            inner: Arc::new(ContextInner {
                client,
                current_user_id,
                config,
                subscriptions,
            }),
        }
    }

    pub fn client(&self) -> &Arc<dyn ChatClient> {
        &self.inner.client
    }

    pub fn current_user_id(&self) -> &str {
        &self.inner.current_user_id
    }

    pub fn is_current_user(&self, user_id: &str) -> bool {
        self.inner.current_user_id == user_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    /// Release every subscription still held by any scope.
    pub async fn shutdown(&self) {
        self.inner.subscriptions.shutdown().await;
        tracing::info!(user_id = %self.inner.current_user_id, "chat context shut down");
    }
}

impl std::fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatContext")
            .field("current_user_id", &self.inner.current_user_id)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
