//! The contract a chat backend client fulfils for the state layer.

use async_trait::async_trait;
use murmur_shared::{
    Channel, ChannelQuery, ClientError, EventKind, Message, MessagePage, MessageQuery,
    SendMessageRequest, ThreadPage, UpdateMessageRequest,
};
use serde::{Deserialize, Serialize};

use crate::events::{EventHandler, ListenerGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

/// Request options for [`ChatClient::fetch`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FetchInit {
    pub method: Method,
    pub body: Option<serde_json::Value>,
}

impl FetchInit {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            body: Some(body),
        }
    }
}

/// A connected chat backend.
///
/// One instance is shared by every consuming scope of an application. The
/// transport behind it (HTTP, WebSocket) is its own business; the state layer
/// only needs these requests plus push-event registration through [`on`].
///
/// [`on`]: ChatClient::on
#[async_trait]
pub trait ChatClient: Send + Sync + 'static {
    async fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<Channel>, ClientError>;

    async fn query_messages(
        &self,
        channel_id: &str,
        query: &MessageQuery,
    ) -> Result<MessagePage, ClientError>;

    async fn send_message(
        &self,
        channel_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError>;

    async fn update_message(
        &self,
        channel_id: &str,
        message_id: &str,
        request: &UpdateMessageRequest,
    ) -> Result<Message, ClientError>;

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ClientError>;

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ClientError>;

    async fn remove_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ClientError>;

    async fn subscribe_to_channel(&self, channel_id: &str) -> Result<(), ClientError>;

    async fn unsubscribe_from_channel(&self, channel_id: &str) -> Result<(), ClientError>;

    async fn mark_read(&self, channel_id: &str) -> Result<(), ClientError>;

    async fn send_typing_start(&self, channel_id: &str) -> Result<(), ClientError>;

    async fn send_typing_stop(&self, channel_id: &str) -> Result<(), ClientError>;

    /// Escape hatch for request/response endpoints without a dedicated method.
    async fn fetch(&self, path: &str, init: FetchInit) -> Result<serde_json::Value, ClientError>;

    /// Register a push-event handler. The listener lives as long as the guard.
    fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerGuard;

    /// Replies of a thread, oldest first.
    async fn query_replies(
        &self,
        channel_id: &str,
        parent_id: &str,
        query: &MessageQuery,
    ) -> Result<ThreadPage, ClientError> {
        let mut path = format!(
            "/channels/{channel_id}/messages/{parent_id}/replies?limit={}",
            query.limit
        );
        if let Some(before) = query.before {
            path.push_str(&format!("&before={before}"));
        }
        let value = self.fetch(&path, FetchInit::get()).await?;
        serde_json::from_value(value).map_err(|e| ClientError::Deserialize(e.to_string()))
    }
}
