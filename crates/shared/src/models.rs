//! Shared data models for channels, messages, reactions and read state.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Identity ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            avatar: None,
        }
    }
}

// --- Objects ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub id: String,
    pub mime: String,
    pub url: String,
    pub size: u64,
}

// --- Channels ---

/// Channel type (text or call)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ChannelType {
    #[default]
    Text,
    Direct,
    Call,
}

/// Summary of the most recent message, shown in channel lists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl LastMessage {
    /// Build a summary from a confirmed message. Provisional messages have no
    /// server id and are never summarized.
    pub fn from_message(message: &Message) -> Option<Self> {
        Some(Self {
            id: message.id.clone()?,
            author_id: message.author.id.clone(),
            text: message.text.clone(),
            created_at: message.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub channel_type: ChannelType,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
    #[serde(default)]
    pub is_member: bool,
    #[serde(default)]
    pub is_muted: bool,
    pub updated_at: DateTime<Utc>,
}

// --- Messages ---

/// Delivery status of a message.
///
/// `Sending < Sent < Delivered < Read` is the progression; `Failed` sits
/// outside it and is only ever set for a locally originated message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum MessageStatus {
    Sending,
    #[default]
    Sent,
    Delivered,
    Read,
    Failed,
}

impl MessageStatus {
    fn rank(self) -> Option<u8> {
        match self {
            MessageStatus::Sending => Some(0),
            MessageStatus::Sent => Some(1),
            MessageStatus::Delivered => Some(2),
            MessageStatus::Read => Some(3),
            MessageStatus::Failed => None,
        }
    }

    /// Combine the status currently shown with one reported later.
    ///
    /// A later report never moves a message backwards; `Failed` always wins
    /// and a failed message only leaves that state for a real progression.
    pub fn merge(self, incoming: MessageStatus) -> MessageStatus {
        match (self.rank(), incoming.rank()) {
            (_, None) => MessageStatus::Failed,
            (None, Some(_)) => incoming,
            (Some(current), Some(next)) if next >= current => incoming,
            _ => self,
        }
    }

    pub fn is_pending(self) -> bool {
        matches!(self, MessageStatus::Sending)
    }
}

/// Aggregated reactions of one emoji type on a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReactionSummary {
    pub count: u32,
    /// Whether the current user is among the reactors.
    #[serde(default)]
    pub own: bool,
    /// A sample of reacting user ids, not the full list.
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned id, `None` until the server confirms the message.
    #[serde(default)]
    pub id: Option<String>,
    /// Client-generated correlation id of a locally sent message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
    pub channel_id: String,
    pub author: UserRef,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    /// Thread parent, present on thread replies only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub reactions: BTreeMap<String, ReactionSummary>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    /// Monotonic per-channel sequence number assigned by the server.
    #[serde(default)]
    pub seq: Option<u64>,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub thread_participants: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build the provisional record shown while a send is in flight.
    pub fn provisional(channel_id: &str, author: UserRef, request: &SendMessageRequest) -> Self {
        Self {
            id: None,
            client_msg_id: Some(request.client_msg_id.clone()),
            channel_id: channel_id.to_string(),
            author,
            text: request.text.clone(),
            attachments: request.attachments.clone(),
            parent_id: request.parent_id.clone(),
            status: MessageStatus::Sending,
            reactions: BTreeMap::new(),
            edited: false,
            deleted: false,
            seq: None,
            reply_count: 0,
            thread_participants: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The id the message is currently known by: the server id once
    /// confirmed, the correlation id before that.
    pub fn key(&self) -> &str {
        self.id
            .as_deref()
            .or(self.client_msg_id.as_deref())
            .unwrap_or_default()
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_none()
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Same position, no content.
    pub fn tombstoned(&self) -> Self {
        Self {
            text: String::new(),
            attachments: Vec::new(),
            reactions: BTreeMap::new(),
            deleted: true,
            ..self.clone()
        }
    }

    pub fn with_status(&self, status: MessageStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

// --- Read state ---

/// Per-channel read positions, keyed by user id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReadState {
    pub channel_id: String,
    #[serde(default)]
    pub last_read: BTreeMap<String, u64>,
}

impl ReadState {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            last_read: BTreeMap::new(),
        }
    }

    /// Record a read position. Positions only move forward.
    pub fn advance(&mut self, user_id: &str, seq: u64) -> bool {
        let entry = self.last_read.entry(user_id.to_string()).or_insert(0);
        if seq > *entry {
            *entry = seq;
            true
        } else {
            false
        }
    }

    /// Users whose read position has reached `seq`.
    pub fn readers_of(&self, seq: u64) -> Vec<&str> {
        self.last_read
            .iter()
            .filter(|(_, read)| **read >= seq)
            .map(|(user, _)| user.as_str())
            .collect()
    }
}

// --- Queries and requests ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<ChannelType>,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    pub limit: u32,
    /// Only return messages with a sequence number lower than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    #[serde(default)]
    pub parent: Option<Message>,
    pub replies: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub text: String,
    pub client_msg_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl SendMessageRequest {
    /// A request with a fresh correlation id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            client_msg_id: uuid::Uuid::new_v4().to_string(),
            attachments: Vec::new(),
            parent_id: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn in_thread(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMessageRequest {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_never_regresses() {
        assert_eq!(
            MessageStatus::Delivered.merge(MessageStatus::Sent),
            MessageStatus::Delivered
        );
        assert_eq!(
            MessageStatus::Sending.merge(MessageStatus::Sent),
            MessageStatus::Sent
        );
        assert_eq!(
            MessageStatus::Sent.merge(MessageStatus::Failed),
            MessageStatus::Failed
        );
        assert_eq!(
            MessageStatus::Failed.merge(MessageStatus::Sent),
            MessageStatus::Sent
        );
    }

    #[test]
    fn key_prefers_server_id() {
        let request = SendMessageRequest::new("hi");
        let mut message = Message::provisional("c1", UserRef::new("me"), &request);
        assert_eq!(message.key(), request.client_msg_id);
        assert!(message.is_provisional());

        message.id = Some("srv-1".into());
        assert_eq!(message.key(), "srv-1");
    }

    #[test]
    fn tombstone_clears_content() {
        let request = SendMessageRequest::new("secret");
        let mut message = Message::provisional("c1", UserRef::new("me"), &request);
        message.id = Some("m1".into());
        message.reactions.insert("👍".into(), ReactionSummary::default());

        let dead = message.tombstoned();
        assert!(dead.deleted);
        assert!(dead.text.is_empty());
        assert!(dead.reactions.is_empty());
        assert_eq!(dead.id, message.id);
    }

    #[test]
    fn read_positions_only_advance() {
        let mut state = ReadState::new("c1");
        assert!(state.advance("u1", 5));
        assert!(!state.advance("u1", 3));
        assert_eq!(state.last_read["u1"], 5);
        assert_eq!(state.readers_of(4), vec!["u1"]);
        assert!(state.readers_of(6).is_empty());
    }

    #[test]
    fn message_deserializes_from_camel_case() {
        let json = r#"{
            "id": "srv-3",
            "clientMsgId": "abc",
            "channelId": "c1",
            "author": { "id": "u1" },
            "text": "hello",
            "status": "delivered",
            "seq": 3,
            "createdAt": "2024-01-01T00:00:00Z"
        }"#;
        let message: Message = serde_json::from_str(json).unwrap();
        assert_eq!(message.client_msg_id.as_deref(), Some("abc"));
        assert_eq!(message.status, MessageStatus::Delivered);
        assert_eq!(message.seq, Some(3));
        assert!(message.reactions.is_empty());
    }
}
