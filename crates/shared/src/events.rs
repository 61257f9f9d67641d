//! Push events delivered by the chat backend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::models::{Channel, Message, MessageStatus};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "message.new")]
    MessageNew { message: Message },
    #[serde(rename = "message.updated")]
    MessageUpdated { message: Message },
    #[serde(rename = "message.deleted")]
    MessageDeleted {
        channel_id: String,
        message_id: String,
    },
    #[serde(rename = "message.status_changed")]
    MessageStatusChanged {
        channel_id: String,
        message_id: String,
        status: MessageStatus,
    },
    #[serde(rename = "reaction.added")]
    ReactionAdded {
        channel_id: String,
        message_id: String,
        reaction: String,
        user_id: String,
    },
    #[serde(rename = "reaction.removed")]
    ReactionRemoved {
        channel_id: String,
        message_id: String,
        reaction: String,
        user_id: String,
    },
    #[serde(rename = "channel.created")]
    ChannelCreated { channel: Channel },
    #[serde(rename = "channel.updated")]
    ChannelUpdated { channel: Channel },
    #[serde(rename = "channel.deleted")]
    ChannelDeleted { channel_id: String },
    #[serde(rename = "channel.unread_changed")]
    ChannelUnreadChanged { channel_id: String, unread_count: u32 },
    #[serde(rename = "channel.total_unread_changed")]
    TotalUnreadChanged { total_unread_count: u32 },
    #[serde(rename = "typing.start")]
    TypingStart { channel_id: String, user_id: String },
    #[serde(rename = "typing.stop")]
    TypingStop { channel_id: String, user_id: String },
    #[serde(rename = "read.updated")]
    ReadUpdated {
        channel_id: String,
        user_id: String,
        #[serde(default)]
        last_read_seq: Option<u64>,
        /// Authoritative unread count for `user_id`, when the server sends one.
        #[serde(default)]
        unread_count: Option<u32>,
    },
    #[serde(rename = "thread.reply")]
    ThreadReply {
        channel_id: String,
        parent_id: String,
        message: Message,
        #[serde(default)]
        reply_count: Option<u32>,
    },
    #[serde(rename = "connection.connecting")]
    Connecting,
    #[serde(rename = "connection.connected")]
    Connected,
    #[serde(rename = "connection.disconnected")]
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(rename = "connection.reconnecting")]
    Reconnecting { attempt: u32 },
}

impl ServerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ServerEvent::MessageNew { .. } => EventKind::MessageNew,
            ServerEvent::MessageUpdated { .. } => EventKind::MessageUpdated,
            ServerEvent::MessageDeleted { .. } => EventKind::MessageDeleted,
            ServerEvent::MessageStatusChanged { .. } => EventKind::MessageStatusChanged,
            ServerEvent::ReactionAdded { .. } => EventKind::ReactionAdded,
            ServerEvent::ReactionRemoved { .. } => EventKind::ReactionRemoved,
            ServerEvent::ChannelCreated { .. } => EventKind::ChannelCreated,
            ServerEvent::ChannelUpdated { .. } => EventKind::ChannelUpdated,
            ServerEvent::ChannelDeleted { .. } => EventKind::ChannelDeleted,
            ServerEvent::ChannelUnreadChanged { .. } => EventKind::ChannelUnreadChanged,
            ServerEvent::TotalUnreadChanged { .. } => EventKind::TotalUnreadChanged,
            ServerEvent::TypingStart { .. } => EventKind::TypingStart,
            ServerEvent::TypingStop { .. } => EventKind::TypingStop,
            ServerEvent::ReadUpdated { .. } => EventKind::ReadUpdated,
            ServerEvent::ThreadReply { .. } => EventKind::ThreadReply,
            ServerEvent::Connecting => EventKind::Connecting,
            ServerEvent::Connected => EventKind::Connected,
            ServerEvent::Disconnected { .. } => EventKind::Disconnected,
            ServerEvent::Reconnecting { .. } => EventKind::Reconnecting,
        }
    }

    /// The channel this event is scoped to, if any.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            ServerEvent::MessageNew { message } | ServerEvent::MessageUpdated { message } => {
                Some(&message.channel_id)
            }
            ServerEvent::ChannelCreated { channel } | ServerEvent::ChannelUpdated { channel } => {
                Some(&channel.id)
            }
            ServerEvent::MessageDeleted { channel_id, .. }
            | ServerEvent::MessageStatusChanged { channel_id, .. }
            | ServerEvent::ReactionAdded { channel_id, .. }
            | ServerEvent::ReactionRemoved { channel_id, .. }
            | ServerEvent::ChannelDeleted { channel_id }
            | ServerEvent::ChannelUnreadChanged { channel_id, .. }
            | ServerEvent::TypingStart { channel_id, .. }
            | ServerEvent::TypingStop { channel_id, .. }
            | ServerEvent::ReadUpdated { channel_id, .. }
            | ServerEvent::ThreadReply { channel_id, .. } => Some(channel_id),
            ServerEvent::TotalUnreadChanged { .. }
            | ServerEvent::Connecting
            | ServerEvent::Connected
            | ServerEvent::Disconnected { .. }
            | ServerEvent::Reconnecting { .. } => None,
        }
    }
}

/// Event names a listener can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    MessageNew,
    MessageUpdated,
    MessageDeleted,
    MessageStatusChanged,
    ReactionAdded,
    ReactionRemoved,
    ChannelCreated,
    ChannelUpdated,
    ChannelDeleted,
    ChannelUnreadChanged,
    TotalUnreadChanged,
    TypingStart,
    TypingStop,
    ReadUpdated,
    ThreadReply,
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::MessageNew,
        EventKind::MessageUpdated,
        EventKind::MessageDeleted,
        EventKind::MessageStatusChanged,
        EventKind::ReactionAdded,
        EventKind::ReactionRemoved,
        EventKind::ChannelCreated,
        EventKind::ChannelUpdated,
        EventKind::ChannelDeleted,
        EventKind::ChannelUnreadChanged,
        EventKind::TotalUnreadChanged,
        EventKind::TypingStart,
        EventKind::TypingStop,
        EventKind::ReadUpdated,
        EventKind::ThreadReply,
        EventKind::Connecting,
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Reconnecting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::MessageNew => "message.new",
            EventKind::MessageUpdated => "message.updated",
            EventKind::MessageDeleted => "message.deleted",
            EventKind::MessageStatusChanged => "message.status_changed",
            EventKind::ReactionAdded => "reaction.added",
            EventKind::ReactionRemoved => "reaction.removed",
            EventKind::ChannelCreated => "channel.created",
            EventKind::ChannelUpdated => "channel.updated",
            EventKind::ChannelDeleted => "channel.deleted",
            EventKind::ChannelUnreadChanged => "channel.unread_changed",
            EventKind::TotalUnreadChanged => "channel.total_unread_changed",
            EventKind::TypingStart => "typing.start",
            EventKind::TypingStop => "typing.stop",
            EventKind::ReadUpdated => "read.updated",
            EventKind::ThreadReply => "thread.reply",
            EventKind::Connecting => "connection.connecting",
            EventKind::Connected => "connection.connected",
            EventKind::Disconnected => "connection.disconnected",
            EventKind::Reconnecting => "connection.reconnecting",
        }
    }

    /// Kinds whose events are scoped to a single channel.
    pub fn is_channel_scoped(self) -> bool {
        !matches!(
            self,
            EventKind::TotalUnreadChanged
                | EventKind::Connecting
                | EventKind::Connected
                | EventKind::Disconnected
                | EventKind::Reconnecting
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown event name: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_parse_back() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>(), Ok(kind));
        }
        assert!("message.exploded".parse::<EventKind>().is_err());
    }

    #[test]
    fn decodes_dotted_wire_names() {
        let json = r#"{"type":"typing.start","data":{"channelId":"c1","userId":"u2"}}"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), EventKind::TypingStart);
        assert_eq!(event.channel_id(), Some("c1"));

        let json = r#"{"type":"read.updated","data":{"channelId":"c1","userId":"me","unreadCount":2}}"#;
        match serde_json::from_str::<ServerEvent>(json).unwrap() {
            ServerEvent::ReadUpdated {
                unread_count,
                last_read_seq,
                ..
            } => {
                assert_eq!(unread_count, Some(2));
                assert_eq!(last_read_seq, None);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn connection_events_are_unscoped() {
        let event: ServerEvent = serde_json::from_str(r#"{"type":"connection.connected"}"#).unwrap();
        assert_eq!(event, ServerEvent::Connected);
        assert_eq!(event.channel_id(), None);
        assert!(!event.kind().is_channel_scoped());
    }
}
