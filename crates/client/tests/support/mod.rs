//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use murmur_client::testing::MockChatClient;
use murmur_client::{ChatContext, SyncConfig};
use murmur_shared::{Channel, ChannelType, Message, MessageStatus, UserRef};

pub const ME: &str = "me";

pub fn context(mock: &Arc<MockChatClient>) -> ChatContext {
    context_with(mock, SyncConfig::default())
}

pub fn context_with(mock: &Arc<MockChatClient>, config: SyncConfig) -> ChatContext {
    ChatContext::new(mock.clone(), ME, config)
}

pub fn message(channel_id: &str, id: &str, seq: u64, author: &str) -> Message {
    Message {
        id: Some(id.to_string()),
        client_msg_id: None,
        channel_id: channel_id.to_string(),
        author: UserRef::new(author),
        text: format!("text of {id}"),
        attachments: Vec::new(),
        parent_id: None,
        status: MessageStatus::Sent,
        reactions: BTreeMap::new(),
        edited: false,
        deleted: false,
        seq: Some(seq),
        reply_count: 0,
        thread_participants: Vec::new(),
        created_at: Utc.timestamp_opt(1_700_000_000 + seq as i64, 0).unwrap(),
    }
}

pub fn reply(channel_id: &str, parent_id: &str, id: &str, seq: u64, author: &str) -> Message {
    Message {
        parent_id: Some(parent_id.to_string()),
        ..message(channel_id, id, seq, author)
    }
}

pub fn channel(id: &str, unread_count: u32) -> Channel {
    Channel {
        id: id.to_string(),
        workspace_id: Some("w1".to_string()),
        name: format!("#{id}"),
        channel_type: ChannelType::Text,
        topic: None,
        unread_count,
        last_message: None,
        is_member: true,
        is_muted: false,
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

/// Let spawned tasks (background unsubscribes, resubscribes) run.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}
