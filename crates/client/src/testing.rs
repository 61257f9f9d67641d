//! Scripted in-memory [`ChatClient`] for tests.
//!
//! Records every request, serves seeded channels, messages and replies, and
//! lets a test hold requests at a gate to line up races deliberately.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use murmur_shared::{
    Channel, ChannelQuery, ClientError, EventKind, Message, MessagePage, MessageQuery,
    MessageStatus, SendMessageRequest, ServerEvent, ThreadPage, UpdateMessageRequest, UserRef,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::client::{ChatClient, FetchInit, Method};
use crate::events::{EventBus, EventHandler, ListenerGuard};

/// One request seen by the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    QueryChannels(ChannelQuery),
    QueryMessages { channel_id: String, query: MessageQuery },
    SendMessage { channel_id: String, request: SendMessageRequest },
    UpdateMessage { channel_id: String, message_id: String, text: String },
    DeleteMessage { channel_id: String, message_id: String },
    AddReaction { channel_id: String, message_id: String, reaction: String },
    RemoveReaction { channel_id: String, message_id: String, reaction: String },
    Subscribe(String),
    Unsubscribe(String),
    MarkRead(String),
    TypingStart(String),
    TypingStop(String),
    Fetch { path: String, method: Method },
}

/// How `send_message` answers.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SendBehavior {
    /// Return the stored message; no push event.
    #[default]
    Respond,
    /// Emit `message.new` (and `thread.reply` for replies) before returning.
    PushThenRespond,
    /// Fail every send with this error.
    Fail(ClientError),
}

/// Requests that can be held open until the test releases them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gate {
    Subscribe,
    Send,
    MarkRead,
}

#[derive(Default)]
struct MockState {
    calls: Vec<Call>,
    channels: Vec<Channel>,
    messages: HashMap<String, Vec<Message>>,
    send_behavior: SendBehavior,
    subscribed: HashSet<String>,
    failures: HashMap<&'static str, VecDeque<ClientError>>,
    next_seq: u64,
}

pub struct MockChatClient {
    user_id: String,
    bus: EventBus,
    state: Mutex<MockState>,
    gates: HashMap<Gate, watch::Sender<bool>>,
}

impl MockChatClient {
    /// A mock answering on behalf of `user_id`.
    pub fn new(user_id: impl Into<String>) -> Arc<Self> {
        let gates = [Gate::Subscribe, Gate::Send, Gate::MarkRead]
            .into_iter()
            .map(|gate| (gate, watch::channel(true).0))
            .collect();
        Arc::new(Self {
            user_id: user_id.into(),
            bus: EventBus::new(),
            state: Mutex::new(MockState {
                next_seq: 1,
                ..MockState::default()
            }),
            gates,
        })
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Deliver a push event as the transport would.
    pub fn emit(&self, event: ServerEvent) {
        self.bus.emit(&event);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.bus.listener_count(kind)
    }

    pub fn seed_channels(&self, channels: Vec<Channel>) {
        self.state.lock().channels = channels;
    }

    /// Store messages (replies included) for their channels. Later sends get
    /// sequence numbers after the highest seeded one.
    pub fn seed_messages(&self, messages: Vec<Message>) {
        let mut state = self.state.lock();
        for message in messages {
            if let Some(seq) = message.seq {
                state.next_seq = state.next_seq.max(seq + 1);
            }
            state
                .messages
                .entry(message.channel_id.clone())
                .or_default()
                .push(message);
        }
        for list in state.messages.values_mut() {
            list.sort_by_key(|m| m.seq);
        }
    }

    pub fn set_send_behavior(&self, behavior: SendBehavior) {
        self.state.lock().send_behavior = behavior;
    }

    /// Make the next call of `operation` (a [`ChatClient`] method name) fail.
    pub fn fail_next(&self, operation: &'static str, error: ClientError) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Hold requests of this kind until [`open`](Self::open) is called.
    pub fn close(&self, gate: Gate) {
        if let Some(tx) = self.gates.get(&gate) {
            tx.send_replace(false);
        }
    }

    pub fn open(&self, gate: Gate) {
        if let Some(tx) = self.gates.get(&gate) {
            tx.send_replace(true);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    pub fn subscribe_calls(&self, topic: &str) -> usize {
        self.count_calls(|c| matches!(c, Call::Subscribe(t) if t == topic))
    }

    pub fn unsubscribe_calls(&self, topic: &str) -> usize {
        self.count_calls(|c| matches!(c, Call::Unsubscribe(t) if t == topic))
    }

    /// Pretend the server already holds `topic` for this user, as when
    /// another connection subscribed it first.
    pub fn mark_subscribed(&self, topic: &str) {
        self.state.lock().subscribed.insert(topic.to_string());
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.state.lock().subscribed.contains(topic)
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn take_failure(&self, operation: &'static str) -> Result<(), ClientError> {
        match self
            .state
            .lock()
            .failures
            .get_mut(operation)
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn pass(&self, gate: Gate) {
        if let Some(tx) = self.gates.get(&gate) {
            let mut rx = tx.subscribe();
            let _ = rx.wait_for(|open| *open).await;
        }
    }

    fn store_sent(&self, channel_id: &str, request: &SendMessageRequest) -> Message {
        let mut state = self.state.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        let message = Message {
            id: Some(format!("srv-{seq}")),
            status: MessageStatus::Sent,
            seq: Some(seq),
            created_at: Utc::now(),
            ..Message::provisional(channel_id, UserRef::new(self.user_id.clone()), request)
        };
        if let Some(parent_id) = &message.parent_id {
            if let Some(parent) = state
                .messages
                .get_mut(channel_id)
                .and_then(|list| list.iter_mut().find(|m| m.id.as_deref() == Some(parent_id)))
            {
                parent.reply_count += 1;
            }
        }
        state
            .messages
            .entry(channel_id.to_string())
            .or_default()
            .push(message.clone());
        message
    }

    fn replies_page(&self, channel_id: &str, parent_id: &str) -> ThreadPage {
        let state = self.state.lock();
        let list = state.messages.get(channel_id);
        let parent = list
            .and_then(|l| l.iter().find(|m| m.id.as_deref() == Some(parent_id)))
            .cloned();
        let replies = list
            .map(|l| {
                l.iter()
                    .filter(|m| m.parent_id.as_deref() == Some(parent_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        ThreadPage {
            parent,
            replies,
            has_more: false,
        }
    }
}

#[async_trait]
impl ChatClient for MockChatClient {
    async fn query_channels(&self, query: &ChannelQuery) -> Result<Vec<Channel>, ClientError> {
        self.record(Call::QueryChannels(query.clone()));
        self.take_failure("query_channels")?;
        let state = self.state.lock();
        Ok(state
            .channels
            .iter()
            .filter(|c| query.channel_type.as_ref().map_or(true, |t| *t == c.channel_type))
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn query_messages(
        &self,
        channel_id: &str,
        query: &MessageQuery,
    ) -> Result<MessagePage, ClientError> {
        self.record(Call::QueryMessages {
            channel_id: channel_id.to_string(),
            query: query.clone(),
        });
        self.take_failure("query_messages")?;
        let state = self.state.lock();
        let eligible: Vec<&Message> = state
            .messages
            .get(channel_id)
            .map(|list| {
                list.iter()
                    .filter(|m| !m.is_reply())
                    .filter(|m| match (query.before, m.seq) {
                        (Some(before), Some(seq)) => seq < before,
                        _ => true,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let start = eligible.len().saturating_sub(query.limit as usize);
        Ok(MessagePage {
            messages: eligible[start..].iter().map(|m| (*m).clone()).collect(),
            has_more: start > 0,
        })
    }

    async fn send_message(
        &self,
        channel_id: &str,
        request: &SendMessageRequest,
    ) -> Result<Message, ClientError> {
        self.record(Call::SendMessage {
            channel_id: channel_id.to_string(),
            request: request.clone(),
        });
        self.pass(Gate::Send).await;
        self.take_failure("send_message")?;

        let behavior = self.state.lock().send_behavior.clone();
        match behavior {
            SendBehavior::Fail(err) => Err(err),
            SendBehavior::Respond => Ok(self.store_sent(channel_id, request)),
            SendBehavior::PushThenRespond => {
                let message = self.store_sent(channel_id, request);
                self.emit(ServerEvent::MessageNew {
                    message: message.clone(),
                });
                if let Some(parent_id) = message.parent_id.clone() {
                    self.emit(ServerEvent::ThreadReply {
                        channel_id: channel_id.to_string(),
                        parent_id,
                        message: message.clone(),
                        reply_count: None,
                    });
                }
                Ok(message)
            }
        }
    }

    async fn update_message(
        &self,
        channel_id: &str,
        message_id: &str,
        request: &UpdateMessageRequest,
    ) -> Result<Message, ClientError> {
        self.record(Call::UpdateMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            text: request.text.clone(),
        });
        self.take_failure("update_message")?;
        let mut state = self.state.lock();
        let found = state
            .messages
            .get_mut(channel_id)
            .and_then(|list| list.iter_mut().find(|m| m.id.as_deref() == Some(message_id)));
        match found {
            Some(message) => {
                message.text = request.text.clone();
                message.edited = true;
                Ok(message.clone())
            }
            None => Err(ClientError::Http {
                status: 404,
                body: format!("message {message_id} not found"),
            }),
        }
    }

    async fn delete_message(&self, channel_id: &str, message_id: &str) -> Result<(), ClientError> {
        self.record(Call::DeleteMessage {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
        });
        self.take_failure("delete_message")
    }

    async fn add_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ClientError> {
        self.record(Call::AddReaction {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            reaction: reaction.to_string(),
        });
        self.take_failure("add_reaction")
    }

    async fn remove_reaction(
        &self,
        channel_id: &str,
        message_id: &str,
        reaction: &str,
    ) -> Result<(), ClientError> {
        self.record(Call::RemoveReaction {
            channel_id: channel_id.to_string(),
            message_id: message_id.to_string(),
            reaction: reaction.to_string(),
        });
        self.take_failure("remove_reaction")
    }

    /// Answers a repeated subscribe with a 409 the way many backends do.
    async fn subscribe_to_channel(&self, channel_id: &str) -> Result<(), ClientError> {
        self.record(Call::Subscribe(channel_id.to_string()));
        self.pass(Gate::Subscribe).await;
        self.take_failure("subscribe_to_channel")?;
        if !self.state.lock().subscribed.insert(channel_id.to_string()) {
            return Err(ClientError::Http {
                status: 409,
                body: "Already subscribed to this channel".to_string(),
            });
        }
        Ok(())
    }

    async fn unsubscribe_from_channel(&self, channel_id: &str) -> Result<(), ClientError> {
        self.record(Call::Unsubscribe(channel_id.to_string()));
        self.state.lock().subscribed.remove(channel_id);
        self.take_failure("unsubscribe_from_channel")
    }

    async fn mark_read(&self, channel_id: &str) -> Result<(), ClientError> {
        self.record(Call::MarkRead(channel_id.to_string()));
        self.pass(Gate::MarkRead).await;
        self.take_failure("mark_read")
    }

    async fn send_typing_start(&self, channel_id: &str) -> Result<(), ClientError> {
        self.record(Call::TypingStart(channel_id.to_string()));
        self.take_failure("send_typing_start")
    }

    async fn send_typing_stop(&self, channel_id: &str) -> Result<(), ClientError> {
        self.record(Call::TypingStop(channel_id.to_string()));
        self.take_failure("send_typing_stop")
    }

    /// Serves `/channels/{channel}/messages/{parent}/replies` from the seeded
    /// messages; every other path is a 404.
    async fn fetch(&self, path: &str, init: FetchInit) -> Result<serde_json::Value, ClientError> {
        self.record(Call::Fetch {
            path: path.to_string(),
            method: init.method,
        });
        self.take_failure("fetch")?;

        let route = path.split('?').next().unwrap_or_default();
        let segments: Vec<&str> = route.trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["channels", channel_id, "messages", parent_id, "replies"] => {
                serde_json::to_value(self.replies_page(channel_id, parent_id))
                    .map_err(|e| ClientError::Deserialize(e.to_string()))
            }
            _ => Err(ClientError::Http {
                status: 404,
                body: format!("no route for {path}"),
            }),
        }
    }

    fn on(&self, kind: EventKind, handler: EventHandler) -> ListenerGuard {
        self.bus.on(kind, handler)
    }
}
