//! Replies of one thread (useThread).

use std::sync::Arc;

use murmur_shared::{
    ClientError, EventKind, Message, MessageQuery, SendMessageRequest, ServerEvent, UserRef,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::messages::{apply_message_change, ReactionLedger};
use super::Mount;
use crate::context::ChatContext;
use crate::scope::StateCell;
use crate::stores::optimistic::{self, Reconciliation};
use crate::stores::{EntityStore, Keyed};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThreadState {
    pub parent: Option<Message>,
    /// Oldest first.
    pub replies: EntityStore<Message>,
    pub reply_count: u32,
    /// Distinct reply authors, in order of first reply.
    pub participants: Vec<String>,
    pub loading: bool,
    pub has_more: bool,
    pub error: Option<ClientError>,
}

impl ThreadState {
    /// Count a reply accepted for the first time.
    fn count_reply(&mut self, author_id: &str) {
        self.reply_count += 1;
        if !self.participants.iter().any(|p| p == author_id) {
            self.participants.push(author_id.to_string());
        }
    }
}

/// A thread under one parent message.
///
/// Shares the channel's topic lease with any [`Messages`](super::Messages)
/// mounted on the same channel.
pub struct Thread {
    inner: Arc<ThreadInner>,
}

struct ThreadInner {
    mount: Mount,
    channel_id: String,
    parent_id: String,
    state: StateCell<ThreadState>,
    reactions: Mutex<ReactionLedger>,
}

const HANDLED: [EventKind; 7] = [
    EventKind::MessageNew,
    EventKind::ThreadReply,
    EventKind::MessageUpdated,
    EventKind::MessageDeleted,
    EventKind::MessageStatusChanged,
    EventKind::ReactionAdded,
    EventKind::ReactionRemoved,
];

impl Thread {
    pub async fn mount(
        ctx: &ChatContext,
        channel_id: impl Into<String>,
        parent_id: impl Into<String>,
    ) -> Self {
        let channel_id = channel_id.into();
        let parent_id = parent_id.into();
        let inner = Arc::new(ThreadInner {
            mount: Mount::new(ctx, format!("thread:{channel_id}/{parent_id}")),
            channel_id,
            parent_id,
            state: StateCell::new(ThreadState {
                loading: true,
                ..ThreadState::default()
            }),
            reactions: Mutex::new(ReactionLedger::default()),
        });

        let client = ctx.client().clone();
        for kind in HANDLED {
            let weak = Arc::downgrade(&inner);
            inner.mount.scope.listen(client.as_ref(), kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(event);
                }
            });
        }

        if let Err(err) = inner.mount.subscribe(&inner.channel_id).await {
            tracing::warn!(channel_id = %inner.channel_id, error = %err, "thread subscribe failed");
            inner.state.update(|s| {
                s.error = Some(err);
                true
            });
        }
        inner.load().await;

        Self { inner }
    }

    pub fn parent_id(&self) -> &str {
        &self.inner.parent_id
    }

    pub fn snapshot(&self) -> ThreadState {
        self.inner.state.snapshot()
    }

    pub fn replies(&self) -> Vec<Message> {
        self.inner.state.read(|s| s.replies.items().to_vec())
    }

    pub fn reply_count(&self) -> u32 {
        self.inner.state.read(|s| s.reply_count)
    }

    pub fn participants(&self) -> Vec<String> {
        self.inner.state.read(|s| s.participants.clone())
    }

    pub fn watch(&self) -> watch::Receiver<ThreadState> {
        self.inner.state.watch()
    }

    /// Reply optimistically. The reply count moves once the server accepts
    /// the reply, not when it is first shown.
    pub async fn send_reply(&self, text: impl Into<String>) -> Result<Message, ClientError> {
        let inner = &self.inner;
        let request = SendMessageRequest::new(text).in_thread(inner.parent_id.clone());
        let author = UserRef::new(inner.mount.current_user_id());
        let provisional = Message::provisional(&inner.channel_id, author, &request);
        inner.state.update(|s| {
            optimistic::begin(&mut s.replies, provisional);
            true
        });

        let result = inner
            .mount
            .ctx
            .client()
            .send_message(&inner.channel_id, &request)
            .await;
        if !inner.mount.is_alive() {
            return result;
        }

        match &result {
            Ok(server) => {
                inner.state.update(|s| {
                    let outcome =
                        optimistic::confirm_response(&mut s.replies, &request.client_msg_id, server.clone());
                    if outcome.is_first_acceptance() {
                        s.count_reply(&server.author.id);
                    }
                    outcome != Reconciliation::Ignored
                });
            }
            Err(err) => {
                tracing::warn!(parent_id = %inner.parent_id, error = %err, "reply failed");
                inner.state.update(|s| {
                    optimistic::fail(&mut s.replies, &request.client_msg_id);
                    s.error = Some(err.clone());
                    true
                });
            }
        }
        result
    }

    pub async fn unmount(self) {
        self.inner.mount.unmount().await;
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        self.inner.mount.dispose();
    }
}

impl ThreadInner {
    fn apply(&self, event: &ServerEvent) {
        if event.channel_id() != Some(self.channel_id.as_str()) {
            return;
        }
        match event {
            ServerEvent::MessageNew { message } => {
                if message.parent_id.as_deref() == Some(self.parent_id.as_str()) {
                    self.accept(message, None);
                }
            }
            ServerEvent::ThreadReply {
                parent_id,
                message,
                reply_count,
                ..
            } => {
                if *parent_id == self.parent_id {
                    self.accept(message, *reply_count);
                }
            }
            ServerEvent::MessageUpdated { message } if message.key() == self.parent_id => {
                self.state.update(|s| {
                    let next = Some(message.clone());
                    if s.parent == next {
                        return false;
                    }
                    s.parent = next;
                    true
                });
            }
            ServerEvent::MessageDeleted { message_id, .. } if *message_id == self.parent_id => {
                self.state.update(|s| {
                    match s.parent.as_ref().filter(|p| !p.deleted).map(Message::tombstoned) {
                        Some(tombstone) => {
                            s.parent = Some(tombstone);
                            true
                        }
                        None => false,
                    }
                });
            }
            other => {
                let me = self.mount.current_user_id();
                let sample = self.mount.ctx.config().reaction_sample_size;
                let mut reactions = self.reactions.lock();
                self.state.update(|s| {
                    apply_message_change(&mut s.replies, &mut reactions, other, me, sample)
                });
            }
        }
    }

    /// Reconcile a pushed reply; counts it only on first acceptance.
    fn accept(&self, reply: &Message, reported: Option<u32>) {
        self.state.update(|s| {
            let before = (s.reply_count, s.participants.len());
            let outcome = optimistic::reconcile_push(&mut s.replies, reply.clone());
            if outcome.is_first_acceptance() {
                s.count_reply(&reply.author.id);
            }
            if let Some(reported) = reported {
                s.reply_count = s.reply_count.max(reported);
            }
            outcome != Reconciliation::Ignored || before != (s.reply_count, s.participants.len())
        });
    }

    async fn load(&self) {
        let query = MessageQuery {
            limit: self.mount.ctx.config().message_page_size,
            before: None,
        };
        let result = self
            .mount
            .ctx
            .client()
            .query_replies(&self.channel_id, &self.parent_id, &query)
            .await;
        if !self.mount.is_alive() {
            return;
        }

        self.state.update(|s| {
            s.loading = false;
            match result {
                Ok(page) => {
                    let live: Vec<Message> = s.replies.items().to_vec();
                    s.replies.replace_all(page.replies);
                    for reply in live {
                        if s.replies.position_where(|m| m.same_entity(&reply)).is_none() {
                            s.replies.append(reply);
                        }
                    }

                    let visible = u32::try_from(s.replies.len()).unwrap_or(u32::MAX);
                    let mut authors: Vec<String> = Vec::new();
                    if let Some(parent) = page.parent {
                        s.reply_count = s.reply_count.max(parent.reply_count);
                        authors.extend(parent.thread_participants.iter().cloned());
                        s.parent = Some(parent);
                    }
                    s.reply_count = s.reply_count.max(visible);
                    authors.extend(s.replies.iter().map(|m| m.author.id.clone()));
                    for author in authors {
                        if !s.participants.contains(&author) {
                            s.participants.push(author);
                        }
                    }
                    s.has_more = page.has_more;
                }
                Err(err) => {
                    tracing::warn!(parent_id = %self.parent_id, error = %err, "failed to load thread");
                    s.error = Some(err);
                }
            }
            true
        });
    }
}
