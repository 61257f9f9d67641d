//! Message list of one channel (useMessages).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use murmur_shared::{
    ClientError, EventKind, Message, MessageQuery, SendMessageRequest, ServerEvent,
    UpdateMessageRequest, UserRef,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::Mount;
use crate::context::ChatContext;
use crate::scope::{LatestCallback, StateCell};
use crate::stores::optimistic::{self, Optimistic, Reconciliation};
use crate::stores::{EntityStore, Keyed};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessagesState {
    /// Oldest first.
    pub messages: EntityStore<Message>,
    pub loading: bool,
    pub loading_more: bool,
    pub has_more: bool,
    pub error: Option<ClientError>,
}

/// Live message list of one channel.
///
/// Seeded by a page query, kept current by `message.*`, `reaction.*` and
/// `thread.reply` events, and mutated optimistically by the local user.
/// Thread replies are not listed here; they only bump their parent's reply
/// count (see [`Thread`](super::Thread) for the replies themselves).
pub struct Messages {
    inner: Arc<MessagesInner>,
}

struct MessagesInner {
    mount: Mount,
    channel_id: String,
    state: StateCell<MessagesState>,
    on_new_message: LatestCallback<Message>,
    /// Reply ids already counted, per parent.
    counted_replies: Mutex<HashMap<String, HashSet<String>>>,
    reactions: Mutex<ReactionLedger>,
}

const HANDLED: [EventKind; 8] = [
    EventKind::MessageNew,
    EventKind::MessageUpdated,
    EventKind::MessageDeleted,
    EventKind::MessageStatusChanged,
    EventKind::ReactionAdded,
    EventKind::ReactionRemoved,
    EventKind::ThreadReply,
    EventKind::ChannelDeleted,
];

impl Messages {
    /// Subscribe to the channel and load its newest page.
    ///
    /// Listeners are attached before the query so nothing pushed during the
    /// load is lost. Failures land in [`MessagesState::error`].
    pub async fn mount(ctx: &ChatContext, channel_id: impl Into<String>) -> Self {
        let channel_id = channel_id.into();
        let inner = Arc::new(MessagesInner {
            mount: Mount::new(ctx, format!("messages:{channel_id}")),
            channel_id,
            state: StateCell::new(MessagesState {
                loading: true,
                ..MessagesState::default()
            }),
            on_new_message: LatestCallback::new(),
            counted_replies: Mutex::new(HashMap::new()),
            reactions: Mutex::new(ReactionLedger::default()),
        });
        MessagesInner::attach(&inner);

        if let Err(err) = inner.mount.subscribe(&inner.channel_id).await {
            inner.record_error(err);
        }
        inner.load_initial().await;

        Self { inner }
    }

    pub fn channel_id(&self) -> &str {
        &self.inner.channel_id
    }

    pub fn snapshot(&self) -> MessagesState {
        self.inner.state.snapshot()
    }

    /// Current messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .state
            .read(|s| s.messages.items().to_vec())
    }

    pub fn watch(&self) -> watch::Receiver<MessagesState> {
        self.inner.state.watch()
    }

    /// Called with every message that arrives by push and is new to the list.
    /// Replacing the callback does not touch the subscription.
    pub fn on_new_message(&self, callback: impl Fn(&Message) + Send + Sync + 'static) {
        self.inner.on_new_message.set(callback);
    }

    /// Fetch the page before the oldest loaded message. Returns how many
    /// messages were added.
    pub async fn load_more(&self) -> Result<usize, ClientError> {
        let inner = &self.inner;
        let before = {
            let mut before = None;
            let started = inner.state.update(|s| {
                if !s.has_more || s.loading_more || s.loading {
                    return false;
                }
                before = s.messages.iter().find_map(|m| m.seq);
                s.loading_more = true;
                true
            });
            if !started {
                return Ok(0);
            }
            before
        };

        let query = MessageQuery {
            limit: inner.mount.ctx.config().message_page_size,
            before,
        };
        let result = inner
            .mount
            .ctx
            .client()
            .query_messages(&inner.channel_id, &query)
            .await;
        if !inner.mount.is_alive() {
            return Err(ClientError::Disposed);
        }

        match result {
            Ok(page) => {
                let mut added = 0;
                inner.state.update(|s| {
                    s.loading_more = false;
                    s.has_more = page.has_more;
                    added = s
                        .messages
                        .prepend(page.messages.into_iter().filter(|m| !m.is_reply()).collect());
                    true
                });
                tracing::debug!(channel_id = %inner.channel_id, added, "loaded older messages");
                Ok(added)
            }
            Err(err) => {
                inner.state.update(|s| {
                    s.loading_more = false;
                    s.error = Some(err.clone());
                    true
                });
                Err(err)
            }
        }
    }

    /// Show `request` immediately and send it.
    ///
    /// Returns the server's copy. On failure the provisional message stays
    /// in the list marked `Failed` so it can be retried or discarded.
    pub async fn send(&self, request: SendMessageRequest) -> Result<Message, ClientError> {
        let inner = &self.inner;
        let author = UserRef::new(inner.mount.current_user_id());
        let provisional = Message::provisional(&inner.channel_id, author, &request);
        inner.state.update(|s| {
            optimistic::begin(&mut s.messages, provisional);
            true
        });
        inner.deliver(request).await
    }

    /// Send the text of a message body with a fresh correlation id.
    pub async fn send_text(&self, text: impl Into<String>) -> Result<Message, ClientError> {
        self.send(SendMessageRequest::new(text)).await
    }

    /// Resend a failed message under its original correlation id.
    /// `Ok(None)` when there is no failed message with that id.
    pub async fn retry(&self, client_msg_id: &str) -> Result<Option<Message>, ClientError> {
        let inner = &self.inner;
        let mut restarted = None;
        inner.state.update(|s| {
            restarted = optimistic::restart(&mut s.messages, client_msg_id);
            restarted.is_some()
        });
        let Some(message) = restarted else {
            return Ok(None);
        };
        let request = SendMessageRequest {
            text: message.text,
            client_msg_id: client_msg_id.to_string(),
            attachments: message.attachments,
            parent_id: message.parent_id,
        };
        inner.deliver(request).await.map(Some)
    }

    /// Drop a failed message from the list.
    pub fn discard(&self, client_msg_id: &str) -> bool {
        self.inner.state.update(|s| {
            let failed = s
                .messages
                .get(client_msg_id)
                .is_some_and(|m| m.is_provisional() && m.is_failed());
            failed && s.messages.remove(client_msg_id).is_some()
        })
    }

    /// Change a message's text, showing the edit before the server confirms.
    pub async fn edit(&self, message_id: &str, text: impl Into<String>) -> Result<(), ClientError> {
        let inner = &self.inner;
        let request = UpdateMessageRequest { text: text.into() };
        let previous = inner.replace_optimistically(message_id, |m| Message {
            text: request.text.clone(),
            edited: true,
            ..m.clone()
        });

        let result = inner
            .mount
            .ctx
            .client()
            .update_message(&inner.channel_id, message_id, &request)
            .await;
        if !inner.mount.is_alive() {
            return result.map(|_| ());
        }
        match result {
            Ok(server) => {
                inner.state.update(|s| {
                    s.messages
                        .patch_by_key(message_id, |current| current.confirmed_by(&server))
                });
                Ok(())
            }
            Err(err) => {
                inner.roll_back(message_id, previous, &err);
                Err(err)
            }
        }
    }

    /// Delete a message. It is tombstoned in place right away.
    pub async fn delete(&self, message_id: &str) -> Result<(), ClientError> {
        let inner = &self.inner;
        let previous = inner.replace_optimistically(message_id, Message::tombstoned);

        let result = inner
            .mount
            .ctx
            .client()
            .delete_message(&inner.channel_id, message_id)
            .await;
        if !inner.mount.is_alive() {
            return result;
        }
        if let Err(err) = &result {
            inner.roll_back(message_id, previous, err);
        }
        result
    }

    pub async fn add_reaction(&self, message_id: &str, reaction: &str) -> Result<(), ClientError> {
        self.inner.react(message_id, reaction, true).await
    }

    pub async fn remove_reaction(&self, message_id: &str, reaction: &str) -> Result<(), ClientError> {
        self.inner.react(message_id, reaction, false).await
    }

    /// Add the reaction if the current user has not reacted with it yet,
    /// remove it otherwise.
    pub async fn toggle_reaction(&self, message_id: &str, reaction: &str) -> Result<(), ClientError> {
        let own = self.inner.state.read(|s| {
            s.messages
                .get(message_id)
                .and_then(|m| m.reactions.get(reaction))
                .is_some_and(|r| r.own)
        });
        self.inner.react(message_id, reaction, !own).await
    }

    /// Tear down and wait for the channel to be unsubscribed.
    pub async fn unmount(self) {
        self.inner.mount.unmount().await;
    }
}

impl Drop for Messages {
    fn drop(&mut self) {
        self.inner.mount.dispose();
    }
}

impl MessagesInner {
    fn attach(inner: &Arc<Self>) {
        let client = inner.mount.ctx.client().clone();
        for kind in HANDLED {
            let weak: Weak<Self> = Arc::downgrade(inner);
            inner.mount.scope.listen(client.as_ref(), kind, move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply(event);
                }
            });
        }
    }

    fn apply(&self, event: &ServerEvent) {
        if event.channel_id() != Some(self.channel_id.as_str()) {
            return;
        }
        match event {
            ServerEvent::MessageNew { message } if message.is_reply() => {
                if let Some(parent_id) = message.parent_id.as_deref() {
                    self.note_reply(parent_id, message, None);
                }
            }
            ServerEvent::MessageNew { message } => {
                let mut outcome = Reconciliation::Ignored;
                self.state.update(|s| {
                    outcome = optimistic::reconcile_push(&mut s.messages, message.clone());
                    outcome != Reconciliation::Ignored
                });
                if outcome == Reconciliation::Inserted {
                    self.on_new_message.call(message);
                }
            }
            ServerEvent::ThreadReply {
                parent_id,
                message,
                reply_count,
                ..
            } => self.note_reply(parent_id, message, *reply_count),
            ServerEvent::ChannelDeleted { .. } => {
                tracing::info!(channel_id = %self.channel_id, "channel deleted");
                self.state.update(|s| {
                    s.messages.replace_all(Vec::new());
                    s.has_more = false;
                    true
                });
            }
            other => {
                let me = self.mount.current_user_id();
                let sample = self.mount.ctx.config().reaction_sample_size;
                let mut reactions = self.reactions.lock();
                self.state.update(|s| {
                    apply_message_change(&mut s.messages, &mut reactions, other, me, sample)
                });
            }
        }
    }

    /// Bump the parent's reply count for a reply seen by push.
    fn note_reply(&self, parent_id: &str, reply: &Message, reported: Option<u32>) {
        let fresh = match reply.id.as_deref() {
            Some(id) => self
                .counted_replies
                .lock()
                .entry(parent_id.to_string())
                .or_default()
                .insert(id.to_string()),
            None => false,
        };

        self.state.update(|s| {
            let Some(index) = s.messages.position(parent_id) else {
                return false;
            };
            let parent = &s.messages.items()[index];
            let mut next = parent.clone();
            if fresh {
                next.reply_count += 1;
                if !next.thread_participants.contains(&reply.author.id) {
                    next.thread_participants.push(reply.author.id.clone());
                }
            }
            if let Some(reported) = reported {
                next.reply_count = next.reply_count.max(reported);
            }
            if next == *parent {
                return false;
            }
            s.messages.replace_at(index, next);
            true
        });
    }

    async fn load_initial(&self) {
        let query = MessageQuery {
            limit: self.mount.ctx.config().message_page_size,
            before: None,
        };
        let result = self
            .mount
            .ctx
            .client()
            .query_messages(&self.channel_id, &query)
            .await;
        if !self.mount.is_alive() {
            return;
        }

        self.state.update(|s| {
            s.loading = false;
            match result {
                Ok(page) => {
                    // Anything pushed while the query was in flight stays.
                    let live: Vec<Message> = s.messages.items().to_vec();
                    s.messages
                        .replace_all(page.messages.into_iter().filter(|m| !m.is_reply()).collect());
                    for message in live {
                        if s.messages.position_where(|m| m.same_entity(&message)).is_none() {
                            s.messages.append(message);
                        }
                    }
                    s.has_more = page.has_more;
                    tracing::debug!(
                        channel_id = %self.channel_id,
                        count = s.messages.len(),
                        "messages loaded"
                    );
                }
                Err(err) => {
                    tracing::warn!(channel_id = %self.channel_id, error = %err, "failed to load messages");
                    s.error = Some(err);
                }
            }
            true
        });
    }

    async fn deliver(&self, request: SendMessageRequest) -> Result<Message, ClientError> {
        let result = self
            .mount
            .ctx
            .client()
            .send_message(&self.channel_id, &request)
            .await;
        if !self.mount.is_alive() {
            return result;
        }

        match &result {
            Ok(server) => {
                self.state.update(|s| {
                    optimistic::confirm_response(&mut s.messages, &request.client_msg_id, server.clone())
                        != Reconciliation::Ignored
                });
            }
            Err(err) => {
                tracing::warn!(
                    channel_id = %self.channel_id,
                    client_msg_id = %request.client_msg_id,
                    error = %err,
                    "send failed"
                );
                self.state.update(|s| {
                    optimistic::fail(&mut s.messages, &request.client_msg_id);
                    s.error = Some(err.clone());
                    true
                });
            }
        }
        result
    }

    async fn react(&self, message_id: &str, reaction: &str, add: bool) -> Result<(), ClientError> {
        let me = self.mount.current_user_id().to_string();
        let sample = self.mount.ctx.config().reaction_sample_size;
        let change = ReactionChange {
            message_id,
            reaction,
            user_id: &me,
            add,
        };
        let applied = {
            let mut reactions = self.reactions.lock();
            self.state
                .update(|s| reactions.apply(&mut s.messages, &change, &me, sample))
        };
        if !applied {
            return Ok(());
        }

        let client = self.mount.ctx.client();
        let result = if add {
            client.add_reaction(&self.channel_id, message_id, reaction).await
        } else {
            client.remove_reaction(&self.channel_id, message_id, reaction).await
        };
        if !self.mount.is_alive() {
            return result;
        }
        if let Err(err) = &result {
            tracing::warn!(channel_id = %self.channel_id, %message_id, %reaction, error = %err, "reaction failed");
            let undo = ReactionChange { add: !add, ..change };
            let mut reactions = self.reactions.lock();
            self.state.update(|s| {
                reactions.apply(&mut s.messages, &undo, &me, sample);
                s.error = Some(err.clone());
                true
            });
        }
        result
    }

    /// Replace a message locally, returning the previous copy for rollback.
    fn replace_optimistically(
        &self,
        message_id: &str,
        change: impl FnOnce(&Message) -> Message,
    ) -> Option<Message> {
        let mut previous = None;
        self.state.update(|s| {
            previous = s.messages.get(message_id).cloned();
            s.messages.patch_by_key(message_id, change)
        });
        previous
    }

    fn roll_back(&self, message_id: &str, previous: Option<Message>, err: &ClientError) {
        tracing::warn!(channel_id = %self.channel_id, %message_id, error = %err, "message change rejected");
        self.state.update(|s| {
            if let Some(previous) = previous {
                s.messages.patch_by_key(message_id, |_| previous);
            }
            s.error = Some(err.clone());
            true
        });
    }

    fn record_error(&self, err: ClientError) {
        tracing::warn!(channel_id = %self.channel_id, error = %err, "subscribe failed");
        self.state.update(|s| {
            s.error = Some(err);
            true
        });
    }
}

/// Apply a per-message push event (edit, delete, status, reaction) to a
/// store. Returns whether anything changed.
pub(crate) fn apply_message_change(
    store: &mut EntityStore<Message>,
    reactions: &mut ReactionLedger,
    event: &ServerEvent,
    current_user_id: &str,
    reaction_sample_size: usize,
) -> bool {
    match event {
        ServerEvent::MessageUpdated { message } => {
            let Some(current) = store.get(message.key()) else {
                return false;
            };
            let next = current.confirmed_by(message);
            if next == *current {
                return false;
            }
            store.patch_by_key(message.key(), |_| next)
        }
        ServerEvent::MessageDeleted { message_id, .. } => {
            let live = store.get(message_id).is_some_and(|m| !m.deleted);
            live && store.tombstone(message_id, Message::tombstoned)
        }
        ServerEvent::MessageStatusChanged {
            message_id, status, ..
        } => {
            let Some(current) = store.get(message_id) else {
                return false;
            };
            let next = optimistic::reported_status(current.status, *status);
            if next == current.status {
                return false;
            }
            store.patch_by_key(message_id, |m| m.with_status(next))
        }
        ServerEvent::ReactionAdded {
            message_id,
            reaction,
            user_id,
            ..
        }
        | ServerEvent::ReactionRemoved {
            message_id,
            reaction,
            user_id,
            ..
        } => {
            let change = ReactionChange {
                message_id,
                reaction,
                user_id,
                add: matches!(event, ServerEvent::ReactionAdded { .. }),
            };
            reactions.apply(store, &change, current_user_id, reaction_sample_size)
        }
        _ => false,
    }
}

/// One user adding or removing one reaction on one message.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ReactionChange<'a> {
    pub message_id: &'a str,
    pub reaction: &'a str,
    pub user_id: &'a str,
    pub add: bool,
}

/// Last known state of every (message, reaction, user) seen through an event
/// or a local change. A summary only samples its reactors, so without this a
/// repeated event from a user outside the sample would be counted again.
#[derive(Debug, Default)]
pub(crate) struct ReactionLedger {
    present: HashMap<(String, String, String), bool>,
}

impl ReactionLedger {
    /// Apply `change` to its message in `store`. Returns whether the store
    /// changed.
    pub(crate) fn apply(
        &mut self,
        store: &mut EntityStore<Message>,
        change: &ReactionChange<'_>,
        current_user_id: &str,
        sample_size: usize,
    ) -> bool {
        let key = (
            change.message_id.to_string(),
            change.reaction.to_string(),
            change.user_id.to_string(),
        );
        if self.present.get(&key) == Some(&change.add) {
            return false;
        }
        let Some(current) = store.get(change.message_id) else {
            return false;
        };
        let next = apply_reaction(current, change, current_user_id, sample_size);
        self.present.insert(key, change.add);
        match next {
            Some(next) => store.patch_by_key(change.message_id, |_| next),
            None => false,
        }
    }
}

/// The message after a reaction change, or `None` when the change is
/// already reflected in its summary (the local user's own echo, a repeated
/// event from a sampled user).
fn apply_reaction(
    message: &Message,
    change: &ReactionChange<'_>,
    current_user_id: &str,
    sample_size: usize,
) -> Option<Message> {
    let ReactionChange {
        reaction,
        user_id,
        add,
        ..
    } = *change;
    let is_self = user_id == current_user_id;
    let mut summary = message.reactions.get(reaction).cloned().unwrap_or_default();
    let listed = summary.users.iter().any(|u| u == user_id);

    if add {
        if (is_self && summary.own) || (!is_self && listed) {
            return None;
        }
        summary.count += 1;
        if is_self {
            summary.own = true;
        }
        if !listed && summary.users.len() < sample_size {
            summary.users.push(user_id.to_string());
        }
    } else {
        if summary.count == 0 || (is_self && !summary.own) {
            return None;
        }
        summary.count -= 1;
        if is_self {
            summary.own = false;
        }
        summary.users.retain(|u| u != user_id);
    }

    let mut next = message.clone();
    if summary.count == 0 {
        next.reactions.remove(reaction);
    } else {
        next.reactions.insert(reaction.to_string(), summary);
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_shared::MessageStatus;

    fn message(id: &str) -> Message {
        let request = SendMessageRequest::new("hello");
        Message {
            id: Some(id.into()),
            client_msg_id: None,
            status: MessageStatus::Sent,
            seq: Some(1),
            created_at: Utc::now(),
            ..Message::provisional("c1", UserRef::new("author"), &request)
        }
    }

    fn change<'a>(user_id: &'a str, reaction: &'a str, add: bool) -> ReactionChange<'a> {
        ReactionChange {
            message_id: "m1",
            reaction,
            user_id,
            add,
        }
    }

    #[test]
    fn own_reaction_echo_is_not_counted_twice() {
        let local = apply_reaction(&message("m1"), &change("me", "👍", true), "me", 5).unwrap();
        assert_eq!(local.reactions["👍"].count, 1);
        assert!(local.reactions["👍"].own);

        assert!(apply_reaction(&local, &change("me", "👍", true), "me", 5).is_none());
    }

    #[test]
    fn reaction_sample_is_capped() {
        let mut current = message("m1");
        for user in ["a", "b", "c"] {
            current = apply_reaction(&current, &change(user, "🎉", true), "me", 2).unwrap();
        }
        let summary = &current.reactions["🎉"];
        assert_eq!(summary.count, 3);
        assert_eq!(summary.users, vec!["a", "b"]);
        assert!(!summary.own);
    }

    #[test]
    fn repeated_reaction_beyond_the_sample_is_counted_once() {
        let mut store = EntityStore::new();
        store.append(message("m1"));
        let mut ledger = ReactionLedger::default();
        for user in ["a", "b", "c", "d", "e", "f"] {
            assert!(ledger.apply(&mut store, &change(user, "🎉", true), "me", 5));
        }
        assert!(!ledger.apply(&mut store, &change("f", "🎉", true), "me", 5));
        assert_eq!(store.get("m1").unwrap().reactions["🎉"].count, 6);

        assert!(ledger.apply(&mut store, &change("f", "🎉", false), "me", 5));
        assert!(!ledger.apply(&mut store, &change("f", "🎉", false), "me", 5));
        assert_eq!(store.get("m1").unwrap().reactions["🎉"].count, 5);
    }

    #[test]
    fn removing_last_reaction_drops_the_entry() {
        let added = apply_reaction(&message("m1"), &change("a", "👍", true), "me", 5).unwrap();
        let removed = apply_reaction(&added, &change("a", "👍", false), "me", 5).unwrap();
        assert!(removed.reactions.is_empty());
        assert!(apply_reaction(&removed, &change("a", "👍", false), "me", 5).is_none());
    }

    #[test]
    fn status_changes_never_regress() {
        let mut store = EntityStore::new();
        store.append(message("m1").with_status(MessageStatus::Read));
        let mut ledger = ReactionLedger::default();

        let event = ServerEvent::MessageStatusChanged {
            channel_id: "c1".into(),
            message_id: "m1".into(),
            status: MessageStatus::Delivered,
        };
        assert!(!apply_message_change(&mut store, &mut ledger, &event, "me", 5));
        assert_eq!(store.get("m1").unwrap().status, MessageStatus::Read);
    }

    #[test]
    fn reported_failure_on_update_keeps_the_status() {
        let mut store = EntityStore::new();
        store.append(message("m1"));
        let mut ledger = ReactionLedger::default();

        let mut failed = message("m1").with_status(MessageStatus::Failed);
        failed.text = "edited".into();
        let event = ServerEvent::MessageUpdated { message: failed };
        assert!(apply_message_change(&mut store, &mut ledger, &event, "me", 5));
        let current = store.get("m1").unwrap();
        assert_eq!(current.text, "edited");
        assert_eq!(current.status, MessageStatus::Sent);
    }

    #[test]
    fn delete_of_unknown_message_is_a_no_op() {
        let mut store = EntityStore::new();
        store.append(message("m1"));
        let mut ledger = ReactionLedger::default();
        let event = ServerEvent::MessageDeleted {
            channel_id: "c1".into(),
            message_id: "missing".into(),
        };
        assert!(!apply_message_change(&mut store, &mut ledger, &event, "me", 5));
        assert_eq!(store.len(), 1);
    }
}
