//! Read positions and the current user's unread count for one channel
//! (useReadState).

use std::collections::BTreeSet;
use std::sync::Arc;

use murmur_shared::{ClientError, EventKind, ReadState, ServerEvent};
use tokio::sync::watch;

use super::Mount;
use crate::context::ChatContext;
use crate::scope::StateCell;

/// Unread messages of the current user, tracked by sequence number where
/// the server provides one so a read receipt can clear exactly the messages
/// it covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct UnreadTracker {
    seqs: BTreeSet<u64>,
    unsequenced: u32,
}

impl UnreadTracker {
    fn count(&self) -> u32 {
        u32::try_from(self.seqs.len())
            .unwrap_or(u32::MAX)
            .saturating_add(self.unsequenced)
    }

    fn note(&mut self, seq: Option<u64>) -> bool {
        match seq {
            Some(seq) => self.seqs.insert(seq),
            None => {
                self.unsequenced = self.unsequenced.saturating_add(1);
                true
            }
        }
    }

    /// A read position covers everything delivered before it, including
    /// the seeded count and messages without a seq.
    fn read_through(&mut self, seq: u64) {
        match seq.checked_add(1) {
            Some(next) => self.seqs = self.seqs.split_off(&next),
            None => self.seqs.clear(),
        }
        self.unsequenced = 0;
    }

    /// Take an authoritative count from the server.
    fn reset_to(&mut self, count: u32) {
        self.seqs.clear();
        self.unsequenced = count;
    }

    fn absorb(&mut self, other: UnreadTracker) {
        self.seqs.extend(other.seqs);
        self.unsequenced = self.unsequenced.saturating_add(other.unsequenced);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadStateView {
    /// Everyone's read positions in this channel.
    pub read_state: ReadState,
    pub unread_count: u32,
    pub error: Option<ClientError>,
    tracker: UnreadTracker,
}

impl ReadStateView {
    fn publish(&mut self) {
        self.unread_count = self.tracker.count();
    }
}

pub struct ReadStateHook {
    inner: Arc<ReadInner>,
}

struct ReadInner {
    mount: Mount,
    channel_id: String,
    state: StateCell<ReadStateView>,
}

const HANDLED: [EventKind; 3] = [
    EventKind::MessageNew,
    EventKind::ReadUpdated,
    EventKind::ChannelUnreadChanged,
];

impl ReadStateHook {
    /// Track `channel_id`, starting from the unread count the caller already
    /// knows (usually [`Channel::unread_count`](murmur_shared::Channel)).
    pub fn mount(ctx: &ChatContext, channel_id: impl Into<String>, unread_count: u32) -> Self {
        let channel_id = channel_id.into();
        let mut initial = ReadStateView {
            read_state: ReadState::new(channel_id.clone()),
            ..ReadStateView::default()
        };
        initial.tracker.reset_to(unread_count);
        initial.publish();

        let inner = Arc::new(ReadInner {
            mount: Mount::new(ctx, format!("read:{channel_id}")),
            channel_id,
            state: StateCell::new(initial),
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

        Self { inner }
    }

    pub fn unread_count(&self) -> u32 {
        self.inner.state.read(|s| s.unread_count)
    }

    pub fn read_state(&self) -> ReadState {
        self.inner.state.read(|s| s.read_state.clone())
    }

    pub fn snapshot(&self) -> ReadStateView {
        self.inner.state.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<ReadStateView> {
        self.inner.state.watch()
    }

    /// Mark the channel read.
    ///
    /// The count drops to zero before the request is sent. Messages pushed
    /// while it is in flight still count, and a later server-reported count
    /// overrides the local one. If the request fails the previous unread
    /// messages are restored.
    pub async fn mark_as_read(&self) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut cleared = UnreadTracker::default();
        inner.state.update(|s| {
            cleared = std::mem::take(&mut s.tracker);
            s.error = None;
            s.publish();
            true
        });

        let result = inner.mount.ctx.client().mark_read(&inner.channel_id).await;
        if !inner.mount.is_alive() {
            return result;
        }
        if let Err(err) = &result {
            tracing::warn!(channel_id = %inner.channel_id, error = %err, "mark read failed");
            inner.state.update(|s| {
                s.tracker.absorb(cleared);
                s.error = Some(err.clone());
                s.publish();
                true
            });
        }
        result
    }

    pub async fn unmount(self) {
        self.inner.mount.unmount().await;
    }
}

impl Drop for ReadStateHook {
    fn drop(&mut self) {
        self.inner.mount.dispose();
    }
}

impl ReadInner {
    fn apply(&self, event: &ServerEvent) {
        if event.channel_id() != Some(self.channel_id.as_str()) {
            return;
        }
        match event {
            ServerEvent::MessageNew { message } => {
                if self.mount.ctx.is_current_user(&message.author.id) {
                    return;
                }
                self.state.update(|s| {
                    let me = self.mount.current_user_id();
                    let already_read = matches!(
                        (message.seq, s.read_state.last_read.get(me)),
                        (Some(seq), Some(read)) if seq <= *read
                    );
                    if already_read || !s.tracker.note(message.seq) {
                        return false;
                    }
                    s.publish();
                    true
                });
            }
            ServerEvent::ReadUpdated {
                user_id,
                last_read_seq,
                unread_count,
                ..
            } => {
                let is_self = self.mount.ctx.is_current_user(user_id);
                self.state.update(|s| {
                    let mut changed = false;
                    if let Some(seq) = last_read_seq {
                        changed |= s.read_state.advance(user_id, *seq);
                    }
                    if !is_self {
                        return changed;
                    }
                    match (unread_count, last_read_seq) {
                        (Some(count), _) => s.tracker.reset_to(*count),
                        (None, Some(seq)) => s.tracker.read_through(*seq),
                        (None, None) => s.tracker.reset_to(0),
                    }
                    let before = s.unread_count;
                    s.publish();
                    changed || before != s.unread_count
                });
            }
            ServerEvent::ChannelUnreadChanged { unread_count, .. } => {
                self.state.update(|s| {
                    s.tracker.reset_to(*unread_count);
                    let before = s.unread_count;
                    s.publish();
                    before != s.unread_count
                });
            }
            _ => {}
        }
    }
}
