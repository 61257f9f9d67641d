//! Channel list with unread aggregates (useChannels).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use murmur_shared::{
    Channel, ChannelQuery, ChannelType, ClientError, EventKind, LastMessage, Message, ServerEvent,
};
use parking_lot::Mutex;
use tokio::sync::watch;

use super::Mount;
use crate::context::ChatContext;
use crate::scope::StateCell;
use crate::stores::EntityStore;

/// What to list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelsOptions {
    /// Only list channels of this type.
    pub channel_type: Option<ChannelType>,
    /// Topic carrying `channel.*` events for the listed channels, usually a
    /// workspace id. Without one the list relies on events delivered anyway.
    pub workspace_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelsState {
    pub channels: EntityStore<Channel>,
    pub loading: bool,
    pub loading_more: bool,
    pub has_more: bool,
    pub error: Option<ClientError>,
    /// Total reported by the server. It may arrive before any channel does.
    pub total_unread: Option<u32>,
}

impl ChannelsState {
    /// The server total when known, the sum over loaded channels otherwise.
    pub fn total_unread(&self) -> u32 {
        self.total_unread.unwrap_or_else(|| {
            self.channels
                .iter()
                .fold(0u32, |sum, c| sum.saturating_add(c.unread_count))
        })
    }

    /// Apply a change of one channel's unread count, keeping a known total
    /// in step with it.
    fn set_unread(&mut self, channel_id: &str, unread_count: u32) -> bool {
        let Some(previous) = self.channels.get(channel_id).map(|c| c.unread_count) else {
            return false;
        };
        if previous == unread_count {
            return false;
        }
        self.channels.patch_by_key(channel_id, |c| Channel {
            unread_count,
            ..c.clone()
        });
        if let Some(total) = self.total_unread.as_mut() {
            *total = if unread_count > previous {
                total.saturating_add(unread_count - previous)
            } else {
                total.saturating_sub(previous - unread_count)
            };
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
enum Page {
    Initial,
    Refresh,
    Next(usize),
}

pub struct Channels {
    inner: Arc<ChannelsInner>,
}

struct ChannelsInner {
    mount: Mount,
    options: ChannelsOptions,
    state: StateCell<ChannelsState>,
    /// Message keys already counted as unread, per channel.
    counted: Mutex<HashMap<String, HashSet<String>>>,
}

const HANDLED: [EventKind; 6] = [
    EventKind::ChannelCreated,
    EventKind::ChannelUpdated,
    EventKind::ChannelDeleted,
    EventKind::ChannelUnreadChanged,
    EventKind::TotalUnreadChanged,
    EventKind::MessageNew,
];

impl Channels {
    pub async fn mount(ctx: &ChatContext, options: ChannelsOptions) -> Self {
        let label = match &options.workspace_id {
            Some(workspace_id) => format!("channels:{workspace_id}"),
            None => "channels".to_string(),
        };
        let inner = Arc::new(ChannelsInner {
            mount: Mount::new(ctx, label),
            options,
            state: StateCell::new(ChannelsState {
                loading: true,
                ..ChannelsState::default()
            }),
            counted: Mutex::new(HashMap::new()),
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

        if let Some(workspace_id) = inner.options.workspace_id.clone() {
            if let Err(err) = inner.mount.subscribe(&workspace_id).await {
                tracing::warn!(%workspace_id, error = %err, "workspace subscribe failed");
                inner.state.update(|s| {
                    s.error = Some(err);
                    true
                });
            }
        }
        let _ = inner.fetch(Page::Initial).await;

        Self { inner }
    }

    pub fn snapshot(&self) -> ChannelsState {
        self.inner.state.snapshot()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.inner.state.read(|s| s.channels.items().to_vec())
    }

    pub fn channel(&self, channel_id: &str) -> Option<Channel> {
        self.inner.state.read(|s| s.channels.get(channel_id).cloned())
    }

    pub fn total_unread(&self) -> u32 {
        self.inner.state.read(ChannelsState::total_unread)
    }

    pub fn watch(&self) -> watch::Receiver<ChannelsState> {
        self.inner.state.watch()
    }

    /// Fetch the next page. Returns how many channels were added.
    pub async fn load_more(&self) -> Result<usize, ClientError> {
        let offset = {
            let mut offset = 0;
            let started = self.inner.state.update(|s| {
                if !s.has_more || s.loading || s.loading_more {
                    return false;
                }
                offset = s.channels.len();
                s.loading_more = true;
                true
            });
            if !started {
                return Ok(0);
            }
            offset
        };
        self.inner.fetch(Page::Next(offset)).await
    }

    /// Reload the first page, replacing the list.
    pub async fn refresh(&self) -> Result<usize, ClientError> {
        self.inner.state.update(|s| {
            s.loading = true;
            true
        });
        self.inner.fetch(Page::Refresh).await
    }

    pub async fn unmount(self) {
        self.inner.mount.unmount().await;
    }
}

impl Drop for Channels {
    fn drop(&mut self) {
        self.inner.mount.dispose();
    }
}

impl ChannelsInner {
    fn accepts(&self, channel: &Channel) -> bool {
        let type_ok = self
            .options
            .channel_type
            .as_ref()
            .map_or(true, |t| *t == channel.channel_type);
        let workspace_ok = match (&self.options.workspace_id, &channel.workspace_id) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        };
        type_ok && workspace_ok
    }

    /// True the first time a message is seen for its channel.
    fn count_once(&self, message: &Message) -> bool {
        self.counted
            .lock()
            .entry(message.channel_id.clone())
            .or_default()
            .insert(message.key().to_string())
    }

    fn apply(&self, event: &ServerEvent) {
        match event {
            ServerEvent::ChannelCreated { channel } => {
                if self.accepts(channel) {
                    self.state.update(|s| {
                        s.channels.append(channel.clone());
                        true
                    });
                }
            }
            ServerEvent::ChannelUpdated { channel } => {
                self.state.update(|s| {
                    let Some(current) = s.channels.get(&channel.id) else {
                        return false;
                    };
                    if current == channel {
                        return false;
                    }
                    s.channels.patch_by_key(&channel.id, |_| channel.clone())
                });
            }
            ServerEvent::ChannelDeleted { channel_id } => {
                self.state.update(|s| {
                    let Some(removed) = s.channels.remove(channel_id) else {
                        return false;
                    };
                    if let Some(total) = s.total_unread.as_mut() {
                        *total = total.saturating_sub(removed.unread_count);
                    }
                    true
                });
            }
            ServerEvent::ChannelUnreadChanged {
                channel_id,
                unread_count,
            } => {
                self.state
                    .update(|s| s.set_unread(channel_id, *unread_count));
            }
            ServerEvent::TotalUnreadChanged { total_unread_count } => {
                self.state.update(|s| {
                    if s.total_unread == Some(*total_unread_count) {
                        return false;
                    }
                    s.total_unread = Some(*total_unread_count);
                    true
                });
            }
            ServerEvent::MessageNew { message } => {
                let from_other = !self.mount.ctx.is_current_user(&message.author.id);
                self.state.update(|s| {
                    let Some(current) = s.channels.get(&message.channel_id).cloned() else {
                        return false;
                    };
                    let mut changed = false;
                    if !message.is_reply() {
                        if let Some(summary) = LastMessage::from_message(message) {
                            if current.last_message.as_ref() != Some(&summary) {
                                s.channels.patch_by_key(&current.id, |c| Channel {
                                    last_message: Some(summary),
                                    updated_at: message.created_at.max(c.updated_at),
                                    ..c.clone()
                                });
                                changed = true;
                            }
                        }
                    }
                    if from_other && !current.is_muted && self.count_once(message) {
                        changed |= s.set_unread(&current.id, current.unread_count.saturating_add(1));
                    }
                    changed
                });
            }
            _ => {}
        }
    }

    async fn fetch(&self, page: Page) -> Result<usize, ClientError> {
        let offset = match page {
            Page::Initial | Page::Refresh => 0,
            Page::Next(offset) => offset,
        };
        let limit = self.mount.ctx.config().channel_page_size;
        let query = ChannelQuery {
            channel_type: self.options.channel_type.clone(),
            limit,
            offset: u32::try_from(offset).unwrap_or(u32::MAX),
        };
        let result = self.mount.ctx.client().query_channels(&query).await;
        if !self.mount.is_alive() {
            return Err(ClientError::Disposed);
        }

        match result {
            Ok(channels) => {
                let fetched = channels.len();
                let mut added = 0;
                self.state.update(|s| {
                    s.loading = false;
                    s.loading_more = false;
                    s.has_more = u32::try_from(fetched).is_ok_and(|n| n >= limit);
                    s.error = None;
                    match page {
                        Page::Initial => {
                            // Channels created by push during the query stay listed.
                            let live: Vec<Channel> = s.channels.items().to_vec();
                            s.channels.replace_all(channels);
                            for channel in live {
                                if !s.channels.contains(&channel.id) {
                                    s.channels.append(channel);
                                }
                            }
                            added = s.channels.len();
                        }
                        Page::Refresh => {
                            s.channels.replace_all(channels);
                            added = s.channels.len();
                        }
                        Page::Next(_) => {
                            for channel in channels {
                                if !s.channels.contains(&channel.id) {
                                    s.channels.append(channel);
                                    added += 1;
                                }
                            }
                        }
                    }
                    true
                });
                tracing::debug!(offset, fetched, added, "channels loaded");
                Ok(added)
            }
            Err(err) => {
                tracing::warn!(offset, error = %err, "failed to load channels");
                self.state.update(|s| {
                    s.loading = false;
                    s.loading_more = false;
                    s.error = Some(err.clone());
                    true
                });
                Err(err)
            }
        }
    }
}
