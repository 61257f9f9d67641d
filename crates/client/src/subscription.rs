//! Topic subscriptions shared by every scope of one client connection.
//!
//! Each consuming scope holds a [`SubscriptionLease`]. The first lease on a
//! topic issues the underlying subscribe; later ones piggyback on it, even
//! while it is still in flight. When the last lease goes away the topic is
//! unsubscribed, whether or not the subscribe ever resolved.
//!
//! ```text
//!  unsubscribed ──acquire──▶ subscribing ──ok / conflict──▶ subscribed
//!        ▲                        │                              │
//!        │                        └──────other error──▶ error    │
//!        └──────────────── last lease released ◀────────────────┘
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use murmur_shared::{ClientError, EventKind, ServerEvent};
use parking_lot::Mutex;

use crate::client::ChatClient;
use crate::config::{ConflictPredicate, SyncConfig};
use crate::events::ListenerGuard;

type SubscribeFuture = Shared<BoxFuture<'static, Result<(), ClientError>>>;
type DrainFuture = Shared<BoxFuture<'static, ()>>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionStatus {
    #[default]
    Unsubscribed,
    Subscribing,
    Subscribed,
    Error(ClientError),
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SubscriptionStatus::Subscribing | SubscriptionStatus::Subscribed
        )
    }
}

struct TopicEntry {
    leases: usize,
    status: SubscriptionStatus,
    in_flight: Option<SubscribeFuture>,
    generation: u64,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<String, TopicEntry>,
    /// Unsubscribes still running, keyed by topic, tagged with a generation.
    draining: HashMap<String, (u64, DrainFuture)>,
    next_generation: u64,
    connection_lost: bool,
}

impl Registry {
    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

struct ManagerInner {
    client: Arc<dyn ChatClient>,
    is_conflict: ConflictPredicate,
    resubscribe_on_reconnect: bool,
    registry: Mutex<Registry>,
    listeners: Mutex<Vec<ListenerGuard>>,
}

#[derive(Clone)]
pub struct SubscriptionManager {
    inner: Arc<ManagerInner>,
}

impl SubscriptionManager {
    pub fn new(client: Arc<dyn ChatClient>, config: &SyncConfig) -> Self {
        let inner = Arc::new(ManagerInner {
            client,
            is_conflict: config.conflict_predicate.clone(),
            resubscribe_on_reconnect: config.resubscribe_on_reconnect,
            registry: Mutex::new(Registry::default()),
            listeners: Mutex::new(Vec::new()),
        });

        let mut guards = Vec::new();
        for kind in [
            EventKind::Disconnected,
            EventKind::Reconnecting,
            EventKind::Connected,
        ] {
            let weak = Arc::downgrade(&inner);
            guards.push(inner.client.on(
                kind,
                Arc::new(move |event: &ServerEvent| {
                    if let Some(inner) = weak.upgrade() {
                        inner.on_connection_event(event);
                    }
                }),
            ));
        }
        *inner.listeners.lock() = guards;

        Self { inner }
    }

    /// Take a lease on `topic`, subscribing first if nobody holds one.
    ///
    /// Concurrent callers for the same topic share one underlying subscribe
    /// call. A conflict ("already subscribed") counts as success. On any
    /// other error the lease is given back and the error returned.
    pub async fn subscribe(&self, topic: &str) -> Result<SubscriptionLease, ClientError> {
        let (lease, pending) = self.acquire(topic);
        if let Some(pending) = pending {
            pending.await?;
        }
        Ok(lease)
    }

    pub fn status(&self, topic: &str) -> SubscriptionStatus {
        self.inner
            .registry
            .lock()
            .topics
            .get(topic)
            .map(|entry| entry.status.clone())
            .unwrap_or_default()
    }

    /// Number of live leases on `topic`.
    pub fn lease_count(&self, topic: &str) -> usize {
        self.inner
            .registry
            .lock()
            .topics
            .get(topic)
            .map_or(0, |entry| entry.leases)
    }

    /// Topics currently subscribed or subscribing.
    pub fn active_topics(&self) -> Vec<String> {
        let registry = self.inner.registry.lock();
        let mut topics: Vec<String> = registry
            .topics
            .iter()
            .filter(|(_, entry)| entry.status.is_active())
            .map(|(topic, _)| topic.clone())
            .collect();
        topics.sort();
        topics
    }

    /// Unsubscribe everything. Leases still held afterwards release as no-ops.
    pub async fn shutdown(&self) {
        self.inner.listeners.lock().clear();

        let drains: Vec<DrainFuture> = {
            let mut guard = self.inner.registry.lock();
            let registry = &mut *guard;
            let entries: Vec<(String, TopicEntry)> = registry.topics.drain().collect();
            let mut drains = Vec::new();
            for (topic, entry) in entries {
                if entry.status.is_active() {
                    let generation = registry.bump();
                    let drain = self.inner.drain(topic.clone(), generation, entry.in_flight);
                    registry
                        .draining
                        .insert(topic, (generation, drain.clone()));
                    drains.push(drain);
                }
            }
            drains
        };

        tracing::info!(topics = drains.len(), "shutting down subscriptions");
        join_all(drains).await;
    }

    fn acquire(&self, topic: &str) -> (SubscriptionLease, Option<SubscribeFuture>) {
        let mut guard = self.inner.registry.lock();
        let registry = &mut *guard;
        let generation = registry.bump();
        let drain = registry.draining.get(topic).map(|(_, drain)| drain.clone());

        let entry = registry
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicEntry {
                leases: 0,
                status: SubscriptionStatus::Unsubscribed,
                in_flight: None,
                generation,
            });
        entry.leases += 1;

        let pending = match entry.status {
            SubscriptionStatus::Subscribed => None,
            SubscriptionStatus::Subscribing => entry.in_flight.clone(),
            SubscriptionStatus::Unsubscribed | SubscriptionStatus::Error(_) => {
                tracing::debug!(%topic, "subscribing");
                let future = self.inner.start(topic, generation, drain);
                entry.status = SubscriptionStatus::Subscribing;
                entry.in_flight = Some(future.clone());
                entry.generation = generation;
                Some(future)
            }
        };

        let lease = SubscriptionLease {
            inner: self.inner.clone(),
            topic: topic.to_string(),
            released: false,
        };
        (lease, pending)
    }
}

impl ManagerInner {
    /// Build the shared subscribe future for one generation of a topic.
    fn start(
        self: &Arc<Self>,
        topic: &str,
        generation: u64,
        drain: Option<DrainFuture>,
    ) -> SubscribeFuture {
        let weak = Arc::downgrade(self);
        let client = self.client.clone();
        let is_conflict = self.is_conflict.clone();
        let topic = topic.to_string();

        async move {
            // A previous unsubscribe of this topic must land first.
            if let Some(drain) = drain {
                drain.await;
            }
            let result = match client.subscribe_to_channel(&topic).await {
                Err(err) if is_conflict(&err) => {
                    tracing::debug!(%topic, error = %err, "already subscribed, treating as success");
                    Ok(())
                }
                other => other,
            };
            if let Some(inner) = weak.upgrade() {
                inner.settle(&topic, generation, &result);
            }
            result
        }
        .boxed()
        .shared()
    }

    fn settle(&self, topic: &str, generation: u64, result: &Result<(), ClientError>) {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.topics.get_mut(topic) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.in_flight = None;
        entry.status = match result {
            Ok(()) => SubscriptionStatus::Subscribed,
            Err(err) => {
                tracing::warn!(%topic, error = %err, "subscribe failed");
                SubscriptionStatus::Error(err.clone())
            }
        };
    }

    /// Give back one lease. Returns the unsubscribe to run when it was the last.
    fn release(self: &Arc<Self>, topic: &str) -> Option<DrainFuture> {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;
        let entry = registry.topics.get_mut(topic)?;
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases > 0 {
            return None;
        }
        if !entry.status.is_active() {
            // Keep a failed status observable; nothing to tear down server-side.
            if entry.status == SubscriptionStatus::Unsubscribed {
                registry.topics.remove(topic);
            }
            return None;
        }

        let entry = registry.topics.remove(topic)?;
        let generation = registry.bump();
        tracing::debug!(%topic, "last lease released, unsubscribing");
        let drain = self.drain(topic.to_string(), generation, entry.in_flight);
        registry
            .draining
            .insert(topic.to_string(), (generation, drain.clone()));
        Some(drain)
    }

    fn drain(
        self: &Arc<Self>,
        topic: String,
        generation: u64,
        in_flight: Option<SubscribeFuture>,
    ) -> DrainFuture {
        let weak = Arc::downgrade(self);
        let client = self.client.clone();

        let drain = async move {
            if let Some(in_flight) = in_flight {
                let _ = in_flight.await;
            }
            if let Err(err) = client.unsubscribe_from_channel(&topic).await {
                tracing::warn!(%topic, error = %err, "unsubscribe failed");
            }
            if let Some(inner) = weak.upgrade() {
                let mut registry = inner.registry.lock();
                if matches!(registry.draining.get(&topic), Some((g, _)) if *g == generation) {
                    registry.draining.remove(&topic);
                }
            }
        }
        .boxed()
        .shared();

        spawn_detached(drain.clone());
        drain
    }

    fn on_connection_event(self: &Arc<Self>, event: &ServerEvent) {
        match event {
            ServerEvent::Disconnected { .. } | ServerEvent::Reconnecting { .. } => {
                self.registry.lock().connection_lost = true;
            }
            ServerEvent::Connected => {
                let restarted = self.restart_after_reconnect();
                for future in restarted {
                    spawn_detached(future.map(|_| ()));
                }
            }
            _ => {}
        }
    }

    fn restart_after_reconnect(self: &Arc<Self>) -> Vec<SubscribeFuture> {
        let mut guard = self.registry.lock();
        let registry = &mut *guard;
        if !std::mem::take(&mut registry.connection_lost) || !self.resubscribe_on_reconnect {
            return Vec::new();
        }

        let topics: Vec<String> = registry
            .topics
            .iter()
            .filter(|(_, entry)| entry.leases > 0 && entry.status != SubscriptionStatus::Subscribing)
            .map(|(topic, _)| topic.clone())
            .collect();

        let mut restarted = Vec::with_capacity(topics.len());
        for topic in topics {
            let generation = registry.bump();
            let drain = registry.draining.get(&topic).map(|(_, drain)| drain.clone());
            let future = self.start(&topic, generation, drain);
            if let Some(entry) = registry.topics.get_mut(&topic) {
                entry.status = SubscriptionStatus::Subscribing;
                entry.in_flight = Some(future.clone());
                entry.generation = generation;
            }
            restarted.push(future);
        }
        tracing::info!(topics = restarted.len(), "resubscribing after reconnect");
        restarted
    }
}

/// A scope's claim on a topic. Release it explicitly with
/// [`release`](Self::release) or let it drop.
#[must_use = "dropping the lease releases the subscription"]
pub struct SubscriptionLease {
    inner: Arc<ManagerInner>,
    topic: String,
    released: bool,
}

impl SubscriptionLease {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Release the lease and wait for the unsubscribe it triggers, if any.
    pub async fn release(mut self) {
        self.released = true;
        if let Some(drain) = self.inner.release(&self.topic) {
            drain.await;
        }
    }
}

impl Drop for SubscriptionLease {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            // The drain is already spawned; nothing to wait for here.
            let _ = self.inner.release(&self.topic);
        }
    }
}

impl std::fmt::Debug for SubscriptionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionLease")
            .field("topic", &self.topic)
            .field("released", &self.released)
            .finish()
    }
}

fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
        }
        Err(_) => tracing::warn!("no tokio runtime; subscription work dropped"),
    }
}

