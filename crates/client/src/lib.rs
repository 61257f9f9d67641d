//! Murmur Client - real-time state reconciliation for chat UIs
//!
//! Keeps channel lists, message lists, typing indicators, read state and
//! threads consistent with an initial fetch, optimistic local mutations and
//! a stream of server-pushed events. The transport is pluggable through
//! [`ChatClient`]; rendering is left to the host application, which mounts
//! the hooks from a shared [`ChatContext`] and re-renders on their watch
//! channels.

pub mod client;
pub mod config;
pub mod context;
pub mod events;
pub mod hooks;
pub mod logging;
pub mod scope;
pub mod stores;
pub mod subscription;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use client::{ChatClient, FetchInit, Method};
pub use config::{ConflictPredicate, SyncConfig};
pub use context::ChatContext;
pub use events::{EventBus, EventHandler, ListenerGuard};
pub use hooks::{
    ChannelSubscription, Channels, ChannelsOptions, ConnectionState, ConnectionStatus, Messages,
    ReadStateHook, Thread, TypingIndicator,
};
pub use stores::{EntityStore, Keyed, Reconciliation};
pub use subscription::{SubscriptionLease, SubscriptionManager, SubscriptionStatus};
