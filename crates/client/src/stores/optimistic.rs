//! Provisional entities and their reconciliation with server copies.
//!
//! A locally sent entity is shown immediately under its correlation id. The
//! server copy may then arrive twice, once as the request's response and once
//! as a push event, in either order. Both paths go through this module, and
//! applying either one a second time changes nothing.

use murmur_shared::{Message, MessageStatus};

use super::entity::{EntityStore, Keyed};

/// An entity type that can be created optimistically.
pub trait Optimistic: Keyed + Clone + PartialEq {
    /// Still waiting for the server.
    fn is_pending(&self) -> bool;

    fn is_failed(&self) -> bool;

    fn mark_failed(&self) -> Self;

    fn mark_pending(&self) -> Self;

    /// The value to show once `server` is known to describe `self`.
    fn confirmed_by(&self, server: &Self) -> Self;
}

impl Optimistic for Message {
    fn is_pending(&self) -> bool {
        self.is_provisional() && self.status.is_pending()
    }

    fn is_failed(&self) -> bool {
        self.status == MessageStatus::Failed
    }

    fn mark_failed(&self) -> Self {
        self.with_status(MessageStatus::Failed)
    }

    fn mark_pending(&self) -> Self {
        self.with_status(MessageStatus::Sending)
    }

    fn confirmed_by(&self, server: &Self) -> Self {
        let mut next = server.clone();
        next.status = if self.is_provisional() {
            server.status
        } else {
            reported_status(self.status, server.status)
        };
        if next.client_msg_id.is_none() {
            next.client_msg_id = self.client_msg_id.clone();
        }
        next
    }
}

/// Status of a confirmed message after the server reports `reported`.
/// `Failed` is reserved for local send failures, so a reported one is
/// ignored.
pub(crate) fn reported_status(current: MessageStatus, reported: MessageStatus) -> MessageStatus {
    if reported == MessageStatus::Failed {
        current
    } else {
        current.merge(reported)
    }
}

/// What a reconciliation step did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// The server copy was new and appended.
    Inserted,
    /// A provisional entity was replaced by its server copy.
    Confirmed,
    /// A server copy that was already present got refreshed.
    Updated,
    /// Nothing to do; the entity was already reconciled or is gone.
    Ignored,
}

impl Reconciliation {
    /// Whether this step accepted a logical entity for the first time.
    pub fn is_first_acceptance(self) -> bool {
        matches!(self, Reconciliation::Inserted | Reconciliation::Confirmed)
    }
}

/// Show a provisional entity.
pub fn begin<T: Optimistic>(store: &mut EntityStore<T>, provisional: T) {
    store.append(provisional);
}

/// Apply the response of the send request that created `correlation_id`.
pub fn confirm_response<T: Optimistic>(
    store: &mut EntityStore<T>,
    correlation_id: &str,
    server: T,
) -> Reconciliation {
    if store.position_where(|item| item.key() == server.key()).is_some() {
        // A push event got here first.
        drop_stale_provisional(store, correlation_id, server.key());
        return Reconciliation::Ignored;
    }

    let pending = store.position_where(|item| {
        item.correlation_id() == Some(correlation_id) && item.is_pending()
    });
    match pending {
        Some(index) => {
            let next = store.items()[index].confirmed_by(&server);
            store.replace_at(index, next);
            Reconciliation::Confirmed
        }
        None => Reconciliation::Ignored,
    }
}

/// Apply a server copy that arrived as a push event.
pub fn reconcile_push<T: Optimistic>(store: &mut EntityStore<T>, server: T) -> Reconciliation {
    if let Some(index) = store.position_where(|item| item.key() == server.key()) {
        let next = store.items()[index].confirmed_by(&server);
        let changed = store.items()[index] != next;
        store.replace_at(index, next);
        if let Some(correlation_id) = server.correlation_id() {
            drop_stale_provisional(store, correlation_id, server.key());
        }
        return if changed {
            Reconciliation::Updated
        } else {
            Reconciliation::Ignored
        };
    }

    if let Some(correlation_id) = server.correlation_id() {
        if let Some(index) =
            store.position_where(|item| item.correlation_id() == Some(correlation_id))
        {
            let next = store.items()[index].confirmed_by(&server);
            store.replace_at(index, next);
            return Reconciliation::Confirmed;
        }
    }

    store.append(server);
    Reconciliation::Inserted
}

/// Mark a still-pending provisional entity as failed. Returns `false` when it
/// was already reconciled or removed.
pub fn fail<T: Optimistic>(store: &mut EntityStore<T>, correlation_id: &str) -> bool {
    match store.position_where(|item| {
        item.correlation_id() == Some(correlation_id) && item.is_pending()
    }) {
        Some(index) => {
            let next = store.items()[index].mark_failed();
            store.replace_at(index, next);
            true
        }
        None => false,
    }
}

/// Put a failed provisional entity back into the pending state for a retry.
pub fn restart<T: Optimistic>(store: &mut EntityStore<T>, correlation_id: &str) -> Option<T> {
    let index = store.position_where(|item| {
        item.correlation_id() == Some(correlation_id) && item.is_failed()
    })?;
    let next = store.items()[index].mark_pending();
    store.replace_at(index, next.clone());
    Some(next)
}

fn drop_stale_provisional<T: Optimistic>(
    store: &mut EntityStore<T>,
    correlation_id: &str,
    server_key: &str,
) {
    if let Some(index) = store.position_where(|item| {
        item.correlation_id() == Some(correlation_id) && item.key() != server_key
    }) {
        store.remove_at(index);
    }
}
