//! Ordered, keyed collection of one entity type.

use murmur_shared::{Channel, Message};

/// An entity the store can address by key.
pub trait Keyed {
    /// Primary key.
    fn key(&self) -> &str;

    /// Client-generated correlation id, for entities created optimistically.
    fn correlation_id(&self) -> Option<&str> {
        None
    }

    /// Whether `key` addresses this entity, by primary key or correlation id.
    fn answers_to(&self, key: &str) -> bool {
        self.key() == key || self.correlation_id() == Some(key)
    }

    /// Whether `self` and `other` are the same logical entity.
    fn same_entity(&self, other: &Self) -> bool
    where
        Self: Sized,
    {
        if self.key() == other.key() {
            return true;
        }
        matches!(
            (self.correlation_id(), other.correlation_id()),
            (Some(a), Some(b)) if a == b
        )
    }
}

impl Keyed for Message {
    fn key(&self) -> &str {
        Message::key(self)
    }

    fn correlation_id(&self) -> Option<&str> {
        self.client_msg_id.as_deref()
    }
}

impl Keyed for Channel {
    fn key(&self) -> &str {
        &self.id
    }
}

/// How [`EntityStore::append`] placed an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    Replaced,
}

/// Entities in display order. Unknown keys are silent no-ops everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityStore<T> {
    items: Vec<T>,
}

impl<T> Default for EntityStore<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: Keyed + Clone> EntityStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|item| item.answers_to(key))
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.items.iter().find(|item| item.answers_to(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    /// Replace everything, keeping the given order.
    pub fn replace_all(&mut self, items: Vec<T>) {
        self.items = items;
    }

    /// Put an older page in front. Items already present are skipped.
    /// Returns how many were added.
    pub fn prepend(&mut self, items: Vec<T>) -> usize {
        let mut fresh: Vec<T> = Vec::with_capacity(items.len());
        for item in items {
            let known = self.items.iter().any(|existing| existing.same_entity(&item))
                || fresh.iter().any(|existing| existing.same_entity(&item));
            if !known {
                fresh.push(item);
            }
        }
        let added = fresh.len();
        fresh.append(&mut self.items);
        self.items = fresh;
        added
    }

    /// Add a newly arrived item at the end, or replace the existing copy of
    /// the same entity in place.
    pub fn append(&mut self, item: T) -> AppendOutcome {
        match self.items.iter().position(|existing| existing.same_entity(&item)) {
            Some(index) => {
                self.items[index] = item;
                AppendOutcome::Replaced
            }
            None => {
                self.items.push(item);
                AppendOutcome::Inserted
            }
        }
    }

    /// Swap the entity at `key` for `patch(old)`. Returns whether it existed.
    pub fn patch_by_key(&mut self, key: &str, patch: impl FnOnce(&T) -> T) -> bool {
        match self.position(key) {
            Some(index) => {
                let next = patch(&self.items[index]);
                self.items[index] = next;
                true
            }
            None => false,
        }
    }

    /// Physically remove the entity at `key`.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let index = self.position(key)?;
        Some(self.items.remove(index))
    }

    /// Replace the entity at `key` with its tombstone, keeping its position.
    pub fn tombstone(&mut self, key: &str, tombstone: impl FnOnce(&T) -> T) -> bool {
        self.patch_by_key(key, tombstone)
    }

    /// Tombstone when a tombstone shape is given, remove otherwise.
    pub fn remove_or_tombstone(&mut self, key: &str, tombstone: Option<fn(&T) -> T>) -> bool {
        match tombstone {
            Some(tombstone) => self.tombstone(key, tombstone),
            None => self.remove(key).is_some(),
        }
    }

    pub(crate) fn position_where(&self, predicate: impl Fn(&T) -> bool) -> Option<usize> {
        self.items.iter().position(predicate)
    }

    /// Remove by index; callers hold a position they just looked up.
    pub(crate) fn remove_at(&mut self, index: usize) -> T {
        self.items.remove(index)
    }

    pub(crate) fn replace_at(&mut self, index: usize, item: T) {
        self.items[index] = item;
    }
}

impl<'a, T> IntoIterator for &'a EntityStore<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use murmur_shared::{SendMessageRequest, UserRef};

    fn server_message(id: &str, seq: u64) -> Message {
        let request = SendMessageRequest::new(format!("body of {id}"));
        Message {
            id: Some(id.to_string()),
            client_msg_id: None,
            seq: Some(seq),
            created_at: Utc::now(),
            ..Message::provisional("c1", UserRef::new("u1"), &request)
        }
    }

    fn store_of(ids: &[&str]) -> EntityStore<Message> {
        let mut store = EntityStore::new();
        store.replace_all(
            ids.iter()
                .enumerate()
                .map(|(i, id)| server_message(id, i as u64 + 1))
                .collect(),
        );
        store
    }

    fn keys(store: &EntityStore<Message>) -> Vec<&str> {
        store.iter().map(|m| m.key()).collect()
    }

    #[test]
    fn append_replaces_same_key_in_place() {
        let mut store = store_of(&["m1", "m2"]);
        let mut edited = server_message("m1", 1);
        edited.text = "edited".into();

        assert_eq!(store.append(edited), AppendOutcome::Replaced);
        assert_eq!(keys(&store), vec!["m1", "m2"]);
        assert_eq!(store.get("m1").unwrap().text, "edited");

        assert_eq!(store.append(server_message("m3", 3)), AppendOutcome::Inserted);
        assert_eq!(keys(&store), vec!["m1", "m2", "m3"]);
    }

    #[test]
    fn append_matches_on_correlation_id() {
        let mut store = store_of(&["m1"]);
        let request = SendMessageRequest::new("hi");
        store.append(Message::provisional("c1", UserRef::new("me"), &request));

        let mut echo = server_message("srv-2", 2);
        echo.client_msg_id = Some(request.client_msg_id.clone());
        assert_eq!(store.append(echo), AppendOutcome::Replaced);
        assert_eq!(keys(&store), vec!["m1", "srv-2"]);
        assert!(store.contains(&request.client_msg_id));
    }

    #[test]
    fn prepend_skips_known_keys() {
        let mut store = store_of(&["m3", "m4"]);
        let added = store.prepend(vec![
            server_message("m1", 1),
            server_message("m2", 2),
            server_message("m3", 3),
            server_message("m2", 2),
        ]);
        assert_eq!(added, 2);
        assert_eq!(keys(&store), vec!["m1", "m2", "m3", "m4"]);
    }

    #[test]
    fn unknown_keys_are_no_ops() {
        let mut store = store_of(&["m1"]);
        assert!(!store.patch_by_key("nope", |m| m.tombstoned()));
        assert!(store.remove("nope").is_none());
        assert!(!store.remove_or_tombstone("nope", Some(Message::tombstoned)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn tombstone_preserves_order_and_length() {
        let mut store = store_of(&["m1", "m2", "m3", "m4"]);
        assert!(store.remove_or_tombstone("m2", Some(Message::tombstoned)));

        assert_eq!(keys(&store), vec!["m1", "m2", "m3", "m4"]);
        let dead = &store.items()[1];
        assert!(dead.deleted);
        assert!(dead.text.is_empty());
        assert_eq!(dead.seq, Some(2));
    }

    #[test]
    fn remove_without_tombstone_drops_item() {
        let mut store = store_of(&["m1", "m2"]);
        assert!(store.remove_or_tombstone("m1", None));
        assert_eq!(keys(&store), vec!["m2"]);
    }
}
