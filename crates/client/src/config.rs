//! Tuning knobs for the state layer, read from environment variables.

use std::sync::Arc;
use std::time::Duration;

use murmur_shared::ClientError;

/// Decides whether a subscribe failure means "this topic is already
/// subscribed" and should therefore count as success.
pub type ConflictPredicate = Arc<dyn Fn(&ClientError) -> bool + Send + Sync>;

/// Error texts older transports use for a duplicate subscription.
const LEGACY_CONFLICT_TEXTS: [&str; 2] = ["already subscribed", "subscription already exists"];

/// The default conflict classifier.
///
/// Matches the typed `AlreadySubscribed` kind first and falls back to the
/// error text of transports that only report a string.
pub fn default_conflict_predicate() -> ConflictPredicate {
    Arc::new(|err: &ClientError| match err {
        ClientError::AlreadySubscribed(_) => true,
        ClientError::Http { body, .. } => contains_conflict_text(body),
        ClientError::Network(text) => contains_conflict_text(text),
        _ => false,
    })
}

fn contains_conflict_text(text: &str) -> bool {
    let lowered = text.to_lowercase();
    LEGACY_CONFLICT_TEXTS
        .iter()
        .any(|needle| lowered.contains(needle))
}

#[derive(Clone)]
pub struct SyncConfig {
    /// How long a remote typing indicator lives without a fresh start event,
    /// and how long the local user may idle before an automatic stop.
    pub typing_timeout: Duration,
    /// Messages fetched per page.
    pub message_page_size: u32,
    /// Channels fetched per page.
    pub channel_page_size: u32,
    /// Maximum number of user ids kept per reaction summary.
    pub reaction_sample_size: usize,
    /// Re-issue subscriptions after the connection comes back.
    pub resubscribe_on_reconnect: bool,
    pub conflict_predicate: ConflictPredicate,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_timeout: Duration::from_millis(3000),
            message_page_size: 50,
            channel_page_size: 30,
            reaction_sample_size: 5,
            resubscribe_on_reconnect: true,
            conflict_predicate: default_conflict_predicate(),
        }
    }
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("typing_timeout", &self.typing_timeout)
            .field("message_page_size", &self.message_page_size)
            .field("channel_page_size", &self.channel_page_size)
            .field("reaction_sample_size", &self.reaction_sample_size)
            .field("resubscribe_on_reconnect", &self.resubscribe_on_reconnect)
            .finish_non_exhaustive()
    }
}

impl SyncConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `MURMUR_TYPING_TIMEOUT_MS` (default: 3000)
    /// - `MURMUR_MESSAGE_PAGE_SIZE` (default: 50)
    /// - `MURMUR_CHANNEL_PAGE_SIZE` (default: 30)
    /// - `MURMUR_REACTION_SAMPLE_SIZE` (default: 5)
    /// - `MURMUR_RESUBSCRIBE_ON_RECONNECT`: "true" | "false" (default: "true")
    ///
    /// Unparseable values fall back to the default and are logged.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let typing_timeout = parse_var(&lookup, "MURMUR_TYPING_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.typing_timeout);
        let message_page_size =
            parse_var(&lookup, "MURMUR_MESSAGE_PAGE_SIZE").unwrap_or(defaults.message_page_size);
        let channel_page_size =
            parse_var(&lookup, "MURMUR_CHANNEL_PAGE_SIZE").unwrap_or(defaults.channel_page_size);
        let reaction_sample_size = parse_var(&lookup, "MURMUR_REACTION_SAMPLE_SIZE")
            .unwrap_or(defaults.reaction_sample_size);
        let resubscribe_on_reconnect = parse_var(&lookup, "MURMUR_RESUBSCRIBE_ON_RECONNECT")
            .unwrap_or(defaults.resubscribe_on_reconnect);

        Self {
            typing_timeout,
            message_page_size,
            channel_page_size,
            reaction_sample_size,
            resubscribe_on_reconnect,
            ..defaults
        }
    }

    /// Replace the subscribe-conflict classifier.
    pub fn with_conflict_predicate(
        mut self,
        predicate: impl Fn(&ClientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.conflict_predicate = Arc::new(predicate);
        self
    }

    pub fn with_typing_timeout(mut self, timeout: Duration) -> Self {
        self.typing_timeout = timeout;
        self
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().to_lowercase().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(%key, value = %raw, "ignoring unparseable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_and_falls_back() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MURMUR_TYPING_TIMEOUT_MS", "1500"),
            ("MURMUR_MESSAGE_PAGE_SIZE", "not-a-number"),
            ("MURMUR_RESUBSCRIBE_ON_RECONNECT", "FALSE"),
        ]);
        let config = SyncConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.typing_timeout, Duration::from_millis(1500));
        assert_eq!(config.message_page_size, 50);
        assert_eq!(config.channel_page_size, 30);
        assert!(!config.resubscribe_on_reconnect);
    }

    #[test]
    fn default_predicate_accepts_typed_and_legacy_conflicts() {
        let predicate = default_conflict_predicate();
        assert!(predicate(&ClientError::AlreadySubscribed("c1".into())));
        assert!(predicate(&ClientError::Http {
            status: 400,
            body: "Subscription already exists for channel c1".into(),
        }));
        assert!(predicate(&ClientError::Network("Already Subscribed".into())));
        assert!(!predicate(&ClientError::Http {
            status: 403,
            body: "forbidden".into(),
        }));
    }

    #[test]
    fn custom_predicate_replaces_default() {
        let config = SyncConfig::default().with_conflict_predicate(|err| {
            matches!(err, ClientError::Http { status: 409, .. })
        });
        assert!((config.conflict_predicate)(&ClientError::Http {
            status: 409,
            body: String::new(),
        }));
        assert!(!(config.conflict_predicate)(&ClientError::AlreadySubscribed("c1".into())));
    }
}
