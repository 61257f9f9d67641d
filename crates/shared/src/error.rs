//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RFC7807 Problem Details (application/problem+json)
///
/// Backends answer failed requests with this envelope; the client only ever
/// reads it to produce a message worth showing to a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type", default)]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    #[serde(default)]
    pub title: String,
    /// HTTP status code.
    #[serde(default)]
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Attempt to parse an RFC7807 (or RFC7807-ish) JSON body into a user-facing message.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    if let Some(detail) = parsed.detail {
        if !detail.trim().is_empty() {
            return Some(detail);
        }
    }
    if !parsed.title.trim().is_empty() {
        return Some(parsed.title);
    }
    None
}

/// Errors surfaced by a chat client and by the reconciliation layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("deserialization error: {0}")]
    Deserialize(String),
    /// The topic already has a live subscription on this connection.
    #[error("already subscribed to {0}")]
    AlreadySubscribed(String),
    /// The owning scope was torn down before the operation finished.
    #[error("scope disposed")]
    Disposed,
}

impl ClientError {
    /// A message suitable for display next to the failed UI element.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Http { body, status } => {
                try_problem_detail(body).unwrap_or_else(|| format!("Request failed ({status})"))
            }
            other => other.to_string(),
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Network(_) => true,
            ClientError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_prefers_problem_detail() {
        let err = ClientError::Http {
            status: 409,
            body: r#"{"type":"x","title":"Conflict","status":409,"detail":"Channel is archived"}"#
                .into(),
        };
        assert_eq!(err.user_message(), "Channel is archived");

        let err = ClientError::Http {
            status: 502,
            body: "<html>bad gateway</html>".into(),
        };
        assert_eq!(err.user_message(), "Request failed (502)");
        assert!(err.is_transient());
    }

    #[test]
    fn conflict_is_not_transient() {
        assert!(!ClientError::AlreadySubscribed("c1".into()).is_transient());
        assert!(ClientError::Network("reset".into()).is_transient());
    }
}
