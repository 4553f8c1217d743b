//! Credential lifecycle events published over the store's pub/sub channels.
//!
//! Delivery is fire-and-forget and at-least-once; consumers must be
//! idempotent. Publish failures are logged and never fail the operation
//! that produced the event.

use chrono::{DateTime, Utc};
use common_kv::KvStore;
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

pub const REFRESH_TOKEN_GENERATED_CHANNEL: &str = "refresh_token:generated";
pub const REFRESH_TOKEN_REVOKED_CHANNEL: &str = "refresh_token:revoked";
pub const TOKEN_REFRESHED_CHANNEL: &str = "token:refreshed";
pub const SESSION_REFRESHED_CHANNEL: &str = "session:refreshed";

/// Every channel a token-event subscriber listens on.
pub const TOKEN_EVENT_CHANNELS: [&str; 4] = [
    REFRESH_TOKEN_GENERATED_CHANNEL,
    REFRESH_TOKEN_REVOKED_CHANNEL,
    TOKEN_REFRESHED_CHANNEL,
    SESSION_REFRESHED_CHANNEL,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenGenerated {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub expires_in: u64,
}

/// Carries the user id or the session id, depending on which scope was
/// revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRevoked {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRefreshed {
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub new_access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefreshed {
    pub user_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub expires_in: u64,
}

/// Decoded lifecycle event, tagged by the channel it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenEvent {
    RefreshTokenGenerated(RefreshTokenGenerated),
    RefreshTokenRevoked(RefreshTokenRevoked),
    TokenRefreshed(TokenRefreshed),
    SessionRefreshed(SessionRefreshed),
}

impl TokenEvent {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::RefreshTokenGenerated(_) => REFRESH_TOKEN_GENERATED_CHANNEL,
            Self::RefreshTokenRevoked(_) => REFRESH_TOKEN_REVOKED_CHANNEL,
            Self::TokenRefreshed(_) => TOKEN_REFRESHED_CHANNEL,
            Self::SessionRefreshed(_) => SESSION_REFRESHED_CHANNEL,
        }
    }

    pub fn decode(channel: &str, payload: &str) -> Result<Self, serde_json::Error> {
        match channel {
            REFRESH_TOKEN_GENERATED_CHANNEL => {
                Ok(Self::RefreshTokenGenerated(serde_json::from_str(payload)?))
            }
            REFRESH_TOKEN_REVOKED_CHANNEL => {
                Ok(Self::RefreshTokenRevoked(serde_json::from_str(payload)?))
            }
            TOKEN_REFRESHED_CHANNEL => Ok(Self::TokenRefreshed(serde_json::from_str(payload)?)),
            SESSION_REFRESHED_CHANNEL => Ok(Self::SessionRefreshed(serde_json::from_str(payload)?)),
            other => Err(serde_json::Error::custom(format!(
                "unknown event channel '{other}'"
            ))),
        }
    }
}

/// Best-effort publish: serialize and send, logging (not propagating) any
/// failure.
pub(crate) async fn publish<T: Serialize>(store: &dyn KvStore, channel: &str, payload: &T) {
    let message = match serde_json::to_string(payload) {
        Ok(message) => message,
        Err(err) => {
            warn!(channel, error = %err, "Failed to encode lifecycle event");
            return;
        }
    };
    if let Err(err) = store.publish(channel, &message).await {
        warn!(channel, error = %err, "Failed to publish lifecycle event");
    }
}

/// Handle for a live set of channel listeners. Dropping it (or calling
/// [`EventSubscription::cancel`]) stops the listener tasks; there is no
/// ambient per-process subscriber.
pub struct EventSubscription {
    tasks: Vec<JoinHandle<()>>,
}

impl EventSubscription {
    pub(crate) fn new(tasks: Vec<JoinHandle<()>>) -> Self {
        Self { tasks }
    }

    pub fn cancel(self) {
        // Drop impl aborts the tasks.
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
