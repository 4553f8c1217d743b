use std::sync::Arc;

use chrono::{DateTime, Utc};
use common_kv::KvStore;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::AuthResult;
use crate::events::{self, SessionRefreshed, SESSION_REFRESHED_CHANNEL};
use crate::identity::Identity;

/// Default session lifetime (24 hours).
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 86_400;

fn session_key(user_id: Uuid) -> String {
    format!("session:{user_id}")
}

fn token_key(token: &str) -> String {
    format!("token:{token}")
}

/// Cached snapshot of an authenticated subject: identity fields plus the
/// role and permission strings resolved when the session was created. The
/// permission list is never mutated independently of the role; a stale
/// grant lives at most until the session expires or is recreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub role: String,
    pub permissions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionSnapshot {
    pub fn new(
        identity: &Identity,
        role: impl Into<String>,
        permissions: Vec<String>,
        session_id: Option<String>,
    ) -> Self {
        Self {
            user_id: identity.id,
            email: identity.email.clone(),
            username: identity.username.clone(),
            role: role.into(),
            permissions,
            session_id,
            created_at: Utc::now(),
        }
    }
}

/// Materializes sessions in the shared store and answers permission queries
/// from the cached snapshot; it never falls back to the relational store.
pub struct SessionManager {
    store: Arc<dyn KvStore>,
    default_ttl_seconds: u64,
}

impl SessionManager {
    pub fn new(store: Arc<dyn KvStore>, default_ttl_seconds: u64) -> Self {
        Self {
            store,
            default_ttl_seconds,
        }
    }

    /// Write the session record and the token→subject mapping, both under
    /// the same TTL. Overwrites any prior session for the subject.
    pub async fn create_session(
        &self,
        snapshot: &SessionSnapshot,
        token: &str,
        ttl_seconds: Option<u64>,
    ) -> AuthResult<()> {
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        self.update_session(snapshot, Some(ttl)).await?;
        self.store
            .set(&token_key(token), &snapshot.user_id.to_string(), Some(ttl))
            .await?;
        Ok(())
    }

    /// Rewrite a subject's snapshot under a fresh TTL.
    pub async fn update_session(
        &self,
        snapshot: &SessionSnapshot,
        ttl_seconds: Option<u64>,
    ) -> AuthResult<()> {
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        let payload = serde_json::to_string(snapshot)?;
        self.store
            .set(&session_key(snapshot.user_id), &payload, Some(ttl))
            .await?;
        Ok(())
    }

    pub async fn get_session(&self, user_id: Uuid) -> AuthResult<Option<SessionSnapshot>> {
        let Some(raw) = self.store.get(&session_key(user_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(err) => {
                // Treat a corrupt cache entry as absent; the next session
                // write overwrites it.
                warn!(user_id = %user_id, error = %err, "Discarding undecodable session entry");
                Ok(None)
            }
        }
    }

    /// Resolve a session through the token mapping. Either hop may have
    /// expired independently; both misses read as "no session".
    pub async fn get_session_by_token(&self, token: &str) -> AuthResult<Option<SessionSnapshot>> {
        let Some(raw_user_id) = self.store.get(&token_key(token)).await? else {
            return Ok(None);
        };
        let Ok(user_id) = Uuid::parse_str(&raw_user_id) else {
            warn!(error = "unparsable subject id", "Discarding undecodable token mapping");
            return Ok(None);
        };
        self.get_session(user_id).await
    }

    /// Rewrite the snapshot with a renewed TTL and announce it. No-op (and
    /// no event) when the subject has no live session.
    pub async fn refresh_session(&self, user_id: Uuid, ttl_seconds: Option<u64>) -> AuthResult<()> {
        let Some(snapshot) = self.get_session(user_id).await? else {
            return Ok(());
        };
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        self.update_session(&snapshot, Some(ttl)).await?;

        events::publish(
            self.store.as_ref(),
            SESSION_REFRESHED_CHANNEL,
            &SessionRefreshed {
                user_id,
                timestamp: Utc::now(),
                expires_in: ttl,
            },
        )
        .await;
        Ok(())
    }

    pub async fn delete_session(&self, user_id: Uuid) -> AuthResult<()> {
        self.store.del(&session_key(user_id)).await?;
        Ok(())
    }

    /// Delete the session reachable through `token`, and the token mapping
    /// itself unconditionally.
    pub async fn delete_session_by_token(&self, token: &str) -> AuthResult<()> {
        if let Some(raw_user_id) = self.store.get(&token_key(token)).await? {
            if let Ok(user_id) = Uuid::parse_str(&raw_user_id) {
                self.delete_session(user_id).await?;
            }
        }
        self.store.del(&token_key(token)).await?;
        Ok(())
    }

    pub async fn is_session_valid(&self, user_id: Uuid) -> AuthResult<bool> {
        Ok(self.get_session(user_id).await?.is_some())
    }

    /// Permission strings from the cached snapshot; empty when there is no
    /// session (deny-by-default).
    pub async fn user_permissions(&self, user_id: Uuid) -> AuthResult<Vec<String>> {
        Ok(self
            .get_session(user_id)
            .await?
            .map(|snapshot| snapshot.permissions)
            .unwrap_or_default())
    }

    pub async fn has_permission(&self, user_id: Uuid, permission: &str) -> AuthResult<bool> {
        let permissions = self.user_permissions(user_id).await?;
        Ok(permissions.iter().any(|held| held == permission))
    }

    pub async fn has_any_permission(
        &self,
        user_id: Uuid,
        permissions: &[&str],
    ) -> AuthResult<bool> {
        let held = self.user_permissions(user_id).await?;
        Ok(permissions
            .iter()
            .any(|needed| held.iter().any(|value| value == needed)))
    }

    pub async fn has_all_permissions(
        &self,
        user_id: Uuid,
        permissions: &[&str],
    ) -> AuthResult<bool> {
        let held = self.user_permissions(user_id).await?;
        Ok(permissions
            .iter()
            .all(|needed| held.iter().any(|value| value == needed)))
    }
}
