//! Refresh-credential lifecycle: generation, scoped storage, validation
//! against the live store, revocation, and mandatory rotation.
//!
//! A credential is live while its exact string sits at its scope key and it
//! is not blacklisted. Storing a replacement supersedes the old credential
//! (the equality check fails from then on); blacklisting makes revocation
//! stick even though the old signature still verifies.

use std::sync::Arc;

use chrono::Utc;
use common_auth::TokenCodec;
use common_kv::KvStore;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AuthResult;
use crate::events::{
    self, EventSubscription, RefreshTokenGenerated, RefreshTokenRevoked, TokenEvent,
    TokenRefreshed, REFRESH_TOKEN_GENERATED_CHANNEL, REFRESH_TOKEN_REVOKED_CHANNEL,
    TOKEN_EVENT_CHANNELS, TOKEN_REFRESHED_CHANNEL,
};
use crate::identity::IdentityRepository;
use crate::rbac::{RoleResolver, DEFAULT_ROLE};

/// Default refresh-credential lifetime (7 days).
pub const DEFAULT_REFRESH_TTL_SECONDS: u64 = 604_800;
/// Default blacklist-marker lifetime (7 days, matching the longest time a
/// revoked token's signature could still verify).
pub const DEFAULT_BLACKLIST_TTL_SECONDS: u64 = 604_800;

fn user_scope_key(user_id: Uuid) -> String {
    format!("refresh_token:{user_id}")
}

fn session_scope_key(session_id: &str) -> String {
    format!("session_refresh:{session_id}")
}

fn blacklist_key(token: &str) -> String {
    format!("blacklist:{token}")
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshTokenSettings {
    pub refresh_ttl_seconds: u64,
    pub blacklist_ttl_seconds: u64,
}

impl Default for RefreshTokenSettings {
    fn default() -> Self {
        Self {
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            blacklist_ttl_seconds: DEFAULT_BLACKLIST_TTL_SECONDS,
        }
    }
}

/// Result of a successful validation: the subject, and the session the
/// credential was scoped to, when any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshValidation {
    pub user_id: Uuid,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RotatedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct RefreshTokenManager {
    store: Arc<dyn KvStore>,
    codec: Arc<TokenCodec>,
    identities: Arc<dyn IdentityRepository>,
    roles: Arc<RoleResolver>,
    settings: RefreshTokenSettings,
}

impl RefreshTokenManager {
    pub fn new(
        store: Arc<dyn KvStore>,
        codec: Arc<TokenCodec>,
        identities: Arc<dyn IdentityRepository>,
        roles: Arc<RoleResolver>,
        settings: RefreshTokenSettings,
    ) -> Self {
        Self {
            store,
            codec,
            identities,
            roles,
            settings,
        }
    }

    /// Mint and store a user-scoped refresh token. Overwrites whatever was
    /// live at the user scope before.
    pub async fn generate_refresh_token(
        &self,
        user_id: Uuid,
        ttl_seconds: Option<u64>,
    ) -> AuthResult<String> {
        let ttl = ttl_seconds.unwrap_or(self.settings.refresh_ttl_seconds);
        let token = self.codec.mint_refresh(user_id, None, ttl as i64)?;
        self.store
            .set(&user_scope_key(user_id), &token, Some(ttl))
            .await?;

        events::publish(
            self.store.as_ref(),
            REFRESH_TOKEN_GENERATED_CHANNEL,
            &RefreshTokenGenerated {
                user_id,
                session_id: None,
                timestamp: Utc::now(),
                expires_in: ttl,
            },
        )
        .await;

        info!(user_id = %user_id, "Refresh token generated");
        Ok(token)
    }

    /// Mint a session-bound refresh token and index it under both the
    /// session scope and the user scope. The two writes are independent
    /// records with their own expiry; a crash between them leaves a single
    /// current scope, which validation tolerates.
    pub async fn generate_refresh_token_with_session(
        &self,
        user_id: Uuid,
        session_id: &str,
        ttl_seconds: Option<u64>,
    ) -> AuthResult<String> {
        let ttl = ttl_seconds.unwrap_or(self.settings.refresh_ttl_seconds);
        let token = self.codec.mint_refresh(user_id, Some(session_id), ttl as i64)?;
        self.store
            .set(&session_scope_key(session_id), &token, Some(ttl))
            .await?;
        self.store
            .set(&user_scope_key(user_id), &token, Some(ttl))
            .await?;

        events::publish(
            self.store.as_ref(),
            REFRESH_TOKEN_GENERATED_CHANNEL,
            &RefreshTokenGenerated {
                user_id,
                session_id: Some(session_id.to_string()),
                timestamp: Utc::now(),
                expires_in: ttl,
            },
        )
        .await;

        info!(user_id = %user_id, session_id, "Refresh token with session generated");
        Ok(token)
    }

    /// Decide whether a presented refresh token is live. Returns `Ok(None)`
    /// for every rejection (blacklisted, expired, forged, wrong type, or
    /// superseded at its scope key) without revealing which check failed.
    /// Errors are reserved for store failures.
    pub async fn validate_refresh_token(
        &self,
        token: &str,
    ) -> AuthResult<Option<RefreshValidation>> {
        if self.store.exists(&blacklist_key(token)).await? {
            return Ok(None);
        }

        let claims = match self.codec.verify_refresh(token) {
            Ok(claims) => claims,
            Err(_) => return Ok(None),
        };

        // The session scope is authoritative whenever the claims carry a
        // session id; the user scope only backs tokens minted without one.
        let stored = match &claims.session_id {
            Some(session_id) => self.store.get(&session_scope_key(session_id)).await?,
            None => self.store.get(&user_scope_key(claims.sub)).await?,
        };
        match stored {
            Some(current) if current == token => Ok(Some(RefreshValidation {
                user_id: claims.sub,
                session_id: claims.session_id,
            })),
            _ => Ok(None),
        }
    }

    /// Blacklist and remove whatever credential is live at the user scope.
    pub async fn revoke_refresh_token(&self, user_id: Uuid) -> AuthResult<()> {
        if let Some(current) = self.store.get(&user_scope_key(user_id)).await? {
            self.blacklist(&current).await?;
        }
        self.store.del(&user_scope_key(user_id)).await?;

        events::publish(
            self.store.as_ref(),
            REFRESH_TOKEN_REVOKED_CHANNEL,
            &RefreshTokenRevoked {
                user_id: Some(user_id),
                session_id: None,
                timestamp: Utc::now(),
            },
        )
        .await;

        info!(user_id = %user_id, "Refresh token revoked");
        Ok(())
    }

    /// Blacklist and remove whatever credential is live at the session scope.
    pub async fn revoke_refresh_token_by_session(&self, session_id: &str) -> AuthResult<()> {
        if let Some(current) = self.store.get(&session_scope_key(session_id)).await? {
            self.blacklist(&current).await?;
        }
        self.store.del(&session_scope_key(session_id)).await?;

        events::publish(
            self.store.as_ref(),
            REFRESH_TOKEN_REVOKED_CHANNEL,
            &RefreshTokenRevoked {
                user_id: None,
                session_id: Some(session_id.to_string()),
                timestamp: Utc::now(),
            },
        )
        .await;

        info!(session_id, "Refresh token revoked for session");
        Ok(())
    }

    /// Exchange a live refresh token for a fresh access/refresh pair.
    /// Rotation is unconditional: the presented token is dead after one
    /// successful use. Returns `Ok(None)` when validation fails or the
    /// subject no longer exists.
    pub async fn refresh_access_token(&self, token: &str) -> AuthResult<Option<RotatedTokens>> {
        let Some(validation) = self.validate_refresh_token(token).await? else {
            return Ok(None);
        };

        let Some(identity) = self.identities.find_by_id(validation.user_id).await? else {
            warn!(user_id = %validation.user_id, "Refresh token subject no longer exists");
            return Ok(None);
        };

        let role = self.roles.user_role(&identity).await?;
        let role_name = role
            .as_ref()
            .map(|role| role.name.as_str())
            .unwrap_or(DEFAULT_ROLE);
        let (access_token, _) = self
            .codec
            .mint_access(identity.id, &identity.email, role_name)?;

        // Store the replacement before killing the old credential, so the
        // scope key is never empty mid-rotation.
        let refresh_token = match &validation.session_id {
            Some(session_id) => {
                self.generate_refresh_token_with_session(identity.id, session_id, None)
                    .await?
            }
            None => self.generate_refresh_token(identity.id, None).await?,
        };

        self.blacklist(token).await?;
        events::publish(
            self.store.as_ref(),
            REFRESH_TOKEN_REVOKED_CHANNEL,
            &RefreshTokenRevoked {
                user_id: validation.session_id.is_none().then_some(identity.id),
                session_id: validation.session_id.clone(),
                timestamp: Utc::now(),
            },
        )
        .await;

        events::publish(
            self.store.as_ref(),
            TOKEN_REFRESHED_CHANNEL,
            &TokenRefreshed {
                user_id: identity.id,
                session_id: validation.session_id.clone(),
                timestamp: Utc::now(),
                new_access_token: access_token.clone(),
            },
        )
        .await;

        info!(
            user_id = %identity.id,
            session_id = validation.session_id.as_deref().unwrap_or(""),
            "Access token refreshed"
        );
        Ok(Some(RotatedTokens {
            access_token,
            refresh_token,
        }))
    }

    /// Listen on every lifecycle channel and hand decoded events to
    /// `callback`. Malformed payloads are logged and dropped. The returned
    /// handle owns the listener tasks; dropping it unsubscribes.
    pub async fn subscribe_token_events<F>(&self, callback: F) -> AuthResult<EventSubscription>
    where
        F: Fn(TokenEvent) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        let mut tasks = Vec::with_capacity(TOKEN_EVENT_CHANNELS.len());
        for channel in TOKEN_EVENT_CHANNELS {
            let mut subscription = self.store.subscribe(channel).await?;
            let callback = callback.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(payload) = subscription.next_message().await {
                    match TokenEvent::decode(channel, &payload) {
                        Ok(event) => callback(event),
                        Err(err) => {
                            warn!(channel, error = %err, "Dropping malformed lifecycle event");
                        }
                    }
                }
            }));
        }
        Ok(EventSubscription::new(tasks))
    }

    async fn blacklist(&self, token: &str) -> AuthResult<()> {
        self.store
            .set(
                &blacklist_key(token),
                "revoked",
                Some(self.settings.blacklist_ttl_seconds),
            )
            .await?;
        Ok(())
    }
}
