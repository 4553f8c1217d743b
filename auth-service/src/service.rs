//! Authentication flows. This is the only component boundary layers call
//! directly, and the sole writer of the session + refresh-token pair for a
//! given authentication event.

use std::sync::Arc;

use common_auth::TokenCodec;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::identity::{Identity, IdentityRepository, NewIdentity};
use crate::password;
use crate::rbac::{RoleResolver, DEFAULT_ROLE};
use crate::refresh::{RefreshTokenManager, RotatedTokens};
use crate::session::{SessionManager, SessionSnapshot};

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    /// Role name; the seeded default role when omitted.
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email_or_username: String,
    pub password: String,
}

/// Identity attributes supplied by an external provider after a handshake
/// this service does not implement.
#[derive(Debug, Clone, Deserialize)]
pub struct FederatedIdentity {
    pub provider_id: String,
    pub email: Option<String>,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub permissions: Vec<String>,
}

/// Outcome of register/login/federated-login.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedSession {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
    pub user: UserSummary,
}

pub struct AuthService {
    identities: Arc<dyn IdentityRepository>,
    roles: Arc<RoleResolver>,
    codec: Arc<TokenCodec>,
    sessions: Arc<SessionManager>,
    refresh_tokens: Arc<RefreshTokenManager>,
}

impl AuthService {
    pub fn new(
        identities: Arc<dyn IdentityRepository>,
        roles: Arc<RoleResolver>,
        codec: Arc<TokenCodec>,
        sessions: Arc<SessionManager>,
        refresh_tokens: Arc<RefreshTokenManager>,
    ) -> Self {
        Self {
            identities,
            roles,
            codec,
            sessions,
            refresh_tokens,
        }
    }

    pub async fn register(&self, request: RegisterRequest) -> AuthResult<AuthenticatedSession> {
        if request.password.trim().is_empty() {
            return Err(AuthError::Validation("password must not be empty"));
        }

        let role = match &request.role {
            Some(name) => self
                .roles
                .role_by_name(name)
                .await?
                .ok_or(AuthError::NotFound("role"))?,
            None => self.roles.default_role().await?,
        };

        let password_hash = password::hash_password(&request.password)?;
        let identity = self
            .identities
            .create(NewIdentity {
                email: request.email,
                username: request.username,
                first_name: request.first_name,
                last_name: request.last_name,
                password_hash,
                role_id: role.id,
            })
            .await?;

        info!(user_id = %identity.id, role = %role.name, "User registered");
        self.open_session(&identity, &role.name, role.permission_names())
            .await
    }

    pub async fn login(&self, request: LoginRequest) -> AuthResult<AuthenticatedSession> {
        let identity = if request.email_or_username.contains('@') {
            self.identities
                .find_by_email(&request.email_or_username)
                .await?
        } else {
            self.identities
                .find_by_username(&request.email_or_username)
                .await?
        };
        // Unknown account and wrong password fail identically.
        let identity = identity.ok_or(AuthError::InvalidCredentials)?;
        if !password::verify_password(&request.password, &identity.password_hash) {
            return Err(AuthError::InvalidCredentials);
        }

        let (role_name, permissions) = self.role_claims(&identity).await?;
        info!(user_id = %identity.id, "User logged in");
        self.open_session(&identity, &role_name, permissions).await
    }

    /// Resolve an externally-authenticated identity to a local one (by
    /// email, then by username), auto-provisioning with the default role
    /// and a random opaque password when neither matches.
    pub async fn federated_login(
        &self,
        payload: FederatedIdentity,
    ) -> AuthResult<AuthenticatedSession> {
        let mut identity = None;
        if let Some(email) = &payload.email {
            identity = self.identities.find_by_email(email).await?;
        }
        if identity.is_none() {
            identity = self.identities.find_by_username(&payload.username).await?;
        }

        let identity = match identity {
            Some(existing) => existing,
            None => {
                let role = self.roles.default_role().await?;
                let password_hash = password::hash_password(&password::random_opaque_password())?;
                let email = payload
                    .email
                    .clone()
                    .unwrap_or_else(|| format!("{}@external.local", payload.provider_id));
                let created = self
                    .identities
                    .create(NewIdentity {
                        email,
                        username: payload.username.clone(),
                        first_name: payload
                            .first_name
                            .clone()
                            .unwrap_or_else(|| "External".to_string()),
                        last_name: payload
                            .last_name
                            .clone()
                            .unwrap_or_else(|| "User".to_string()),
                        password_hash,
                        role_id: role.id,
                    })
                    .await?;
                info!(
                    user_id = %created.id,
                    provider_id = %payload.provider_id,
                    "Identity provisioned from federated login"
                );
                created
            }
        };

        let (role_name, permissions) = self.role_claims(&identity).await?;
        self.open_session(&identity, &role_name, permissions).await
    }

    /// Tear down the session reached through `token` and revoke its refresh
    /// credential, preferring the session scope over the user scope.
    /// Idempotent: repeating it on an already-cleared session succeeds.
    pub async fn logout(&self, token: &str) -> AuthResult<()> {
        match self.sessions.get_session_by_token(token).await? {
            Some(session) => match &session.session_id {
                Some(session_id) => {
                    self.refresh_tokens
                        .revoke_refresh_token_by_session(session_id)
                        .await?
                }
                None => {
                    self.refresh_tokens
                        .revoke_refresh_token(session.user_id)
                        .await?
                }
            },
            None => {
                // Session already gone (expired or second logout): best-effort
                // cleanup of the user-scoped credential from the token itself.
                if let Some(claims) = self.codec.decode_access_unverified(token) {
                    self.refresh_tokens.revoke_refresh_token(claims.sub).await?;
                }
            }
        }
        self.sessions.delete_session_by_token(token).await?;
        Ok(())
    }

    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<RotatedTokens> {
        self.refresh_tokens
            .refresh_access_token(refresh_token)
            .await?
            .ok_or(AuthError::InvalidRefreshToken)
    }

    /// Current subject's profile: verified token, answered from the cached
    /// session when one exists, otherwise from the relational store.
    pub async fn profile(&self, access_token: &str) -> AuthResult<UserSummary> {
        let claims = self
            .codec
            .verify_access(access_token)
            .map_err(|_| AuthError::Unauthorized)?;
        let identity = self
            .identities
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::Unauthorized)?;
        if !identity.is_active {
            return Err(AuthError::Unauthorized);
        }

        if let Some(session) = self.sessions.get_session(claims.sub).await? {
            return Ok(summary(&identity, session.role, session.permissions));
        }
        let (role_name, permissions) = self.role_claims(&identity).await?;
        Ok(summary(&identity, role_name, permissions))
    }

    /// Role claims for minting. A missing role is a defensive fallback to
    /// the default role name with no permissions, never a modeled state.
    async fn role_claims(&self, identity: &Identity) -> AuthResult<(String, Vec<String>)> {
        match self.roles.user_role(identity).await? {
            Some(role) => Ok((role.name.clone(), role.permission_names())),
            None => Ok((DEFAULT_ROLE.to_string(), Vec::new())),
        }
    }

    /// Shared minting sub-step: one session id, a 24h session, and a
    /// session-scoped refresh credential.
    async fn open_session(
        &self,
        identity: &Identity,
        role_name: &str,
        permissions: Vec<String>,
    ) -> AuthResult<AuthenticatedSession> {
        let session_id = format!("session_{}", Uuid::new_v4());
        let (access_token, _) = self
            .codec
            .mint_access(identity.id, &identity.email, role_name)?;

        let snapshot = SessionSnapshot::new(
            identity,
            role_name,
            permissions.clone(),
            Some(session_id.clone()),
        );
        self.sessions
            .create_session(&snapshot, &access_token, None)
            .await?;

        let refresh_token = self
            .refresh_tokens
            .generate_refresh_token_with_session(identity.id, &session_id, None)
            .await?;

        Ok(AuthenticatedSession {
            access_token,
            refresh_token,
            session_id,
            user: summary(identity, role_name.to_string(), permissions),
        })
    }
}

fn summary(identity: &Identity, role: impl Into<String>, permissions: Vec<String>) -> UserSummary {
    UserSummary {
        id: identity.id,
        email: identity.email.clone(),
        username: identity.username.clone(),
        first_name: identity.first_name.clone(),
        last_name: identity.last_name.clone(),
        role: role.into(),
        permissions,
    }
}
