// Different test crates use different subsets of this harness.
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use common_auth::{TokenCodec, TokenConfig};
use common_kv::InMemoryKvStore;

use auth_service::identity::MemoryIdentityRepository;
use auth_service::metrics::AuthMetrics;
use auth_service::rbac::{MemoryRbacRepository, RoleResolver};
use auth_service::refresh::{RefreshTokenManager, RefreshTokenSettings};
use auth_service::service::{AuthService, AuthenticatedSession, RegisterRequest};
use auth_service::session::SessionManager;
use auth_service::AppState;

pub const TEST_PASSWORD: &str = "secret1";

/// Fully wired service over the in-memory store and repositories, with the
/// role/permission catalog reconciled.
pub struct TestContext {
    pub store: Arc<InMemoryKvStore>,
    pub identities: Arc<MemoryIdentityRepository>,
    pub rbac: Arc<MemoryRbacRepository>,
    pub roles: Arc<RoleResolver>,
    pub codec: Arc<TokenCodec>,
    pub sessions: Arc<SessionManager>,
    pub refresh_tokens: Arc<RefreshTokenManager>,
    pub auth: Arc<AuthService>,
}

impl TestContext {
    pub async fn bootstrap() -> Result<Self> {
        let store = Arc::new(InMemoryKvStore::new());
        let identities = Arc::new(MemoryIdentityRepository::new());
        let rbac = Arc::new(MemoryRbacRepository::new());
        let roles = Arc::new(RoleResolver::new(rbac.clone()));
        roles.reconcile().await?;

        let codec = Arc::new(TokenCodec::new(
            TokenConfig::new("integration-test-secret").with_leeway(0),
        ));
        let sessions = Arc::new(SessionManager::new(store.clone(), 86_400));
        let refresh_tokens = Arc::new(RefreshTokenManager::new(
            store.clone(),
            codec.clone(),
            identities.clone(),
            roles.clone(),
            RefreshTokenSettings::default(),
        ));
        let auth = Arc::new(AuthService::new(
            identities.clone(),
            roles.clone(),
            codec.clone(),
            sessions.clone(),
            refresh_tokens.clone(),
        ));

        Ok(Self {
            store,
            identities,
            rbac,
            roles,
            codec,
            sessions,
            refresh_tokens,
            auth,
        })
    }

    pub fn app_state(&self) -> Result<AppState> {
        Ok(AppState {
            auth: self.auth.clone(),
            sessions: self.sessions.clone(),
            refresh_tokens: self.refresh_tokens.clone(),
            metrics: Arc::new(AuthMetrics::new()?),
        })
    }

    pub async fn register_user(&self, email: &str, username: &str) -> Result<AuthenticatedSession> {
        Ok(self
            .auth
            .register(register_request(email, username, None))
            .await?)
    }
}

pub fn register_request(email: &str, username: &str, role: Option<&str>) -> RegisterRequest {
    RegisterRequest {
        email: email.to_string(),
        username: username.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        password: TEST_PASSWORD.to_string(),
        role: role.map(|value| value.to_string()),
    }
}
