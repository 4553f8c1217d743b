use std::sync::Arc;

use axum::extract::FromRef;

use crate::metrics::AuthMetrics;
use crate::refresh::RefreshTokenManager;
use crate::service::AuthService;
use crate::session::SessionManager;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    pub sessions: Arc<SessionManager>,
    pub refresh_tokens: Arc<RefreshTokenManager>,
    pub metrics: Arc<AuthMetrics>,
}

impl FromRef<AppState> for Arc<AuthService> {
    fn from_ref(state: &AppState) -> Self {
        state.auth.clone()
    }
}

impl FromRef<AppState> for Arc<SessionManager> {
    fn from_ref(state: &AppState) -> Self {
        state.sessions.clone()
    }
}

impl FromRef<AppState> for Arc<AuthMetrics> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}
