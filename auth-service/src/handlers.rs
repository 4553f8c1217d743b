use axum::{
    extract::State,
    http::{header, header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::AuthError;
use crate::refresh::RotatedTokens;
use crate::service::{
    AuthenticatedSession, FederatedIdentity, LoginRequest, RegisterRequest, UserSummary,
};
use crate::AppState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

/// Boundary error: every domain kind maps to one stable, generic body.
/// Infrastructure failures are logged with their detail and surfaced as a
/// bare 500.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials => Self::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid credentials. Please try again.",
            ),
            AuthError::Conflict => Self::new(
                StatusCode::CONFLICT,
                "CONFLICT",
                "An account with this email or username already exists.",
            ),
            AuthError::NotFound(_) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "The requested resource was not found.",
            ),
            AuthError::InvalidRefreshToken => Self::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_REFRESH_TOKEN",
                "Invalid refresh token.",
            ),
            AuthError::Unauthorized => Self::new(
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                "Authentication required.",
            ),
            AuthError::Validation(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION", message)
            }
            other => {
                error!(error = %other, "Request failed with internal error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "SERVER_ERROR",
                    "Internal server error.",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    /// Optional; the credential's own claims decide the refresh scope.
    #[serde(default)]
    pub session_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/federated", post(federated_login))
        .route("/auth/profile", get(profile))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let body = state.metrics.render().map_err(|err| {
        error!(error = %err, "Failed to render metrics");
        ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "SERVER_ERROR",
            "Internal server error.",
        )
    })?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthenticatedSession>), ApiError> {
    let session = state.auth.register(request).await?;
    state.metrics.session_opened("register");
    Ok((StatusCode::CREATED, Json(session)))
}

async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<AuthenticatedSession>, ApiError> {
    match state.auth.login(request).await {
        Ok(session) => {
            state.metrics.login_attempt("success");
            state.metrics.session_opened("login");
            Ok(Json(session))
        }
        Err(err) => {
            let outcome = match &err {
                AuthError::InvalidCredentials => "invalid_credentials",
                _ => "error",
            };
            state.metrics.login_attempt(outcome);
            Err(err.into())
        }
    }
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers)?;
    state.auth.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<RotatedTokens>, ApiError> {
    match state.auth.refresh(&request.refresh_token).await {
        Ok(tokens) => {
            state.metrics.token_rotation("success");
            Ok(Json(tokens))
        }
        Err(err) => {
            let outcome = match &err {
                AuthError::InvalidRefreshToken => "rejected",
                _ => "error",
            };
            state.metrics.token_rotation(outcome);
            Err(err.into())
        }
    }
}

async fn federated_login(
    State(state): State<AppState>,
    Json(payload): Json<FederatedIdentity>,
) -> Result<Json<AuthenticatedSession>, ApiError> {
    let session = state.auth.federated_login(payload).await?;
    state.metrics.session_opened("federated");
    Ok(Json(session))
}

async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UserSummary>, ApiError> {
    let token = bearer_token(&headers)?;
    let summary = state.auth.profile(token).await?;
    Ok(Json(summary))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::from(AuthError::Unauthorized))
}
