use common_auth::TokenError;
use common_kv::KvError;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

/// Domain error taxonomy. The first five variants map to stable, generic
/// messages at the boundary; the rest are infrastructure failures and are
/// never surfaced with their internal detail.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Login/validation failure. Deliberately indistinct between "no such
    /// user" and "wrong password".
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("an account with this email or username already exists")]
    Conflict,
    #[error("{0} not found")]
    NotFound(&'static str),
    /// Covers expired, malformed, blacklisted, and scope-mismatched refresh
    /// tokens; callers cannot tell which check failed.
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("unauthorized")]
    Unauthorized,
    #[error("{0}")]
    Validation(&'static str),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("token encoding failed: {0}")]
    Token(#[from] TokenError),
    #[error(transparent)]
    Store(#[from] KvError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
