use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Claim value identifying refresh tokens.
pub const REFRESH_TOKEN_TYPE: &str = "refresh";

/// Claims carried by short-lived access tokens.
///
/// `jti` is derived from the subject and the issue instant and exists for
/// uniqueness and auditing only; revocation never looks tokens up by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub email: String,
    pub role: String,
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// Claims carried by long-lived refresh tokens. `session_id` is present
/// when the credential was minted for a specific session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: Uuid,
    #[serde(rename = "type")]
    pub token_type: String,
    #[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl RefreshClaims {
    pub fn is_refresh(&self) -> bool {
        self.token_type == REFRESH_TOKEN_TYPE
    }
}
