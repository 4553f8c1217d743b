use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::claims::{AccessClaims, RefreshClaims, REFRESH_TOKEN_TYPE};
use crate::config::TokenConfig;
use crate::error::{TokenError, TokenResult};

/// Stateless signer/verifier for access and refresh tokens.
///
/// Minting and verification are pure functions over the configured secret;
/// nothing here touches storage. Storage-side checks (blacklist, scope-key
/// equality) belong to the refresh-token manager.
pub struct TokenCodec {
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenCodec {
    pub fn new(config: TokenConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Mint an access token for `sub` with the configured lifetime.
    pub fn mint_access(&self, sub: Uuid, email: &str, role: &str) -> TokenResult<(String, AccessClaims)> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub,
            email: email.to_string(),
            role: role.to_string(),
            jti: format!("{}-{}", sub, now.timestamp_millis()),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(self.config.access_ttl_seconds)).timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok((token, claims))
    }

    /// Mint a refresh token, optionally bound to a session.
    pub fn mint_refresh(
        &self,
        sub: Uuid,
        session_id: Option<&str>,
        ttl_seconds: i64,
    ) -> TokenResult<String> {
        let now = Utc::now();
        let claims = RefreshClaims {
            sub,
            token_type: REFRESH_TOKEN_TYPE.to_string(),
            session_id: session_id.map(|value| value.to_string()),
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
        };
        Ok(encode(&Header::default(), &claims, &self.encoding_key)?)
    }

    pub fn verify_access(&self, token: &str) -> TokenResult<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation())?;
        Ok(data.claims)
    }

    /// Verify a refresh token's signature, expiry, and type marker.
    pub fn verify_refresh(&self, token: &str) -> TokenResult<RefreshClaims> {
        let data = decode::<RefreshClaims>(token, &self.decoding_key, &self.validation())?;
        if !data.claims.is_refresh() {
            return Err(TokenError::Malformed);
        }
        Ok(data.claims)
    }

    /// Extract access claims without verifying the signature or expiry.
    ///
    /// Only for best-effort cleanup (logout on a token whose session has
    /// already lapsed); never use the result to grant access.
    pub fn decode_access_unverified(&self, token: &str) -> Option<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = u64::from(self.config.leeway_seconds);
        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(TokenConfig::new("unit-test-secret").with_leeway(0))
    }

    #[test]
    fn access_token_round_trip() {
        let codec = codec();
        let sub = Uuid::new_v4();
        let (token, minted) = codec.mint_access(sub, "a@x.com", "user").unwrap();

        let claims = codec.verify_access(&token).unwrap();
        assert_eq!(claims, minted);
        assert_eq!(claims.sub, sub);
        assert_eq!(claims.role, "user");
        assert!(claims.jti.starts_with(&sub.to_string()));
        assert_eq!(claims.exp - claims.iat, 900);
    }

    #[test]
    fn refresh_token_round_trip_with_session() {
        let codec = codec();
        let sub = Uuid::new_v4();
        let token = codec
            .mint_refresh(sub, Some("session_abc"), 604_800)
            .unwrap();

        let claims = codec.verify_refresh(&token).unwrap();
        assert_eq!(claims.sub, sub);
        assert_eq!(claims.session_id.as_deref(), Some("session_abc"));
        assert!(claims.is_refresh());
    }

    #[test]
    fn expired_refresh_token_is_rejected() {
        let codec = codec();
        let token = codec.mint_refresh(Uuid::new_v4(), None, -120).unwrap();
        assert_eq!(codec.verify_refresh(&token), Err(TokenError::Expired));
    }

    #[test]
    fn foreign_signature_is_rejected() {
        let codec = codec();
        let other = TokenCodec::new(TokenConfig::new("some-other-secret").with_leeway(0));
        let token = other.mint_refresh(Uuid::new_v4(), None, 600).unwrap();
        assert_eq!(codec.verify_refresh(&token), Err(TokenError::BadSignature));
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert_eq!(
            codec.verify_access("not-even-a-jwt"),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn access_token_does_not_verify_as_refresh() {
        let codec = codec();
        let (token, _) = codec.mint_access(Uuid::new_v4(), "a@x.com", "user").unwrap();
        // An access token decodes but carries no refresh type marker.
        assert!(codec.verify_refresh(&token).is_err());
    }

    #[test]
    fn unverified_decode_survives_expiry() {
        let codec = TokenCodec::new(
            TokenConfig::new("unit-test-secret")
                .with_access_ttl(-120)
                .with_leeway(0),
        );
        let sub = Uuid::new_v4();
        let (token, _) = codec.mint_access(sub, "a@x.com", "user").unwrap();

        assert!(codec.verify_access(&token).is_err());
        let claims = codec.decode_access_unverified(&token).unwrap();
        assert_eq!(claims.sub, sub);
    }
}
