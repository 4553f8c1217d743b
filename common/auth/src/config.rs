/// Runtime configuration for token minting and verification.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    /// HMAC signing secret shared by mint and verify.
    pub secret: String,
    /// Access-token lifetime in seconds.
    pub access_ttl_seconds: i64,
    /// Refresh-token lifetime in seconds.
    pub refresh_ttl_seconds: i64,
    /// Allowable clock skew in seconds when validating exp.
    pub leeway_seconds: u32,
}

impl TokenConfig {
    /// Construct config with the platform defaults (15 minute access
    /// tokens, 7 day refresh tokens, 30 second leeway).
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            access_ttl_seconds: 900,
            refresh_ttl_seconds: 604_800,
            leeway_seconds: 30,
        }
    }

    pub fn with_access_ttl(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    pub fn with_refresh_ttl(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway_seconds = seconds;
        self
    }
}
