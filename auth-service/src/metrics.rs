use anyhow::Result;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the authentication flows, rendered in Prometheus text
/// format by the `/metrics` route.
#[derive(Clone)]
pub struct AuthMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    sessions_opened: IntCounterVec,
    token_rotations: IntCounterVec,
}

impl AuthMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "auth_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let sessions_opened = IntCounterVec::new(
            Opts::new(
                "auth_sessions_opened_total",
                "Count of sessions opened grouped by flow",
            ),
            &["flow"],
        )?;
        registry.register(Box::new(sessions_opened.clone()))?;

        let token_rotations = IntCounterVec::new(
            Opts::new(
                "auth_token_rotations_total",
                "Count of refresh-token exchanges grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(token_rotations.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            sessions_opened,
            token_rotations,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn session_opened(&self, flow: &str) {
        self.sessions_opened.with_label_values(&[flow]).inc();
    }

    pub fn token_rotation(&self, outcome: &str) {
        self.token_rotations.with_label_values(&[outcome]).inc();
    }

    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
