use anyhow::{Context, Result};
use std::env;

use crate::refresh::{DEFAULT_BLACKLIST_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS};
use crate::session::DEFAULT_SESSION_TTL_SECONDS;

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 900;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub database_url: String,
    pub redis_url: String,
    pub jwt_secret: String,
    pub access_ttl_seconds: i64,
    pub session_ttl_seconds: u64,
    pub refresh_ttl_seconds: u64,
    pub blacklist_ttl_seconds: u64,
    pub host: String,
    pub port: u16,
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let redis_url =
        env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

    let access_ttl_seconds =
        seconds_from_env("AUTH_ACCESS_TTL_SECONDS", DEFAULT_ACCESS_TTL_SECONDS as u64)? as i64;
    let session_ttl_seconds =
        seconds_from_env("AUTH_SESSION_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS)?;
    let refresh_ttl_seconds =
        seconds_from_env("AUTH_REFRESH_TTL_SECONDS", DEFAULT_REFRESH_TTL_SECONDS)?;
    let blacklist_ttl_seconds =
        seconds_from_env("AUTH_BLACKLIST_TTL_SECONDS", DEFAULT_BLACKLIST_TTL_SECONDS)?;

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = match env::var("PORT") {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid PORT '{value}'"))?,
        Err(_) => 8086,
    };

    Ok(ServiceConfig {
        database_url,
        redis_url,
        jwt_secret,
        access_ttl_seconds,
        session_ttl_seconds,
        refresh_ttl_seconds,
        blacklist_ttl_seconds,
        host,
        port,
    })
}

fn seconds_from_env(key: &str, default: u64) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} '{value}': expected seconds")),
        Err(_) => Ok(default),
    }
}
