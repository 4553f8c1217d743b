use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use common_auth::{TokenCodec, TokenConfig};
use common_kv::RedisStore;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use auth_service::config::load_service_config;
use auth_service::handlers;
use auth_service::identity::PgIdentityRepository;
use auth_service::metrics::AuthMetrics;
use auth_service::rbac::{PgRbacRepository, RoleResolver};
use auth_service::refresh::{RefreshTokenManager, RefreshTokenSettings};
use auth_service::service::AuthService;
use auth_service::session::SessionManager;
use auth_service::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = load_service_config()?;

    let db_pool = PgPool::connect(&config.database_url).await?;
    let store = Arc::new(RedisStore::connect(&config.redis_url).await?);

    let codec = Arc::new(TokenCodec::new(
        TokenConfig::new(config.jwt_secret.clone())
            .with_access_ttl(config.access_ttl_seconds)
            .with_refresh_ttl(config.refresh_ttl_seconds as i64),
    ));
    let identities = Arc::new(PgIdentityRepository::new(db_pool.clone()));
    let roles = Arc::new(RoleResolver::new(Arc::new(PgRbacRepository::new(
        db_pool.clone(),
    ))));

    // Seed the role/permission catalog before serving; safe to re-run on
    // every boot.
    roles.reconcile().await?;

    let sessions = Arc::new(SessionManager::new(
        store.clone(),
        config.session_ttl_seconds,
    ));
    let refresh_tokens = Arc::new(RefreshTokenManager::new(
        store.clone(),
        codec.clone(),
        identities.clone(),
        roles.clone(),
        RefreshTokenSettings {
            refresh_ttl_seconds: config.refresh_ttl_seconds,
            blacklist_ttl_seconds: config.blacklist_ttl_seconds,
        },
    ));
    let auth = Arc::new(AuthService::new(
        identities,
        roles,
        codec,
        sessions.clone(),
        refresh_tokens.clone(),
    ));

    let state = AppState {
        auth,
        sessions,
        refresh_tokens,
        metrics: Arc::new(AuthMetrics::new()?),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, AUTHORIZATION, CONTENT_TYPE]);

    let app = handlers::router(state).layer(cors);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));

    info!(%addr, "starting auth-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
