mod support;

use std::collections::HashSet;

use anyhow::Result;
use auth_service::events::SESSION_REFRESHED_CHANNEL;
use common_kv::KvStore;
use support::{register_request, TestContext};

#[tokio::test]
async fn session_permissions_match_the_role_at_creation() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    let admin = ctx
        .auth
        .register(register_request("root@x.com", "root", Some("super_admin")))
        .await?;
    let catalog: HashSet<String> = ctx
        .roles
        .all_permissions()
        .await?
        .into_iter()
        .map(|permission| permission.name)
        .collect();
    let held: HashSet<String> = admin.user.permissions.iter().cloned().collect();
    assert_eq!(held, catalog);

    let plain = ctx
        .auth
        .register(register_request("a@x.com", "a", None))
        .await?;
    let snapshot = ctx
        .sessions
        .get_session_by_token(&plain.access_token)
        .await?
        .expect("session reachable by token");
    let expected: HashSet<&str> = ["products:read", "categories:read"].into();
    let cached: HashSet<&str> = snapshot
        .permissions
        .iter()
        .map(|value| value.as_str())
        .collect();
    assert_eq!(cached, expected);
    Ok(())
}

#[tokio::test]
async fn logout_is_idempotent_and_kills_the_refresh_scope() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let session = ctx.register_user("a@x.com", "a").await?;

    ctx.auth.logout(&session.access_token).await?;

    assert_eq!(ctx.sessions.get_session(session.user.id).await?, None);
    assert_eq!(
        ctx.sessions
            .get_session_by_token(&session.access_token)
            .await?,
        None
    );
    assert_eq!(
        ctx.refresh_tokens
            .validate_refresh_token(&session.refresh_token)
            .await?,
        None
    );

    // Second logout with the now-dangling token never raises.
    ctx.auth.logout(&session.access_token).await?;
    Ok(())
}

#[tokio::test]
async fn logout_with_an_unknown_token_is_a_noop_success() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    ctx.auth.logout("not-a-token-anyone-issued").await?;
    Ok(())
}

#[tokio::test]
async fn logged_out_refresh_token_cannot_rotate() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let session = ctx.register_user("a@x.com", "a").await?;

    ctx.auth.logout(&session.access_token).await?;
    assert!(ctx.auth.refresh(&session.refresh_token).await.is_err());
    Ok(())
}

#[tokio::test]
async fn permission_checks_read_the_cached_snapshot_not_the_live_role() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let session = ctx.register_user("a@x.com", "a").await?;
    let user_id = session.user.id;

    assert!(ctx.sessions.has_permission(user_id, "products:read").await?);

    // Revoke the role's grants out-of-band. The cached snapshot still
    // answers until the session is recreated; the staleness window is
    // bounded by the session TTL.
    ctx.rbac.override_role_permissions("user", Vec::new());
    assert!(ctx.sessions.has_permission(user_id, "products:read").await?);

    let relogin = ctx
        .auth
        .login(auth_service::service::LoginRequest {
            email_or_username: "a@x.com".to_string(),
            password: support::TEST_PASSWORD.to_string(),
        })
        .await?;
    assert!(relogin.user.permissions.is_empty());
    assert!(!ctx.sessions.has_permission(user_id, "products:read").await?);
    Ok(())
}

#[tokio::test]
async fn refresh_session_renews_and_announces() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let session = ctx.register_user("a@x.com", "a").await?;

    let mut subscription = ctx.store.subscribe(SESSION_REFRESHED_CHANNEL).await?;
    ctx.sessions.refresh_session(session.user.id, Some(60)).await?;

    let payload = subscription
        .next_message()
        .await
        .expect("session refresh event");
    let event: serde_json::Value = serde_json::from_str(&payload)?;
    assert_eq!(event["userId"], session.user.id.to_string());
    assert_eq!(event["expiresIn"], 60);

    assert!(ctx.sessions.is_session_valid(session.user.id).await?);
    Ok(())
}

#[tokio::test]
async fn profile_prefers_the_cached_session() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let session = ctx.register_user("a@x.com", "a").await?;

    let profile = ctx.auth.profile(&session.access_token).await?;
    assert_eq!(profile, session.user);

    // With the session gone the profile falls back to the relational store.
    ctx.sessions.delete_session(session.user.id).await?;
    let fallback = ctx.auth.profile(&session.access_token).await?;
    assert_eq!(fallback.id, session.user.id);
    assert_eq!(fallback.role, "user");
    Ok(())
}
