mod support;

use anyhow::Result;
use auth_service::identity::IdentityRepository;
use auth_service::identity::NewIdentity;
use auth_service::password;
use auth_service::service::LoginRequest;
use auth_service::AuthError;
use common_kv::KvStore;
use support::{register_request, TestContext, TEST_PASSWORD};

#[tokio::test]
async fn register_opens_session_with_default_role() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    let session = ctx.auth.register(register_request("a@x.com", "a", None)).await?;

    assert!(session.session_id.starts_with("session_"));
    assert!(!session.access_token.is_empty());
    assert!(!session.refresh_token.is_empty());
    assert_ne!(session.access_token, session.refresh_token);
    assert_eq!(session.user.role, "user");
    assert_eq!(
        session.user.permissions,
        vec!["products:read".to_string(), "categories:read".to_string()]
    );

    let snapshot = ctx
        .sessions
        .get_session(session.user.id)
        .await?
        .expect("session should be cached after register");
    assert_eq!(snapshot.role, "user");
    assert_eq!(snapshot.session_id.as_deref(), Some(session.session_id.as_str()));
    assert_eq!(snapshot.permissions, session.user.permissions);

    let by_token = ctx
        .sessions
        .get_session_by_token(&session.access_token)
        .await?;
    assert_eq!(by_token, Some(snapshot));
    Ok(())
}

#[tokio::test]
async fn register_with_unknown_role_is_not_found() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let err = ctx
        .auth
        .register(register_request("a@x.com", "a", Some("warlock")))
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn register_duplicate_email_or_username_conflicts() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    ctx.register_user("a@x.com", "a").await?;

    let same_email = ctx
        .auth
        .register(register_request("a@x.com", "other", None))
        .await
        .unwrap_err();
    assert!(matches!(same_email, AuthError::Conflict));

    let same_username = ctx
        .auth
        .register(register_request("other@x.com", "a", None))
        .await
        .unwrap_err();
    assert!(matches!(same_username, AuthError::Conflict));
    Ok(())
}

#[tokio::test]
async fn login_accepts_email_or_username() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    ctx.register_user("a@x.com", "a").await?;

    let by_email = ctx
        .auth
        .login(LoginRequest {
            email_or_username: "a@x.com".to_string(),
            password: TEST_PASSWORD.to_string(),
        })
        .await?;
    let by_username = ctx
        .auth
        .login(LoginRequest {
            email_or_username: "a".to_string(),
            password: TEST_PASSWORD.to_string(),
        })
        .await?;

    assert_eq!(by_email.user.id, by_username.user.id);
    assert_ne!(by_email.session_id, by_username.session_id);
    Ok(())
}

#[tokio::test]
async fn wrong_password_leaves_no_session_or_refresh_state() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    // Create the identity directly so no session exists beforehand.
    let role = ctx.roles.default_role().await?;
    let identity = ctx
        .identities
        .create(NewIdentity {
            email: "b@x.com".to_string(),
            username: "b".to_string(),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            password_hash: password::hash_password(TEST_PASSWORD)?,
            role_id: role.id,
        })
        .await?;

    let err = ctx
        .auth
        .login(LoginRequest {
            email_or_username: "b@x.com".to_string(),
            password: "wrong-password".to_string(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    assert!(!ctx
        .store
        .exists(&format!("session:{}", identity.id))
        .await?);
    assert!(!ctx
        .store
        .exists(&format!("refresh_token:{}", identity.id))
        .await?);
    Ok(())
}

#[tokio::test]
async fn unknown_user_and_wrong_password_fail_identically() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    ctx.register_user("a@x.com", "a").await?;

    let unknown = ctx
        .auth
        .login(LoginRequest {
            email_or_username: "ghost@x.com".to_string(),
            password: TEST_PASSWORD.to_string(),
        })
        .await
        .unwrap_err();
    let wrong = ctx
        .auth
        .login(LoginRequest {
            email_or_username: "a@x.com".to_string(),
            password: "wrong-password".to_string(),
        })
        .await
        .unwrap_err();

    assert!(matches!(unknown, AuthError::InvalidCredentials));
    assert!(matches!(wrong, AuthError::InvalidCredentials));
    Ok(())
}

#[tokio::test]
async fn federated_login_provisions_then_reuses_identity() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    let payload = auth_service::service::FederatedIdentity {
        provider_id: "provider-123".to_string(),
        email: Some("fed@x.com".to_string()),
        username: "fed".to_string(),
        first_name: Some("Fed".to_string()),
        last_name: None,
    };

    let first = ctx.auth.federated_login(payload.clone()).await?;
    assert_eq!(first.user.role, "user");
    assert_eq!(first.user.email, "fed@x.com");

    // Second federated login resolves the same identity instead of
    // provisioning another.
    let second = ctx.auth.federated_login(payload).await?;
    assert_eq!(second.user.id, first.user.id);

    // The provisioned opaque password is not usable knowledge; but the
    // account itself behaves like any other for refresh.
    let rotated = ctx.auth.refresh(&second.refresh_token).await?;
    assert_ne!(rotated.refresh_token, second.refresh_token);
    Ok(())
}
