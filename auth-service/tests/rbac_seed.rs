mod support;

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use auth_service::rbac::{PERMISSION_CATALOG, ROLE_CATALOG};
use support::TestContext;

#[tokio::test]
async fn reconcile_seeds_the_full_catalog() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    let permissions = ctx.roles.all_permissions().await?;
    assert_eq!(permissions.len(), PERMISSION_CATALOG.len());
    let names: HashSet<&str> = permissions
        .iter()
        .map(|permission| permission.name.as_str())
        .collect();
    for seed in PERMISSION_CATALOG {
        assert!(names.contains(seed.name), "missing permission {}", seed.name);
    }

    let roles = ctx.roles.all_roles().await?;
    assert_eq!(roles.len(), ROLE_CATALOG.len());
    for role in &roles {
        assert!(role.is_system);
    }
    Ok(())
}

#[tokio::test]
async fn reconcile_twice_changes_nothing() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    let permissions_before = ctx.roles.all_permissions().await?;
    let roles_before: HashMap<String, (uuid::Uuid, Vec<String>)> = ctx
        .roles
        .all_roles()
        .await?
        .into_iter()
        .map(|role| {
            let mut names = role.permission_names();
            names.sort();
            (role.name.clone(), (role.id, names))
        })
        .collect();

    ctx.roles.reconcile().await?;

    let permissions_after = ctx.roles.all_permissions().await?;
    assert_eq!(permissions_after.len(), permissions_before.len());
    let ids_before: HashSet<uuid::Uuid> =
        permissions_before.iter().map(|permission| permission.id).collect();
    let ids_after: HashSet<uuid::Uuid> =
        permissions_after.iter().map(|permission| permission.id).collect();
    assert_eq!(ids_after, ids_before, "permission rows were duplicated or replaced");

    for role in ctx.roles.all_roles().await? {
        let mut names = role.permission_names();
        names.sort();
        let (id_before, names_before) = roles_before
            .get(&role.name)
            .expect("role survived reconcile");
        assert_eq!(role.id, *id_before);
        assert_eq!(&names, names_before);
    }
    Ok(())
}

#[tokio::test]
async fn role_grants_match_the_declared_catalog() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;

    let super_admin = ctx
        .roles
        .role_by_name("super_admin")
        .await?
        .expect("super_admin seeded");
    assert_eq!(super_admin.permissions.len(), PERMISSION_CATALOG.len());

    let user = ctx.roles.role_by_name("user").await?.expect("user seeded");
    let mut names = user.permission_names();
    names.sort();
    assert_eq!(names, vec!["categories:read", "products:read"]);

    let seller = ctx.roles.role_by_name("seller").await?.expect("seller seeded");
    let seller_names: HashSet<String> = seller.permission_names().into_iter().collect();
    assert!(seller_names.contains("products:manage_stock"));
    assert!(!seller_names.contains("users:read"));

    let admin = ctx.roles.role_by_name("admin").await?.expect("admin seeded");
    let admin_names: HashSet<String> = admin.permission_names().into_iter().collect();
    assert!(admin_names.contains("roles:read"));
    assert!(!admin_names.contains("roles:delete"));
    assert!(!admin_names.contains("system:admin"));
    Ok(())
}

#[tokio::test]
async fn default_role_is_the_seeded_user_role() -> Result<()> {
    let ctx = TestContext::bootstrap().await?;
    let default = ctx.roles.default_role().await?;
    assert_eq!(default.name, "user");
    Ok(())
}
