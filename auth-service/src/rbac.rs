//! Role and permission catalog: reconciliation at process start plus the
//! read paths used when minting sessions.
//!
//! Reconciliation is invoked explicitly by the composition root and is safe
//! to re-run any number of times: permissions are looked up by unique name
//! before insert, and every role's permission links are recomputed and
//! rewritten so catalog changes propagate to existing roles on redeploy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::info;
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};
use crate::identity::Identity;

/// Role assigned to identities that do not request one explicitly.
pub const DEFAULT_ROLE: &str = "user";

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    /// Fully qualified `resource:action` name, unique across the catalog.
    pub name: String,
    pub description: Option<String>,
    pub resource: String,
    pub action: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// System roles are seeded and cannot be deleted.
    pub is_system: bool,
    pub is_active: bool,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn permission_names(&self) -> Vec<String> {
        self.permissions
            .iter()
            .map(|permission| permission.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PermissionSeed {
    pub name: &'static str,
    pub description: &'static str,
    pub resource: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy)]
pub struct RoleSeed {
    pub name: &'static str,
    pub description: &'static str,
    /// Grants every permission in the catalog, current and future.
    pub grants_all: bool,
    pub permissions: &'static [&'static str],
}

macro_rules! permission_seed {
    ($resource:literal, $action:literal, $description:literal) => {
        PermissionSeed {
            name: concat!($resource, ":", $action),
            description: $description,
            resource: $resource,
            action: $action,
        }
    };
}

pub const PERMISSION_CATALOG: &[PermissionSeed] = &[
    permission_seed!("users", "create", "Create users"),
    permission_seed!("users", "read", "Read users"),
    permission_seed!("users", "update", "Update users"),
    permission_seed!("users", "delete", "Delete users"),
    permission_seed!("products", "create", "Create products"),
    permission_seed!("products", "read", "Read products"),
    permission_seed!("products", "update", "Update products"),
    permission_seed!("products", "delete", "Delete products"),
    permission_seed!("products", "manage_stock", "Manage product stock"),
    permission_seed!("categories", "create", "Create categories"),
    permission_seed!("categories", "read", "Read categories"),
    permission_seed!("categories", "update", "Update categories"),
    permission_seed!("categories", "delete", "Delete categories"),
    permission_seed!("roles", "create", "Create roles"),
    permission_seed!("roles", "read", "Read roles"),
    permission_seed!("roles", "update", "Update roles"),
    permission_seed!("roles", "delete", "Delete roles"),
    permission_seed!("system", "admin", "Full system access"),
];

pub const ROLE_CATALOG: &[RoleSeed] = &[
    RoleSeed {
        name: "super_admin",
        description: "Super administrator with full system access",
        grants_all: true,
        permissions: &[],
    },
    RoleSeed {
        name: "admin",
        description: "Administrator with management access",
        grants_all: false,
        permissions: &[
            "users:create",
            "users:read",
            "users:update",
            "users:delete",
            "products:create",
            "products:read",
            "products:update",
            "products:delete",
            "products:manage_stock",
            "categories:create",
            "categories:read",
            "categories:update",
            "categories:delete",
            "roles:read",
        ],
    },
    RoleSeed {
        name: "seller",
        description: "Product seller with product management access",
        grants_all: false,
        permissions: &[
            "products:create",
            "products:read",
            "products:update",
            "products:manage_stock",
            "categories:read",
        ],
    },
    RoleSeed {
        name: "user",
        description: "Regular user with basic access",
        grants_all: false,
        permissions: &["products:read", "categories:read"],
    },
];

#[async_trait]
pub trait RbacRepository: Send + Sync {
    async fn permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>>;
    async fn insert_permission(&self, seed: &PermissionSeed) -> AuthResult<Permission>;
    async fn role_by_name(&self, name: &str) -> AuthResult<Option<Role>>;
    async fn role_by_id(&self, id: Uuid) -> AuthResult<Option<Role>>;
    /// Create the role if missing, otherwise update its description and
    /// replace its permission links with `permissions`.
    async fn upsert_role(&self, seed: &RoleSeed, permissions: &[Permission]) -> AuthResult<Role>;
    async fn all_roles(&self) -> AuthResult<Vec<Role>>;
    async fn all_permissions(&self) -> AuthResult<Vec<Permission>>;
}

/// Read/reconcile facade over the RBAC repository.
pub struct RoleResolver {
    repo: Arc<dyn RbacRepository>,
}

impl RoleResolver {
    pub fn new(repo: Arc<dyn RbacRepository>) -> Self {
        Self { repo }
    }

    /// Reconcile the fixed catalog against the relational store. Idempotent.
    pub async fn reconcile(&self) -> AuthResult<()> {
        let mut catalog = Vec::with_capacity(PERMISSION_CATALOG.len());
        for seed in PERMISSION_CATALOG {
            let permission = match self.repo.permission_by_name(seed.name).await? {
                Some(existing) => existing,
                None => self.repo.insert_permission(seed).await?,
            };
            catalog.push(permission);
        }

        for seed in ROLE_CATALOG {
            let granted: Vec<Permission> = if seed.grants_all {
                catalog.clone()
            } else {
                catalog
                    .iter()
                    .filter(|permission| seed.permissions.contains(&permission.name.as_str()))
                    .cloned()
                    .collect()
            };
            self.repo.upsert_role(seed, &granted).await?;
        }

        info!(
            permissions = PERMISSION_CATALOG.len(),
            roles = ROLE_CATALOG.len(),
            "Role and permission catalog reconciled"
        );
        Ok(())
    }

    pub async fn role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        self.repo.role_by_name(name).await
    }

    pub async fn default_role(&self) -> AuthResult<Role> {
        self.repo
            .role_by_name(DEFAULT_ROLE)
            .await?
            .ok_or(AuthError::NotFound("default role"))
    }

    pub async fn user_role(&self, identity: &Identity) -> AuthResult<Option<Role>> {
        self.repo.role_by_id(identity.role_id).await
    }

    pub async fn all_roles(&self) -> AuthResult<Vec<Role>> {
        self.repo.all_roles().await
    }

    pub async fn all_permissions(&self) -> AuthResult<Vec<Permission>> {
        self.repo.all_permissions().await
    }
}

#[derive(FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_system: bool,
    is_active: bool,
}

pub struct PgRbacRepository {
    pool: PgPool,
}

impl PgRbacRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn role_permissions(&self, role_id: Uuid) -> AuthResult<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT p.id, p.name, p.description, p.resource, p.action, p.is_active
             FROM permissions p
             JOIN role_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = $1
             ORDER BY p.name",
        )
        .bind(role_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }

    async fn hydrate(&self, row: RoleRow) -> AuthResult<Role> {
        let permissions = self.role_permissions(row.id).await?;
        Ok(Role {
            id: row.id,
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            is_active: row.is_active,
            permissions,
        })
    }
}

#[async_trait]
impl RbacRepository for PgRbacRepository {
    async fn permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>> {
        let permission = sqlx::query_as::<_, Permission>(
            "SELECT id, name, description, resource, action, is_active
             FROM permissions WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(permission)
    }

    async fn insert_permission(&self, seed: &PermissionSeed) -> AuthResult<Permission> {
        let permission = sqlx::query_as::<_, Permission>(
            "INSERT INTO permissions (id, name, description, resource, action)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, name, description, resource, action, is_active",
        )
        .bind(Uuid::new_v4())
        .bind(seed.name)
        .bind(seed.description)
        .bind(seed.resource)
        .bind(seed.action)
        .fetch_one(&self.pool)
        .await?;
        Ok(permission)
    }

    async fn role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, description, is_system, is_active FROM roles WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn role_by_id(&self, id: Uuid) -> AuthResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, description, is_system, is_active FROM roles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn upsert_role(&self, seed: &RoleSeed, permissions: &[Permission]) -> AuthResult<Role> {
        let row = sqlx::query_as::<_, RoleRow>(
            "INSERT INTO roles (id, name, description, is_system)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (name) DO UPDATE
                 SET description = EXCLUDED.description,
                     is_system = EXCLUDED.is_system
             RETURNING id, name, description, is_system, is_active",
        )
        .bind(Uuid::new_v4())
        .bind(seed.name)
        .bind(seed.description)
        .bind(true)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(row.id)
            .execute(&self.pool)
            .await?;
        for permission in permissions {
            sqlx::query(
                "INSERT INTO role_permissions (role_id, permission_id)
                 VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(row.id)
            .bind(permission.id)
            .execute(&self.pool)
            .await?;
        }

        Ok(Role {
            id: row.id,
            name: row.name,
            description: row.description,
            is_system: row.is_system,
            is_active: row.is_active,
            permissions: permissions.to_vec(),
        })
    }

    async fn all_roles(&self) -> AuthResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(
            "SELECT id, name, description, is_system, is_active FROM roles ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut roles = Vec::with_capacity(rows.len());
        for row in rows {
            roles.push(self.hydrate(row).await?);
        }
        Ok(roles)
    }

    async fn all_permissions(&self) -> AuthResult<Vec<Permission>> {
        let permissions = sqlx::query_as::<_, Permission>(
            "SELECT id, name, description, resource, action, is_active
             FROM permissions ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(permissions)
    }
}

// ---------------- In-Memory Implementation (Tests) ----------------

#[derive(Default)]
pub struct MemoryRbacRepository {
    inner: Mutex<MemoryRbacState>,
}

#[derive(Default)]
struct MemoryRbacState {
    permissions: HashMap<String, Permission>,
    roles: HashMap<String, Role>,
}

impl MemoryRbacRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a role's permission list in place, simulating an
    /// out-of-band grant change while sessions are live.
    pub fn override_role_permissions(&self, role_name: &str, permissions: Vec<Permission>) {
        let mut state = self.inner.lock().expect("rbac lock poisoned");
        if let Some(role) = state.roles.get_mut(role_name) {
            role.permissions = permissions;
        }
    }
}

#[async_trait]
impl RbacRepository for MemoryRbacRepository {
    async fn permission_by_name(&self, name: &str) -> AuthResult<Option<Permission>> {
        let state = self.inner.lock().expect("rbac lock poisoned");
        Ok(state.permissions.get(name).cloned())
    }

    async fn insert_permission(&self, seed: &PermissionSeed) -> AuthResult<Permission> {
        let mut state = self.inner.lock().expect("rbac lock poisoned");
        let permission = Permission {
            id: Uuid::new_v4(),
            name: seed.name.to_string(),
            description: Some(seed.description.to_string()),
            resource: seed.resource.to_string(),
            action: seed.action.to_string(),
            is_active: true,
        };
        state
            .permissions
            .insert(permission.name.clone(), permission.clone());
        Ok(permission)
    }

    async fn role_by_name(&self, name: &str) -> AuthResult<Option<Role>> {
        let state = self.inner.lock().expect("rbac lock poisoned");
        Ok(state.roles.get(name).cloned())
    }

    async fn role_by_id(&self, id: Uuid) -> AuthResult<Option<Role>> {
        let state = self.inner.lock().expect("rbac lock poisoned");
        Ok(state.roles.values().find(|role| role.id == id).cloned())
    }

    async fn upsert_role(&self, seed: &RoleSeed, permissions: &[Permission]) -> AuthResult<Role> {
        let mut state = self.inner.lock().expect("rbac lock poisoned");
        let id = state
            .roles
            .get(seed.name)
            .map(|existing| existing.id)
            .unwrap_or_else(Uuid::new_v4);
        let role = Role {
            id,
            name: seed.name.to_string(),
            description: Some(seed.description.to_string()),
            is_system: true,
            is_active: true,
            permissions: permissions.to_vec(),
        };
        state.roles.insert(role.name.clone(), role.clone());
        Ok(role)
    }

    async fn all_roles(&self) -> AuthResult<Vec<Role>> {
        let state = self.inner.lock().expect("rbac lock poisoned");
        let mut roles: Vec<Role> = state.roles.values().cloned().collect();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    async fn all_permissions(&self) -> AuthResult<Vec<Permission>> {
        let state = self.inner.lock().expect("rbac lock poisoned");
        let mut permissions: Vec<Permission> = state.permissions.values().cloned().collect();
        permissions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(permissions)
    }
}
