use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{AuthError, AuthResult};

/// Snapshot of a user record as the relational store owns it. This service
/// only reads identities and embeds parts of them into sessions.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role_id: Uuid,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub email: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub password_hash: String,
    pub role_id: Uuid,
}

#[async_trait]
pub trait IdentityRepository: Send + Sync {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>>;
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<Identity>>;
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>>;
    /// Fails with [`AuthError::Conflict`] on a duplicate email or username.
    async fn create(&self, new_identity: NewIdentity) -> AuthResult<Identity>;
}

const IDENTITY_COLUMNS: &str =
    "id, email, username, first_name, last_name, password_hash, role_id, is_active, created_at, updated_at";

pub struct PgIdentityRepository {
    pool: PgPool,
}

impl PgIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityRepository for PgIdentityRepository {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn find_by_username(&self, username: &str) -> AuthResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(&format!(
            "SELECT {IDENTITY_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn create(&self, new_identity: NewIdentity) -> AuthResult<Identity> {
        let existing: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM users WHERE email = $1 OR username = $2")
                .bind(&new_identity.email)
                .bind(&new_identity.username)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(AuthError::Conflict);
        }

        let identity = sqlx::query_as::<_, Identity>(&format!(
            "INSERT INTO users (id, email, username, first_name, last_name, password_hash, role_id)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {IDENTITY_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&new_identity.email)
        .bind(&new_identity.username)
        .bind(&new_identity.first_name)
        .bind(&new_identity.last_name)
        .bind(&new_identity.password_hash)
        .bind(new_identity.role_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| {
            // The pre-check races with concurrent inserts; the unique
            // constraint is the backstop.
            if is_unique_violation(&err) {
                AuthError::Conflict
            } else {
                AuthError::Database(err)
            }
        })?;
        Ok(identity)
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err.as_database_error().and_then(|db| db.code()),
        Some(code) if code == "23505"
    )
}

// ---------------- In-Memory Implementation (Tests) ----------------

#[derive(Default)]
pub struct MemoryIdentityRepository {
    inner: Mutex<HashMap<Uuid, Identity>>,
}

impl MemoryIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop an identity, simulating out-of-band deletion from the
    /// relational store.
    pub fn remove(&self, id: Uuid) {
        self.inner
            .lock()
            .expect("identity lock poisoned")
            .remove(&id);
    }
}

#[async_trait]
impl IdentityRepository for MemoryIdentityRepository {
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<Identity>> {
        let identities = self.inner.lock().expect("identity lock poisoned");
        Ok(identities
            .values()
            .find(|identity| identity.email == email)
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> AuthResult<Option<Identity>> {
        let identities = self.inner.lock().expect("identity lock poisoned");
        Ok(identities
            .values()
            .find(|identity| identity.username == username)
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<Identity>> {
        let identities = self.inner.lock().expect("identity lock poisoned");
        Ok(identities.get(&id).cloned())
    }

    async fn create(&self, new_identity: NewIdentity) -> AuthResult<Identity> {
        let mut identities = self.inner.lock().expect("identity lock poisoned");
        let duplicate = identities.values().any(|identity| {
            identity.email == new_identity.email || identity.username == new_identity.username
        });
        if duplicate {
            return Err(AuthError::Conflict);
        }

        let now = Utc::now();
        let identity = Identity {
            id: Uuid::new_v4(),
            email: new_identity.email,
            username: new_identity.username,
            first_name: new_identity.first_name,
            last_name: new_identity.last_name,
            password_hash: new_identity.password_hash,
            role_id: new_identity.role_id,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        identities.insert(identity.id, identity.clone());
        Ok(identity)
    }
}
