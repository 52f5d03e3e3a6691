//! PostgreSQL [`AuthStore`].
//!
//! Per-user edits run in a transaction that first takes `FOR UPDATE` on the
//! user row, so concurrent grant/revoke calls for one user serialize.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use super::{AuthStore, OverridesEdit, RolesEdit, StoreError};
use crate::models::auth::{
    Fingerprint, NewUser, Permission, PermissionId, Role, RoleId, TokenRecord, TokenScope, User,
    UserId,
};
use crate::models::page::Page;
use crate::permissions::{PermissionOverrides, PermissionSet};

const USER_COLUMNS: &str =
    "id, email, password_hash, is_activated, is_admin, created_at, updated_at";

type UserRow = (i64, String, String, bool, bool, DateTime<Utc>, DateTime<Utc>);

fn user_from_row(row: UserRow) -> User {
    let (id, email, password_hash, is_activated, is_admin, created_at, updated_at) = row;
    User {
        id: UserId(id),
        email,
        password_hash,
        is_activated,
        is_admin,
        created_at,
        updated_at,
    }
}

/// `LIMIT`/`OFFSET` bind values for `page`.
fn limit_offset(page: Page) -> (i64, i64) {
    let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);
    (i64::from(page.limit), offset)
}

fn permission_from_row((id, name): (i64, String)) -> Permission {
    Permission {
        id: PermissionId(id),
        name,
    }
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Lock the user row for the rest of the transaction.
async fn lock_user(conn: &mut PgConnection, user: UserId) -> Result<(), StoreError> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM users WHERE id = $1 FOR UPDATE")
        .bind(user.0)
        .fetch_optional(conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| StoreError::NotFound(format!("user {user}")))
}

async fn load_permission_edge(
    conn: &mut PgConnection,
    table: &str,
    user: UserId,
) -> Result<PermissionSet, StoreError> {
    let sql = format!(
        "SELECT p.id, p.name FROM {table} e \
         JOIN permissions p ON p.id = e.permission_id \
         WHERE e.user_id = $1 ORDER BY p.id"
    );
    let rows = sqlx::query_as::<_, (i64, String)>(&sql)
        .bind(user.0)
        .fetch_all(conn)
        .await?;
    Ok(rows.into_iter().map(permission_from_row).collect())
}

async fn load_overrides(
    conn: &mut PgConnection,
    user: UserId,
) -> Result<PermissionOverrides, StoreError> {
    let granted = load_permission_edge(&mut *conn, "users_granted_permissions", user).await?;
    let revoked = load_permission_edge(&mut *conn, "users_revoked_permissions", user).await?;
    Ok(PermissionOverrides { granted, revoked })
}

async fn replace_permission_edge(
    conn: &mut PgConnection,
    table: &str,
    user: UserId,
    ids: Vec<i64>,
) -> Result<(), StoreError> {
    sqlx::query(&format!("DELETE FROM {table} WHERE user_id = $1"))
        .bind(user.0)
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!(
        "INSERT INTO {table} (user_id, permission_id) SELECT $1, unnest($2::bigint[])"
    ))
    .bind(user.0)
    .bind(ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Attach permissions to a list of `(id, name)` role rows.
async fn load_roles(
    conn: &mut PgConnection,
    rows: Vec<(i64, String)>,
) -> Result<Vec<Role>, StoreError> {
    let ids: Vec<i64> = rows.iter().map(|(id, _)| *id).collect();
    let edges = sqlx::query_as::<_, (i64, i64, String)>(
        "SELECT rp.role_id, p.id, p.name \
         FROM roles_permissions rp \
         JOIN permissions p ON p.id = rp.permission_id \
         WHERE rp.role_id = ANY($1) \
         ORDER BY p.id",
    )
    .bind(&ids)
    .fetch_all(conn)
    .await?;

    let mut by_role: BTreeMap<i64, Vec<Permission>> = BTreeMap::new();
    for (role_id, id, name) in edges {
        by_role
            .entry(role_id)
            .or_default()
            .push(permission_from_row((id, name)));
    }

    Ok(rows
        .into_iter()
        .map(|(id, name)| Role {
            id: RoleId(id),
            name,
            permissions: by_role.remove(&id).unwrap_or_default(),
        })
        .collect())
}

async fn roles_of(conn: &mut PgConnection, user: UserId) -> Result<Vec<Role>, StoreError> {
    let rows = sqlx::query_as::<_, (i64, String)>(
        "SELECT r.id, r.name FROM roles r \
         JOIN users_roles ur ON ur.role_id = r.id \
         WHERE ur.user_id = $1 ORDER BY r.id",
    )
    .bind(user.0)
    .fetch_all(&mut *conn)
    .await?;
    load_roles(conn, rows).await
}

#[async_trait]
impl AuthStore for PgStore {
    async fn insert_user(&self, user: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (email, password_hash, is_activated, is_admin) \
             VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}"
        ))
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_activated)
        .bind(user.is_admin)
        .fetch_one(&self.pool)
        .await?;
        Ok(user_from_row(row))
    }

    async fn update_user(&self, user: &User) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users SET email = $2, password_hash = $3, is_activated = $4, \
             is_admin = $5, updated_at = now() \
             WHERE id = $1 RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id.0)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.is_activated)
        .bind(user.is_admin)
        .fetch_optional(&self.pool)
        .await?;
        row.map(user_from_row)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user.id)))
    }

    async fn user_by_id(&self, id: UserId) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(user_from_row))
    }

    async fn delete_user(&self, id: UserId) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {id}")));
        }
        Ok(())
    }

    async fn list_users(&self, page: Page) -> Result<(Vec<User>, u64), StoreError> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY id LIMIT $1 OFFSET $2"
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok((
            rows.into_iter().map(user_from_row).collect(),
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    async fn insert_token(&self, token: &TokenRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO tokens (hash, user_id, scope, expiry) VALUES ($1, $2, $3, $4)")
            .bind(token.fingerprint.as_bytes())
            .bind(token.user_id.0)
            .bind(token.scope.as_str())
            .bind(token.expiry)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn token_by_fingerprint(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<Option<TokenRecord>, StoreError> {
        let row = sqlx::query_as::<_, (Vec<u8>, i64, String, DateTime<Utc>)>(
            "SELECT hash, user_id, scope, expiry FROM tokens WHERE hash = $1",
        )
        .bind(fingerprint.as_bytes())
        .fetch_optional(&self.pool)
        .await?;

        let Some((hash, user_id, scope, expiry)) = row else {
            return Ok(None);
        };
        let fingerprint = Fingerprint::from_slice(&hash)
            .ok_or_else(|| StoreError::Unavailable("token hash has wrong length".into()))?;
        let scope = scope
            .parse::<TokenScope>()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Some(TokenRecord {
            fingerprint,
            user_id: UserId(user_id),
            scope,
            expiry,
        }))
    }

    async fn delete_tokens_for_user(
        &self,
        user: UserId,
        scope: TokenScope,
    ) -> Result<u64, StoreError> {
        let done = sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(user.0)
            .bind(scope.as_str())
            .execute(&self.pool)
            .await?;
        Ok(done.rows_affected())
    }

    async fn insert_permission(&self, name: &str) -> Result<Permission, StoreError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "INSERT INTO permissions (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(permission_from_row(row))
    }

    async fn permission_by_id(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, name FROM permissions WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(permission_from_row))
    }

    async fn list_permissions(&self, page: Page) -> Result<(Vec<Permission>, u64), StoreError> {
        let (limit, offset) = limit_offset(page);
        let rows = sqlx::query_as::<_, (i64, String)>(
            "SELECT id, name FROM permissions ORDER BY id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let total = sqlx::query_scalar::<_, i64>("SELECT count(*) FROM permissions")
            .fetch_one(&self.pool)
            .await?;
        Ok((
            rows.into_iter().map(permission_from_row).collect(),
            u64::try_from(total).unwrap_or_default(),
        ))
    }

    async fn rename_permission(
        &self,
        id: PermissionId,
        name: &str,
    ) -> Result<Permission, StoreError> {
        let row = sqlx::query_as::<_, (i64, String)>(
            "UPDATE permissions SET name = $2 WHERE id = $1 RETURNING id, name",
        )
        .bind(id.0)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(permission_from_row)
            .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))
    }

    async fn delete_permission(&self, id: PermissionId) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("permission {id}")));
        }
        Ok(())
    }

    async fn insert_role(
        &self,
        name: &str,
        permissions: &[PermissionId],
    ) -> Result<Role, StoreError> {
        let ids: Vec<i64> = permissions
            .iter()
            .map(|p| p.0)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, (i64, String)>(
            "INSERT INTO roles (name) VALUES ($1) RETURNING id, name",
        )
        .bind(name)
        .fetch_one(&mut *tx)
        .await?;
        sqlx::query(
            "INSERT INTO roles_permissions (role_id, permission_id) \
             SELECT $1, unnest($2::bigint[])",
        )
        .bind(row.0)
        .bind(ids)
        .execute(&mut *tx)
        .await?;
        let mut roles = load_roles(&mut tx, vec![row]).await?;
        tx.commit().await?;

        roles
            .pop()
            .ok_or_else(|| StoreError::Unavailable("inserted role vanished".into()))
    }

    async fn role_by_id(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM roles WHERE id = $1")
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => Ok(load_roles(&mut conn, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn delete_role(&self, id: RoleId) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {id}")));
        }
        Ok(())
    }

    async fn roles_for_user(&self, user: UserId) -> Result<Vec<Role>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        roles_of(&mut conn, user).await
    }

    async fn update_user_roles(
        &self,
        user: UserId,
        edit: RolesEdit,
    ) -> Result<Vec<Role>, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user).await?;

        let current: BTreeSet<RoleId> =
            sqlx::query_scalar::<_, i64>("SELECT role_id FROM users_roles WHERE user_id = $1")
                .bind(user.0)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(RoleId)
                .collect();

        let mut next = current.clone();
        edit(&mut next);

        if next != current {
            sqlx::query("DELETE FROM users_roles WHERE user_id = $1")
                .bind(user.0)
                .execute(&mut *tx)
                .await?;
            sqlx::query(
                "INSERT INTO users_roles (user_id, role_id) SELECT $1, unnest($2::bigint[])",
            )
            .bind(user.0)
            .bind(next.iter().map(|r| r.0).collect::<Vec<i64>>())
            .execute(&mut *tx)
            .await?;
        }

        let roles = roles_of(&mut tx, user).await?;
        tx.commit().await?;
        Ok(roles)
    }

    async fn permission_overrides(&self, user: UserId) -> Result<PermissionOverrides, StoreError> {
        let mut conn = self.pool.acquire().await?;
        load_overrides(&mut conn, user).await
    }

    async fn update_permission_overrides(
        &self,
        user: UserId,
        edit: OverridesEdit,
    ) -> Result<PermissionOverrides, StoreError> {
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user).await?;

        let current = load_overrides(&mut tx, user).await?;
        let mut next = current.clone();
        edit(&mut next);

        if next.granted != current.granted {
            let ids = next.granted.ids().map(|p| p.0).collect();
            replace_permission_edge(&mut tx, "users_granted_permissions", user, ids).await?;
        }
        if next.revoked != current.revoked {
            let ids = next.revoked.ids().map(|p| p.0).collect();
            replace_permission_edge(&mut tx, "users_revoked_permissions", user, ids).await?;
        }

        let stored = load_overrides(&mut tx, user).await?;
        tx.commit().await?;
        Ok(stored)
    }
}
