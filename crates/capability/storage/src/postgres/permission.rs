//! Postgres 用户、组织与权限存储

use domain::{Organization, Permission, User};
use sqlx::{PgPool, Row};

use super::{from_db_id, to_db_id};
use crate::error::StorageError;
use crate::traits::PermissionStore;

pub struct PgPermissionStore {
    pub pool: PgPool,
}

impl PgPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn permission_from_row(row: &sqlx::postgres::PgRow) -> Result<Permission, StorageError> {
    Ok(Permission {
        user_id: from_db_id(row.try_get("user_id")?),
        organization_id: from_db_id(row.try_get("organization_id")?),
        farm_id: from_db_id(row.try_get("farm_id")?),
        role_id: from_db_id(row.try_get("role_id")?),
    })
}

#[async_trait::async_trait]
impl PermissionStore for PgPermissionStore {
    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        sqlx::query(
            "insert into users (id, email) values ($1, $2) \
             on conflict (id) do update set email = excluded.email",
        )
        .bind(to_db_id(user.id))
        .bind(&user.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: u64) -> Result<User, StorageError> {
        let row = sqlx::query("select id, email from users where id = $1")
            .bind(to_db_id(user_id))
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Err(StorageError::not_found(format!("user {user_id} not found")));
        };
        Ok(User {
            id: from_db_id(row.try_get("id")?),
            email: row.try_get("email")?,
        })
    }

    async fn save_organization(&self, organization: &Organization) -> Result<(), StorageError> {
        sqlx::query(
            "insert into organizations (id, name) values ($1, $2) \
             on conflict (id) do update set name = excluded.name",
        )
        .bind(to_db_id(organization.id))
        .bind(&organization.name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save(&self, permission: &Permission) -> Result<(), StorageError> {
        sqlx::query(
            "insert into permissions (user_id, organization_id, farm_id, role_id) \
             values ($1, $2, $3, $4) \
             on conflict (user_id, farm_id) do update set \
             organization_id = excluded.organization_id, role_id = excluded.role_id",
        )
        .bind(to_db_id(permission.user_id))
        .bind(to_db_id(permission.organization_id))
        .bind(to_db_id(permission.farm_id))
        .bind(to_db_id(permission.role_id))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_by_farm(&self, farm_id: u64) -> Result<Vec<Permission>, StorageError> {
        let rows = sqlx::query(
            "select user_id, organization_id, farm_id, role_id from permissions where farm_id = $1",
        )
        .bind(to_db_id(farm_id))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn list_by_user(&self, user_id: u64) -> Result<Vec<Permission>, StorageError> {
        let rows = sqlx::query(
            "select user_id, organization_id, farm_id, role_id from permissions where user_id = $1",
        )
        .bind(to_db_id(user_id))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError> {
        sqlx::query("delete from permissions where farm_id = $1")
            .bind(to_db_id(farm_id))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
