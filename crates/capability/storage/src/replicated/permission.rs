use domain::{ConsistencyLevel, Organization, Permission, User};

use super::{ReplicatedBackend, ordered};
use crate::error::StorageError;
use crate::traits::PermissionStore;
use crop_cluster::groups;

/// 用户、组织与权限：全部位于全局成员关系组。
pub struct ReplicatedPermissionStore {
    backend: ReplicatedBackend,
}

impl ReplicatedPermissionStore {
    pub fn new(backend: ReplicatedBackend) -> Self {
        Self { backend }
    }
}

fn permission_key(farm_id: u64, user_id: u64) -> String {
    format!("perm:{}:{}", ordered(farm_id), ordered(user_id))
}

#[async_trait::async_trait]
impl PermissionStore for ReplicatedPermissionStore {
    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        group.put(&format!("user:{}", ordered(user.id)), user).await?;
        Ok(())
    }

    async fn get_user(&self, user_id: u64) -> Result<User, StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        group
            .get::<User>(&format!("user:{}", ordered(user_id)), ConsistencyLevel::Quorum)
            .await?
            .ok_or_else(|| StorageError::not_found(format!("user {user_id} not found")))
    }

    async fn save_organization(&self, organization: &Organization) -> Result<(), StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        group
            .put(&format!("org:{}", ordered(organization.id)), organization)
            .await?;
        Ok(())
    }

    async fn save(&self, permission: &Permission) -> Result<(), StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        group
            .put(
                &permission_key(permission.farm_id, permission.user_id),
                permission,
            )
            .await?;
        Ok(())
    }

    async fn list_by_farm(&self, farm_id: u64) -> Result<Vec<Permission>, StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        let items: Vec<(String, Permission)> = group
            .scan(&format!("perm:{}:", ordered(farm_id)), ConsistencyLevel::Quorum)
            .await?;
        Ok(items.into_iter().map(|(_, p)| p).collect())
    }

    async fn list_by_user(&self, user_id: u64) -> Result<Vec<Permission>, StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        let items: Vec<(String, Permission)> =
            group.scan("perm:", ConsistencyLevel::Quorum).await?;
        Ok(items
            .into_iter()
            .map(|(_, p)| p)
            .filter(|p| p.user_id == user_id)
            .collect())
    }

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError> {
        let group = self.backend.group(groups::membership()).await?;
        group
            .delete_prefix(&format!("perm:{}:", ordered(farm_id)))
            .await?;
        Ok(())
    }
}
