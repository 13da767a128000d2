//! 用户、组织与权限内存实现

use std::collections::HashMap;
use std::sync::RwLock;

use domain::{Organization, Permission, User};

use crate::error::StorageError;
use crate::traits::PermissionStore;

#[derive(Default)]
pub struct InMemoryPermissionStore {
    users: RwLock<HashMap<u64, User>>,
    organizations: RwLock<HashMap<u64, Organization>>,
    permissions: RwLock<Vec<Permission>>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let mut users = self
            .users
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: u64) -> Result<User, StorageError> {
        let users = self
            .users
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(format!("user {user_id} not found")))
    }

    async fn save_organization(&self, organization: &Organization) -> Result<(), StorageError> {
        let mut organizations = self
            .organizations
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        organizations.insert(organization.id, organization.clone());
        Ok(())
    }

    async fn save(&self, permission: &Permission) -> Result<(), StorageError> {
        let mut permissions = self
            .permissions
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        match permissions
            .iter_mut()
            .find(|p| p.user_id == permission.user_id && p.farm_id == permission.farm_id)
        {
            Some(existing) => *existing = permission.clone(),
            None => permissions.push(permission.clone()),
        }
        Ok(())
    }

    async fn list_by_farm(&self, farm_id: u64) -> Result<Vec<Permission>, StorageError> {
        let permissions = self
            .permissions
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(permissions
            .iter()
            .filter(|p| p.farm_id == farm_id)
            .cloned()
            .collect())
    }

    async fn list_by_user(&self, user_id: u64) -> Result<Vec<Permission>, StorageError> {
        let permissions = self
            .permissions
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(permissions
            .iter()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_by_farm(&self, farm_id: u64) -> Result<(), StorageError> {
        let mut permissions = self
            .permissions
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        permissions.retain(|p| p.farm_id != farm_id);
        Ok(())
    }
}
