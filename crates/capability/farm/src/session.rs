//! 请求会话
//!
//! REST 层为每个请求构造 [`Session`]，携带用户、目标农场与读一致性；
//! 读写前按权限存储中的角色校验。

use std::sync::Arc;

use crop_storage::PermissionStore;
use domain::{ConsistencyLevel, Permission, User, roles};

use crate::error::FarmError;
use crate::farm::FarmService;

#[derive(Clone)]
pub struct Session {
    pub user: User,
    pub farm_id: u64,
    pub organization_id: u64,
    pub consistency: ConsistencyLevel,
    pub farm: Option<Arc<FarmService>>,
}

impl Session {
    pub fn new(user: User, farm_id: u64) -> Self {
        Self {
            user,
            farm_id,
            organization_id: 0,
            consistency: ConsistencyLevel::Local,
            farm: None,
        }
    }

    pub fn with_farm(mut self, farm: Arc<FarmService>) -> Self {
        self.organization_id = farm.organization_id();
        self.farm = Some(farm);
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = consistency;
        self
    }

    pub fn farm(&self) -> Result<&Arc<FarmService>, FarmError> {
        self.farm
            .as_ref()
            .ok_or_else(|| FarmError::NotFound(format!("farm {}", self.farm_id)))
    }

    /// 用户在目标农场上的权限。
    pub async fn permission(
        &self,
        permissions: &dyn PermissionStore,
    ) -> Result<Permission, FarmError> {
        permissions
            .list_by_user(self.user.id)
            .await?
            .into_iter()
            .find(|p| p.farm_id == self.farm_id)
            .ok_or_else(|| {
                FarmError::PermissionDenied(format!(
                    "user {} has no role on farm {}",
                    self.user.id, self.farm_id
                ))
            })
    }

    pub async fn authorize_read(
        &self,
        permissions: &dyn PermissionStore,
    ) -> Result<Permission, FarmError> {
        let permission = self.permission(permissions).await?;
        if !roles::can_read(permission.role_id) {
            return Err(denied(self, permission.role_id));
        }
        Ok(permission)
    }

    pub async fn authorize_write(
        &self,
        permissions: &dyn PermissionStore,
    ) -> Result<Permission, FarmError> {
        let permission = self.permission(permissions).await?;
        if !roles::can_write(permission.role_id) {
            return Err(denied(self, permission.role_id));
        }
        Ok(permission)
    }

    pub async fn authorize_admin(
        &self,
        permissions: &dyn PermissionStore,
    ) -> Result<Permission, FarmError> {
        let permission = self.permission(permissions).await?;
        if !permission.is_admin() {
            return Err(denied(self, permission.role_id));
        }
        Ok(permission)
    }
}

fn denied(session: &Session, role_id: u64) -> FarmError {
    FarmError::PermissionDenied(format!(
        "role {} of user {} is not allowed on farm {}",
        roles::name(role_id),
        session.user.id,
        session.farm_id
    ))
}
