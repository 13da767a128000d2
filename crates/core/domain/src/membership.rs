//! 用户、组织、角色与权限。

use serde::{Deserialize, Serialize};

/// 内置角色。
pub mod roles {
    pub const ADMIN: u64 = 1;
    pub const CULTIVATOR: u64 = 2;
    pub const ANALYST: u64 = 3;

    pub fn name(role_id: u64) -> &'static str {
        match role_id {
            ADMIN => "admin",
            CULTIVATOR => "cultivator",
            ANALYST => "analyst",
            _ => "unknown",
        }
    }

    /// 允许修改配置与执行开关的角色。
    pub fn can_write(role_id: u64) -> bool {
        matches!(role_id, ADMIN | CULTIVATOR)
    }

    pub fn can_read(role_id: u64) -> bool {
        matches!(role_id, ADMIN | CULTIVATOR | ANALYST)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: u64,
    pub email: String,
}

impl User {
    /// 以邮箱派生稳定 ID。
    pub fn from_email(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            id: crate::ids::stable_id(&email),
            email,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub id: u64,
    pub name: String,
}

/// 权限：用户在某组织下对某农场的角色。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub user_id: u64,
    pub organization_id: u64,
    pub farm_id: u64,
    pub role_id: u64,
}

impl Permission {
    pub fn is_admin(&self) -> bool {
        self.role_id == roles::ADMIN
    }
}
