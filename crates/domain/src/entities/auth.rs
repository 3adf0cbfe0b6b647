//! 认证身份声明
//!
//! 认证服务校验令牌后返回的身份信息。

use serde::{Deserialize, Serialize};

use crate::value_objects::{CourierId, CustomerId};

/// 调用方角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Courier,
    Admin,
}

/// 已认证的身份声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// 身份标识（令牌的 subject）
    pub identity: String,
    pub role: Role,
    pub customer_id: Option<CustomerId>,
    pub courier_id: Option<CourierId>,
}

impl Claims {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// 是否允许以该骑手身份上报位置：骑手本人或管理员
    pub fn can_report_for(&self, courier_id: CourierId) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Courier => self.courier_id == Some(courier_id),
            Role::Customer => false,
        }
    }
}
