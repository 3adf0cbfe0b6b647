use serde::{Deserialize, Serialize};

use crate::errors::DomainResult;
use crate::value_objects::{Coordinates, CustomerId};

/// 配送管理服务返回的目的地信息
///
/// 携带客户ID，用于把到达通知路由到正确的客户推送流。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryDestination {
    pub customer_id: CustomerId,
    pub latitude: f64,
    pub longitude: f64,
}

impl DeliveryDestination {
    pub fn coordinates(&self) -> DomainResult<Coordinates> {
        Coordinates::new(self.latitude, self.longitude)
    }
}
