use async_trait::async_trait;
use domain::{DeliveryDestination, DeliveryId};

use crate::error::DependencyError;

/// 配送管理服务抽象：查询配送单的目的地
#[async_trait]
pub trait DeliveryLookup: Send + Sync {
    async fn get_destination(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryDestination, DependencyError>;
}
