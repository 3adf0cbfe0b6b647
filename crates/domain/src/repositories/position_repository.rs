//! 位置记录Repository接口定义

use crate::entities::position::Position;
use crate::errors::RepositoryResult;
use crate::value_objects::{CourierId, DeliveryId};
use async_trait::async_trait;

/// 位置记录Repository接口
///
/// 历史查询按 `recorded_at` 倒序返回，最多 `limit` 条。仓储不会替调用方
/// 猜测 `limit` 的默认值，规范化是调用方的职责。实现必须可并发使用。
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait PositionRepository: Send + Sync {
    /// 保存新的位置记录
    async fn create(&self, position: &Position) -> RepositoryResult<Position>;

    /// 获取配送单的最新位置，不存在时返回 `RepositoryError::NotFound`
    async fn latest_by_delivery(&self, delivery_id: DeliveryId) -> RepositoryResult<Position>;

    /// 获取配送单的历史轨迹（最新在前）
    async fn history_by_delivery(
        &self,
        delivery_id: DeliveryId,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>>;

    /// 获取骑手的最新位置，不存在时返回 `RepositoryError::NotFound`
    async fn latest_by_courier(&self, courier_id: CourierId) -> RepositoryResult<Position>;

    /// 获取骑手的历史轨迹（最新在前）
    async fn history_by_courier(
        &self,
        courier_id: CourierId,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>>;
}
