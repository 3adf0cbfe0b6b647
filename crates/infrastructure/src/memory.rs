//! 内存位置仓储
//!
//! 未配置数据库时使用，也供集成测试注入。数据只保存在进程内。

use std::collections::{BTreeSet, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    CourierId, DeliveryId, Position, PositionId, PositionRepository, RepositoryError,
    RepositoryResult,
};
use tokio::sync::RwLock;

/// 索引键：(`recorded_at`, 写入序号)，升序遍历即从旧到新
type OrderKey = (DateTime<Utc>, usize);

#[derive(Default)]
struct Store {
    // 按写入顺序追加，下标即写入序号
    positions: Vec<Position>,
    ids: HashSet<PositionId>,
    by_delivery: HashMap<DeliveryId, BTreeSet<OrderKey>>,
    by_courier: HashMap<CourierId, BTreeSet<OrderKey>>,
}

impl Store {
    fn insert(&mut self, position: &Position) -> RepositoryResult<()> {
        if !self.ids.insert(position.id) {
            return Err(RepositoryError::storage(format!(
                "duplicate position id {}",
                position.id.0
            )));
        }
        let key = (position.recorded_at, self.positions.len());
        self.by_delivery
            .entry(position.delivery_id)
            .or_default()
            .insert(key);
        self.by_courier
            .entry(position.courier_id)
            .or_default()
            .insert(key);
        self.positions.push(position.clone());
        Ok(())
    }

    /// `recorded_at` 倒序，相同时间戳时后写入的在前
    fn newest_first<'a>(
        &'a self,
        index: Option<&'a BTreeSet<OrderKey>>,
    ) -> impl Iterator<Item = &'a Position> + 'a {
        index
            .into_iter()
            .flat_map(|keys| keys.iter().rev())
            .map(move |(_, seq)| &self.positions[*seq])
    }
}

#[derive(Default)]
pub struct InMemoryPositionRepository {
    store: RwLock<Store>,
}

impl InMemoryPositionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.store.read().await.positions.len()
    }
}

#[async_trait]
impl PositionRepository for InMemoryPositionRepository {
    async fn create(&self, position: &Position) -> RepositoryResult<Position> {
        self.store.write().await.insert(position)?;
        Ok(position.clone())
    }

    async fn latest_by_delivery(&self, delivery_id: DeliveryId) -> RepositoryResult<Position> {
        let store = self.store.read().await;
        let latest = store
            .newest_first(store.by_delivery.get(&delivery_id))
            .next()
            .cloned()
            .ok_or(RepositoryError::NotFound);
        latest
    }

    async fn history_by_delivery(
        &self,
        delivery_id: DeliveryId,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>> {
        let store = self.store.read().await;
        Ok(store
            .newest_first(store.by_delivery.get(&delivery_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn latest_by_courier(&self, courier_id: CourierId) -> RepositoryResult<Position> {
        let store = self.store.read().await;
        let latest = store
            .newest_first(store.by_courier.get(&courier_id))
            .next()
            .cloned()
            .ok_or(RepositoryError::NotFound);
        latest
    }

    async fn history_by_courier(
        &self,
        courier_id: CourierId,
        limit: u32,
    ) -> RepositoryResult<Vec<Position>> {
        let store = self.store.read().await;
        Ok(store
            .newest_first(store.by_courier.get(&courier_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
