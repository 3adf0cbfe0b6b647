use std::sync::Arc;
use std::time::Duration;

use application::{DeliveryLookup, EventPublisher};
use domain::PositionRepository;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    delivery_client::{HttpDeliveryLookup, StaticDeliveryLookup},
    memory::InMemoryPositionRepository,
    migrations::MIGRATOR,
    publisher::{RedisEventPublisher, TracingEventPublisher},
    repository::{create_pg_pool, PgPositionRepository},
};

/// 适配器选择：未配置的外部依赖退回到进程内实现
#[derive(Debug, Clone)]
pub struct InfrastructureConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub redis_url: Option<String>,
    pub stream_max_len: usize,
    pub delivery_service_url: Option<String>,
    pub delivery_request_timeout: Duration,
}

impl Default for InfrastructureConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            redis_url: None,
            stream_max_len: 100_000,
            delivery_service_url: None,
            delivery_request_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

#[derive(Clone)]
pub struct Infrastructure {
    pub repository: Arc<dyn PositionRepository>,
    pub delivery_lookup: Arc<dyn DeliveryLookup>,
    pub event_publisher: Arc<dyn EventPublisher>,
}

impl Infrastructure {
    pub async fn connect(config: InfrastructureConfig) -> Result<Self, InfrastructureError> {
        let repository: Arc<dyn PositionRepository> = match &config.database_url {
            Some(url) => {
                let pool = create_pg_pool(url, config.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                info!(max_connections = config.max_connections, "PostgreSQL 仓储已就绪");
                Arc::new(PgPositionRepository::new(pool))
            }
            None => {
                warn!("未配置数据库，使用内存仓储，重启后数据丢失");
                Arc::new(InMemoryPositionRepository::new())
            }
        };

        let event_publisher: Arc<dyn EventPublisher> = match &config.redis_url {
            Some(url) => Arc::new(RedisEventPublisher::connect(url, config.stream_max_len).await?),
            None => {
                warn!("未配置 Redis，事件只写入日志");
                Arc::new(TracingEventPublisher)
            }
        };

        let delivery_lookup: Arc<dyn DeliveryLookup> = match &config.delivery_service_url {
            Some(url) => Arc::new(HttpDeliveryLookup::new(
                url.as_str(),
                config.delivery_request_timeout,
            )?),
            None => {
                warn!("未配置配送服务地址，到达通知不会推送");
                Arc::new(StaticDeliveryLookup::new())
            }
        };

        Ok(Self {
            repository,
            delivery_lookup,
            event_publisher,
        })
    }

    /// 全部使用进程内实现
    pub fn in_memory() -> Self {
        Self {
            repository: Arc::new(InMemoryPositionRepository::new()),
            delivery_lookup: Arc::new(StaticDeliveryLookup::new()),
            event_publisher: Arc::new(TracingEventPublisher),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use domain::{CourierId, DeliveryId, Position};

    #[tokio::test]
    async fn test_unconfigured_dependencies_fall_back_to_local_adapters() {
        let infrastructure = Infrastructure::connect(InfrastructureConfig::default())
            .await
            .unwrap();

        let position =
            Position::new(DeliveryId::new(1), CourierId::new(2), 3.0, 4.0, Utc::now()).unwrap();
        infrastructure.repository.create(&position).await.unwrap();
        assert_eq!(
            infrastructure
                .repository
                .latest_by_delivery(DeliveryId::new(1))
                .await
                .unwrap(),
            position
        );
        assert!(infrastructure
            .delivery_lookup
            .get_destination(DeliveryId::new(1))
            .await
            .is_err());
    }
}
