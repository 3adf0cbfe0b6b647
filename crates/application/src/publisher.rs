use async_trait::async_trait;
use domain::EventEnvelope;

use crate::error::DependencyError;

/// 持久化事件总线抽象（至少一次投递）
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        event: &EventEnvelope,
    ) -> Result<(), DependencyError>;
}
