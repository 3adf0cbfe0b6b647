//! 事件总线发布者
//!
//! Redis Streams 实现：每个 topic 对应一个 stream，`XADD` 成功即视为已持久化。
//! 消费方通过消费组读取，按信封 `id` 去重。

use application::{DependencyError, EventPublisher};
use async_trait::async_trait;
use domain::EventEnvelope;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

pub struct RedisEventPublisher {
    connection: ConnectionManager,
    /// stream 近似长度上限（`MAXLEN ~`）
    stream_max_len: usize,
}

impl RedisEventPublisher {
    pub async fn connect(url: &str, stream_max_len: usize) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_connection_manager().await?;
        info!(stream_max_len, "Redis 事件发布者已连接");
        Ok(Self {
            connection,
            stream_max_len,
        })
    }
}

fn xadd_command(
    topic: &str,
    routing_key: &str,
    event: &EventEnvelope,
    body: &str,
    max_len: usize,
) -> redis::Cmd {
    let mut cmd = redis::cmd("XADD");
    cmd.arg(topic)
        .arg("MAXLEN")
        .arg("~")
        .arg(max_len)
        .arg("*")
        .arg("routing_key")
        .arg(routing_key)
        .arg("event_id")
        .arg(event.id.to_string())
        .arg("event_type")
        .arg(&event.event_type)
        .arg("envelope")
        .arg(body);
    cmd
}

#[async_trait]
impl EventPublisher for RedisEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        event: &EventEnvelope,
    ) -> Result<(), DependencyError> {
        let body = serde_json::to_string(event)
            .map_err(|err| DependencyError::rejected(format!("无法序列化事件: {err}")))?;

        let mut connection = self.connection.clone();
        let entry_id: String = xadd_command(topic, routing_key, event, &body, self.stream_max_len)
            .query_async(&mut connection)
            .await
            .map_err(|err| DependencyError::unavailable(format!("XADD {topic}: {err}")))?;

        debug!(topic, routing_key, event_id = %event.id, %entry_id, "event appended to stream");
        Ok(())
    }
}

/// 只写日志的发布者，未配置 Redis 时使用
#[derive(Debug, Default, Clone)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(
        &self,
        topic: &str,
        routing_key: &str,
        event: &EventEnvelope,
    ) -> Result<(), DependencyError> {
        info!(
            topic,
            routing_key,
            event_id = %event.id,
            event_type = %event.event_type,
            payload = %event.payload,
            "event published (log only)"
        );
        Ok(())
    }
}
