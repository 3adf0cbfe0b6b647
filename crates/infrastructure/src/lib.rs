//! 基础设施层实现。
//!
//! 提供位置仓储（PostgreSQL / 内存）、配送服务客户端与事件总线发布者，
//! 实现应用/领域层定义的接口。

pub mod builder;
pub mod delivery_client;
pub mod memory;
pub mod migrations;
pub mod publisher;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use delivery_client::{HttpDeliveryLookup, StaticDeliveryLookup};
pub use memory::InMemoryPositionRepository;
pub use migrations::MIGRATOR;
pub use publisher::{RedisEventPublisher, TracingEventPublisher};
pub use repository::{create_pg_pool, PgPositionRepository};
