//! 应用层实现。
//!
//! 这里提供围绕领域模型的用例服务：位置上报与查询、到达预估、实时推送 Hub，
//! 以及对外部协作方（认证、配送管理服务、事件总线）的抽象和弹性保护。

pub mod auth;
pub mod clock;
pub mod delivery;
pub mod error;
pub mod hub;
pub mod publisher;
pub mod resilience;
pub mod services;

pub use auth::{AuthError, TokenValidator};
pub use clock::{Clock, FixedClock, SystemClock};
pub use delivery::DeliveryLookup;
pub use error::{ApplicationError, DependencyError};
pub use hub::{
    ClientId, ClientSubscription, CustomerNotification, DeliveryUpdate, Hub, HubConfig, HubError,
    HubStats, OutboundMessage, SubscriptionTarget, NOTIFICATION_ETA_UPDATED,
};
pub use publisher::EventPublisher;
pub use resilience::{
    retry_async, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    RetryConfig, RetryError,
};
pub use services::{
    RecordPositionRequest, TrackingService, TrackingServiceDependencies, TrackingSettings,
};
