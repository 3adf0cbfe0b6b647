//! 下游调用的弹性保护
//!
//! 断路器隔离不健康的依赖，有界重试吸收瞬时故障。两者都不会无限期阻塞调用方。

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use retry::{retry_async, RetryConfig, RetryError};
