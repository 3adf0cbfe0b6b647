//! 把配置各段映射为各层自己的配置类型

use application::{CircuitBreakerConfig, HubConfig, RetryConfig, TrackingSettings};
use config::AppConfig;
use infrastructure::InfrastructureConfig;

pub fn infrastructure_config(config: &AppConfig) -> InfrastructureConfig {
    InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
        redis_url: config.redis.url.clone(),
        stream_max_len: config.redis.stream_max_len,
        delivery_service_url: config.delivery_service.base_url.clone(),
        delivery_request_timeout: config.delivery_service.request_timeout(),
    }
}

pub fn hub_config(config: &AppConfig) -> HubConfig {
    HubConfig {
        command_capacity: config.hub.command_capacity,
        broadcast_capacity: config.hub.broadcast_capacity,
        client_queue_capacity: config.hub.client_queue_capacity,
    }
}

pub fn breaker_config(config: &AppConfig) -> CircuitBreakerConfig {
    let breaker = &config.resilience.breaker;
    CircuitBreakerConfig {
        failure_threshold: breaker.failure_threshold,
        success_threshold: breaker.success_threshold,
        reset_timeout: breaker.reset_timeout(),
        half_open_max_calls: breaker.half_open_max_calls,
    }
}

pub fn tracking_settings(config: &AppConfig) -> TrackingSettings {
    let retry = &config.resilience.retry;
    let tracking = &config.tracking;
    TrackingSettings {
        default_history_limit: tracking.default_history_limit,
        max_history_limit: tracking.max_history_limit,
        average_speed_kmh: tracking.average_speed_kmh,
        lookup_timeout: tracking.lookup_timeout(),
        publish_timeout: tracking.publish_timeout(),
        publish_retry: RetryConfig {
            max_attempts: retry.max_attempts,
            initial_delay: retry.initial_delay(),
            multiplier: retry.multiplier,
            max_delay: retry.max_delay(),
        },
        event_topic: tracking.event_topic.clone(),
        event_source: tracking.event_source.clone(),
        ..TrackingSettings::default()
    }
}
