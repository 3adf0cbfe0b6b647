//! 统一配置中心
//!
//! 加载顺序：内置默认值 -> YAML 文件（`TRACKING_CONFIG`，默认 `config/tracking.yaml`，
//! 不存在时跳过）-> `TRACKING_` 前缀的环境变量（`__` 分隔层级，例如
//! `TRACKING_SERVER__PORT=9000`）。
//!
//! 未配置的外部依赖（数据库、Redis、配送服务）由 main 选择进程内实现代替。

use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_ENV: &str = "TRACKING_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "config/tracking.yaml";
pub const ENV_PREFIX: &str = "TRACKING_";

/// 开发用 JWT 密钥，仅满足长度要求
pub const DEV_JWT_SECRET: &str = "dev-secret-key-not-for-production-use-minimum-32-chars";

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    #[serde(default)]
    pub hub: HubSettings,
    #[serde(default)]
    pub delivery_service: DeliveryServiceConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// WebSocket 空闲时的 Ping 间隔
    pub ws_ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ws_ping_interval_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ws_ping_interval(&self) -> Duration {
        Duration::from_secs(self.ws_ping_interval_secs)
    }
}

/// 数据库配置；`url` 为空时使用内存仓储
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Redis配置；`url` 为空时事件只写日志
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: Option<String>,
    /// 事件 stream 的近似长度上限
    pub stream_max_len: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            stream_max_len: 100_000,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: DEV_JWT_SECRET.to_string(),
            expiration_hours: 24,
        }
    }
}

/// Hub 队列容量
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    pub command_capacity: usize,
    pub broadcast_capacity: usize,
    pub client_queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            broadcast_capacity: 4096,
            client_queue_capacity: 64,
        }
    }
}

/// 配送管理服务；`base_url` 为空时不推送到达通知
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryServiceConfig {
    pub base_url: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for DeliveryServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: 3_000,
        }
    }
}

impl DeliveryServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub breaker: BreakerSettings,
    pub retry: RetrySettings,
}

/// 断路器参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            reset_timeout_secs: 30,
            half_open_max_calls: 2,
        }
    }
}

impl BreakerSettings {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

/// 事件发布重试参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5_000,
        }
    }
}

impl RetrySettings {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// 追踪服务参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub default_history_limit: u32,
    pub max_history_limit: u32,
    pub average_speed_kmh: f64,
    pub lookup_timeout_ms: u64,
    pub publish_timeout_ms: u64,
    pub event_topic: String,
    pub event_source: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            default_history_limit: 100,
            max_history_limit: 1000,
            average_speed_kmh: 25.0,
            lookup_timeout_ms: 3_000,
            publish_timeout_ms: 2_000,
            event_topic: "tracking-events".to_string(),
            event_source: "tracking-service".to_string(),
        }
    }
}

impl TrackingConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl AppConfig {
    /// 组装 figment：默认值 -> YAML 文件 -> 环境变量
    pub fn figment() -> Figment {
        let path =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());

        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment()
            .extract()
            .map_err(|err| ConfigError::Load(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn uses_dev_jwt_secret(&self) -> bool {
        self.jwt.secret == DEV_JWT_SECRET
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // JWT密钥至少256位/32字节
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "expiration_hours must be positive".to_string(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        if self.server.ws_ping_interval_secs == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "ws_ping_interval_secs must be greater than 0".to_string(),
            ));
        }

        let hub = &self.hub;
        if hub.command_capacity == 0 || hub.broadcast_capacity == 0 || hub.client_queue_capacity == 0
        {
            return Err(ConfigError::InvalidHubConfig(
                "queue capacities must be greater than 0".to_string(),
            ));
        }

        let breaker = &self.resilience.breaker;
        if breaker.failure_threshold == 0 {
            return Err(ConfigError::InvalidResilienceConfig(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if breaker.half_open_max_calls == 0
            || breaker.success_threshold == 0
            || breaker.success_threshold > breaker.half_open_max_calls
        {
            // 半开窗口放行的请求数不足以闭合断路器时会一直卡在半开
            return Err(ConfigError::InvalidResilienceConfig(
                "success_threshold must be between 1 and half_open_max_calls".to_string(),
            ));
        }

        let retry = &self.resilience.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidResilienceConfig(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidResilienceConfig(
                "retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if retry.initial_delay_ms > retry.max_delay_ms {
            return Err(ConfigError::InvalidResilienceConfig(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string(),
            ));
        }

        let tracking = &self.tracking;
        if !tracking.average_speed_kmh.is_finite() || tracking.average_speed_kmh <= 0.0 {
            return Err(ConfigError::InvalidTrackingConfig(
                "average_speed_kmh must be positive".to_string(),
            ));
        }
        if tracking.default_history_limit == 0
            || tracking.default_history_limit > tracking.max_history_limit
        {
            return Err(ConfigError::InvalidTrackingConfig(
                "default_history_limit must be between 1 and max_history_limit".to_string(),
            ));
        }
        if tracking.event_topic.is_empty() {
            return Err(ConfigError::InvalidTrackingConfig(
                "event_topic cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid hub configuration: {0}")]
    InvalidHubConfig(String),
    #[error("Invalid resilience configuration: {0}")]
    InvalidResilienceConfig(String),
    #[error("Invalid tracking configuration: {0}")]
    InvalidTrackingConfig(String),
}
