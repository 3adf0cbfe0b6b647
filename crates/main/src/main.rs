//! 主应用程序入口
//!
//! 加载配置、装配各层依赖并启动 Axum Web API 服务。

mod wiring;

use std::sync::Arc;

use application::{
    CircuitBreaker, Hub, SystemClock, TrackingService, TrackingServiceDependencies,
};
use config::AppConfig;
use infrastructure::Infrastructure;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::load()?;
    if config.uses_dev_jwt_secret() {
        tracing::warn!("正在使用开发用 JWT 密钥，生产环境请设置 TRACKING_JWT__SECRET");
    }

    let infrastructure = Infrastructure::connect(wiring::infrastructure_config(&config)).await?;

    let hub = Hub::spawn(wiring::hub_config(&config));
    let lookup_breaker = Arc::new(CircuitBreaker::new(
        "delivery-service",
        wiring::breaker_config(&config),
    ));

    let tracking = Arc::new(TrackingService::new(TrackingServiceDependencies {
        repository: infrastructure.repository,
        hub: hub.clone(),
        delivery_lookup: infrastructure.delivery_lookup,
        event_publisher: infrastructure.event_publisher,
        clock: Arc::new(SystemClock),
        lookup_breaker,
        settings: wiring::tracking_settings(&config),
    }));

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(
        tracking.clone(),
        jwt_service,
        config.server.ws_ping_interval(),
    );

    // 启动 Web 服务器
    let app = router(state);
    let bind_address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    tracing::info!("位置追踪服务启动在 http://{}", bind_address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 先等后台任务收尾，再关闭 Hub
    tracking.shutdown().await;
    hub.shutdown();
    tracing::info!("服务已停止");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到退出信号，开始优雅关闭");
}
