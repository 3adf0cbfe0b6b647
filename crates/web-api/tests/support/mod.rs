#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use application::{
    CircuitBreaker, CircuitBreakerConfig, Hub, HubConfig, SystemClock, TrackingService,
    TrackingServiceDependencies, TrackingSettings,
};
use domain::{Claims, CourierId, CustomerId, DeliveryDestination, DeliveryId, Role};
use infrastructure::{
    delivery_client::StaticDeliveryLookup, memory::InMemoryPositionRepository,
    publisher::TracingEventPublisher,
};
use reqwest::Client;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, time::sleep};
use web_api::{router, AppState, JwtConfig, JwtService};

/// 测试中配送单 1 的客户
pub const DELIVERY_CUSTOMER: i64 = 9;

pub struct TestApp {
    pub base_url: String,
    pub ws_url: String,
    pub client: Client,
    pub jwt: JwtService,
    pub tracking: Arc<TrackingService>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

/// 启动一个监听随机端口的完整服务，协作方全部使用进程内实现
pub async fn spawn_app() -> TestApp {
    let jwt = JwtService::new(JwtConfig {
        secret: "integration-test-secret-key-0123456789".to_string(),
        expiration_hours: 1,
    });

    let delivery_lookup = StaticDeliveryLookup::new().with_destination(
        DeliveryId::new(1),
        DeliveryDestination {
            customer_id: CustomerId::new(DELIVERY_CUSTOMER),
            latitude: 40.7589,
            longitude: -73.9851,
        },
    );

    let hub = Hub::spawn(HubConfig::default());
    let tracking = Arc::new(TrackingService::new(TrackingServiceDependencies {
        repository: Arc::new(InMemoryPositionRepository::new()),
        hub,
        delivery_lookup: Arc::new(delivery_lookup),
        event_publisher: Arc::new(TracingEventPublisher),
        clock: Arc::new(SystemClock),
        lookup_breaker: Arc::new(CircuitBreaker::new(
            "delivery-service",
            CircuitBreakerConfig::default(),
        )),
        settings: TrackingSettings::default(),
    }));

    let state = AppState::new(
        tracking.clone(),
        Arc::new(jwt.clone()),
        Duration::from_secs(30),
    );
    let app = router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });

    TestApp {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}"),
        client: Client::new(),
        jwt,
        tracking,
        shutdown_tx: Some(shutdown_tx),
    }
}

impl TestApp {
    pub fn token(&self, claims: &Claims) -> String {
        self.jwt.generate_token(claims).expect("token")
    }

    pub fn courier_token(&self, courier_id: i64) -> String {
        self.token(&Claims {
            identity: format!("courier-{courier_id}"),
            role: Role::Courier,
            customer_id: None,
            courier_id: Some(CourierId::new(courier_id)),
        })
    }

    pub fn customer_token(&self, customer_id: i64) -> String {
        self.token(&Claims {
            identity: format!("customer-{customer_id}"),
            role: Role::Customer,
            customer_id: Some(CustomerId::new(customer_id)),
            courier_id: None,
        })
    }

    pub fn admin_token(&self) -> String {
        self.token(&Claims {
            identity: "admin".to_string(),
            role: Role::Admin,
            customer_id: None,
            courier_id: None,
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn post_position(&self, token: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/v1/positions"))
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .expect("post position")
    }

    /// 等待 Hub 中的连接数达到预期（注册在升级完成后异步进行）
    pub async fn wait_for_connections(&self, expected: usize) {
        for _ in 0..100 {
            if self.tracking.hub().connection_count() == expected {
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "expected {expected} hub connections, got {}",
            self.tracking.hub().connection_count()
        );
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tracking.hub().shutdown();
    }
}
