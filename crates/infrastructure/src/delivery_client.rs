//! 配送管理服务适配器

use std::collections::HashMap;
use std::time::Duration;

use application::{DeliveryLookup, DependencyError};
use async_trait::async_trait;
use domain::{DeliveryDestination, DeliveryId};
use reqwest::StatusCode;
use tracing::debug;

/// 通过 HTTP 查询配送目的地：`GET {base_url}/deliveries/{id}/destination`
///
/// 4xx 视为依赖明确拒绝；5xx、网络错误与响应体解析失败视为暂时不可用。
#[derive(Clone)]
pub struct HttpDeliveryLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpDeliveryLookup {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn destination_url(&self, delivery_id: DeliveryId) -> String {
        format!("{}/deliveries/{}/destination", self.base_url, delivery_id)
    }
}

#[async_trait]
impl DeliveryLookup for HttpDeliveryLookup {
    async fn get_destination(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryDestination, DependencyError> {
        let url = self.destination_url(delivery_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| DependencyError::unavailable(format!("GET {url}: {err}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(DependencyError::rejected(format!(
                "delivery {delivery_id} not found"
            )));
        }
        if status.is_client_error() {
            return Err(DependencyError::rejected(format!(
                "delivery service answered {status}"
            )));
        }
        if !status.is_success() {
            return Err(DependencyError::unavailable(format!(
                "delivery service answered {status}"
            )));
        }

        let destination = response
            .json::<DeliveryDestination>()
            .await
            .map_err(|err| {
                DependencyError::unavailable(format!("invalid destination body: {err}"))
            })?;
        debug!(%delivery_id, customer_id = %destination.customer_id, "destination resolved");
        Ok(destination)
    }
}

/// 固定目的地表，本地运行与测试使用
#[derive(Debug, Default, Clone)]
pub struct StaticDeliveryLookup {
    destinations: HashMap<DeliveryId, DeliveryDestination>,
}

impl StaticDeliveryLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_destination(
        mut self,
        delivery_id: DeliveryId,
        destination: DeliveryDestination,
    ) -> Self {
        self.destinations.insert(delivery_id, destination);
        self
    }
}

#[async_trait]
impl DeliveryLookup for StaticDeliveryLookup {
    async fn get_destination(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<DeliveryDestination, DependencyError> {
        self.destinations
            .get(&delivery_id)
            .cloned()
            .ok_or_else(|| DependencyError::rejected(format!("delivery {delivery_id} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::CustomerId;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lookup(server: &MockServer) -> HttpDeliveryLookup {
        HttpDeliveryLookup::new(format!("{}/", server.uri()), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_destination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/deliveries/12/destination"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "customer_id": 77,
                "latitude": 40.7589,
                "longitude": -73.9851
            })))
            .expect(1)
            .mount(&server)
            .await;

        let destination = lookup(&server)
            .get_destination(DeliveryId::new(12))
            .await
            .unwrap();

        assert_eq!(destination.customer_id, CustomerId::new(77));
        assert_eq!(destination.latitude, 40.7589);
    }

    #[tokio::test]
    async fn test_not_found_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = lookup(&server)
            .get_destination(DeliveryId::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DependencyError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = lookup(&server)
            .get_destination(DeliveryId::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DependencyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_malformed_body_is_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = lookup(&server)
            .get_destination(DeliveryId::new(3))
            .await
            .unwrap_err();
        assert!(matches!(err, DependencyError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let lookup = StaticDeliveryLookup::new().with_destination(
            DeliveryId::new(1),
            DeliveryDestination {
                customer_id: CustomerId::new(5),
                latitude: 1.0,
                longitude: 2.0,
            },
        );

        assert_eq!(
            lookup
                .get_destination(DeliveryId::new(1))
                .await
                .unwrap()
                .customer_id,
            CustomerId::new(5)
        );
        assert!(matches!(
            lookup.get_destination(DeliveryId::new(2)).await,
            Err(DependencyError::Rejected(_))
        ));
    }
}
