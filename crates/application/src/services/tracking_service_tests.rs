//! 追踪服务单元测试
//!
//! 覆盖上报、查询、到达预估，以及下游故障不影响上报的行为。

#[cfg(test)]
mod tracking_service_tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use domain::{
        CourierId, CustomerId, DeliveryDestination, DeliveryId, EventEnvelope,
        MockPositionRepository, Position, PositionRepository, RepositoryError, RepositoryResult,
        LOCATION_UPDATED_EVENT,
    };
    use tokio::time::timeout;

    use crate::clock::FixedClock;
    use crate::delivery::DeliveryLookup;
    use crate::error::{ApplicationError, DependencyError};
    use crate::hub::{
        ClientSubscription, Hub, HubConfig, OutboundMessage, SubscriptionTarget,
        NOTIFICATION_ETA_UPDATED,
    };
    use crate::publisher::EventPublisher;
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, RetryConfig};
    use crate::services::tracking_service::*;

    #[derive(Default)]
    struct MemoryRepository {
        positions: tokio::sync::Mutex<Vec<Position>>,
    }

    #[async_trait]
    impl PositionRepository for MemoryRepository {
        async fn create(&self, position: &Position) -> RepositoryResult<Position> {
            self.positions.lock().await.push(position.clone());
            Ok(position.clone())
        }

        async fn latest_by_delivery(&self, delivery_id: DeliveryId) -> RepositoryResult<Position> {
            self.positions
                .lock()
                .await
                .iter()
                .rev()
                .find(|p| p.delivery_id == delivery_id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn history_by_delivery(
            &self,
            delivery_id: DeliveryId,
            limit: u32,
        ) -> RepositoryResult<Vec<Position>> {
            Ok(self
                .positions
                .lock()
                .await
                .iter()
                .rev()
                .filter(|p| p.delivery_id == delivery_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }

        async fn latest_by_courier(&self, courier_id: CourierId) -> RepositoryResult<Position> {
            self.positions
                .lock()
                .await
                .iter()
                .rev()
                .find(|p| p.courier_id == courier_id)
                .cloned()
                .ok_or(RepositoryError::NotFound)
        }

        async fn history_by_courier(
            &self,
            courier_id: CourierId,
            limit: u32,
        ) -> RepositoryResult<Vec<Position>> {
            Ok(self
                .positions
                .lock()
                .await
                .iter()
                .rev()
                .filter(|p| p.courier_id == courier_id)
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    struct StubLookup {
        response: Result<DeliveryDestination, DependencyError>,
        calls: AtomicU32,
    }

    impl StubLookup {
        fn returning(response: Result<DeliveryDestination, DependencyError>) -> Self {
            Self {
                response,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DeliveryLookup for StubLookup {
        async fn get_destination(
            &self,
            _delivery_id: DeliveryId,
        ) -> Result<DeliveryDestination, DependencyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone()
        }
    }

    struct RecordingPublisher {
        failures_before_success: u32,
        calls: AtomicU32,
        published: Mutex<Vec<(String, String, EventEnvelope)>>,
    }

    impl RecordingPublisher {
        fn failing_first(failures_before_success: u32) -> Self {
            Self {
                failures_before_success,
                calls: AtomicU32::new(0),
                published: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn published(&self) -> Vec<(String, String, EventEnvelope)> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(
            &self,
            topic: &str,
            routing_key: &str,
            event: &EventEnvelope,
        ) -> Result<(), DependencyError> {
            let attempt = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures_before_success {
                return Err(DependencyError::unavailable("broker unreachable"));
            }
            self.published.lock().unwrap().push((
                topic.to_string(),
                routing_key.to_string(),
                event.clone(),
            ));
            Ok(())
        }
    }

    struct Harness {
        service: TrackingService,
        hub: Hub,
        lookup: Arc<StubLookup>,
        publisher: Arc<RecordingPublisher>,
        breaker: Arc<CircuitBreaker>,
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn destination(customer_id: i64) -> DeliveryDestination {
        DeliveryDestination {
            customer_id: CustomerId::new(customer_id),
            latitude: 40.7589,
            longitude: -73.9851,
        }
    }

    fn settings() -> TrackingSettings {
        TrackingSettings {
            lookup_timeout: Duration::from_secs(1),
            publish_timeout: Duration::from_secs(1),
            publish_retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(5),
            },
            ..TrackingSettings::default()
        }
    }

    fn harness_with(
        repository: Arc<dyn PositionRepository>,
        lookup: StubLookup,
        publisher: RecordingPublisher,
        breaker_config: CircuitBreakerConfig,
    ) -> Harness {
        let hub = Hub::spawn(HubConfig::default());
        let lookup = Arc::new(lookup);
        let publisher = Arc::new(publisher);
        let breaker = Arc::new(CircuitBreaker::new("delivery-service", breaker_config));

        let service = TrackingService::new(TrackingServiceDependencies {
            repository,
            hub: hub.clone(),
            delivery_lookup: lookup.clone(),
            event_publisher: publisher.clone(),
            clock: Arc::new(FixedClock(now())),
            lookup_breaker: breaker.clone(),
            settings: settings(),
        });

        Harness {
            service,
            hub,
            lookup,
            publisher,
            breaker,
        }
    }

    fn harness(repository: Arc<dyn PositionRepository>) -> Harness {
        harness_with(
            repository,
            StubLookup::returning(Ok(destination(42))),
            RecordingPublisher::failing_first(0),
            CircuitBreakerConfig::default(),
        )
    }

    fn nyc_report() -> RecordPositionRequest {
        RecordPositionRequest::new(DeliveryId::new(1), CourierId::new(1), 40.7128, -74.0060)
    }

    async fn next(sub: &mut ClientSubscription) -> Arc<OutboundMessage> {
        timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timed out waiting for message")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_record_then_locate_then_estimate() {
        let h = harness(Arc::new(MemoryRepository::default()));

        let stored = h.service.record_position(nyc_report()).await.unwrap();
        assert_eq!(stored.delivery_id, DeliveryId::new(1));
        assert_eq!(stored.recorded_at, now());
        assert_eq!(stored.observed_at, now());

        let current = h
            .service
            .get_current_location(DeliveryId::new(1))
            .await
            .unwrap();
        assert_eq!(current.id, stored.id);

        let estimate = h
            .service
            .estimate_arrival(DeliveryId::new(1), 40.7589, -73.9851)
            .await
            .unwrap();
        assert!(estimate.distance_km > 0.0);
        assert!((estimate.eta_hours() - estimate.distance_km / 25.0).abs() < 1e-9);

        h.service.wait_for_background_tasks().await;
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_optional_fields_and_device_time_are_kept() {
        let h = harness(Arc::new(MemoryRepository::default()));
        let observed = now() - chrono::Duration::seconds(5);

        let stored = h
            .service
            .record_position(RecordPositionRequest {
                accuracy: Some(4.0),
                speed: Some(6.5),
                heading: Some(270.0),
                altitude: Some(12.0),
                observed_at: Some(observed),
                ..nyc_report()
            })
            .await
            .unwrap();

        assert_eq!(stored.accuracy, Some(4.0));
        assert_eq!(stored.heading, Some(270.0));
        assert_eq!(stored.observed_at, observed);
        assert_eq!(stored.recorded_at, now());
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_report_is_rejected_before_storage() {
        // 未设置任何期望：一旦调用仓储，mock 会直接 panic
        let h = harness(Arc::new(MockPositionRepository::new()));

        let err = h
            .service
            .record_position(RecordPositionRequest::new(
                DeliveryId::new(1),
                CourierId::new(1),
                91.0,
                0.0,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(_)));

        let err = h
            .service
            .record_position(RecordPositionRequest::new(
                DeliveryId::new(0),
                CourierId::new(1),
                1.0,
                1.0,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(_)));

        let err = h
            .service
            .estimate_arrival(DeliveryId::new(1), 0.0, 200.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Domain(_)));
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_track_limit_is_normalized_before_repository() {
        let mut repository = MockPositionRepository::new();
        repository
            .expect_history_by_delivery()
            .withf(|id, limit| *id == DeliveryId::new(7) && *limit == 100)
            .times(2)
            .returning(|_, _| Ok(vec![]));
        repository
            .expect_history_by_delivery()
            .withf(|_, limit| *limit == 1000)
            .times(1)
            .returning(|_, _| Ok(vec![]));
        repository
            .expect_history_by_delivery()
            .withf(|_, limit| *limit == 20)
            .times(1)
            .returning(|_, _| Ok(vec![]));
        repository
            .expect_history_by_courier()
            .withf(|id, limit| *id == CourierId::new(3) && *limit == 100)
            .times(1)
            .returning(|_, _| Ok(vec![]));
        let h = harness(Arc::new(repository));

        for limit in [0, -5, 5000, 20] {
            h.service
                .get_delivery_track(DeliveryId::new(7), limit)
                .await
                .unwrap();
        }
        h.service
            .get_courier_track(CourierId::new(3), 0)
            .await
            .unwrap();
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_bounded() {
        let h = harness(Arc::new(MemoryRepository::default()));
        for i in 0..5 {
            h.service
                .record_position(RecordPositionRequest::new(
                    DeliveryId::new(2),
                    CourierId::new(8),
                    10.0 + i as f64,
                    20.0,
                ))
                .await
                .unwrap();
        }

        let track = h
            .service
            .get_delivery_track(DeliveryId::new(2), 3)
            .await
            .unwrap();
        let latitudes: Vec<f64> = track.iter().map(|p| p.latitude).collect();
        assert_eq!(latitudes, vec![14.0, 13.0, 12.0]);

        let courier = h
            .service
            .get_courier_location(CourierId::new(8))
            .await
            .unwrap();
        assert_eq!(courier.latitude, 14.0);

        h.service.wait_for_background_tasks().await;
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_store_fault_and_not_found_surface_distinctly() {
        let mut repository = MockPositionRepository::new();
        repository
            .expect_create()
            .returning(|_| Err(RepositoryError::storage("connection reset")));
        repository
            .expect_latest_by_delivery()
            .returning(|_| Err(RepositoryError::NotFound));
        repository
            .expect_latest_by_courier()
            .returning(|_| Err(RepositoryError::storage("pool exhausted")));
        let h = harness(Arc::new(repository));
        let mut viewer = h
            .hub
            .register(SubscriptionTarget::Delivery(DeliveryId::new(1)), "viewer")
            .await
            .unwrap();

        let err = h.service.record_position(nyc_report()).await.unwrap_err();
        assert!(matches!(err, ApplicationError::Store(_)));

        let err = h
            .service
            .get_current_location(DeliveryId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound));

        let err = h
            .service
            .estimate_arrival(DeliveryId::new(1), 40.0, -73.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::NotFound));

        let err = h
            .service
            .get_courier_location(CourierId::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ApplicationError::Store(_)));

        // 保存失败时不广播，也不触发后台任务
        assert!(timeout(Duration::from_millis(100), viewer.recv())
            .await
            .is_err());
        assert_eq!(h.lookup.calls(), 0);
        assert_eq!(h.publisher.calls(), 0);
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_position_is_pushed_to_delivery_subscribers() {
        let h = harness(Arc::new(MemoryRepository::default()));
        let mut viewer = h
            .hub
            .register(SubscriptionTarget::Delivery(DeliveryId::new(1)), "viewer")
            .await
            .unwrap();

        let stored = h.service.record_position(nyc_report()).await.unwrap();

        match next(&mut viewer).await.as_ref() {
            OutboundMessage::DeliveryUpdate(update) => {
                assert_eq!(update.delivery_id, DeliveryId::new(1));
                assert_eq!(update.location, stored);
            }
            other => panic!("unexpected message {other:?}"),
        }
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_arrival_notification_reaches_customer() {
        let h = harness(Arc::new(MemoryRepository::default()));
        let mut customer = h
            .hub
            .register(SubscriptionTarget::Customer(CustomerId::new(42)), "customer-42")
            .await
            .unwrap();
        let mut other = h
            .hub
            .register(SubscriptionTarget::Customer(CustomerId::new(43)), "customer-43")
            .await
            .unwrap();

        h.service.record_position(nyc_report()).await.unwrap();
        h.service.wait_for_background_tasks().await;

        match next(&mut customer).await.as_ref() {
            OutboundMessage::CustomerNotification(notification) => {
                assert_eq!(notification.customer_id, CustomerId::new(42));
                assert_eq!(notification.kind, NOTIFICATION_ETA_UPDATED);
                assert_eq!(notification.data["delivery_id"], 1);
                assert!(notification.data["distance_km"].as_f64().unwrap() > 5.0);
            }
            other => panic!("unexpected message {other:?}"),
        }
        assert!(timeout(Duration::from_millis(100), other.recv())
            .await
            .is_err());
        assert_eq!(h.lookup.calls(), 1);
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_location_event_is_published_after_retries() {
        let h = harness_with(
            Arc::new(MemoryRepository::default()),
            StubLookup::returning(Ok(destination(1))),
            RecordingPublisher::failing_first(2),
            CircuitBreakerConfig::default(),
        );

        let stored = h
            .service
            .record_position(RecordPositionRequest {
                trace_id: Some("req-123".to_string()),
                ..nyc_report()
            })
            .await
            .unwrap();
        h.service.wait_for_background_tasks().await;

        assert_eq!(h.publisher.calls(), 3);
        let published = h.publisher.published();
        assert_eq!(published.len(), 1);
        let (topic, routing_key, envelope) = &published[0];
        assert_eq!(topic, "tracking-events");
        assert_eq!(routing_key, "tracking.location.updated");
        assert_eq!(envelope.event_type, LOCATION_UPDATED_EVENT);
        assert_eq!(envelope.source, "tracking-service");
        assert_eq!(envelope.trace_id.as_deref(), Some("req-123"));
        assert_eq!(envelope.payload["position_id"], stored.id.0.to_string());
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_ingestion_survives_failing_downstreams() {
        let h = harness_with(
            Arc::new(MemoryRepository::default()),
            StubLookup::returning(Err(DependencyError::unavailable("503 from upstream"))),
            RecordingPublisher::failing_first(u32::MAX),
            CircuitBreakerConfig::default(),
        );

        let stored = h.service.record_position(nyc_report()).await.unwrap();
        h.service.wait_for_background_tasks().await;

        assert_eq!(stored.delivery_id, DeliveryId::new(1));
        assert_eq!(h.lookup.calls(), 1);
        assert_eq!(h.publisher.calls(), 3);
        assert!(h.publisher.published().is_empty());
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_open_breaker_skips_destination_lookup() {
        let h = harness_with(
            Arc::new(MemoryRepository::default()),
            StubLookup::returning(Err(DependencyError::unavailable("connection refused"))),
            RecordingPublisher::failing_first(0),
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                reset_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        );

        h.service.record_position(nyc_report()).await.unwrap();
        h.service.wait_for_background_tasks().await;
        assert_eq!(h.breaker.state(), CircuitState::Open);

        h.service.record_position(nyc_report()).await.unwrap();
        h.service.wait_for_background_tasks().await;
        assert_eq!(h.lookup.calls(), 1);
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_rejected_lookup_does_not_trip_breaker() {
        let h = harness_with(
            Arc::new(MemoryRepository::default()),
            StubLookup::returning(Err(DependencyError::rejected("delivery 1 not found"))),
            RecordingPublisher::failing_first(0),
            CircuitBreakerConfig {
                failure_threshold: 1,
                success_threshold: 1,
                reset_timeout: Duration::from_secs(60),
                half_open_max_calls: 1,
            },
        );

        for _ in 0..2 {
            h.service.record_position(nyc_report()).await.unwrap();
            h.service.wait_for_background_tasks().await;
        }

        assert_eq!(h.breaker.state(), CircuitState::Closed);
        assert_eq!(h.lookup.calls(), 2);
        h.hub.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_publish_backoff() {
        let h = harness_with(
            Arc::new(MemoryRepository::default()),
            StubLookup::returning(Ok(destination(1))),
            RecordingPublisher::failing_first(u32::MAX),
            CircuitBreakerConfig::default(),
        );
        let slow_retry = TrackingSettings {
            publish_retry: RetryConfig {
                max_attempts: 10,
                initial_delay: Duration::from_secs(60),
                multiplier: 2.0,
                max_delay: Duration::from_secs(600),
            },
            ..settings()
        };
        let service = TrackingService::new(TrackingServiceDependencies {
            repository: Arc::new(MemoryRepository::default()),
            hub: h.hub.clone(),
            delivery_lookup: h.lookup.clone(),
            event_publisher: h.publisher.clone(),
            clock: Arc::new(FixedClock(now())),
            lookup_breaker: h.breaker.clone(),
            settings: slow_retry,
        });

        service.record_position(nyc_report()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_secs(1), service.shutdown())
            .await
            .expect("shutdown should not wait for the backoff");
        assert_eq!(h.publisher.calls(), 1);
        h.hub.shutdown();
    }
}
