use std::sync::Arc;
use std::time::Duration;

use domain::{
    ArrivalEstimate, Coordinates, CourierId, DeliveryDestination, DeliveryId, LocationUpdated,
    Position, PositionRepository, Timestamp, DEFAULT_AVERAGE_SPEED_KMH,
    LOCATION_UPDATED_ROUTING_KEY,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn, Instrument};

use crate::{
    clock::Clock,
    delivery::DeliveryLookup,
    error::{ApplicationError, DependencyError},
    hub::{Hub, NOTIFICATION_ETA_UPDATED},
    publisher::EventPublisher,
    resilience::{retry_async, CircuitBreaker, CircuitBreakerError, RetryConfig, RetryError},
};

/// 一次位置上报
#[derive(Debug, Clone)]
pub struct RecordPositionRequest {
    pub delivery_id: DeliveryId,
    pub courier_id: CourierId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub altitude: Option<f64>,
    /// 设备采集时间，缺省时取入库时间
    pub observed_at: Option<Timestamp>,
    /// 上游请求链路标识，写入事件信封
    pub trace_id: Option<String>,
}

impl RecordPositionRequest {
    pub fn new(delivery_id: DeliveryId, courier_id: CourierId, latitude: f64, longitude: f64) -> Self {
        Self {
            delivery_id,
            courier_id,
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
            altitude: None,
            observed_at: None,
            trace_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    /// `limit <= 0` 时使用的历史条数
    pub default_history_limit: u32,
    pub max_history_limit: u32,
    pub average_speed_kmh: f64,
    /// 配送服务单次查询超时
    pub lookup_timeout: Duration,
    /// 事件总线单次发布超时
    pub publish_timeout: Duration,
    pub publish_retry: RetryConfig,
    pub event_topic: String,
    pub routing_key: String,
    pub event_source: String,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            default_history_limit: 100,
            max_history_limit: 1000,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            lookup_timeout: Duration::from_secs(3),
            publish_timeout: Duration::from_secs(2),
            publish_retry: RetryConfig::default(),
            event_topic: "tracking-events".to_string(),
            routing_key: LOCATION_UPDATED_ROUTING_KEY.to_string(),
            event_source: "tracking-service".to_string(),
        }
    }
}

pub struct TrackingServiceDependencies {
    pub repository: Arc<dyn PositionRepository>,
    pub hub: Hub,
    pub delivery_lookup: Arc<dyn DeliveryLookup>,
    pub event_publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    /// 配送服务断路器，在 main 中构造并共享
    pub lookup_breaker: Arc<CircuitBreaker>,
    pub settings: TrackingSettings,
}

/// 位置追踪编排服务
///
/// 同步路径只做校验与持久化；Hub 广播、到达预估通知、事件发布都是尽力而为，
/// 失败只记录日志，不影响上报结果。
pub struct TrackingService {
    deps: TrackingServiceDependencies,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl TrackingService {
    pub fn new(deps: TrackingServiceDependencies) -> Self {
        Self {
            deps,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &TrackingSettings {
        &self.deps.settings
    }

    pub fn hub(&self) -> &Hub {
        &self.deps.hub
    }

    /// 校验并保存位置，随后触发实时推送与后台任务
    #[tracing::instrument(
        skip(self, request),
        fields(delivery_id = %request.delivery_id, courier_id = %request.courier_id)
    )]
    pub async fn record_position(
        &self,
        request: RecordPositionRequest,
    ) -> Result<Position, ApplicationError> {
        let now = self.deps.clock.now();
        let position = Position::new(
            request.delivery_id,
            request.courier_id,
            request.latitude,
            request.longitude,
            now,
        )?
        .with_accuracy(request.accuracy)
        .with_speed(request.speed)
        .with_heading(request.heading)
        .with_altitude(request.altitude)
        .with_observed_at(request.observed_at);

        let stored = self.deps.repository.create(&position).await?;
        debug!(position_id = %stored.id.0, "position stored");

        if let Err(err) = self
            .deps
            .hub
            .broadcast_delivery_update(stored.delivery_id, stored.clone())
        {
            warn!(error = %err, "实时推送入队失败，丢弃本次广播");
        }

        self.spawn_arrival_refresh(stored.clone());
        self.spawn_location_event(stored.clone(), request.trace_id);

        Ok(stored)
    }

    pub async fn get_current_location(
        &self,
        delivery_id: DeliveryId,
    ) -> Result<Position, ApplicationError> {
        Ok(self.deps.repository.latest_by_delivery(delivery_id).await?)
    }

    pub async fn get_delivery_track(
        &self,
        delivery_id: DeliveryId,
        limit: i64,
    ) -> Result<Vec<Position>, ApplicationError> {
        let limit = self.normalize_limit(limit);
        Ok(self
            .deps
            .repository
            .history_by_delivery(delivery_id, limit)
            .await?)
    }

    pub async fn get_courier_location(
        &self,
        courier_id: CourierId,
    ) -> Result<Position, ApplicationError> {
        Ok(self.deps.repository.latest_by_courier(courier_id).await?)
    }

    pub async fn get_courier_track(
        &self,
        courier_id: CourierId,
        limit: i64,
    ) -> Result<Vec<Position>, ApplicationError> {
        let limit = self.normalize_limit(limit);
        Ok(self
            .deps
            .repository
            .history_by_courier(courier_id, limit)
            .await?)
    }

    /// 根据最新位置估算到达时间
    pub async fn estimate_arrival(
        &self,
        delivery_id: DeliveryId,
        dest_lat: f64,
        dest_lng: f64,
    ) -> Result<ArrivalEstimate, ApplicationError> {
        let destination = Coordinates::new(dest_lat, dest_lng)?;
        let latest = self.deps.repository.latest_by_delivery(delivery_id).await?;
        Ok(ArrivalEstimate::from_position(
            &latest,
            destination,
            self.deps.settings.average_speed_kmh,
            self.deps.clock.now(),
        )?)
    }

    /// 等待当前所有后台任务结束（测试与优雅关闭使用）
    pub async fn wait_for_background_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// 取消后台任务的等待并等它们退出
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("tracking background tasks stopped");
    }

    fn normalize_limit(&self, limit: i64) -> u32 {
        let settings = &self.deps.settings;
        if limit <= 0 {
            settings.default_history_limit
        } else {
            u32::try_from(limit)
                .unwrap_or(u32::MAX)
                .min(settings.max_history_limit)
        }
    }

    fn spawn_arrival_refresh(&self, position: Position) {
        let task = ArrivalRefresh {
            hub: self.deps.hub.clone(),
            lookup: self.deps.delivery_lookup.clone(),
            breaker: self.deps.lookup_breaker.clone(),
            clock: self.deps.clock.clone(),
            timeout: self.deps.settings.lookup_timeout,
            average_speed_kmh: self.deps.settings.average_speed_kmh,
        };
        let cancel = self.shutdown.clone();
        let delivery_id = position.delivery_id;

        self.tasks.spawn(
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => debug!("shutdown before arrival refresh finished"),
                    _ = task.run(position) => {}
                }
            }
            .instrument(tracing::info_span!("arrival_refresh", %delivery_id)),
        );
    }

    fn spawn_location_event(&self, position: Position, trace_id: Option<String>) {
        let publisher = self.deps.event_publisher.clone();
        let settings = self.deps.settings.clone();
        let cancel = self.shutdown.clone();
        let now = self.deps.clock.now();
        let delivery_id = position.delivery_id;

        self.tasks.spawn(
            async move {
                let envelope = match LocationUpdated::from(&position)
                    .into_envelope(settings.event_source.as_str(), now)
                {
                    Ok(envelope) => envelope.with_trace(trace_id, None),
                    Err(err) => {
                        error!(error = %err, "无法序列化位置事件");
                        return;
                    }
                };

                let publisher = publisher.as_ref();
                let envelope = &envelope;
                let topic = settings.event_topic.as_str();
                let routing_key = settings.routing_key.as_str();
                let timeout = settings.publish_timeout;

                let result = retry_async(&settings.publish_retry, &cancel, move || async move {
                    match tokio::time::timeout(
                        timeout,
                        publisher.publish(topic, routing_key, envelope),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(DependencyError::Timeout(timeout)),
                    }
                })
                .await;

                match result {
                    Ok(()) => debug!(event_id = %envelope.id, "location event published"),
                    Err(RetryError::Cancelled) => {
                        debug!(event_id = %envelope.id, "location event publish cancelled")
                    }
                    Err(RetryError::Exhausted {
                        attempts,
                        last_error,
                    }) => error!(
                        event_id = %envelope.id,
                        attempts,
                        error = %last_error,
                        "位置事件发布失败，已放弃"
                    ),
                }
            }
            .instrument(tracing::info_span!("location_event", %delivery_id)),
        );
    }
}

/// 查询目的地并推送到达预估通知
struct ArrivalRefresh {
    hub: Hub,
    lookup: Arc<dyn DeliveryLookup>,
    breaker: Arc<CircuitBreaker>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    average_speed_kmh: f64,
}

impl ArrivalRefresh {
    async fn run(self, position: Position) {
        let Some(destination) = self.resolve_destination(position.delivery_id).await else {
            return;
        };

        let estimate = match destination.coordinates().and_then(|coordinates| {
            ArrivalEstimate::from_position(
                &position,
                coordinates,
                self.average_speed_kmh,
                self.clock.now(),
            )
        }) {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!(error = %err, "配送服务返回的目的地无效");
                return;
            }
        };

        let message = format!(
            "courier is about {:.0} minutes away",
            estimate.eta_minutes.ceil()
        );
        let data = serde_json::json!({
            "delivery_id": position.delivery_id,
            "distance_km": estimate.distance_km,
            "average_speed_kmh": estimate.average_speed_kmh,
            "eta_minutes": estimate.eta_minutes,
            "estimated_arrival": estimate.estimated_arrival,
        });

        if let Err(err) = self.hub.broadcast_customer_notification(
            destination.customer_id,
            NOTIFICATION_ETA_UPDATED,
            message,
            data,
        ) {
            warn!(customer_id = %destination.customer_id, error = %err, "到达通知入队失败");
        }
    }

    async fn resolve_destination(&self, delivery_id: DeliveryId) -> Option<DeliveryDestination> {
        let lookup = self.lookup.as_ref();
        let timeout = self.timeout;

        let result = self
            .breaker
            .call(move || async move {
                match tokio::time::timeout(timeout, lookup.get_destination(delivery_id)).await {
                    Ok(Ok(destination)) => Ok(Ok(destination)),
                    // 依赖正常应答了拒绝，不计入断路器失败
                    Ok(Err(DependencyError::Rejected(reason))) => Ok(Err(reason)),
                    Ok(Err(err)) => Err(err),
                    Err(_) => Err(DependencyError::Timeout(timeout)),
                }
            })
            .await;

        match result {
            Ok(Ok(destination)) => Some(destination),
            Ok(Err(reason)) => {
                warn!(%reason, "配送服务拒绝了目的地查询");
                None
            }
            Err(CircuitBreakerError::Open { name }) => {
                warn!(breaker = %name, "配送服务断路器已断开，跳过到达预估");
                None
            }
            Err(CircuitBreakerError::Inner(err)) => {
                warn!(error = %err, "查询配送目的地失败");
                None
            }
        }
    }
}
