use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        ws::WebSocketUpgrade,
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use application::{HubStats, RecordPositionRequest, SubscriptionTarget};
use domain::{ArrivalEstimate, CourierId, DeliveryId, Position, Role};

use crate::{error::ApiError, state::AppState, ws_connection::WebSocketConnection};

/// 链路追踪标识请求头，写入事件信封的 trace_id
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Deserialize)]
struct PositionPayload {
    delivery_id: i64,
    courier_id: i64,
    latitude: f64,
    longitude: f64,
    accuracy: Option<f64>,
    speed: Option<f64>,
    heading: Option<f64>,
    altitude: Option<f64>,
    observed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TrackQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct EtaPayload {
    dest_lat: f64,
    dest_lng: f64,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/positions", post(record_position))
        .route("/deliveries/{delivery_id}/location", get(delivery_location))
        .route("/deliveries/{delivery_id}/track", get(delivery_track))
        .route("/deliveries/{delivery_id}/eta", post(estimate_arrival))
        .route("/couriers/{courier_id}/location", get(courier_location))
        .route("/couriers/{courier_id}/track", get(courier_track))
        .route("/stats/connections", get(connection_stats))
        .route("/ws/deliveries/{delivery_id}", get(track_socket))
        .route("/ws/notifications", get(notification_socket))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

type IdPath = Result<Path<i64>, PathRejection>;

fn delivery_id(path: IdPath) -> Result<DeliveryId, ApiError> {
    let Path(raw) = path?;
    let id = DeliveryId::new(raw);
    if !id.is_valid() {
        return Err(ApiError::bad_request(format!(
            "delivery_id: must be positive, got {raw}"
        )));
    }
    Ok(id)
}

fn courier_id(path: IdPath) -> Result<CourierId, ApiError> {
    let Path(raw) = path?;
    let id = CourierId::new(raw);
    if !id.is_valid() {
        return Err(ApiError::bad_request(format!(
            "courier_id: must be positive, got {raw}"
        )));
    }
    Ok(id)
}

async fn record_position(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PositionPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<Position>), ApiError> {
    let claims = state.authenticate(&headers).await?;
    let Json(payload) = payload?;

    let courier = CourierId::new(payload.courier_id);
    if !claims.can_report_for(courier) {
        tracing::warn!(
            identity = %claims.identity,
            courier_id = %courier,
            "拒绝代替其他骑手上报位置"
        );
        return Err(ApiError::forbidden("cannot report position for this courier"));
    }

    let request = RecordPositionRequest {
        accuracy: payload.accuracy,
        speed: payload.speed,
        heading: payload.heading,
        altitude: payload.altitude,
        observed_at: payload.observed_at,
        trace_id: headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        ..RecordPositionRequest::new(
            DeliveryId::new(payload.delivery_id),
            courier,
            payload.latitude,
            payload.longitude,
        )
    };

    let position = state.tracking.record_position(request).await?;
    Ok((StatusCode::CREATED, Json(position)))
}

async fn delivery_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: IdPath,
) -> Result<Json<Position>, ApiError> {
    state.authenticate(&headers).await?;
    let position = state
        .tracking
        .get_current_location(delivery_id(path)?)
        .await?;
    Ok(Json(position))
}

async fn delivery_track(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: IdPath,
    Query(query): Query<TrackQuery>,
) -> Result<Json<Vec<Position>>, ApiError> {
    state.authenticate(&headers).await?;
    let track = state
        .tracking
        .get_delivery_track(delivery_id(path)?, query.limit.unwrap_or(0))
        .await?;
    Ok(Json(track))
}

async fn estimate_arrival(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: IdPath,
    payload: Result<Json<EtaPayload>, JsonRejection>,
) -> Result<Json<ArrivalEstimate>, ApiError> {
    state.authenticate(&headers).await?;
    let Json(payload) = payload?;
    let estimate = state
        .tracking
        .estimate_arrival(delivery_id(path)?, payload.dest_lat, payload.dest_lng)
        .await?;
    Ok(Json(estimate))
}

async fn courier_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: IdPath,
) -> Result<Json<Position>, ApiError> {
    state.authenticate(&headers).await?;
    let position = state
        .tracking
        .get_courier_location(courier_id(path)?)
        .await?;
    Ok(Json(position))
}

async fn courier_track(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: IdPath,
    Query(query): Query<TrackQuery>,
) -> Result<Json<Vec<Position>>, ApiError> {
    state.authenticate(&headers).await?;
    let track = state
        .tracking
        .get_courier_track(courier_id(path)?, query.limit.unwrap_or(0))
        .await?;
    Ok(Json(track))
}

async fn connection_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HubStats>, ApiError> {
    let claims = state.authenticate(&headers).await?;
    if !claims.is_admin() {
        return Err(ApiError::forbidden("admin role required"));
    }
    Ok(Json(state.hub.stats()))
}

/// 追踪模式：骑手或管理员订阅某个配送单的位置流
async fn track_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    path: IdPath,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let claims = state
        .authenticate_token(query.token.as_deref().unwrap_or_default())
        .await?;
    if !matches!(claims.role, Role::Courier | Role::Admin) {
        return Err(ApiError::forbidden("track mode requires courier or admin role"));
    }
    let target = SubscriptionTarget::Delivery(delivery_id(path)?);

    Ok(ws.on_upgrade(move |socket| {
        WebSocketConnection::new(state, target, claims.identity).run(socket)
    }))
}

/// 通知模式：客户订阅自己的通知流
async fn notification_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Result<Response, ApiError> {
    let claims = state
        .authenticate_token(query.token.as_deref().unwrap_or_default())
        .await?;
    let customer_id = match (claims.role, claims.customer_id) {
        (Role::Customer, Some(customer_id)) if customer_id.is_valid() => customer_id,
        _ => {
            return Err(ApiError::forbidden(
                "notify mode requires a customer identity",
            ))
        }
    };
    let target = SubscriptionTarget::Customer(customer_id);

    Ok(ws.on_upgrade(move |socket| {
        WebSocketConnection::new(state, target, claims.identity).run(socket)
    }))
}
