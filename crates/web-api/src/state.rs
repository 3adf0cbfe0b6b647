use std::sync::Arc;
use std::time::Duration;

use application::{Hub, TokenValidator, TrackingService};
use axum::http::HeaderMap;
use domain::Claims;

use crate::{auth::bearer_token, error::ApiError};

#[derive(Clone)]
pub struct AppState {
    pub tracking: Arc<TrackingService>,
    pub hub: Hub,
    pub token_validator: Arc<dyn TokenValidator>,
    /// WebSocket 心跳间隔
    pub ws_ping_interval: Duration,
}

impl AppState {
    pub fn new(
        tracking: Arc<TrackingService>,
        token_validator: Arc<dyn TokenValidator>,
        ws_ping_interval: Duration,
    ) -> Self {
        let hub = tracking.hub().clone();
        Self {
            tracking,
            hub,
            token_validator,
            ws_ping_interval,
        }
    }

    /// 校验 `Authorization` 头中的 Bearer token
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<Claims, ApiError> {
        let token = bearer_token(headers)?;
        self.authenticate_token(token).await
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<Claims, ApiError> {
        self.token_validator
            .validate_token(token)
            .await
            .map_err(|err| {
                tracing::debug!(error = %err, "token 校验失败");
                ApiError::from(err)
            })
    }
}
