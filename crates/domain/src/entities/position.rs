//! 位置记录实体定义
//!
//! 一条位置记录对应骑手在某个配送单上的一次定位上报，创建后不可修改。

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Coordinates, CourierId, DeliveryId, PositionId, Timestamp};
use serde::{Deserialize, Serialize};

/// 位置记录实体
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// 记录ID
    pub id: PositionId,
    /// 配送单ID
    pub delivery_id: DeliveryId,
    /// 骑手ID
    pub courier_id: CourierId,
    pub latitude: f64,
    pub longitude: f64,
    /// 定位精度（米）
    pub accuracy: Option<f64>,
    /// 速度（米/秒）
    pub speed: Option<f64>,
    /// 航向（度，正北为 0）
    pub heading: Option<f64>,
    /// 海拔（米）
    pub altitude: Option<f64>,
    /// 设备采集时间
    pub observed_at: Timestamp,
    /// 服务端入库时间
    pub recorded_at: Timestamp,
}

impl Position {
    /// 创建新的位置记录
    ///
    /// 拒绝非正数的配送单/骑手 ID 以及越界坐标。可选字段通过 `with_*` 方法附加。
    pub fn new(
        delivery_id: DeliveryId,
        courier_id: CourierId,
        latitude: f64,
        longitude: f64,
        now: Timestamp,
    ) -> DomainResult<Self> {
        Self::validate_ids(delivery_id, courier_id)?;
        let coordinates = Coordinates::new(latitude, longitude)?;

        Ok(Self {
            id: PositionId::generate(),
            delivery_id,
            courier_id,
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            accuracy: None,
            speed: None,
            heading: None,
            altitude: None,
            observed_at: now,
            recorded_at: now,
        })
    }

    /// 使用已有ID重建位置记录（用于从数据库加载）
    #[allow(clippy::too_many_arguments)]
    pub fn with_id(
        id: PositionId,
        delivery_id: DeliveryId,
        courier_id: CourierId,
        latitude: f64,
        longitude: f64,
        observed_at: Timestamp,
        recorded_at: Timestamp,
    ) -> DomainResult<Self> {
        Self::validate_ids(delivery_id, courier_id)?;
        let coordinates = Coordinates::new(latitude, longitude)?;

        Ok(Self {
            id,
            delivery_id,
            courier_id,
            latitude: coordinates.latitude,
            longitude: coordinates.longitude,
            accuracy: None,
            speed: None,
            heading: None,
            altitude: None,
            observed_at,
            recorded_at,
        })
    }

    pub fn with_accuracy(mut self, accuracy: Option<f64>) -> Self {
        self.accuracy = accuracy;
        self
    }

    pub fn with_speed(mut self, speed: Option<f64>) -> Self {
        self.speed = speed;
        self
    }

    pub fn with_heading(mut self, heading: Option<f64>) -> Self {
        self.heading = heading;
        self
    }

    pub fn with_altitude(mut self, altitude: Option<f64>) -> Self {
        self.altitude = altitude;
        self
    }

    /// 设备上报了采集时间时覆盖默认值（默认等于入库时间）
    pub fn with_observed_at(mut self, observed_at: Option<Timestamp>) -> Self {
        if let Some(observed_at) = observed_at {
            self.observed_at = observed_at;
        }
        self
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }

    fn validate_ids(delivery_id: DeliveryId, courier_id: CourierId) -> DomainResult<()> {
        if !delivery_id.is_valid() {
            return Err(DomainError::validation_error(
                "delivery_id",
                format!("must be positive, got {delivery_id}"),
            ));
        }
        if !courier_id.is_valid() {
            return Err(DomainError::validation_error(
                "courier_id",
                format!("must be positive, got {courier_id}"),
            ));
        }
        Ok(())
    }
}
