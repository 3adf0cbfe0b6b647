//! 到达时间预估
//!
//! 使用平面近似计算距离：城市尺度下误差可接受，不是大地线公式。
//! 距离公式与平均速度常量必须一起调整，否则输出量级会漂移。

use serde::{Deserialize, Serialize};

use crate::entities::position::Position;
use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{Coordinates, Timestamp};

/// 每纬度对应的公里数（近似值）。
pub const KM_PER_DEGREE: f64 = 111.0;

/// 默认平均配送速度（公里/小时）。
pub const DEFAULT_AVERAGE_SPEED_KMH: f64 = 25.0;

/// 到达预估结果，按调用即时计算，不落库。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalEstimate {
    pub distance_km: f64,
    pub average_speed_kmh: f64,
    pub eta_minutes: f64,
    pub estimated_arrival: Timestamp,
}

impl ArrivalEstimate {
    /// 根据最新位置和目的地坐标计算预估
    pub fn from_position(
        latest: &Position,
        destination: Coordinates,
        average_speed_kmh: f64,
        now: Timestamp,
    ) -> DomainResult<Self> {
        if !average_speed_kmh.is_finite() || average_speed_kmh <= 0.0 {
            return Err(DomainError::validation_error(
                "average_speed_kmh",
                format!("must be a positive number, got {average_speed_kmh}"),
            ));
        }

        let distance_km = planar_distance_km(latest.coordinates(), destination);
        let eta_hours = distance_km / average_speed_kmh;
        let eta_millis = (eta_hours * 3_600_000.0).round() as i64;
        let estimated_arrival = chrono::Duration::try_milliseconds(eta_millis)
            .and_then(|eta| now.checked_add_signed(eta))
            .ok_or_else(|| {
                DomainError::validation_error(
                    "average_speed_kmh",
                    format!("too small for a representable arrival time, got {average_speed_kmh}"),
                )
            })?;

        Ok(Self {
            distance_km,
            average_speed_kmh,
            eta_minutes: eta_hours * 60.0,
            estimated_arrival,
        })
    }

    pub fn eta_hours(&self) -> f64 {
        self.eta_minutes / 60.0
    }

    pub fn eta(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.eta_minutes * 60.0)
    }
}

/// 平面近似距离（公里）
///
/// `dLat = Δlat * 111`，`dLon = Δlon * 111 * cos(平均纬度)`，结果为两者的欧氏距离。
pub fn planar_distance_km(from: Coordinates, to: Coordinates) -> f64 {
    let avg_lat = ((from.latitude + to.latitude) / 2.0).to_radians();
    let d_lat_km = (to.latitude - from.latitude) * KM_PER_DEGREE;
    let d_lon_km = (to.longitude - from.longitude) * KM_PER_DEGREE * avg_lat.cos();
    (d_lat_km * d_lat_km + d_lon_km * d_lon_km).sqrt()
}
