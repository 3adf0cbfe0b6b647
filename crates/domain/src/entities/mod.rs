//! 领域实体定义
//!
//! 包含位置记录、到达预估、身份声明与配送目的地。

pub mod arrival;
pub mod auth;
pub mod delivery;
pub mod position;

// 重新导出核心实体
pub use arrival::{planar_distance_km, ArrivalEstimate, DEFAULT_AVERAGE_SPEED_KMH, KM_PER_DEGREE};
pub use auth::{Claims, Role};
pub use delivery::DeliveryDestination;
pub use position::Position;
