//! Repository接口定义
//!
//! 定义数据访问层的抽象接口，遵循清洁架构原则，内层定义接口，外层实现接口。

pub mod position_repository;

pub use position_repository::PositionRepository;
#[cfg(any(test, feature = "testing"))]
pub use position_repository::MockPositionRepository;
