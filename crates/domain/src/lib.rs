//! 配送追踪核心领域模型
//!
//! 包含位置记录、到达预估、身份声明、领域事件以及位置仓储接口。

pub mod entities;
pub mod errors;
pub mod events;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use events::*;
pub use repositories::*;
pub use value_objects::*;
