//! 领域事件定义
//!
//! 通过持久化事件总线向平台其他服务广播的事件。

pub mod location_event;

pub use location_event::{
    EventEnvelope, LocationUpdated, LOCATION_UPDATED_EVENT, LOCATION_UPDATED_ROUTING_KEY,
};
