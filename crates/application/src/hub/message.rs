//! Hub 推送给实时连接的消息

use domain::{CustomerId, DeliveryId, Position};
use serde::Serialize;
use uuid::Uuid;

/// 实时连接标识
pub type ClientId = Uuid;

/// 到达预估更新通知
pub const NOTIFICATION_ETA_UPDATED: &str = "eta_updated";

/// 订阅目标：单个配送单的位置流，或某个客户的通知流
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionTarget {
    Delivery(DeliveryId),
    Customer(CustomerId),
}

impl SubscriptionTarget {
    pub fn mode(&self) -> &'static str {
        match self {
            SubscriptionTarget::Delivery(_) => "track",
            SubscriptionTarget::Customer(_) => "notify",
        }
    }
}

/// 追踪模式帧：`{delivery_id, location}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveryUpdate {
    pub delivery_id: DeliveryId,
    pub location: Position,
}

/// 通知模式帧：`{customer_id, type, message, data}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerNotification {
    pub customer_id: CustomerId,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    DeliveryUpdate(DeliveryUpdate),
    CustomerNotification(CustomerNotification),
}

impl OutboundMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
