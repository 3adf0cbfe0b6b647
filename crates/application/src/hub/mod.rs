//! 实时推送 Hub
//!
//! 单任务持有全部订阅关系。注册/注销走控制队列，广播走广播队列，循环优先处理
//! 控制事件，因此注册完成后发出的广播一定能送达新订阅者。每个订阅者有独立的
//! 有界队列，Hub 只做非阻塞投递：队列满的订阅者被视为慢消费者并立即驱逐，
//! 不会拖慢其它订阅者。

mod message;

pub use message::{
    ClientId, CustomerNotification, DeliveryUpdate, OutboundMessage, SubscriptionTarget,
    NOTIFICATION_ETA_UPDATED,
};

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use domain::{CustomerId, DeliveryId, Position};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hub 队列容量配置
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub command_capacity: usize,
    pub broadcast_capacity: usize,
    /// 单个订阅者的待发送消息上限
    pub client_queue_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: 256,
            broadcast_capacity: 4096,
            client_queue_capacity: 64,
        }
    }
}

/// 连接统计快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub delivery_subscriptions: usize,
    pub customer_subscriptions: usize,
    /// 因队列已满被驱逐的订阅者累计数
    pub evicted_total: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    #[error("hub is not running")]
    Closed,
    #[error("hub broadcast queue is full")]
    Full,
}

enum ControlEvent {
    Register {
        client_id: ClientId,
        target: SubscriptionTarget,
        identity: String,
        sender: mpsc::Sender<Arc<OutboundMessage>>,
    },
    Unregister {
        client_id: ClientId,
    },
}

enum BroadcastEvent {
    Delivery {
        delivery_id: DeliveryId,
        position: Position,
    },
    Customer(CustomerNotification),
}

/// 一个已注册的订阅
///
/// 接收端关闭（`recv` 返回 `None`）表示订阅已被 Hub 移除。
#[derive(Debug)]
pub struct ClientSubscription {
    pub id: ClientId,
    pub target: SubscriptionTarget,
    receiver: mpsc::Receiver<Arc<OutboundMessage>>,
}

impl ClientSubscription {
    pub async fn recv(&mut self) -> Option<Arc<OutboundMessage>> {
        self.receiver.recv().await
    }
}

/// Hub 句柄，可廉价克隆并在任意任务中使用
#[derive(Clone)]
pub struct Hub {
    control_tx: mpsc::Sender<ControlEvent>,
    broadcast_tx: mpsc::Sender<BroadcastEvent>,
    stats: Arc<RwLock<HubStats>>,
    shutdown: CancellationToken,
    client_queue_capacity: usize,
}

impl Hub {
    /// 启动 Hub 循环，必须在 tokio 运行时内调用
    pub fn spawn(config: HubConfig) -> Self {
        let (control_tx, control_rx) = mpsc::channel(config.command_capacity.max(1));
        let (broadcast_tx, broadcast_rx) = mpsc::channel(config.broadcast_capacity.max(1));
        let stats = Arc::new(RwLock::new(HubStats::default()));
        let shutdown = CancellationToken::new();

        let hub_loop = HubLoop {
            control_rx,
            broadcast_rx,
            subscribers: HashMap::new(),
            clients: HashMap::new(),
            snapshot: HubStats::default(),
            stats: stats.clone(),
            shutdown: shutdown.clone(),
        };
        tokio::spawn(hub_loop.run());

        Self {
            control_tx,
            broadcast_tx,
            stats,
            shutdown,
            client_queue_capacity: config.client_queue_capacity.max(1),
        }
    }

    /// 注册订阅者，返回其消息接收端
    pub async fn register(
        &self,
        target: SubscriptionTarget,
        identity: impl Into<String>,
    ) -> Result<ClientSubscription, HubError> {
        let (sender, receiver) = mpsc::channel(self.client_queue_capacity);
        let client_id = Uuid::new_v4();

        self.control_tx
            .send(ControlEvent::Register {
                client_id,
                target,
                identity: identity.into(),
                sender,
            })
            .await
            .map_err(|_| HubError::Closed)?;

        Ok(ClientSubscription {
            id: client_id,
            target,
            receiver,
        })
    }

    /// 注销订阅者；对已被驱逐或不存在的订阅是空操作
    pub async fn unregister(&self, client_id: ClientId) {
        if self
            .control_tx
            .send(ControlEvent::Unregister { client_id })
            .await
            .is_err()
        {
            debug!(%client_id, "hub already stopped, skip unregister");
        }
    }

    /// 把位置更新投递给该配送单的追踪订阅者
    pub fn broadcast_delivery_update(
        &self,
        delivery_id: DeliveryId,
        position: Position,
    ) -> Result<(), HubError> {
        self.enqueue(BroadcastEvent::Delivery {
            delivery_id,
            position,
        })
    }

    /// 把通知投递给该客户的通知订阅者
    pub fn broadcast_customer_notification(
        &self,
        customer_id: CustomerId,
        kind: impl Into<String>,
        message: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), HubError> {
        self.enqueue(BroadcastEvent::Customer(CustomerNotification {
            customer_id,
            kind: kind.into(),
            message: message.into(),
            data,
        }))
    }

    pub fn stats(&self) -> HubStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connection_count(&self) -> usize {
        self.stats().connections
    }

    /// 停止 Hub 循环并关闭所有订阅者队列
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn enqueue(&self, event: BroadcastEvent) -> Result<(), HubError> {
        self.broadcast_tx.try_send(event).map_err(|err| match err {
            TrySendError::Full(_) => HubError::Full,
            TrySendError::Closed(_) => HubError::Closed,
        })
    }
}

struct Subscriber {
    identity: String,
    sender: mpsc::Sender<Arc<OutboundMessage>>,
}

struct HubLoop {
    control_rx: mpsc::Receiver<ControlEvent>,
    broadcast_rx: mpsc::Receiver<BroadcastEvent>,
    subscribers: HashMap<SubscriptionTarget, HashMap<ClientId, Subscriber>>,
    clients: HashMap<ClientId, SubscriptionTarget>,
    snapshot: HubStats,
    stats: Arc<RwLock<HubStats>>,
    shutdown: CancellationToken,
}

impl HubLoop {
    async fn run(mut self) {
        info!("hub started");

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                Some(event) = self.control_rx.recv() => self.apply_control(event),
                Some(event) = self.broadcast_rx.recv() => self.apply_broadcast(event),
                else => break,
            }
        }

        // 先关闭入口，保证订阅者看到队列关闭后不会再有注册被接受
        self.control_rx.close();
        self.broadcast_rx.close();
        let dropped = self.clients.len();
        self.snapshot.connections = 0;
        self.snapshot.delivery_subscriptions = 0;
        self.snapshot.customer_subscriptions = 0;
        self.publish_stats();
        self.subscribers.clear();
        self.clients.clear();

        info!(dropped, "hub stopped");
    }

    fn apply_control(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::Register {
                client_id,
                target,
                identity,
                sender,
            } => {
                debug!(%client_id, %identity, mode = target.mode(), "subscriber registered");
                self.clients.insert(client_id, target);
                self.subscribers
                    .entry(target)
                    .or_default()
                    .insert(client_id, Subscriber { identity, sender });
                self.on_added(target);
                self.publish_stats();
            }
            ControlEvent::Unregister { client_id } => {
                if let Some(target) = self.clients.remove(&client_id) {
                    self.remove_subscriber(target, client_id);
                    self.on_removed(target);
                    self.publish_stats();
                    debug!(%client_id, mode = target.mode(), "subscriber unregistered");
                }
            }
        }
    }

    fn apply_broadcast(&mut self, event: BroadcastEvent) {
        let (target, message) = match event {
            BroadcastEvent::Delivery {
                delivery_id,
                position,
            } => (
                SubscriptionTarget::Delivery(delivery_id),
                OutboundMessage::DeliveryUpdate(DeliveryUpdate {
                    delivery_id,
                    location: position,
                }),
            ),
            BroadcastEvent::Customer(notification) => (
                SubscriptionTarget::Customer(notification.customer_id),
                OutboundMessage::CustomerNotification(notification),
            ),
        };
        self.fan_out(target, Arc::new(message));
    }

    fn fan_out(&mut self, target: SubscriptionTarget, message: Arc<OutboundMessage>) {
        let Some(subscribers) = self.subscribers.get(&target) else {
            return;
        };

        let mut removed = Vec::new();
        for (client_id, subscriber) in subscribers {
            match subscriber.sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(
                        %client_id,
                        identity = %subscriber.identity,
                        mode = target.mode(),
                        "subscriber queue full, evicting slow consumer"
                    );
                    removed.push((*client_id, true));
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(%client_id, "subscriber receiver dropped");
                    removed.push((*client_id, false));
                }
            }
        }

        if removed.is_empty() {
            return;
        }
        for (client_id, evicted) in removed {
            self.clients.remove(&client_id);
            self.remove_subscriber(target, client_id);
            self.on_removed(target);
            if evicted {
                self.snapshot.evicted_total += 1;
            }
        }
        self.publish_stats();
    }

    /// 移除订阅者并释放其发送端，接收端随之关闭
    fn remove_subscriber(&mut self, target: SubscriptionTarget, client_id: ClientId) {
        if let Some(group) = self.subscribers.get_mut(&target) {
            group.remove(&client_id);
            if group.is_empty() {
                self.subscribers.remove(&target);
            }
        }
    }

    fn on_added(&mut self, target: SubscriptionTarget) {
        self.snapshot.connections += 1;
        match target {
            SubscriptionTarget::Delivery(_) => self.snapshot.delivery_subscriptions += 1,
            SubscriptionTarget::Customer(_) => self.snapshot.customer_subscriptions += 1,
        }
    }

    fn on_removed(&mut self, target: SubscriptionTarget) {
        self.snapshot.connections = self.snapshot.connections.saturating_sub(1);
        match target {
            SubscriptionTarget::Delivery(_) => {
                self.snapshot.delivery_subscriptions =
                    self.snapshot.delivery_subscriptions.saturating_sub(1)
            }
            SubscriptionTarget::Customer(_) => {
                self.snapshot.customer_subscriptions =
                    self.snapshot.customer_subscriptions.saturating_sub(1)
            }
        }
    }

    fn publish_stats(&self) {
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = self.snapshot;
    }
}
