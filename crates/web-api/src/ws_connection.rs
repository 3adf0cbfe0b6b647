use application::{ClientSubscription, SubscriptionTarget};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::state::AppState;

const MIN_PING_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

/// WebSocket 连接
///
/// 一个连接对应一个 Hub 订阅：
/// - 写任务把订阅队列里的消息序列化为 JSON 文本帧，并定时发送 Ping
/// - 读任务只用于感知客户端是否还在
/// - 任一任务结束即视为断开，随后向 Hub 注销
pub struct WebSocketConnection {
    state: AppState,
    target: SubscriptionTarget,
    identity: String,
}

impl WebSocketConnection {
    pub fn new(state: AppState, target: SubscriptionTarget, identity: String) -> Self {
        Self {
            state,
            target,
            identity,
        }
    }

    pub async fn run(self, mut socket: WebSocket) {
        let subscription = match self
            .state
            .hub
            .register(self.target, self.identity.clone())
            .await
        {
            Ok(subscription) => subscription,
            Err(err) => {
                tracing::warn!(error = %err, identity = %self.identity, "Hub 注册失败，关闭连接");
                let _ = socket.send(WsMessage::Close(None)).await;
                return;
            }
        };
        let client_id = subscription.id;

        tracing::info!(
            %client_id,
            identity = %self.identity,
            mode = self.target.mode(),
            "WebSocket 连接已建立"
        );

        let (sender, incoming) = socket.split();
        let mut send_task = tokio::spawn(Self::write_loop(
            sender,
            subscription,
            self.state.ws_ping_interval,
        ));
        let mut recv_task = tokio::spawn(Self::read_loop(incoming));

        // 等待任意一个任务完成（连接断开）
        tokio::select! {
            _ = &mut send_task => {
                recv_task.abort();
            }
            _ = &mut recv_task => {
                send_task.abort();
            }
        }

        self.state.hub.unregister(client_id).await;
        tracing::info!(%client_id, identity = %self.identity, "WebSocket 连接已断开");
    }

    async fn write_loop(
        mut sender: SplitSink<WebSocket, WsMessage>,
        mut subscription: ClientSubscription,
        ping_interval: std::time::Duration,
    ) {
        let period = ping_interval.max(MIN_PING_INTERVAL);
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = subscription.recv() => {
                    let Some(message) = message else {
                        // 队列被 Hub 关闭：被驱逐或 Hub 已停止
                        tracing::info!(client_id = %subscription.id, "订阅已被 Hub 移除");
                        let _ = sender.send(WsMessage::Close(None)).await;
                        break;
                    };
                    let payload = match message.to_json() {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to serialize websocket payload");
                            continue;
                        }
                    };
                    if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                        tracing::debug!(client_id = %subscription.id, "Failed to send text message");
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sender.send(WsMessage::Ping(Default::default())).await.is_err() {
                        tracing::debug!(client_id = %subscription.id, "Failed to send ping");
                        break;
                    }
                }
            }
        }
    }

    async fn read_loop(mut incoming: SplitStream<WebSocket>) {
        while let Some(message) = incoming.next().await {
            match message {
                Ok(WsMessage::Close(_)) => {
                    tracing::debug!("WebSocket收到关闭消息");
                    break;
                }
                Ok(WsMessage::Pong(_)) => {
                    tracing::trace!("收到pong消息");
                }
                Ok(_) => {
                    // 客户端消息不参与业务，只说明连接仍然存活
                }
                Err(err) => {
                    tracing::debug!(error = %err, "WebSocket读取失败");
                    break;
                }
            }
        }
    }
}
