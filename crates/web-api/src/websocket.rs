//! 频道实时订阅
//!
//! 升级前先完成订阅（成员校验失败直接返回 403），连接建立后循环转发消息，
//! 定期发送 ping，超过空闲时间没有收到任何帧就关闭连接。

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use uuid::Uuid;

use application::Subscription;
use domain::{ChannelId, Message, MessageId};

use crate::{
    error::ApiError,
    session::CurrentPrincipal,
    state::{AppState, RealtimeSettings},
};

#[derive(Debug, Deserialize)]
pub struct SubscribeQuery {
    /// 客户端最后收到的消息 id，从它之后续传
    after: Option<Uuid>,
}

/// 推送给客户端的帧
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerFrame<'a> {
    Message { message: &'a Message },
}

pub async fn subscribe_channel(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<SubscribeQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let subscription = state
        .fanout
        .subscribe(
            ChannelId::from(channel_id),
            &principal,
            query.after.map(MessageId::from),
        )
        .await?;

    tracing::info!(
        channel_id = %channel_id,
        principal_id = %principal.id,
        subscription_id = %subscription.id(),
        "websocket subscription opened"
    );

    let settings = state.realtime;
    Ok(ws.on_upgrade(move |socket| run_connection(socket, subscription, settings)))
}

async fn run_connection(socket: WebSocket, mut subscription: Subscription, settings: RealtimeSettings) {
    let (mut sender, mut incoming) = socket.split();

    let mut heartbeat = interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // interval 的第一次 tick 立即完成
    heartbeat.tick().await;

    let idle = sleep(settings.idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            delivered = subscription.next() => {
                let Some(message) = delivered else {
                    tracing::info!(subscription_id = %subscription.id(), "subscription closed by server");
                    break;
                };
                let payload = match serde_json::to_string(&ServerFrame::Message { message: &message }) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to serialize websocket payload");
                        continue;
                    }
                };
                if sender.send(WsMessage::Text(payload.into())).await.is_err() {
                    break;
                }
            }
            frame = incoming.next() => {
                match frame {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(error = %err, "websocket receive error");
                        break;
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                        if sender.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    // 客户端不通过连接发消息，任何帧都只算活跃信号
                    Some(Ok(_)) => {
                        idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(WsMessage::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            _ = &mut idle => {
                tracing::info!(subscription_id = %subscription.id(), "websocket idle timeout");
                break;
            }
        }
    }

    subscription.close();
    let _ = sender.send(WsMessage::Close(None)).await;
    tracing::info!(
        subscription_id = %subscription.id(),
        channel_id = %subscription.channel_id(),
        "websocket subscription closed"
    );
}
