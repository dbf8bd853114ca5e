use std::sync::Arc;

use async_trait::async_trait;
use domain::{ChannelId, Message};
use thiserror::Error;

/// 消息存储追加成功后发布的事件
#[derive(Debug, Clone)]
pub struct MessageBroadcast {
    pub channel_id: ChannelId,
    pub message: Arc<Message>,
}

impl MessageBroadcast {
    pub fn new(message: Message) -> Self {
        Self {
            channel_id: message.channel_id,
            message: Arc::new(message),
        }
    }
}

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broadcast failed: {0}")]
    Failed(String),
}

impl BroadcastError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[async_trait]
pub trait MessageBroadcaster: Send + Sync {
    async fn broadcast(&self, payload: MessageBroadcast) -> Result<(), BroadcastError>;
}
