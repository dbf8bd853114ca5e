//! 频道消息存储
//!
//! 追加在频道锁内完成“读取末尾位置 → 分配位置 → 持久化 → 发布”，
//! 持久化成功才确认，发布顺序即追加顺序。

use std::sync::Arc;

use domain::{
    ChannelId, ChannelRepository, Message, MessageBody, MessageId, MessagePosition,
    MessageRepository, Principal,
};
use uuid::Uuid;

use crate::{
    broadcaster::{MessageBroadcast, MessageBroadcaster},
    clock::Clock,
    error::ApplicationError,
    membership::MembershipDirectory,
    retry::retry_read_once,
    sequencer::ChannelSequencer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryLimits {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            default_limit: 200,
            max_limit: 500,
        }
    }
}

impl HistoryLimits {
    /// 未指定用默认值，超出上限截断，最少 1 条
    pub fn resolve(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

pub struct MessageServiceDependencies {
    pub channel_repository: Arc<dyn ChannelRepository>,
    pub message_repository: Arc<dyn MessageRepository>,
    pub membership_directory: MembershipDirectory,
    pub broadcaster: Arc<dyn MessageBroadcaster>,
    pub sequencer: Arc<ChannelSequencer>,
    pub clock: Arc<dyn Clock>,
    pub limits: HistoryLimits,
}

pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.deps.limits
    }

    pub async fn append(
        &self,
        principal: &Principal,
        channel_id: ChannelId,
        body: &str,
    ) -> Result<Message, ApplicationError> {
        self.deps
            .membership_directory
            .require_member(&principal.id, channel_id)
            .await?;
        let body = MessageBody::parse(body)?;

        let channel = retry_read_once("find_channel", || {
            self.deps.channel_repository.find_by_id(channel_id)
        })
        .await?;
        if channel.is_none() {
            return Err(ApplicationError::NotFound("CHANNEL"));
        }

        let _guard = self.deps.sequencer.lock(channel_id).await;

        let last = retry_read_once("last_message_position", || {
            self.deps.message_repository.last_position(channel_id)
        })
        .await?;
        let position = MessagePosition::next(last.as_ref(), self.deps.clock.now());
        let message = Message::new(
            MessageId::from(Uuid::new_v4()),
            channel_id,
            principal.id.clone(),
            body,
            position,
        );

        let stored = self.deps.message_repository.insert(message).await?;

        // 已持久化的消息不因发布失败而回滚，订阅者可通过续传补齐
        if let Err(err) = self
            .deps
            .broadcaster
            .broadcast(MessageBroadcast::new(stored.clone()))
            .await
        {
            tracing::error!(
                channel_id = %channel_id,
                message_id = %stored.id,
                error = %err,
                "failed to publish stored message"
            );
        }

        tracing::debug!(
            channel_id = %channel_id,
            message_id = %stored.id,
            sequence = stored.sequence,
            "message appended"
        );
        Ok(stored)
    }

    /// 最近的 `limit` 条消息，按时间正序
    pub async fn history(
        &self,
        principal: &Principal,
        channel_id: ChannelId,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.deps
            .membership_directory
            .require_member(&principal.id, channel_id)
            .await?;
        let limit = self.deps.limits.resolve(limit);

        let messages = retry_read_once("list_recent_messages", || {
            self.deps.message_repository.list_recent(channel_id, limit)
        })
        .await?;
        Ok(messages)
    }

    /// 序列号 `after_sequence` 之后的消息，用于断线续传
    pub async fn history_after(
        &self,
        principal: &Principal,
        channel_id: ChannelId,
        after_sequence: u64,
        limit: Option<u32>,
    ) -> Result<Vec<Message>, ApplicationError> {
        self.deps
            .membership_directory
            .require_member(&principal.id, channel_id)
            .await?;
        let limit = self.deps.limits.resolve(limit);

        let messages = retry_read_once("list_messages_after", || {
            self.deps
                .message_repository
                .list_after(channel_id, after_sequence, limit)
        })
        .await?;
        Ok(messages)
    }
}
