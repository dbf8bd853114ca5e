//! 消息实体定义
//!
//! 消息创建后不可变。同一频道内按 `(created_at, id)` 全序排列，
//! `sequence` 为频道内递增序列号，二者给出相同的顺序。

use chrono::{Duration, SubsecRound};
use serde::{Deserialize, Serialize};

use crate::value_objects::{ChannelId, MessageBody, MessageId, PrincipalId, Timestamp};

/// 消息在频道日志中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePosition {
    pub sequence: u64,
    pub created_at: Timestamp,
}

impl MessagePosition {
    /// 计算下一条消息的位置。
    ///
    /// 时间戳截断到微秒（与存储精度一致）；时钟未前进（或回拨）时在上一条基础上加 1 微秒，
    /// 保证频道内严格递增。
    pub fn next(previous: Option<&MessagePosition>, now: Timestamp) -> MessagePosition {
        let now = now.trunc_subsecs(6);
        match previous {
            None => MessagePosition {
                sequence: 1,
                created_at: now,
            },
            Some(previous) => {
                let floor = previous.created_at + Duration::microseconds(1);
                MessagePosition {
                    sequence: previous.sequence + 1,
                    created_at: if now > previous.created_at { now } else { floor },
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: PrincipalId,
    pub body: String,
    pub created_at: Timestamp,
    pub sequence: u64,
}

impl Message {
    pub fn new(
        id: MessageId,
        channel_id: ChannelId,
        author_id: PrincipalId,
        body: MessageBody,
        position: MessagePosition,
    ) -> Self {
        Self {
            id,
            channel_id,
            author_id,
            body: body.into_inner(),
            created_at: position.created_at,
            sequence: position.sequence,
        }
    }

    pub fn position(&self) -> MessagePosition {
        MessagePosition {
            sequence: self.sequence,
            created_at: self.created_at,
        }
    }

    /// 频道内排序键，`id` 用于时间戳相同时的决胜
    pub fn ordering_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id)
    }
}
