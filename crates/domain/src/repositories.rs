//! 外部数据存储接口
//!
//! 数据存储本身在核心范围之外，这里只定义行级 CRUD 契约。

use async_trait::async_trait;

use crate::entities::{
    Channel, EmployeeRecord, EmployeeUpdate, Membership, Message, MessagePosition, SignupProfile,
};
use crate::errors::RepositoryError;
use crate::value_objects::{ChannelId, Email, EmployeeId, MessageId, PrincipalId, Timestamp};

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    /// 规范化邮箱重复时返回 `Conflict`
    async fn create(&self, record: EmployeeRecord) -> RepositoryResult<EmployeeRecord>;
    /// 只写入更新命令里出现的字段，其余列保持存储中的当前值
    async fn apply_update(
        &self,
        id: EmployeeId,
        update: EmployeeUpdate,
        now: Timestamp,
    ) -> RepositoryResult<EmployeeRecord>;
    /// 条件关联：仅当记录尚未关联身份时写入，pending 推进为 active，其他状态不变。
    /// 已关联返回 `Conflict`，记录不存在返回 `NotFound`
    async fn link_principal(
        &self,
        id: EmployeeId,
        principal_id: PrincipalId,
        profile: SignupProfile,
        now: Timestamp,
    ) -> RepositoryResult<EmployeeRecord>;
    async fn delete(&self, id: EmployeeId) -> RepositoryResult<()>;
    async fn find_by_id(&self, id: EmployeeId) -> RepositoryResult<Option<EmployeeRecord>>;
    async fn find_by_email(&self, email: &Email) -> RepositoryResult<Option<EmployeeRecord>>;
    /// 按创建时间倒序
    async fn list(&self) -> RepositoryResult<Vec<EmployeeRecord>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// 原子地创建频道并写入创建者的 owner 成员关系
    async fn create_with_owner(
        &self,
        channel: Channel,
        owner: Membership,
    ) -> RepositoryResult<Channel>;
    async fn find_by_id(&self, id: ChannelId) -> RepositoryResult<Option<Channel>>;
    /// 按创建时间正序
    async fn list_by_ids(&self, ids: &[ChannelId]) -> RepositoryResult<Vec<Channel>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    async fn upsert(&self, membership: Membership) -> RepositoryResult<Membership>;
    async fn find(
        &self,
        channel_id: ChannelId,
        principal_id: &PrincipalId,
    ) -> RepositoryResult<Option<Membership>>;
    async fn list_for_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> RepositoryResult<Vec<Membership>>;
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// 持久化消息；位置不是频道当前末尾的下一个时返回 `Conflict`
    async fn insert(&self, message: Message) -> RepositoryResult<Message>;

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 频道最后一条消息的位置
    async fn last_position(&self, channel_id: ChannelId)
        -> RepositoryResult<Option<MessagePosition>>;

    /// 最近的 `limit` 条消息，按时间正序返回
    async fn list_recent(&self, channel_id: ChannelId, limit: u32)
        -> RepositoryResult<Vec<Message>>;

    /// 序列号大于 `after_sequence` 的消息，按时间正序，最多 `limit` 条
    async fn list_after(
        &self,
        channel_id: ChannelId,
        after_sequence: u64,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>>;
}
