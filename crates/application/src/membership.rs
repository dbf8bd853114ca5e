//! 成员目录
//!
//! 查询身份所属频道及其角色，用于授权历史读取、订阅与发布。

use std::collections::HashSet;
use std::sync::Arc;

use domain::{ChannelId, Membership, MembershipRepository, MembershipRole, PrincipalId};

use crate::{error::ApplicationError, retry::retry_read_once};

/// 非成员访问频道时返回的原因码
pub const NOT_CHANNEL_MEMBER: &str = "NOT_CHANNEL_MEMBER";

#[derive(Clone)]
pub struct MembershipDirectory {
    repository: Arc<dyn MembershipRepository>,
}

impl MembershipDirectory {
    pub fn new(repository: Arc<dyn MembershipRepository>) -> Self {
        Self { repository }
    }

    pub async fn channels_for(
        &self,
        principal_id: &PrincipalId,
    ) -> Result<HashSet<ChannelId>, ApplicationError> {
        let memberships = retry_read_once("list_memberships", || {
            self.repository.list_for_principal(principal_id)
        })
        .await?;

        Ok(memberships
            .into_iter()
            .map(|membership| membership.channel_id)
            .collect())
    }

    /// `None` 表示不是成员
    pub async fn role_of(
        &self,
        principal_id: &PrincipalId,
        channel_id: ChannelId,
    ) -> Result<Option<MembershipRole>, ApplicationError> {
        let membership = retry_read_once("find_membership", || {
            self.repository.find(channel_id, principal_id)
        })
        .await?;
        Ok(membership.map(|membership| membership.role))
    }

    /// 写入成员关系；已是成员时保持原角色不变
    pub async fn grant(&self, membership: Membership) -> Result<Membership, ApplicationError> {
        let existing = retry_read_once("find_membership", || {
            self.repository
                .find(membership.channel_id, &membership.principal_id)
        })
        .await?;
        if let Some(existing) = existing {
            return Ok(existing);
        }
        Ok(self.repository.upsert(membership).await?)
    }

    /// 读写频道前的成员校验，非成员一律 `Forbidden`
    pub async fn require_member(
        &self,
        principal_id: &PrincipalId,
        channel_id: ChannelId,
    ) -> Result<MembershipRole, ApplicationError> {
        match self.role_of(principal_id, channel_id).await? {
            Some(role) => Ok(role),
            None => {
                tracing::info!(
                    principal_id = %principal_id,
                    channel_id = %channel_id,
                    "channel access denied for non-member"
                );
                Err(ApplicationError::Forbidden(NOT_CHANNEL_MEMBER))
            }
        }
    }
}
