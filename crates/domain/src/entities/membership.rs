//! 频道成员关系
//!
//! 决定身份对频道的读写资格，(channel_id, principal_id) 唯一。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{ChannelId, PrincipalId, Timestamp};

/// 成员角色枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    /// 频道创建者
    Owner,
    /// 普通成员
    Member,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Member => "member",
        }
    }
}

impl FromStr for MembershipRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "owner" => Ok(MembershipRole::Owner),
            "member" => Ok(MembershipRole::Member),
            _ => Err(DomainError::invalid_argument("role", "expected owner or member")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub channel_id: ChannelId,
    pub principal_id: PrincipalId,
    pub role: MembershipRole,
    pub joined_at: Timestamp,
}

impl Membership {
    pub fn new(
        channel_id: ChannelId,
        principal_id: PrincipalId,
        role: MembershipRole,
        joined_at: Timestamp,
    ) -> Self {
        Self {
            channel_id,
            principal_id,
            role,
            joined_at,
        }
    }

    /// 频道创建者自动成为 owner
    pub fn owner(channel_id: ChannelId, principal_id: PrincipalId, joined_at: Timestamp) -> Self {
        Self::new(channel_id, principal_id, MembershipRole::Owner, joined_at)
    }
}
