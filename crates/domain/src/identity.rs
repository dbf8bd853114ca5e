//! 外部身份服务接口
//!
//! 密码校验与会话令牌签发由身份服务负责，核心层只通过这里的 trait 使用它。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::Principal;
use crate::value_objects::{Email, PrincipalId, Timestamp};

/// 请求携带的凭据材料（Cookie 或 Bearer 头中的会话令牌）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionCredentials {
    pub token: Option<String>,
}

impl SessionCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.token.as_deref().map_or(true, str::is_empty)
    }
}

/// 会话令牌
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    pub value: String,
    pub expires_at: Timestamp,
}

/// 会话验证结果。
///
/// 没有会话是正常结果（`principal == None`），不是错误；
/// `refreshed` 不为空时调用方必须把新令牌回写给客户端，即使最终拒绝了请求。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionVerification {
    pub principal: Option<Principal>,
    pub refreshed: Option<SessionToken>,
}

impl SessionVerification {
    pub fn no_session() -> Self {
        Self::default()
    }
}

/// 登录成功结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignedIn {
    pub principal: Principal,
    pub token: SessionToken,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("账号已存在")]
    AccountExists,

    #[error("邮箱或密码错误")]
    InvalidCredentials,

    #[error("身份服务不可用: {0}")]
    Upstream(String),
}

impl IdentityError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }
}

#[cfg_attr(feature = "testing", mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// 验证会话；缺失或过期的凭据返回 `principal: None` 而不是错误
    async fn verify_session(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<SessionVerification, IdentityError>;

    /// 创建外部账号（邮箱 + 密码），返回新的身份标识
    async fn create_account(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<PrincipalId, IdentityError>;

    async fn sign_in(&self, email: &Email, password: &str) -> Result<SignedIn, IdentityError>;

    async fn sign_out(&self, credentials: &SessionCredentials) -> Result<(), IdentityError>;
}
