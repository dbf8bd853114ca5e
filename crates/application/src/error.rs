use domain::{DomainError, IdentityError, PrincipalId, RepositoryError};
use thiserror::Error;

use crate::policy::DenialReason;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("identity provider error: {0}")]
    Identity(#[from] IdentityError),
    /// 已认证但无权限，附带粗粒度原因码
    #[error("forbidden: {0}")]
    Forbidden(&'static str),
    #[error("registration denied: {}", .0.code())]
    Registration(DenialReason),
    /// 外部账号已创建，但与员工记录的关联失败，需要人工对账
    #[error("account {principal_id} created but linking failed: {message}")]
    PartialLinkFailure {
        principal_id: PrincipalId,
        message: String,
    },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(&'static str),
}

impl ApplicationError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApplicationError::Validation(message.into())
    }

    /// 上游（身份服务或数据存储）故障
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            ApplicationError::Repository(RepositoryError::Storage { .. })
                | ApplicationError::Identity(IdentityError::Upstream(_))
        )
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}
