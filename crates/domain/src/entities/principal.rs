//! 已认证身份

use serde::{Deserialize, Serialize};

use crate::value_objects::{Email, PrincipalId, Timestamp};

/// 身份服务验证通过后得到的当前身份，仅在单次请求内有效，核心层不持久化。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    pub email: Email,
    pub session_valid_until: Timestamp,
}

impl Principal {
    pub fn new(id: PrincipalId, email: Email, session_valid_until: Timestamp) -> Self {
        Self {
            id,
            email,
            session_valid_until,
        }
    }
}
