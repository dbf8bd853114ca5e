//! 员工预登记记录
//!
//! 管理员在员工注册前创建记录；只有存在未停用记录的邮箱才能自助注册。

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::value_objects::{
    optional_text, required_text, Email, EmployeeId, PrincipalId, Timestamp, MAX_FULL_NAME_CHARS,
};

/// 员工记录状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmployeeStatus {
    /// 已预登记，尚未注册
    Pending,
    /// 已注册（或管理员直接激活）
    Active,
    /// 已停用
    Disabled,
}

impl EmployeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmployeeStatus::Pending => "pending",
            EmployeeStatus::Active => "active",
            EmployeeStatus::Disabled => "disabled",
        }
    }
}

impl FromStr for EmployeeStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(EmployeeStatus::Pending),
            "active" => Ok(EmployeeStatus::Active),
            "disabled" => Ok(EmployeeStatus::Disabled),
            _ => Err(DomainError::invalid_argument(
                "status",
                "expected pending, active or disabled",
            )),
        }
    }
}

/// 员工预登记记录实体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmployeeRecord {
    pub id: EmployeeId,
    pub email: Email,
    pub full_name: String,
    pub phone: Option<String>,
    pub status: EmployeeStatus,
    pub linked_principal_id: Option<PrincipalId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// 管理员对员工记录的显式更新命令，未填写的字段保持不变
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeeUpdate {
    pub status: Option<EmployeeStatus>,
    pub full_name: Option<String>,
    /// `Some("")` 表示清空电话
    pub phone: Option<String>,
}

impl EmployeeUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.full_name.is_none() && self.phone.is_none()
    }

    /// 逐字段校验并去除首尾空白；电话为空串时保留为 `Some("")`，表示清空
    pub fn normalize(self) -> Result<Self, DomainError> {
        let full_name = match self.full_name {
            Some(full_name) => Some(required_text("full_name", &full_name, MAX_FULL_NAME_CHARS)?),
            None => None,
        };
        Ok(Self {
            status: self.status,
            full_name,
            phone: self.phone.map(|phone| phone.trim().to_owned()),
        })
    }
}

/// 注册时提交的可选个人资料
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignupProfile {
    pub full_name: Option<String>,
    pub phone: Option<String>,
}

impl SignupProfile {
    /// 在创建外部账号之前校验资料，避免账号已创建后才发现资料非法
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(full_name) = self.full_name.as_deref() {
            if !full_name.trim().is_empty() {
                required_text("full_name", full_name, MAX_FULL_NAME_CHARS)?;
            }
        }
        Ok(())
    }

    /// 空白字段视为未填写
    pub fn normalize(&self) -> Result<Self, DomainError> {
        let full_name = match self.full_name.as_deref() {
            Some(full_name) if !full_name.trim().is_empty() => {
                Some(required_text("full_name", full_name, MAX_FULL_NAME_CHARS)?)
            }
            _ => None,
        };
        Ok(Self {
            full_name,
            phone: optional_text(self.phone.as_deref()),
        })
    }
}

impl EmployeeRecord {
    pub fn pre_register(
        id: EmployeeId,
        email: Email,
        full_name: &str,
        phone: Option<&str>,
        status: EmployeeStatus,
        now: Timestamp,
    ) -> Result<Self, DomainError> {
        let full_name = required_text("full_name", full_name, MAX_FULL_NAME_CHARS)?;
        Ok(Self {
            id,
            email,
            full_name,
            phone: optional_text(phone),
            status,
            linked_principal_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// 已关联身份的记录不能再次注册
    pub fn is_linked(&self) -> bool {
        self.linked_principal_id.is_some()
    }

    /// 注册成功后关联身份。
    ///
    /// pending 推进为 active；disabled 保持停用，注册成功不会撤销管理员的停用操作。
    pub fn link_principal(
        &mut self,
        principal_id: PrincipalId,
        profile: &SignupProfile,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        let profile = profile.normalize()?;
        if let Some(full_name) = profile.full_name {
            self.full_name = full_name;
        }
        if let Some(phone) = profile.phone {
            self.phone = Some(phone);
        }
        self.linked_principal_id = Some(principal_id);
        if self.status == EmployeeStatus::Pending {
            self.status = EmployeeStatus::Active;
        }
        self.updated_at = now;
        Ok(())
    }

    /// 逐字段校验后应用管理员更新
    pub fn apply_update(&mut self, update: EmployeeUpdate, now: Timestamp) -> Result<(), DomainError> {
        let update = update.normalize()?;
        if let Some(full_name) = update.full_name {
            self.full_name = full_name;
        }
        if let Some(phone) = update.phone {
            self.phone = optional_text(Some(&phone));
        }
        if let Some(status) = update.status {
            self.status = status;
        }
        self.updated_at = now;
        Ok(())
    }
}
