//! 领域实体定义
//!
//! 包含系统的核心实体：身份、员工预登记记录、频道、成员关系、消息。

pub mod channel;
pub mod employee;
pub mod membership;
pub mod message;
pub mod principal;

// 重新导出核心实体
pub use channel::Channel;
pub use employee::{EmployeeRecord, EmployeeStatus, EmployeeUpdate, SignupProfile};
pub use membership::{Membership, MembershipRole};
pub use message::{Message, MessagePosition};
pub use principal::Principal;
