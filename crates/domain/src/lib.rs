//! 办公通讯系统核心领域模型
//!
//! 包含员工预登记、频道、成员关系、消息等核心实体，
//! 以及外部身份服务与数据存储的接口定义。

pub mod entities;
pub mod errors;
pub mod identity;
pub mod repositories;
pub mod value_objects;

// 重新导出常用类型
pub use entities::*;
pub use errors::*;
pub use identity::*;
pub use repositories::*;
pub use value_objects::*;
