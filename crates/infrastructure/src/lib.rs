//! 基础设施层实现。
//!
//! 提供 PostgreSQL 与内存两套仓储、本地身份服务（bcrypt + JWT 会话），
//! 实现领域层定义的接口。

pub mod builder;
pub mod identity;
pub mod memory;
pub mod migrations;
pub mod password;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureError, Storage};
pub use identity::{
    Account, AccountStore, InMemoryAccountStore, LocalIdentityProvider, PgAccountStore,
    SessionSettings,
};
pub use memory::InMemoryStore;
pub use migrations::MIGRATOR;
pub use password::{BcryptPasswordHasher, PasswordHashError};
pub use repository::{
    create_pg_pool, PgChannelRepository, PgEmployeeRepository, PgMembershipRepository,
    PgMessageRepository, PgStorage,
};
