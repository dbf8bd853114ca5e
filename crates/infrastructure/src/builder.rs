use std::sync::Arc;

use config::{AppConfig, StorageBackend};
use domain::{
    ChannelRepository, EmployeeRepository, IdentityProvider, MembershipRepository,
    MessageRepository,
};
use sqlx::PgPool;
use thiserror::Error;

use crate::{
    identity::{
        AccountStore, InMemoryAccountStore, LocalIdentityProvider, PgAccountStore,
        SessionSettings,
    },
    memory::InMemoryStore,
    migrations::MIGRATOR,
    password::BcryptPasswordHasher,
    repository::{create_pg_pool, PgStorage},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("postgres backend selected but database.url is not set")]
    MissingDatabaseUrl,
}

/// 按存储后端装配好的仓储集合
#[derive(Clone)]
pub struct Storage {
    pub employees: Arc<dyn EmployeeRepository>,
    pub channels: Arc<dyn ChannelRepository>,
    pub memberships: Arc<dyn MembershipRepository>,
    pub messages: Arc<dyn MessageRepository>,
    pub accounts: Arc<dyn AccountStore>,
    pub pool: Option<PgPool>,
}

impl Storage {
    pub fn in_memory() -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self {
            employees: store.clone(),
            channels: store.clone(),
            memberships: store.clone(),
            messages: store,
            accounts: Arc::new(InMemoryAccountStore::new()),
            pool: None,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        let storage = PgStorage::new(pool.clone());
        Self {
            employees: storage.employee_repository,
            channels: storage.channel_repository,
            memberships: storage.membership_repository,
            messages: storage.message_repository,
            accounts: Arc::new(PgAccountStore::new(pool.clone())),
            pool: Some(pool),
        }
    }
}

#[derive(Clone)]
pub struct Infrastructure {
    pub storage: Storage,
    pub identity_provider: Arc<dyn IdentityProvider>,
}

impl Infrastructure {
    pub async fn from_config(config: &AppConfig) -> Result<Self, InfrastructureError> {
        let storage = match config.storage.backend {
            StorageBackend::Memory => {
                tracing::info!("using in-memory storage");
                Storage::in_memory()
            }
            StorageBackend::Postgres => {
                let url = config
                    .database
                    .url
                    .as_deref()
                    .ok_or(InfrastructureError::MissingDatabaseUrl)?;
                let pool = create_pg_pool(url, config.database.max_connections).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!("postgres storage ready, migrations applied");
                Storage::postgres(pool)
            }
        };

        Ok(Self::with_storage(storage, config))
    }

    /// 用现成的存储装配（测试用内存存储时走这里）
    pub fn with_storage(storage: Storage, config: &AppConfig) -> Self {
        let identity_provider = Arc::new(LocalIdentityProvider::new(
            storage.accounts.clone(),
            BcryptPasswordHasher::new(config.bcrypt_cost),
            SessionSettings::from_config(&config.session),
        ));

        Self {
            storage,
            identity_provider,
        }
    }
}
