//! 统一配置中心
//!
//! 加载顺序：内置默认值 → 可选配置文件（`MESSENGER_CONFIG`，缺省 `config/messenger.yaml`）
//! → `MESSENGER_*` 环境变量（`__` 分隔嵌套字段）。
//! 另外兼容部署沿用的 `ADMIN_EMAILS`（逗号分隔）。

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "MESSENGER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/messenger.yaml";
pub const ENV_PREFIX: &str = "MESSENGER_";
pub const ADMIN_EMAILS_ENV: &str = "ADMIN_EMAILS";

/// 仅供本地开发使用的会话密钥
pub const DEVELOPMENT_SESSION_SECRET: &str = "dev-session-secret-change-me-0123456789";

const MIN_SECRET_LEN: usize = 32;

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub session: SessionConfig,
    pub access: AccessConfig,
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub bcrypt_cost: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

/// 会话令牌配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    pub secret: String,
    pub ttl_minutes: i64,
    /// 距过期不足该分钟数时刷新令牌
    pub refresh_window_minutes: i64,
    pub cookie_name: String,
    pub secure_cookie: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AccessConfig {
    #[serde(default)]
    pub admin_emails: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagingConfig {
    pub default_history_limit: u32,
    pub max_history_limit: u32,
    pub broadcast_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_redelivery_attempts: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: None,
                max_connections: 5,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
            },
            session: SessionConfig {
                secret: DEVELOPMENT_SESSION_SECRET.into(),
                ttl_minutes: 12 * 60,
                refresh_window_minutes: 15,
                cookie_name: "messenger_session".into(),
                secure_cookie: false,
            },
            access: AccessConfig::default(),
            messaging: MessagingConfig {
                default_history_limit: 200,
                max_history_limit: 500,
                broadcast_capacity: 256,
                heartbeat_interval_secs: 20,
                idle_timeout_secs: 60,
                max_redelivery_attempts: 3,
            },
            bcrypt_cost: None,
        }
    }
}

impl AppConfig {
    /// 按默认顺序加载并校验配置
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::MissingFile(path));
                }
                Some(path)
            }
            None => Some(PathBuf::from(DEFAULT_CONFIG_PATH)).filter(|path| path.exists()),
        };

        let figment = Self::figment(path.as_deref()).merge(Env::prefixed(ENV_PREFIX).split("__"));
        let mut config: AppConfig = figment.extract().map_err(Box::new)?;

        if let Ok(raw) = std::env::var(ADMIN_EMAILS_ENV) {
            config.access.admin_emails.extend(parse_admin_emails(&raw));
        }

        config.validate()?;
        Ok(config)
    }

    /// 默认值叠加配置文件，按扩展名选择格式
    pub fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        let Some(path) = path else {
            return figment;
        };
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => figment.merge(Json::file(path)),
            Some("toml") => figment.merge(Toml::file(path)),
            _ => figment.merge(Yaml::file(path)),
        }
    }

    /// 解析 YAML 文本（叠加在默认值之上）并校验
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::InvalidSessionConfig(format!(
                "session secret must be at least {MIN_SECRET_LEN} characters long"
            )));
        }
        if self.session.ttl_minutes <= 0 {
            return Err(ConfigError::InvalidSessionConfig(
                "ttl_minutes must be greater than 0".into(),
            ));
        }
        if self.session.refresh_window_minutes < 0
            || self.session.refresh_window_minutes >= self.session.ttl_minutes
        {
            return Err(ConfigError::InvalidSessionConfig(
                "refresh_window_minutes must be within [0, ttl_minutes)".into(),
            ));
        }
        if self.session.cookie_name.trim().is_empty() {
            return Err(ConfigError::InvalidSessionConfig(
                "cookie_name cannot be empty".into(),
            ));
        }

        let messaging = &self.messaging;
        if messaging.default_history_limit == 0 || messaging.max_history_limit == 0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "history limits must be greater than 0".into(),
            ));
        }
        if messaging.default_history_limit > messaging.max_history_limit {
            return Err(ConfigError::InvalidMessagingConfig(
                "default_history_limit cannot exceed max_history_limit".into(),
            ));
        }
        if messaging.broadcast_capacity == 0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "broadcast_capacity must be greater than 0".into(),
            ));
        }
        if messaging.heartbeat_interval_secs == 0
            || messaging.idle_timeout_secs <= messaging.heartbeat_interval_secs
        {
            return Err(ConfigError::InvalidMessagingConfig(
                "idle_timeout_secs must exceed a non-zero heartbeat_interval_secs".into(),
            ));
        }
        if messaging.max_redelivery_attempts == 0 {
            return Err(ConfigError::InvalidMessagingConfig(
                "max_redelivery_attempts must be greater than 0".into(),
            ));
        }

        if self.storage.backend == StorageBackend::Postgres {
            match self.database.url.as_deref() {
                Some(url) if !url.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::InvalidDatabaseConfig(
                        "database.url is required for the postgres backend".into(),
                    ))
                }
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "max_connections must be greater than 0".into(),
                ));
            }
        }

        if let Some(cost) = self.bcrypt_cost {
            if !(4..=31).contains(&cost) {
                return Err(ConfigError::InvalidServerConfig(
                    "bcrypt cost must be between 4 and 31".into(),
                ));
            }
        }

        Ok(())
    }

    pub fn uses_development_secret(&self) -> bool {
        self.session.secret == DEVELOPMENT_SESSION_SECRET
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// 可安全写入日志的摘要，不含密钥与数据库凭据
    pub fn sanitize(&self) -> String {
        format!(
            "server={} storage={:?} database={} admins={} history={}/{} broadcast_capacity={}",
            self.bind_address(),
            self.storage.backend,
            if self.database.url.is_some() { "[REDACTED]" } else { "none" },
            self.access.admin_emails.len(),
            self.messaging.default_history_limit,
            self.messaging.max_history_limit,
            self.messaging.broadcast_capacity,
        )
    }
}

/// 解析逗号分隔的管理员邮箱，忽略空项
pub fn parse_admin_emails(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|email| !email.is_empty())
        .map(str::to_owned)
        .collect()
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid session configuration: {0}")]
    InvalidSessionConfig(String),
    #[error("Invalid messaging configuration: {0}")]
    InvalidMessagingConfig(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
}
