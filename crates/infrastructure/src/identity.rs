//! 本地身份服务
//!
//! 账号（邮箱 + bcrypt 密码哈希）保存在账号存储中，会话是 HS256 JWT。
//! 临近过期的令牌在验证时重新签发；登出把会话 id 加入进程内撤销表。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use domain::{
    Email, IdentityError, IdentityProvider, Principal, PrincipalId, RepositoryError,
    RepositoryResult, SessionCredentials, SessionToken, SessionVerification, SignedIn,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::password::BcryptPasswordHasher;
use crate::repository::map_sqlx_err;

/// 本地账号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub principal_id: PrincipalId,
    pub email: Email,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// 邮箱重复时返回 `Conflict`
    async fn insert(&self, account: Account) -> RepositoryResult<Account>;
    async fn find_by_email(&self, email: &Email) -> RepositoryResult<Option<Account>>;
}

#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<Email, Account>>,
}

impl InMemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn insert(&self, account: Account) -> RepositoryResult<Account> {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&account.email) {
            return Err(RepositoryError::Conflict);
        }
        accounts.insert(account.email.clone(), account.clone());
        Ok(account)
    }

    async fn find_by_email(&self, email: &Email) -> RepositoryResult<Option<Account>> {
        Ok(self.accounts.read().await.get(email).cloned())
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    principal_id: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = RepositoryError;

    fn try_from(value: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            principal_id: PrincipalId::new(value.principal_id),
            email: Email::parse(&value.email)
                .map_err(|err| RepositoryError::storage(err.to_string()))?,
            password_hash: value.password_hash,
            created_at: value.created_at,
        })
    }
}

#[derive(Clone)]
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn insert(&self, account: Account) -> RepositoryResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO identity_accounts (principal_id, email, password_hash, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING principal_id, email, password_hash, created_at
            "#,
        )
        .bind(account.principal_id.as_str())
        .bind(account.email.as_str())
        .bind(&account.password_hash)
        .bind(account.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Account::try_from(row)
    }

    async fn find_by_email(&self, email: &Email) -> RepositoryResult<Option<Account>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT principal_id, email, password_hash, created_at
            FROM identity_accounts
            WHERE email = $1
            "#,
        )
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(Account::try_from).transpose()
    }
}

/// 会话令牌参数
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub secret: String,
    pub ttl: Duration,
    pub refresh_window: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &config::SessionConfig) -> Self {
        Self {
            secret: config.secret.clone(),
            ttl: Duration::minutes(config.ttl_minutes),
            refresh_window: Duration::minutes(config.refresh_window_minutes),
        }
    }
}

/// JWT Claims 结构
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    sub: String,
    email: String,
    /// 会话 id，刷新后保持不变，登出按它撤销
    sid: String,
    iat: i64,
    exp: i64,
}

pub struct LocalIdentityProvider {
    accounts: Arc<dyn AccountStore>,
    hasher: BcryptPasswordHasher,
    settings: SessionSettings,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    /// sid → 撤销记录保留到的时间（秒）
    revoked: RwLock<HashMap<String, i64>>,
}

impl LocalIdentityProvider {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        hasher: BcryptPasswordHasher,
        settings: SessionSettings,
    ) -> Self {
        let encoding_key = EncodingKey::from_secret(settings.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(settings.secret.as_bytes());
        Self {
            accounts,
            hasher,
            settings,
            encoding_key,
            decoding_key,
            revoked: RwLock::new(HashMap::new()),
        }
    }

    fn validation(validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        validation.set_required_spec_claims(&["exp", "sub"]);
        validation
    }

    fn mint(
        &self,
        principal_id: &PrincipalId,
        email: &Email,
        sid: String,
    ) -> Result<(SessionToken, Claims), IdentityError> {
        let now = Utc::now();
        let expires_at = now + self.settings.ttl;
        let claims = Claims {
            sub: principal_id.as_str().to_owned(),
            email: email.as_str().to_owned(),
            sid,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let value = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| IdentityError::upstream(format!("token signing failed: {err}")))?;

        Ok((
            SessionToken {
                value,
                expires_at: timestamp(claims.exp),
            },
            claims,
        ))
    }

    async fn is_revoked(&self, sid: &str) -> bool {
        self.revoked.read().await.contains_key(sid)
    }

    pub async fn revoked_sessions(&self) -> usize {
        self.revoked.read().await.len()
    }
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn verify_session(
        &self,
        credentials: &SessionCredentials,
    ) -> Result<SessionVerification, IdentityError> {
        let Some(token) = credentials.token.as_deref().filter(|token| !token.is_empty()) else {
            return Ok(SessionVerification::no_session());
        };

        let claims = match decode::<Claims>(token, &self.decoding_key, &Self::validation(true)) {
            Ok(data) => data.claims,
            Err(err) => {
                tracing::debug!(error = %err, "session token rejected");
                return Ok(SessionVerification::no_session());
            }
        };

        if self.is_revoked(&claims.sid).await {
            tracing::debug!(sid = %claims.sid, "session token revoked");
            return Ok(SessionVerification::no_session());
        }

        let Ok(email) = Email::parse(&claims.email) else {
            return Ok(SessionVerification::no_session());
        };
        let principal_id = PrincipalId::new(claims.sub);

        let expires_at = timestamp(claims.exp);
        let (valid_until, refreshed) = if expires_at - Utc::now() <= self.settings.refresh_window {
            let (token, _) = self.mint(&principal_id, &email, claims.sid)?;
            (token.expires_at, Some(token))
        } else {
            (expires_at, None)
        };

        Ok(SessionVerification {
            principal: Some(Principal::new(principal_id, email, valid_until)),
            refreshed,
        })
    }

    async fn create_account(
        &self,
        email: &Email,
        password: &str,
    ) -> Result<PrincipalId, IdentityError> {
        let password_hash = self
            .hasher
            .hash(password)
            .await
            .map_err(|err| IdentityError::upstream(err.to_string()))?;

        let account = Account {
            principal_id: PrincipalId::new(Uuid::new_v4().to_string()),
            email: email.clone(),
            password_hash,
            created_at: Utc::now(),
        };

        match self.accounts.insert(account).await {
            Ok(account) => Ok(account.principal_id),
            Err(RepositoryError::Conflict) => Err(IdentityError::AccountExists),
            Err(err) => Err(IdentityError::upstream(err.to_string())),
        }
    }

    async fn sign_in(&self, email: &Email, password: &str) -> Result<SignedIn, IdentityError> {
        let account = self
            .accounts
            .find_by_email(email)
            .await
            .map_err(|err| IdentityError::upstream(err.to_string()))?
            .ok_or(IdentityError::InvalidCredentials)?;

        let matches = self
            .hasher
            .verify(password, &account.password_hash)
            .await
            .map_err(|err| IdentityError::upstream(err.to_string()))?;
        if !matches {
            return Err(IdentityError::InvalidCredentials);
        }

        let (token, _) = self.mint(
            &account.principal_id,
            &account.email,
            Uuid::new_v4().to_string(),
        )?;
        Ok(SignedIn {
            principal: Principal::new(account.principal_id, account.email, token.expires_at),
            token,
        })
    }

    async fn sign_out(&self, credentials: &SessionCredentials) -> Result<(), IdentityError> {
        let Some(token) = credentials.token.as_deref() else {
            return Ok(());
        };
        // 过期令牌也允许登出
        let Ok(data) = decode::<Claims>(token, &self.decoding_key, &Self::validation(false)) else {
            return Ok(());
        };

        // 同一 sid 刷新出的令牌最晚在 now + ttl 过期，撤销记录至少保留到那时
        let now = Utc::now();
        let revoked_until = (now + self.settings.ttl).timestamp().max(data.claims.exp);
        let now = now.timestamp();
        let mut revoked = self.revoked.write().await;
        revoked.retain(|_, until| *until >= now);
        revoked.insert(data.claims.sid, revoked_until);
        Ok(())
    }
}
