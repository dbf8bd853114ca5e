use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{
    Channel, ChannelId, ChannelRepository, Email, EmployeeId, EmployeeRecord, EmployeeRepository,
    EmployeeStatus, EmployeeUpdate, Membership, MembershipRepository, MembershipRole, Message,
    MessageId, MessagePosition, MessageRepository, PrincipalId, RepositoryError, RepositoryResult,
    SignupProfile, Timestamp,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use uuid::Uuid;

pub(crate) fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => RepositoryError::Conflict,
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => RepositoryError::NotFound,
        _ => RepositoryError::storage(err.to_string()),
    }
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn to_i64(value: u64) -> RepositoryResult<i64> {
    i64::try_from(value).map_err(|_| invalid_data("sequence out of range"))
}

#[derive(Debug, FromRow)]
struct EmployeeRow {
    id: Uuid,
    email: String,
    full_name: String,
    phone: Option<String>,
    status: String,
    linked_principal_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EmployeeRow> for EmployeeRecord {
    type Error = RepositoryError;

    fn try_from(value: EmployeeRow) -> Result<Self, Self::Error> {
        let email = Email::parse(&value.email).map_err(|err| invalid_data(err.to_string()))?;
        let status = value
            .status
            .parse::<EmployeeStatus>()
            .map_err(|err| invalid_data(err.to_string()))?;

        Ok(EmployeeRecord {
            id: EmployeeId::from(value.id),
            email,
            full_name: value.full_name,
            phone: value.phone,
            status,
            linked_principal_id: value.linked_principal_id.map(PrincipalId::new),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChannelRow {
    id: Uuid,
    name: String,
    is_private: bool,
    created_by: String,
    created_at: DateTime<Utc>,
}

impl From<ChannelRow> for Channel {
    fn from(value: ChannelRow) -> Self {
        Channel {
            id: ChannelId::from(value.id),
            name: value.name,
            is_private: value.is_private,
            created_by: PrincipalId::new(value.created_by),
            created_at: value.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    channel_id: Uuid,
    principal_id: String,
    role: String,
    joined_at: DateTime<Utc>,
}

impl TryFrom<MemberRow> for Membership {
    type Error = RepositoryError;

    fn try_from(value: MemberRow) -> Result<Self, Self::Error> {
        let role = value
            .role
            .parse::<MembershipRole>()
            .map_err(|err| invalid_data(err.to_string()))?;
        Ok(Membership::new(
            ChannelId::from(value.channel_id),
            PrincipalId::new(value.principal_id),
            role,
            value.joined_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    channel_id: Uuid,
    author_id: String,
    body: String,
    created_at: DateTime<Utc>,
    sequence: i64,
}

impl TryFrom<MessageRow> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRow) -> Result<Self, Self::Error> {
        let sequence =
            u64::try_from(value.sequence).map_err(|_| invalid_data("negative sequence"))?;
        Ok(Message {
            id: MessageId::from(value.id),
            channel_id: ChannelId::from(value.channel_id),
            author_id: PrincipalId::new(value.author_id),
            body: value.body,
            created_at: value.created_at,
            sequence,
        })
    }
}

const EMPLOYEE_COLUMNS: &str =
    "id, email, full_name, phone, status, linked_principal_id, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, channel_id, author_id, body, created_at, sequence";

#[derive(Clone)]
pub struct PgEmployeeRepository {
    pool: PgPool,
}

impl PgEmployeeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmployeeRepository for PgEmployeeRepository {
    async fn create(&self, record: EmployeeRecord) -> RepositoryResult<EmployeeRecord> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            r#"
            INSERT INTO employees ({EMPLOYEE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {EMPLOYEE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(record.id))
        .bind(record.email.as_str())
        .bind(&record.full_name)
        .bind(record.phone.as_deref())
        .bind(record.status.as_str())
        .bind(record.linked_principal_id.as_ref().map(PrincipalId::as_str))
        .bind(record.created_at)
        .bind(record.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        EmployeeRecord::try_from(row)
    }

    async fn apply_update(
        &self,
        id: EmployeeId,
        update: EmployeeUpdate,
        now: Timestamp,
    ) -> RepositoryResult<EmployeeRecord> {
        let update = update.normalize()?;
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            r#"
            UPDATE employees
            SET full_name = COALESCE($2, full_name),
                status = COALESCE($3, status),
                phone = CASE WHEN $4 THEN NULLIF($5, '') ELSE phone END,
                updated_at = $6
            WHERE id = $1
            RETURNING {EMPLOYEE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(update.full_name)
        .bind(update.status.map(|status| status.as_str()))
        .bind(update.phone.is_some())
        .bind(update.phone)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .ok_or(RepositoryError::NotFound)?;

        EmployeeRecord::try_from(row)
    }

    async fn link_principal(
        &self,
        id: EmployeeId,
        principal_id: PrincipalId,
        profile: SignupProfile,
        now: Timestamp,
    ) -> RepositoryResult<EmployeeRecord> {
        let profile = profile.normalize()?;
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            r#"
            UPDATE employees
            SET linked_principal_id = $2,
                status = CASE WHEN status = 'pending' THEN 'active' ELSE status END,
                full_name = COALESCE($3, full_name),
                phone = COALESCE($4, phone),
                updated_at = $5
            WHERE id = $1 AND linked_principal_id IS NULL
            RETURNING {EMPLOYEE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(id))
        .bind(principal_id.as_str())
        .bind(profile.full_name)
        .bind(profile.phone)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        match row {
            Some(row) => EmployeeRecord::try_from(row),
            // 没有更新任何行：记录不存在，或已被关联
            None => match self.find_by_id(id).await? {
                Some(_) => Err(RepositoryError::Conflict),
                None => Err(RepositoryError::NotFound),
            },
        }
    }

    async fn delete(&self, id: EmployeeId) -> RepositoryResult<()> {
        let result = sqlx::query("DELETE FROM employees WHERE id = $1")
            .bind(Uuid::from(id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn find_by_id(&self, id: EmployeeId) -> RepositoryResult<Option<EmployeeRecord>> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(EmployeeRecord::try_from).transpose()
    }

    async fn find_by_email(&self, email: &Email) -> RepositoryResult<Option<EmployeeRecord>> {
        let row = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE email = $1"
        ))
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(EmployeeRecord::try_from).transpose()
    }

    async fn list(&self) -> RepositoryResult<Vec<EmployeeRecord>> {
        let rows = sqlx::query_as::<_, EmployeeRow>(&format!(
            "SELECT {EMPLOYEE_COLUMNS} FROM employees ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(EmployeeRecord::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgChannelRepository {
    pool: PgPool,
}

impl PgChannelRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelRepository for PgChannelRepository {
    async fn create_with_owner(
        &self,
        channel: Channel,
        owner: Membership,
    ) -> RepositoryResult<Channel> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let row = sqlx::query_as::<_, ChannelRow>(
            r#"
            INSERT INTO channels (id, name, is_private, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, name, is_private, created_by, created_at
            "#,
        )
        .bind(Uuid::from(channel.id))
        .bind(&channel.name)
        .bind(channel.is_private)
        .bind(channel.created_by.as_str())
        .bind(channel.created_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query(
            r#"
            INSERT INTO channel_members (channel_id, principal_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Uuid::from(owner.channel_id))
        .bind(owner.principal_id.as_str())
        .bind(owner.role.as_str())
        .bind(owner.joined_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(Channel::from(row))
    }

    async fn find_by_id(&self, id: ChannelId) -> RepositoryResult<Option<Channel>> {
        let row = sqlx::query_as::<_, ChannelRow>(
            "SELECT id, name, is_private, created_by, created_at FROM channels WHERE id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(row.map(Channel::from))
    }

    async fn list_by_ids(&self, ids: &[ChannelId]) -> RepositoryResult<Vec<Channel>> {
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let rows = sqlx::query_as::<_, ChannelRow>(
            r#"
            SELECT id, name, is_private, created_by, created_at
            FROM channels
            WHERE id = ANY($1)
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Ok(rows.into_iter().map(Channel::from).collect())
    }
}

#[derive(Clone)]
pub struct PgMembershipRepository {
    pool: PgPool,
}

impl PgMembershipRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipRepository for PgMembershipRepository {
    async fn upsert(&self, membership: Membership) -> RepositoryResult<Membership> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            INSERT INTO channel_members (channel_id, principal_id, role, joined_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (channel_id, principal_id)
            DO UPDATE SET role = EXCLUDED.role
            RETURNING channel_id, principal_id, role, joined_at
            "#,
        )
        .bind(Uuid::from(membership.channel_id))
        .bind(membership.principal_id.as_str())
        .bind(membership.role.as_str())
        .bind(membership.joined_at)
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        Membership::try_from(row)
    }

    async fn find(
        &self,
        channel_id: ChannelId,
        principal_id: &PrincipalId,
    ) -> RepositoryResult<Option<Membership>> {
        let row = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT channel_id, principal_id, role, joined_at
            FROM channel_members
            WHERE channel_id = $1 AND principal_id = $2
            "#,
        )
        .bind(Uuid::from(channel_id))
        .bind(principal_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(Membership::try_from).transpose()
    }

    async fn list_for_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> RepositoryResult<Vec<Membership>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT channel_id, principal_id, role, joined_at
            FROM channel_members
            WHERE principal_id = $1
            "#,
        )
        .bind(principal_id.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(Membership::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgMessageRepository {
    pool: PgPool,
}

impl PgMessageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageRepository for PgMessageRepository {
    async fn insert(&self, message: Message) -> RepositoryResult<Message> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 锁住频道行，序列号只能是 last_sequence + 1
        let last: i64 =
            sqlx::query_scalar("SELECT last_sequence FROM channels WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(message.channel_id))
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?
                .ok_or(RepositoryError::NotFound)?;

        let sequence = to_i64(message.sequence)?;
        if sequence != last + 1 {
            return Err(RepositoryError::Conflict);
        }

        let row = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            INSERT INTO messages ({MESSAGE_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(Uuid::from(message.id))
        .bind(Uuid::from(message.channel_id))
        .bind(message.author_id.as_str())
        .bind(&message.body)
        .bind(message.created_at)
        .bind(sequence)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_err)?;

        sqlx::query("UPDATE channels SET last_sequence = $2 WHERE id = $1")
            .bind(Uuid::from(message.channel_id))
            .bind(sequence)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;
        Message::try_from(row)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(Message::try_from).transpose()
    }

    async fn last_position(
        &self,
        channel_id: ChannelId,
    ) -> RepositoryResult<Option<MessagePosition>> {
        let row: Option<(i64, DateTime<Utc>)> = sqlx::query_as(
            r#"
            SELECT sequence, created_at
            FROM messages
            WHERE channel_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(Uuid::from(channel_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        row.map(|(sequence, created_at)| {
            let sequence =
                u64::try_from(sequence).map_err(|_| invalid_data("negative sequence"))?;
            Ok(MessagePosition {
                sequence,
                created_at,
            })
        })
        .transpose()
    }

    async fn list_recent(&self, channel_id: ChannelId, limit: u32) -> RepositoryResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE channel_id = $1
            ORDER BY sequence DESC
            LIMIT $2
            "#
        ))
        .bind(Uuid::from(channel_id))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        let mut items: Vec<Message> = rows
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<_, _>>()?;
        items.reverse();
        Ok(items)
    }

    async fn list_after(
        &self,
        channel_id: ChannelId,
        after_sequence: u64,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRow>(&format!(
            r#"
            SELECT {MESSAGE_COLUMNS}
            FROM messages
            WHERE channel_id = $1 AND sequence > $2
            ORDER BY sequence ASC
            LIMIT $3
            "#
        ))
        .bind(Uuid::from(channel_id))
        .bind(to_i64(after_sequence)?)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        rows.into_iter().map(Message::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgStorage {
    pub pool: PgPool,
    pub employee_repository: Arc<PgEmployeeRepository>,
    pub channel_repository: Arc<PgChannelRepository>,
    pub membership_repository: Arc<PgMembershipRepository>,
    pub message_repository: Arc<PgMessageRepository>,
}

impl PgStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            employee_repository: Arc::new(PgEmployeeRepository::new(pool.clone())),
            channel_repository: Arc::new(PgChannelRepository::new(pool.clone())),
            membership_repository: Arc::new(PgMembershipRepository::new(pool.clone())),
            message_repository: Arc::new(PgMessageRepository::new(pool.clone())),
            pool,
        }
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
