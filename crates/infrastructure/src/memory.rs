//! 进程内存储
//!
//! 单进程部署与测试使用；所有仓储共享一把读写锁，行为与 PostgreSQL 实现保持一致
//! （邮箱唯一、频道内序列号连续、排序规则相同）。

use std::collections::HashMap;

use async_trait::async_trait;
use domain::{
    Channel, ChannelId, ChannelRepository, Email, EmployeeId, EmployeeRecord, EmployeeRepository,
    EmployeeUpdate, Membership, MembershipRepository, Message, MessageId, MessagePosition,
    MessageRepository, PrincipalId, RepositoryError, RepositoryResult, SignupProfile, Timestamp,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    employees: HashMap<EmployeeId, EmployeeRecord>,
    channels: HashMap<ChannelId, Channel>,
    memberships: HashMap<(ChannelId, PrincipalId), Membership>,
    /// 每个频道按序列号升序排列
    messages: HashMap<ChannelId, Vec<Message>>,
    message_channels: HashMap<MessageId, ChannelId>,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmployeeRepository for InMemoryStore {
    async fn create(&self, record: EmployeeRecord) -> RepositoryResult<EmployeeRecord> {
        let mut state = self.state.write().await;
        let duplicate = state.employees.contains_key(&record.id)
            || state
                .employees
                .values()
                .any(|existing| existing.email == record.email);
        if duplicate {
            return Err(RepositoryError::Conflict);
        }
        state.employees.insert(record.id, record.clone());
        Ok(record)
    }

    async fn apply_update(
        &self,
        id: EmployeeId,
        update: EmployeeUpdate,
        now: Timestamp,
    ) -> RepositoryResult<EmployeeRecord> {
        let mut state = self.state.write().await;
        let record = state
            .employees
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        record.apply_update(update, now)?;
        Ok(record.clone())
    }

    async fn link_principal(
        &self,
        id: EmployeeId,
        principal_id: PrincipalId,
        profile: SignupProfile,
        now: Timestamp,
    ) -> RepositoryResult<EmployeeRecord> {
        let mut state = self.state.write().await;
        let record = state
            .employees
            .get_mut(&id)
            .ok_or(RepositoryError::NotFound)?;
        if record.is_linked() {
            return Err(RepositoryError::Conflict);
        }
        record.link_principal(principal_id, &profile, now)?;
        Ok(record.clone())
    }

    async fn delete(&self, id: EmployeeId) -> RepositoryResult<()> {
        let mut state = self.state.write().await;
        state
            .employees
            .remove(&id)
            .map(|_| ())
            .ok_or(RepositoryError::NotFound)
    }

    async fn find_by_id(&self, id: EmployeeId) -> RepositoryResult<Option<EmployeeRecord>> {
        Ok(self.state.read().await.employees.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &Email) -> RepositoryResult<Option<EmployeeRecord>> {
        let state = self.state.read().await;
        Ok(state
            .employees
            .values()
            .find(|record| &record.email == email)
            .cloned())
    }

    async fn list(&self) -> RepositoryResult<Vec<EmployeeRecord>> {
        let state = self.state.read().await;
        let mut records: Vec<EmployeeRecord> = state.employees.values().cloned().collect();
        records.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(records)
    }
}

#[async_trait]
impl ChannelRepository for InMemoryStore {
    async fn create_with_owner(
        &self,
        channel: Channel,
        owner: Membership,
    ) -> RepositoryResult<Channel> {
        let mut state = self.state.write().await;
        if state.channels.contains_key(&channel.id) {
            return Err(RepositoryError::Conflict);
        }
        state.channels.insert(channel.id, channel.clone());
        state
            .memberships
            .insert((owner.channel_id, owner.principal_id.clone()), owner);
        Ok(channel)
    }

    async fn find_by_id(&self, id: ChannelId) -> RepositoryResult<Option<Channel>> {
        Ok(self.state.read().await.channels.get(&id).cloned())
    }

    async fn list_by_ids(&self, ids: &[ChannelId]) -> RepositoryResult<Vec<Channel>> {
        let state = self.state.read().await;
        let mut channels: Vec<Channel> = ids
            .iter()
            .filter_map(|id| state.channels.get(id).cloned())
            .collect();
        channels.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        channels.dedup_by_key(|channel| channel.id);
        Ok(channels)
    }
}

#[async_trait]
impl MembershipRepository for InMemoryStore {
    async fn upsert(&self, membership: Membership) -> RepositoryResult<Membership> {
        let mut state = self.state.write().await;
        if !state.channels.contains_key(&membership.channel_id) {
            return Err(RepositoryError::NotFound);
        }
        let key = (membership.channel_id, membership.principal_id.clone());
        let role = membership.role;
        let stored = state
            .memberships
            .entry(key)
            .and_modify(|existing| existing.role = role)
            .or_insert(membership);
        Ok(stored.clone())
    }

    async fn find(
        &self,
        channel_id: ChannelId,
        principal_id: &PrincipalId,
    ) -> RepositoryResult<Option<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .get(&(channel_id, principal_id.clone()))
            .cloned())
    }

    async fn list_for_principal(
        &self,
        principal_id: &PrincipalId,
    ) -> RepositoryResult<Vec<Membership>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .filter(|membership| &membership.principal_id == principal_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageRepository for InMemoryStore {
    async fn insert(&self, message: Message) -> RepositoryResult<Message> {
        let mut state = self.state.write().await;
        if !state.channels.contains_key(&message.channel_id) {
            return Err(RepositoryError::NotFound);
        }
        if state.message_channels.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }

        let log = state.messages.entry(message.channel_id).or_default();
        let in_order = match log.last() {
            None => message.sequence == 1,
            Some(last) => {
                message.sequence == last.sequence + 1 && message.created_at > last.created_at
            }
        };
        if !in_order {
            return Err(RepositoryError::Conflict);
        }

        log.push(message.clone());
        state.message_channels.insert(message.id, message.channel_id);
        Ok(message)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        let state = self.state.read().await;
        let Some(channel_id) = state.message_channels.get(&id) else {
            return Ok(None);
        };
        Ok(state
            .messages
            .get(channel_id)
            .and_then(|log| log.iter().find(|message| message.id == id))
            .cloned())
    }

    async fn last_position(
        &self,
        channel_id: ChannelId,
    ) -> RepositoryResult<Option<MessagePosition>> {
        let state = self.state.read().await;
        Ok(state
            .messages
            .get(&channel_id)
            .and_then(|log| log.last())
            .map(Message::position))
    }

    async fn list_recent(&self, channel_id: ChannelId, limit: u32) -> RepositoryResult<Vec<Message>> {
        let state = self.state.read().await;
        let Some(log) = state.messages.get(&channel_id) else {
            return Ok(Vec::new());
        };
        let skip = log.len().saturating_sub(limit as usize);
        Ok(log[skip..].to_vec())
    }

    async fn list_after(
        &self,
        channel_id: ChannelId,
        after_sequence: u64,
        limit: u32,
    ) -> RepositoryResult<Vec<Message>> {
        let state = self.state.read().await;
        let Some(log) = state.messages.get(&channel_id) else {
            return Ok(Vec::new());
        };
        let start = log.partition_point(|message| message.sequence <= after_sequence);
        Ok(log[start..].iter().take(limit as usize).cloned().collect())
    }
}
