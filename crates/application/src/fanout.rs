//! 频道级实时分发
//!
//! 每个有订阅者的频道对应一个 `tokio::sync::broadcast` 通道。消息存储在追加成功后
//! （仍持有频道锁）调用 [`MessageBroadcaster::broadcast`]，因此所有订阅者看到的顺序
//! 与追加顺序一致。
//!
//! 订阅先挂接接收端再从存储补齐积压，重叠部分按 `sequence` 去重；接收端落后
//! （`Lagged`）时从存储补发缺失区间，连续失败达到上限后订阅关闭。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    ChannelId, Message, MessageId, MessageRepository, Principal, PrincipalId, RepositoryError,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    broadcaster::{BroadcastError, MessageBroadcast, MessageBroadcaster},
    error::ApplicationError,
    membership::MembershipDirectory,
    retry::retry_read_once,
};

const REDELIVERY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    /// 每个频道广播通道的容量
    pub capacity: usize,
    /// 连续补发失败多少次后关闭订阅
    pub max_redelivery_attempts: u32,
    /// 从存储补齐时每页读取条数
    pub backfill_page_size: u32,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            max_redelivery_attempts: 3,
            backfill_page_size: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Connecting,
    Active,
    /// 补发失败，等待重试
    Errored,
    Closed,
}

/// 按频道内序列号去重的游标，`sequence <= last` 的消息一律丢弃
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCursor {
    last_sequence: u64,
}

impl DeliveryCursor {
    pub fn starting_after(sequence: u64) -> Self {
        Self {
            last_sequence: sequence,
        }
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    /// 消息应当投递时返回 `true` 并前移游标
    pub fn admit(&mut self, message: &Message) -> bool {
        if message.sequence <= self.last_sequence {
            return false;
        }
        self.last_sequence = message.sequence;
        true
    }
}

struct ActiveSubscription {
    channel_id: ChannelId,
    principal_id: PrincipalId,
    cancel: CancellationToken,
}

pub struct FanoutEngine {
    config: FanoutConfig,
    senders: RwLock<HashMap<ChannelId, broadcast::Sender<Arc<Message>>>>,
    active: Mutex<HashMap<SubscriptionId, ActiveSubscription>>,
    messages: Arc<dyn MessageRepository>,
    directory: MembershipDirectory,
}

impl FanoutEngine {
    pub fn new(
        config: FanoutConfig,
        messages: Arc<dyn MessageRepository>,
        directory: MembershipDirectory,
    ) -> Self {
        Self {
            config,
            senders: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            messages,
            directory,
        }
    }

    pub fn config(&self) -> FanoutConfig {
        self.config
    }

    /// 订阅频道实时消息，要求调用者是频道成员。
    ///
    /// `resume_after` 指向本频道的某条消息时，先补齐该消息之后的全部积压；
    /// 指向未知消息或其他频道的消息时只接收实时消息。
    pub async fn subscribe(
        self: &Arc<Self>,
        channel_id: ChannelId,
        principal: &Principal,
        resume_after: Option<MessageId>,
    ) -> Result<Subscription, ApplicationError> {
        self.directory
            .require_member(&principal.id, channel_id)
            .await?;

        let id = SubscriptionId::generate();
        let cancel = CancellationToken::new();
        let receiver = self.attach(channel_id);
        self.registry().insert(
            id,
            ActiveSubscription {
                channel_id,
                principal_id: principal.id.clone(),
                cancel: cancel.clone(),
            },
        );

        // 出错时 Subscription 被 drop，登记与接收端随之释放
        let mut subscription = Subscription {
            id,
            channel_id,
            state: SubscriptionState::Connecting,
            receiver: Some(receiver),
            cursor: DeliveryCursor::default(),
            backlog: VecDeque::new(),
            cancel,
            engine: Arc::clone(self),
            failed_attempts: 0,
            needs_backfill: false,
        };

        if let Some(anchor) = resume_after {
            if let Some(sequence) = self.anchor_sequence(channel_id, anchor).await? {
                subscription.cursor = DeliveryCursor::starting_after(sequence);
                subscription.backfill().await?;
            } else {
                tracing::debug!(
                    channel_id = %channel_id,
                    anchor = %anchor,
                    "resume anchor not in channel, subscribing live only"
                );
            }
        }

        subscription.state = SubscriptionState::Active;
        tracing::debug!(
            subscription_id = %id,
            channel_id = %channel_id,
            principal_id = %principal.id,
            backlog = subscription.backlog.len(),
            "subscription opened"
        );
        Ok(subscription)
    }

    /// 取消订阅；重复调用或未知 id 是无操作，返回 `false`
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some(entry) = self.registry().remove(&id) else {
            return false;
        };
        entry.cancel.cancel();
        self.prune(entry.channel_id);
        tracing::debug!(
            subscription_id = %id,
            channel_id = %entry.channel_id,
            principal_id = %entry.principal_id,
            "subscription released"
        );
        true
    }

    pub fn subscription_count(&self) -> usize {
        self.registry().len()
    }

    /// 当前持有广播通道的频道数
    pub fn live_channel_count(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn attach(&self, channel_id: ChannelId) -> broadcast::Receiver<Arc<Message>> {
        let capacity = self.config.capacity.max(1);
        let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
        senders
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    /// 没有接收端的广播通道直接丢弃
    fn prune(&self, channel_id: ChannelId) {
        let mut senders = self.senders.write().unwrap_or_else(PoisonError::into_inner);
        if senders
            .get(&channel_id)
            .is_some_and(|sender| sender.receiver_count() == 0)
        {
            senders.remove(&channel_id);
        }
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, ActiveSubscription>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn anchor_sequence(
        &self,
        channel_id: ChannelId,
        anchor: MessageId,
    ) -> Result<Option<u64>, RepositoryError> {
        let message =
            retry_read_once("find_resume_anchor", || self.messages.find_by_id(anchor)).await?;
        Ok(message
            .filter(|message| message.channel_id == channel_id)
            .map(|message| message.sequence))
    }
}

#[async_trait]
impl MessageBroadcaster for FanoutEngine {
    async fn broadcast(&self, payload: MessageBroadcast) -> Result<(), BroadcastError> {
        let sender = self
            .senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&payload.channel_id)
            .cloned();

        let Some(sender) = sender else {
            return Ok(());
        };

        match sender.send(payload.message) {
            Ok(receivers) => {
                tracing::trace!(channel_id = %payload.channel_id, receivers, "message fanned out");
            }
            Err(_) => self.prune(payload.channel_id),
        }
        Ok(())
    }
}

enum Step {
    Cancelled,
    Received(Result<Arc<Message>, RecvError>),
}

/// 一个频道的实时订阅句柄
///
/// `next()` 可以安全地放进 `tokio::select!`：被取消时已补齐的积压保留在句柄内。
/// drop 时自动取消订阅。
pub struct Subscription {
    id: SubscriptionId,
    channel_id: ChannelId,
    state: SubscriptionState,
    receiver: Option<broadcast::Receiver<Arc<Message>>>,
    cursor: DeliveryCursor,
    backlog: VecDeque<Arc<Message>>,
    cancel: CancellationToken,
    engine: Arc<FanoutEngine>,
    failed_attempts: u32,
    needs_backfill: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn cursor(&self) -> DeliveryCursor {
        self.cursor
    }

    /// 下一条按序消息；订阅关闭后返回 `None`
    pub async fn next(&mut self) -> Option<Arc<Message>> {
        loop {
            if self.state == SubscriptionState::Closed {
                return None;
            }

            if let Some(message) = self.backlog.pop_front() {
                if self.cursor.admit(&message) {
                    return Some(message);
                }
                continue;
            }

            if self.needs_backfill {
                self.redeliver().await;
                continue;
            }

            let step = {
                let Some(receiver) = self.receiver.as_mut() else {
                    self.close();
                    return None;
                };
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => Step::Cancelled,
                    result = receiver.recv() => Step::Received(result),
                }
            };

            match step {
                Step::Cancelled => {
                    self.close();
                    return None;
                }
                Step::Received(Ok(message)) => {
                    if self.cursor.admit(&message) {
                        return Some(message);
                    }
                }
                Step::Received(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!(
                        subscription_id = %self.id,
                        channel_id = %self.channel_id,
                        skipped,
                        "subscriber lagged, backfilling from store"
                    );
                    self.needs_backfill = true;
                }
                Step::Received(Err(RecvError::Closed)) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    /// 关闭订阅并释放资源，可重复调用
    pub fn close(&mut self) {
        if self.state == SubscriptionState::Closed {
            return;
        }
        self.state = SubscriptionState::Closed;
        self.backlog.clear();
        self.receiver.take();
        self.engine.unsubscribe(self.id);
        self.engine.prune(self.channel_id);
    }

    async fn redeliver(&mut self) {
        match self.backfill().await {
            Ok(()) => {
                self.failed_attempts = 0;
                self.state = SubscriptionState::Active;
            }
            Err(err) => {
                self.failed_attempts += 1;
                self.state = SubscriptionState::Errored;
                tracing::warn!(
                    subscription_id = %self.id,
                    channel_id = %self.channel_id,
                    attempt = self.failed_attempts,
                    error = %err,
                    "redelivery failed"
                );

                if self.failed_attempts >= self.engine.config.max_redelivery_attempts {
                    tracing::error!(
                        subscription_id = %self.id,
                        channel_id = %self.channel_id,
                        "redelivery attempts exhausted, closing subscription"
                    );
                    self.close();
                    return;
                }

                let backoff = REDELIVERY_BACKOFF * self.failed_attempts;
                let cancelled = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(backoff) => false,
                };
                if cancelled {
                    self.close();
                }
            }
        }
    }

    /// 从存储读取游标（或已缓存积压）之后的全部消息
    async fn backfill(&mut self) -> Result<(), RepositoryError> {
        let page_size = self.engine.config.backfill_page_size.max(1);
        let messages = Arc::clone(&self.engine.messages);
        let channel_id = self.channel_id;
        let mut after = self
            .backlog
            .back()
            .map_or(self.cursor.last_sequence(), |message| message.sequence);

        loop {
            let page = retry_read_once("backfill_messages", || {
                messages.list_after(channel_id, after, page_size)
            })
            .await?;
            let fetched = page.len();

            for message in page {
                after = message.sequence;
                self.backlog.push_back(Arc::new(message));
            }
            if fetched < page_size as usize {
                break;
            }
        }

        self.needs_backfill = false;
        Ok(())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel_id", &self.channel_id)
            .field("state", &self.state)
            .field("cursor", &self.cursor)
            .field("backlog", &self.backlog.len())
            .finish()
    }
}
