use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::ChannelId;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 频道级追加串行器
///
/// 每个频道一把异步锁：同一频道的追加（分配位置 → 持久化 → 发布）串行执行，
/// 不同频道之间互不阻塞。注册表只在取锁和释放时短暂加锁；
/// 没有持有者也没有等待者的频道锁在释放时移出注册表。
#[derive(Debug, Default)]
pub struct ChannelSequencer {
    locks: Mutex<HashMap<ChannelId, Arc<AsyncMutex<()>>>>,
}

/// 持有期间独占该频道的追加
#[derive(Debug)]
pub struct ChannelLease<'a> {
    sequencer: &'a ChannelSequencer,
    channel_id: ChannelId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelLease<'_> {
    fn drop(&mut self) {
        // 先释放频道锁，guard 自身也持有一份 Arc
        self.guard.take();
        self.sequencer.release(self.channel_id);
    }
}

impl ChannelSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, channel_id: ChannelId) -> ChannelLease<'_> {
        let lock = {
            let mut locks = self.registry();
            locks.entry(channel_id).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        ChannelLease {
            sequencer: self,
            channel_id,
            guard: Some(guard),
        }
    }

    pub fn tracked_channels(&self) -> usize {
        self.registry().len()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<ChannelId, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 只剩注册表自己引用时移除；等待者在取锁前已克隆 Arc，不会被误删
    fn release(&self, channel_id: ChannelId) {
        let mut locks = self.registry();
        if locks
            .get(&channel_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&channel_id);
        }
    }
}
