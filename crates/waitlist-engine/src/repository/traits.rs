//! 仓储 Trait 定义
//!
//! 核心逻辑只依赖这些接口，不依赖具体存储；测试时可替换为内存实现或 mock。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AuditRecord, Channel, EntryStatus, NotificationJob, Offer, OfferStatus, RemovalReason,
    ScheduledWork, Slot, SuppressionEntry, WaitingListEntry,
};

/// 候补记录仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WaitingListRepository: Send + Sync {
    /// 插入新记录；同一顾客已有等待中的记录时返回 `DuplicateEntry`
    async fn insert(&self, entry: &WaitingListEntry) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<WaitingListEntry>>;
    async fn find_waiting(
        &self,
        business_id: &str,
        service_id: &str,
        customer_id: &str,
    ) -> Result<Option<WaitingListEntry>>;
    /// 按出队顺序列出 Active 记录
    async fn list_active(&self, business_id: &str, service_id: &str)
    -> Result<Vec<WaitingListEntry>>;
    async fn update_status(
        &self,
        id: Uuid,
        status: EntryStatus,
        removal_reason: Option<RemovalReason>,
        at: DateTime<Utc>,
    ) -> Result<()>;
}

/// Offer 仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OfferRepository: Send + Sync {
    /// 插入 Pending Offer；同一时段已有 Pending Offer 时返回 `SlotAlreadyCommitted`
    async fn insert_pending(&self, offer: &Offer) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Offer>>;
    async fn find_by_token(&self, token: &str) -> Result<Option<Offer>>;
    async fn list_for_slot(
        &self,
        business_id: &str,
        service_id: &str,
        slot: &Slot,
    ) -> Result<Vec<Offer>>;
    /// 记录当前的 Pending Offer（每条记录最多一个）
    async fn find_pending_for_entry(&self, entry_id: Uuid) -> Result<Option<Offer>>;
    /// 原子比较并设置状态，返回是否成功
    async fn compare_and_set_status(
        &self,
        id: Uuid,
        from: OfferStatus,
        to: OfferStatus,
        at: DateTime<Utc>,
    ) -> Result<bool>;
    async fn set_expiry_work(&self, id: Uuid, work_id: Uuid) -> Result<()>;
    async fn set_notification_attempts(&self, id: Uuid, attempts: i32) -> Result<()>;
}

/// 通知任务仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationJobRepository: Send + Sync {
    /// 以幂等键插入，已存在时返回 false
    async fn insert_if_absent(&self, job: &NotificationJob) -> Result<bool>;
    async fn get(&self, idempotency_key: &str) -> Result<Option<NotificationJob>>;
    async fn update(&self, job: &NotificationJob) -> Result<()>;
}

/// 屏蔽名单仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SuppressionRepository: Send + Sync {
    /// 已存在时返回 false，不覆盖原记录
    async fn insert_if_absent(&self, entry: &SuppressionEntry) -> Result<bool>;
    async fn find(&self, channel: Channel, address_hash: &str) -> Result<Option<SuppressionEntry>>;
    /// 软退信计数加一，返回累计次数
    async fn increment_soft_bounce(
        &self,
        channel: Channel,
        address_hash: &str,
        at: DateTime<Utc>,
    ) -> Result<u32>;
}

/// 审计日志仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
    /// 按记录时间升序
    async fn list_by_subject(&self, subject_id: &str) -> Result<Vec<AuditRecord>>;
}

/// 调度任务仓储
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduledWorkRepository: Send + Sync {
    async fn insert(&self, work: &ScheduledWork) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<ScheduledWork>>;
    /// 取消尚未执行的任务，返回是否取消成功
    async fn cancel(&self, id: Uuid) -> Result<bool>;
    /// 认领到期任务（含认领超时未完成的任务），同一任务不会被两个调用方同时认领
    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledWork>>;
    async fn complete(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
    /// 处理失败后放回队列，在 run_at 重新执行
    async fn reschedule(&self, id: Uuid, run_at: DateTime<Utc>, attempts: i32) -> Result<()>;
    async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}
