//! 内存仓储
//!
//! 基于 DashMap 实现，适用于测试和单进程部署。
//! 需要“检查后写入”的复合操作由一把 parking_lot 互斥锁串行化。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use super::traits::{
    AuditRepository, NotificationJobRepository, OfferRepository, ScheduledWorkRepository,
    SuppressionRepository, WaitingListRepository,
};
use crate::error::{Result, WaitlistError};
use crate::models::{
    AuditRecord, CLAIM_LEASE_SECS, Channel, EntryStatus, NotificationJob, Offer, OfferStatus,
    RemovalReason, ScheduledWork, Slot, SuppressionEntry, WaitingListEntry, WorkStatus,
    offer_order,
};

// ==================== 候补记录 ====================

#[derive(Default)]
pub struct InMemoryWaitingListRepository {
    entries: DashMap<Uuid, WaitingListEntry>,
    write_gate: Mutex<()>,
}

impl InMemoryWaitingListRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WaitingListRepository for InMemoryWaitingListRepository {
    async fn insert(&self, entry: &WaitingListEntry) -> Result<()> {
        let _gate = self.write_gate.lock();
        let duplicate = self.entries.iter().any(|e| {
            e.is_for(&entry.business_id, &entry.service_id)
                && e.customer_id == entry.customer_id
                && e.status.is_waiting()
        });
        if duplicate {
            return Err(WaitlistError::DuplicateEntry {
                customer_id: entry.customer_id.clone(),
                business_id: entry.business_id.clone(),
                service_id: entry.service_id.clone(),
            });
        }
        self.entries.insert(entry.id, entry.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WaitingListEntry>> {
        Ok(self.entries.get(&id).map(|e| e.clone()))
    }

    async fn find_waiting(
        &self,
        business_id: &str,
        service_id: &str,
        customer_id: &str,
    ) -> Result<Option<WaitingListEntry>> {
        Ok(self
            .entries
            .iter()
            .find(|e| {
                e.is_for(business_id, service_id)
                    && e.customer_id == customer_id
                    && e.status.is_waiting()
            })
            .map(|e| e.clone()))
    }

    async fn list_active(
        &self,
        business_id: &str,
        service_id: &str,
    ) -> Result<Vec<WaitingListEntry>> {
        let mut active: Vec<WaitingListEntry> = self
            .entries
            .iter()
            .filter(|e| e.is_for(business_id, service_id) && e.status == EntryStatus::Active)
            .map(|e| e.clone())
            .collect();
        active.sort_by(offer_order);
        Ok(active)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: EntryStatus,
        removal_reason: Option<RemovalReason>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut entry = self
            .entries
            .get_mut(&id)
            .ok_or(WaitlistError::EntryNotFound(id))?;
        entry.status = status;
        entry.removal_reason = removal_reason;
        entry.updated_at = at;
        Ok(())
    }
}

// ==================== Offer ====================

#[derive(Default)]
pub struct InMemoryOfferRepository {
    offers: DashMap<Uuid, Offer>,
    write_gate: Mutex<()>,
}

impl InMemoryOfferRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 全部 Offer（测试断言用）
    pub fn all(&self) -> Vec<Offer> {
        self.offers.iter().map(|o| o.clone()).collect()
    }
}

#[async_trait]
impl OfferRepository for InMemoryOfferRepository {
    async fn insert_pending(&self, offer: &Offer) -> Result<()> {
        let _gate = self.write_gate.lock();
        let slot = offer.slot();
        let committed = self.offers.iter().any(|o| {
            o.status == OfferStatus::Pending
                && o.is_same_slot(&offer.business_id, &offer.service_id, &slot)
        });
        if committed {
            return Err(WaitlistError::SlotAlreadyCommitted {
                slot_key: offer.slot_key(),
            });
        }
        self.offers.insert(offer.id, offer.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Offer>> {
        Ok(self.offers.get(&id).map(|o| o.clone()))
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<Offer>> {
        Ok(self
            .offers
            .iter()
            .find(|o| o.token == token)
            .map(|o| o.clone()))
    }

    async fn list_for_slot(
        &self,
        business_id: &str,
        service_id: &str,
        slot: &Slot,
    ) -> Result<Vec<Offer>> {
        let mut offers: Vec<Offer> = self
            .offers
            .iter()
            .filter(|o| o.is_same_slot(business_id, service_id, slot))
            .map(|o| o.clone())
            .collect();
        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn find_pending_for_entry(&self, entry_id: Uuid) -> Result<Option<Offer>> {
        Ok(self
            .offers
            .iter()
            .find(|o| o.entry_id == entry_id && o.status == OfferStatus::Pending)
            .map(|o| o.clone()))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        from: OfferStatus,
        to: OfferStatus,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        // get_mut 持有分片写锁，检查与写入是原子的
        let Some(mut offer) = self.offers.get_mut(&id) else {
            return Ok(false);
        };
        if offer.status != from {
            return Ok(false);
        }
        offer.status = to;
        if to.is_terminal() {
            offer.resolved_at = Some(at);
        }
        Ok(true)
    }

    async fn set_expiry_work(&self, id: Uuid, work_id: Uuid) -> Result<()> {
        if let Some(mut offer) = self.offers.get_mut(&id) {
            offer.expiry_work_id = Some(work_id);
        }
        Ok(())
    }

    async fn set_notification_attempts(&self, id: Uuid, attempts: i32) -> Result<()> {
        if let Some(mut offer) = self.offers.get_mut(&id) {
            offer.notification_attempts = attempts;
        }
        Ok(())
    }
}

// ==================== 通知任务 ====================

#[derive(Default)]
pub struct InMemoryNotificationJobRepository {
    jobs: DashMap<String, NotificationJob>,
}

impl InMemoryNotificationJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationJobRepository for InMemoryNotificationJobRepository {
    async fn insert_if_absent(&self, job: &NotificationJob) -> Result<bool> {
        match self.jobs.entry(job.idempotency_key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, idempotency_key: &str) -> Result<Option<NotificationJob>> {
        Ok(self.jobs.get(idempotency_key).map(|j| j.clone()))
    }

    async fn update(&self, job: &NotificationJob) -> Result<()> {
        self.jobs.insert(job.idempotency_key.clone(), job.clone());
        Ok(())
    }
}

// ==================== 屏蔽名单 ====================

#[derive(Default)]
pub struct InMemorySuppressionRepository {
    entries: DashMap<(Channel, String), SuppressionEntry>,
    soft_bounces: DashMap<(Channel, String), u32>,
}

impl InMemorySuppressionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuppressionRepository for InMemorySuppressionRepository {
    async fn insert_if_absent(&self, entry: &SuppressionEntry) -> Result<bool> {
        match self
            .entries
            .entry((entry.channel, entry.address_hash.clone()))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(true)
            }
        }
    }

    async fn find(&self, channel: Channel, address_hash: &str) -> Result<Option<SuppressionEntry>> {
        Ok(self
            .entries
            .get(&(channel, address_hash.to_string()))
            .map(|e| e.clone()))
    }

    async fn increment_soft_bounce(
        &self,
        channel: Channel,
        address_hash: &str,
        _at: DateTime<Utc>,
    ) -> Result<u32> {
        let mut count = self
            .soft_bounces
            .entry((channel, address_hash.to_string()))
            .or_insert(0);
        *count += 1;
        Ok(*count)
    }
}

// ==================== 审计日志 ====================

#[derive(Default)]
pub struct InMemoryAuditRepository {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl AuditRepository for InMemoryAuditRepository {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn list_by_subject(&self, subject_id: &str) -> Result<Vec<AuditRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| r.subject_id == subject_id)
            .cloned()
            .collect())
    }
}

// ==================== 调度任务 ====================

#[derive(Default)]
pub struct InMemoryScheduledWorkRepository {
    items: DashMap<Uuid, ScheduledWork>,
    claim_gate: Mutex<()>,
}

impl InMemoryScheduledWorkRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 尚未执行的任务（测试断言用）
    pub fn pending(&self) -> Vec<ScheduledWork> {
        let mut items: Vec<ScheduledWork> = self
            .items
            .iter()
            .filter(|w| w.status == WorkStatus::Pending)
            .map(|w| w.clone())
            .collect();
        items.sort_by_key(|w| w.run_at);
        items
    }
}

#[async_trait]
impl ScheduledWorkRepository for InMemoryScheduledWorkRepository {
    async fn insert(&self, work: &ScheduledWork) -> Result<()> {
        self.items.insert(work.id, work.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ScheduledWork>> {
        Ok(self.items.get(&id).map(|w| w.clone()))
    }

    async fn cancel(&self, id: Uuid) -> Result<bool> {
        let Some(mut work) = self.items.get_mut(&id) else {
            return Ok(false);
        };
        if work.status != WorkStatus::Pending {
            return Ok(false);
        }
        work.status = WorkStatus::Cancelled;
        Ok(true)
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledWork>> {
        let _gate = self.claim_gate.lock();
        let stale_before = now - Duration::seconds(CLAIM_LEASE_SECS);

        let mut due: Vec<ScheduledWork> = self
            .items
            .iter()
            .filter(|w| match w.status {
                WorkStatus::Pending => w.run_at <= now,
                WorkStatus::Claimed => w.claimed_at.is_some_and(|at| at < stale_before),
                _ => false,
            })
            .map(|w| w.clone())
            .collect();
        due.sort_by_key(|w| w.run_at);
        due.truncate(usize::try_from(limit).unwrap_or(0));

        for work in &mut due {
            work.status = WorkStatus::Claimed;
            work.claimed_at = Some(now);
            self.items.insert(work.id, work.clone());
        }
        Ok(due)
    }

    async fn complete(&self, id: Uuid, _at: DateTime<Utc>) -> Result<()> {
        if let Some(mut work) = self.items.get_mut(&id) {
            work.status = WorkStatus::Done;
        }
        Ok(())
    }

    async fn reschedule(&self, id: Uuid, run_at: DateTime<Utc>, attempts: i32) -> Result<()> {
        if let Some(mut work) = self.items.get_mut(&id) {
            work.status = WorkStatus::Pending;
            work.run_at = run_at;
            work.attempts = attempts;
            work.claimed_at = None;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid, _at: DateTime<Utc>) -> Result<()> {
        if let Some(mut work) = self.items.get_mut(&id) {
            work.status = WorkStatus::Failed;
        }
        Ok(())
    }
}

/// 一组内存仓储，便于在测试中直接断言存储状态
#[derive(Clone, Default)]
pub struct InMemoryStores {
    pub entries: Arc<InMemoryWaitingListRepository>,
    pub offers: Arc<InMemoryOfferRepository>,
    pub jobs: Arc<InMemoryNotificationJobRepository>,
    pub suppressions: Arc<InMemorySuppressionRepository>,
    pub audit: Arc<InMemoryAuditRepository>,
    pub work: Arc<InMemoryScheduledWorkRepository>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }
}
