//! 候补队列
//!
//! 每个 (business, service) 一条有序队列。出队顺序为 priority 降序，
//! 同分按加入时间先后。priority 只在加入时计算一次。
//!
//! 记录状态只能经由本模块变更：
//!
//! ```text
//! Active ──offer──▶ Notified ──accept──▶ Booked
//!   ▲                  │
//!   └─decline/expire───┘
//! Active | Notified ──leave/remove──▶ Removed
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;
use waitlist_shared::observability::metrics;

use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::directory::CustomerDirectory;
use crate::error::{Result, WaitlistError};
use crate::models::{
    EntryStatus, PriorityWeights, QueuePosition, RemovalReason, WaitingListEntry,
};
use crate::repository::WaitingListRepository;

fn can_transition(from: EntryStatus, to: EntryStatus) -> bool {
    use EntryStatus::*;
    matches!(
        (from, to),
        (Active, Notified)
            | (Notified, Active)
            | (Notified, Booked)
            | (Active, Removed)
            | (Notified, Removed)
    )
}

pub struct WaitingListQueue {
    repo: Arc<dyn WaitingListRepository>,
    directory: Arc<dyn CustomerDirectory>,
    weights: PriorityWeights,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl WaitingListQueue {
    pub fn new(
        repo: Arc<dyn WaitingListRepository>,
        directory: Arc<dyn CustomerDirectory>,
        weights: PriorityWeights,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            directory,
            weights,
            audit,
            clock,
        }
    }

    /// 加入候补队列
    ///
    /// 同一顾客在同一 (business, service) 已有 Active/Notified 记录时返回 `DuplicateEntry`。
    pub async fn join(
        &self,
        customer_id: &str,
        business_id: &str,
        service_id: &str,
    ) -> Result<WaitingListEntry> {
        for (field, value) in [
            ("customer_id", customer_id),
            ("business_id", business_id),
            ("service_id", service_id),
        ] {
            if value.trim().is_empty() {
                return Err(WaitlistError::Validation(format!("{field} 不能为空")));
            }
        }

        if self
            .repo
            .find_waiting(business_id, service_id, customer_id)
            .await?
            .is_some()
        {
            return Err(WaitlistError::DuplicateEntry {
                customer_id: customer_id.to_string(),
                business_id: business_id.to_string(),
                service_id: service_id.to_string(),
            });
        }

        let history = self.directory.history(customer_id, business_id).await?;
        let priority = self.weights.score(&history);
        let entry = WaitingListEntry::new(
            business_id,
            service_id,
            customer_id,
            priority,
            self.clock.now(),
        );
        self.repo.insert(&entry).await?;

        metrics::record_join();
        info!(
            entry_id = %entry.id,
            customer_id = %customer_id,
            business_id = %business_id,
            service_id = %service_id,
            priority,
            "顾客加入候补队列"
        );
        self.audit
            .entry_transition(&entry, None, EntryStatus::Active)
            .await;

        Ok(entry)
    }

    pub async fn get(&self, entry_id: Uuid) -> Result<WaitingListEntry> {
        self.repo
            .get(entry_id)
            .await?
            .ok_or(WaitlistError::EntryNotFound(entry_id))
    }

    /// 优先级最高的 Active 记录
    pub async fn next_eligible(
        &self,
        business_id: &str,
        service_id: &str,
    ) -> Result<Option<WaitingListEntry>> {
        self.next_eligible_excluding(business_id, service_id, &HashSet::new())
            .await
    }

    /// 跳过 `excluded` 中的记录后优先级最高的 Active 记录
    pub async fn next_eligible_excluding(
        &self,
        business_id: &str,
        service_id: &str,
        excluded: &HashSet<Uuid>,
    ) -> Result<Option<WaitingListEntry>> {
        let active = self.repo.list_active(business_id, service_id).await?;
        let next = active.into_iter().find(|e| !excluded.contains(&e.id));
        debug!(
            business_id = %business_id,
            service_id = %service_id,
            excluded = excluded.len(),
            next = ?next.as_ref().map(|e| e.id),
            "选取下一位候补顾客"
        );
        Ok(next)
    }

    /// Active 记录按出队顺序排列，位置从 1 开始
    pub async fn snapshot(&self, business_id: &str, service_id: &str) -> Result<Vec<QueuePosition>> {
        let active = self.repo.list_active(business_id, service_id).await?;
        Ok(active
            .into_iter()
            .enumerate()
            .map(|(idx, entry)| QueuePosition {
                position: idx + 1,
                entry,
            })
            .collect())
    }

    pub async fn mark_notified(&self, entry: &WaitingListEntry) -> Result<WaitingListEntry> {
        self.transition(entry, EntryStatus::Notified, None).await
    }

    /// 重新入队；priority 与加入时间不变，因此保持原来的位置
    pub async fn mark_active(&self, entry: &WaitingListEntry) -> Result<WaitingListEntry> {
        self.transition(entry, EntryStatus::Active, None).await
    }

    pub async fn mark_booked(&self, entry: &WaitingListEntry) -> Result<WaitingListEntry> {
        self.transition(entry, EntryStatus::Booked, None).await
    }

    pub async fn remove(
        &self,
        entry: &WaitingListEntry,
        reason: RemovalReason,
    ) -> Result<WaitingListEntry> {
        self.transition(entry, EntryStatus::Removed, Some(reason))
            .await
    }

    async fn transition(
        &self,
        entry: &WaitingListEntry,
        to: EntryStatus,
        reason: Option<RemovalReason>,
    ) -> Result<WaitingListEntry> {
        let from = entry.status;
        if !can_transition(from, to) {
            return Err(WaitlistError::Internal(format!(
                "候补记录状态不允许从 {from:?} 变为 {to:?}: entry_id={}",
                entry.id
            )));
        }

        let now = self.clock.now();
        self.repo.update_status(entry.id, to, reason, now).await?;

        let mut updated = entry.clone();
        updated.status = to;
        updated.removal_reason = reason;
        updated.updated_at = now;

        info!(
            entry_id = %entry.id,
            customer_id = %entry.customer_id,
            from = ?from,
            to = ?to,
            "候补记录状态变更"
        );
        self.audit.entry_transition(&updated, Some(from), to).await;

        Ok(updated)
    }
}
