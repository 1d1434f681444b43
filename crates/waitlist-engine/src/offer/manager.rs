//! Offer 生命周期管理
//!
//! 状态机（初始 Pending，其余均为终态）：
//!
//! | 变更 | 触发 | 效果 |
//! |---|---|---|
//! | (无) → Pending | 时段空出且有可选顾客 | 记录标记 Notified，登记到期任务，发送邀约 |
//! | Pending → Accepted | 保留期内凭证接受 | 记录标记 Booked，产出预约草稿，取消同时段其他 Pending |
//! | Pending → Declined | 顾客拒绝 | 记录回到 Active，同一时段发给下一位 |
//! | Pending → Expired | 保留期到期 | 记录回到 Active，同一时段发给下一位 |
//! | Pending → Cancelled | 同时段其他 Offer 被接受，或顾客离开队列 | 记录回到 Active（离开时为 Removed） |
//!
//! 同一 (business, service) 的所有变更都在互斥锁内完成；通知在释放锁之后派发，
//! 派发失败不影响已经完成的状态变更。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use waitlist_shared::observability::metrics;

use super::token::generate_token;
use crate::audit::AuditLog;
use crate::booking::BookingSink;
use crate::clock::Clock;
use crate::directory::CustomerDirectory;
use crate::dispatch::NotificationDispatcher;
use crate::error::{Result, WaitlistError};
use crate::lock::LockManager;
use crate::models::{
    AuditSubject, BookingDraft, Decision, EntryStatus, EventType, NotificationEvent,
    NotificationJob, Offer, OfferResolution, OfferStatus, RemovalReason, Slot, WaitingListEntry,
    WorkKind,
};
use crate::queue::WaitingListQueue;
use crate::repository::OfferRepository;
use crate::scheduler::Scheduler;

/// 锁内产生、释放锁后派发的通知
struct Notice {
    job: NotificationJob,
    /// 邀约通知需要回写 Offer 的发送轮次
    offer_id: Option<Uuid>,
}

#[derive(Default)]
struct Effects {
    notices: Vec<Notice>,
}

impl Effects {
    fn notify(&mut self, job: NotificationJob, offer_id: Option<Uuid>) {
        self.notices.push(Notice { job, offer_id });
    }
}

/// 锁内的处理结果；到期需要在派发通知后再以错误返回
enum Resolved {
    Done(OfferResolution),
    Expired(Uuid),
}

pub struct OfferLifecycleManager {
    offers: Arc<dyn OfferRepository>,
    queue: Arc<WaitingListQueue>,
    dispatcher: Arc<NotificationDispatcher>,
    scheduler: Arc<Scheduler>,
    locks: Arc<LockManager>,
    directory: Arc<dyn CustomerDirectory>,
    bookings: Arc<dyn BookingSink>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    hold: Duration,
}

impl OfferLifecycleManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        offers: Arc<dyn OfferRepository>,
        queue: Arc<WaitingListQueue>,
        dispatcher: Arc<NotificationDispatcher>,
        scheduler: Arc<Scheduler>,
        locks: Arc<LockManager>,
        directory: Arc<dyn CustomerDirectory>,
        bookings: Arc<dyn BookingSink>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        hold: Duration,
    ) -> Self {
        Self {
            offers,
            queue,
            dispatcher,
            scheduler,
            locks,
            directory,
            bookings,
            audit,
            clock,
            hold,
        }
    }

    pub async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>> {
        self.offers.get(offer_id).await
    }

    pub async fn offers_for_slot(
        &self,
        business_id: &str,
        service_id: &str,
        slot: &Slot,
    ) -> Result<Vec<Offer>> {
        self.offers.list_for_slot(business_id, service_id, slot).await
    }

    /// 时段空出：选出下一位顾客并创建 Offer
    #[instrument(
        skip(self, slot),
        fields(slot_start = %slot.start, slot_end = %slot.end)
    )]
    pub async fn notify_slot_available(
        &self,
        business_id: &str,
        service_id: &str,
        slot: Slot,
    ) -> Result<Offer> {
        if !slot.is_valid() {
            return Err(WaitlistError::Validation(format!(
                "时段结束时间必须晚于开始时间: {} - {}",
                slot.start, slot.end
            )));
        }

        let mut effects = Effects::default();
        let guard = self.locks.acquire(business_id, service_id).await?;
        let result = self
            .offer_slot_locked(business_id, service_id, &slot, &mut effects)
            .await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放锁失败");
        }
        self.flush(effects).await;

        result
    }

    async fn offer_slot_locked(
        &self,
        business_id: &str,
        service_id: &str,
        slot: &Slot,
        effects: &mut Effects,
    ) -> Result<Offer> {
        let existing = self
            .offers
            .list_for_slot(business_id, service_id, slot)
            .await?;
        if existing
            .iter()
            .any(|o| matches!(o.status, OfferStatus::Pending | OfferStatus::Accepted))
        {
            warn!(slot_key = %slot.key(business_id, service_id), "时段已被占用，拒绝重复创建 Offer");
            return Err(WaitlistError::SlotAlreadyCommitted {
                slot_key: slot.key(business_id, service_id),
            });
        }

        let excluded = answered_entries(&existing);
        let entry = self
            .queue
            .next_eligible_excluding(business_id, service_id, &excluded)
            .await?
            .ok_or_else(|| WaitlistError::NoEligibleCustomers {
                business_id: business_id.to_string(),
                service_id: service_id.to_string(),
            })?;

        self.create_offer_locked(&entry, slot, "slot_available", effects)
            .await
    }

    async fn create_offer_locked(
        &self,
        entry: &WaitingListEntry,
        slot: &Slot,
        cause: &str,
        effects: &mut Effects,
    ) -> Result<Offer> {
        let now = self.clock.now();
        let offer_id = Uuid::now_v7();
        let hold_expires_at = now + self.hold;

        // 先登记到期任务再写入 Offer：只要 Pending Offer 存在，就一定有任务负责让它结束
        let work_id = self
            .scheduler
            .schedule_at(hold_expires_at, WorkKind::ExpireOffer { offer_id })
            .await?;

        let offer = Offer {
            id: offer_id,
            token: generate_token(),
            entry_id: entry.id,
            customer_id: entry.customer_id.clone(),
            business_id: entry.business_id.clone(),
            service_id: entry.service_id.clone(),
            slot_start: slot.start,
            slot_end: slot.end,
            created_at: now,
            hold_expires_at,
            status: OfferStatus::Pending,
            notification_attempts: 0,
            resolved_at: None,
            expiry_work_id: Some(work_id),
        };

        if let Err(e) = self.offers.insert_pending(&offer).await {
            self.cancel_expiry(&offer).await;
            return Err(e);
        }
        if let Err(e) = self.queue.mark_notified(entry).await {
            self.roll_back_offer(&offer, &e).await;
            return Err(e);
        }

        metrics::record_offer_created();
        info!(
            offer_id = %offer.id,
            entry_id = %entry.id,
            customer_id = %offer.customer_id,
            hold_expires_at = %offer.hold_expires_at,
            "Offer 已创建"
        );
        self.audit
            .offer_transition(&offer, None, OfferStatus::Pending, cause)
            .await;

        let event = self
            .offer_event(EventType::OfferCreated, &offer)
            .with_data(json!({
                "offer_id": offer.id,
                "token": offer.token,
                "business_id": offer.business_id,
                "service_id": offer.service_id,
                "slot_start": offer.slot_start,
                "slot_end": offer.slot_end,
                "hold_expires_at": offer.hold_expires_at,
            }));
        effects.notify(NotificationJob::new(event, now), Some(offer.id));

        Ok(offer)
    }

    /// 顾客答复 Offer
    ///
    /// 未知凭证返回 `OfferNotFound`，已结束的 Offer 返回 `OfferNoLongerAvailable`，
    /// 保留期已过的 Offer 先按到期处理再返回 `OfferExpired`。
    #[instrument(skip(self, token))]
    pub async fn resolve_offer(&self, token: &str, decision: Decision) -> Result<OfferResolution> {
        if token.trim().is_empty() {
            return Err(WaitlistError::OfferNotFound);
        }
        let offer = self
            .offers
            .find_by_token(token)
            .await?
            .ok_or(WaitlistError::OfferNotFound)?;

        let mut effects = Effects::default();
        let guard = self
            .locks
            .acquire(&offer.business_id, &offer.service_id)
            .await?;
        let result = self.resolve_locked(offer.id, decision, &mut effects).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放锁失败");
        }
        self.flush(effects).await;

        match result? {
            Resolved::Done(resolution) => Ok(resolution),
            Resolved::Expired(offer_id) => Err(WaitlistError::OfferExpired(offer_id)),
        }
    }

    async fn resolve_locked(
        &self,
        offer_id: Uuid,
        decision: Decision,
        effects: &mut Effects,
    ) -> Result<Resolved> {
        // 锁内重新读取，拿到最新状态
        let offer = self
            .offers
            .get(offer_id)
            .await?
            .ok_or(WaitlistError::OfferNotFound)?;

        if offer.status.is_terminal() {
            return Err(WaitlistError::OfferNoLongerAvailable {
                offer_id,
                status: offer.status.to_string(),
            });
        }

        if offer.is_hold_elapsed(self.clock.now()) {
            info!(offer_id = %offer.id, "答复时保留期已过，按到期处理");
            self.expire_locked(&offer, effects).await?;
            return Ok(Resolved::Expired(offer.id));
        }

        let resolution = match decision {
            Decision::Accept => self.accept_locked(&offer, effects).await?,
            Decision::Decline => self.decline_locked(&offer, effects).await?,
        };
        Ok(Resolved::Done(resolution))
    }

    async fn accept_locked(&self, offer: &Offer, effects: &mut Effects) -> Result<OfferResolution> {
        let policy = self
            .directory
            .cancellation_policy(&offer.business_id, &offer.service_id)
            .await?;

        self.transition(offer, OfferStatus::Accepted).await?;
        self.cancel_expiry(offer).await;

        let entry = self.queue.get(offer.entry_id).await?;
        self.queue.mark_booked(&entry).await?;

        metrics::record_offer_resolved("accepted");
        info!(offer_id = %offer.id, customer_id = %offer.customer_id, "Offer 已接受");
        self.audit
            .offer_transition(
                offer,
                Some(OfferStatus::Pending),
                OfferStatus::Accepted,
                "customer_accepted",
            )
            .await;

        self.cancel_siblings_locked(offer, effects).await?;

        let now = self.clock.now();
        let draft = BookingDraft {
            offer_id: offer.id,
            entry_id: offer.entry_id,
            customer_id: offer.customer_id.clone(),
            business_id: offer.business_id.clone(),
            service_id: offer.service_id.clone(),
            slot: offer.slot(),
            cancellation_policy: policy,
            created_at: now,
        };

        if let Err(e) = self.bookings.submit(&draft).await {
            error!(offer_id = %offer.id, error = %e, "提交预约草稿失败");
            self.audit
                .append(
                    AuditSubject::Offer,
                    offer.id.to_string(),
                    "booking_submit_failed",
                    json!({ "error": e.to_string() }),
                )
                .await;
        }

        let event = self
            .offer_event(EventType::BookingConfirmed, offer)
            .with_data(json!({
                "offer_id": offer.id,
                "business_id": offer.business_id,
                "service_id": offer.service_id,
                "slot_start": offer.slot_start,
                "slot_end": offer.slot_end,
                "cancellation_policy": policy,
            }));
        effects.notify(NotificationJob::new(event, now), None);

        Ok(OfferResolution::Booked(draft))
    }

    /// 同一时段的其他 Pending Offer 全部取消，对应记录回到队列等待以后的时段
    async fn cancel_siblings_locked(&self, accepted: &Offer, effects: &mut Effects) -> Result<()> {
        let siblings = self
            .offers
            .list_for_slot(&accepted.business_id, &accepted.service_id, &accepted.slot())
            .await?;

        for sibling in siblings
            .iter()
            .filter(|o| o.id != accepted.id && o.status == OfferStatus::Pending)
        {
            if !self
                .offers
                .compare_and_set_status(
                    sibling.id,
                    OfferStatus::Pending,
                    OfferStatus::Cancelled,
                    self.clock.now(),
                )
                .await?
            {
                continue;
            }
            self.cancel_expiry(sibling).await;
            self.requeue_entry(sibling.entry_id).await?;

            metrics::record_offer_resolved("cancelled");
            info!(offer_id = %sibling.id, accepted_offer_id = %accepted.id, "同时段 Offer 已取消");
            self.audit
                .offer_transition(
                    sibling,
                    Some(OfferStatus::Pending),
                    OfferStatus::Cancelled,
                    "sibling_accepted",
                )
                .await;

            let event = self.offer_event(EventType::OfferCancelled, sibling);
            effects.notify(NotificationJob::new(event, self.clock.now()), None);
        }
        Ok(())
    }

    async fn decline_locked(&self, offer: &Offer, effects: &mut Effects) -> Result<OfferResolution> {
        self.transition(offer, OfferStatus::Declined).await?;
        self.cancel_expiry(offer).await;
        self.requeue_entry(offer.entry_id).await?;

        metrics::record_offer_resolved("declined");
        info!(offer_id = %offer.id, customer_id = %offer.customer_id, "Offer 已拒绝");
        self.audit
            .offer_transition(
                offer,
                Some(OfferStatus::Pending),
                OfferStatus::Declined,
                "customer_declined",
            )
            .await;

        let next_offer = self.offer_next_locked(offer, effects).await;
        Ok(OfferResolution::Declined { next_offer })
    }

    /// 到期任务触发；返回是否确实发生了到期
    #[instrument(skip(self))]
    pub async fn expire_offer(&self, offer_id: Uuid) -> Result<bool> {
        let Some(offer) = self.offers.get(offer_id).await? else {
            warn!(offer_id = %offer_id, "到期任务对应的 Offer 不存在");
            return Ok(false);
        };

        let mut effects = Effects::default();
        let guard = self
            .locks
            .acquire(&offer.business_id, &offer.service_id)
            .await?;
        let result = self.expire_by_timer_locked(offer_id, &mut effects).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放锁失败");
        }
        self.flush(effects).await;

        result
    }

    async fn expire_by_timer_locked(&self, offer_id: Uuid, effects: &mut Effects) -> Result<bool> {
        let Some(offer) = self.offers.get(offer_id).await? else {
            return Ok(false);
        };
        if offer.status != OfferStatus::Pending {
            debug!(offer_id = %offer_id, status = %offer.status, "Offer 已结束，忽略到期任务");
            return Ok(false);
        }

        if !offer.is_hold_elapsed(self.clock.now()) {
            // 任务提前触发（时钟偏差），按原到期时间重新登记
            // 登记失败时返回错误，由 Worker 重试当前任务
            let work_id = self
                .scheduler
                .schedule_at(offer.hold_expires_at, WorkKind::ExpireOffer { offer_id })
                .await?;
            if let Err(e) = self.offers.set_expiry_work(offer_id, work_id).await {
                // 新任务已登记，旧编号只影响提前取消
                warn!(offer_id = %offer_id, work_id = %work_id, error = %e, "回写到期任务编号失败");
            }
            return Ok(false);
        }

        self.expire_locked(&offer, effects).await?;
        Ok(true)
    }

    async fn expire_locked(&self, offer: &Offer, effects: &mut Effects) -> Result<()> {
        self.transition(offer, OfferStatus::Expired).await?;
        self.cancel_expiry(offer).await;
        self.requeue_entry(offer.entry_id).await?;

        metrics::record_offer_resolved("expired");
        info!(offer_id = %offer.id, customer_id = %offer.customer_id, "Offer 已过期");
        self.audit
            .offer_transition(
                offer,
                Some(OfferStatus::Pending),
                OfferStatus::Expired,
                "hold_elapsed",
            )
            .await;

        let event = self.offer_event(EventType::OfferExpired, offer);
        effects.notify(NotificationJob::new(event, self.clock.now()), None);

        self.offer_next_locked(offer, effects).await;
        Ok(())
    }

    /// 顾客离开或被商家移除
    ///
    /// 已是 Booked/Removed 的记录直接返回；处于 Notified 时取消其 Offer，
    /// 并把时段发给下一位。
    #[instrument(skip(self))]
    pub async fn withdraw_entry(
        &self,
        entry_id: Uuid,
        reason: RemovalReason,
    ) -> Result<WaitingListEntry> {
        let entry = self.queue.get(entry_id).await?;
        if !entry.status.is_waiting() {
            debug!(entry_id = %entry_id, status = ?entry.status, "记录已不在队列中，忽略");
            return Ok(entry);
        }

        let mut effects = Effects::default();
        let guard = self
            .locks
            .acquire(&entry.business_id, &entry.service_id)
            .await?;
        let result = self.withdraw_locked(entry_id, reason, &mut effects).await;
        if let Err(e) = guard.release().await {
            warn!(error = %e, "释放锁失败");
        }
        self.flush(effects).await;

        result
    }

    async fn withdraw_locked(
        &self,
        entry_id: Uuid,
        reason: RemovalReason,
        effects: &mut Effects,
    ) -> Result<WaitingListEntry> {
        let entry = self.queue.get(entry_id).await?;
        if !entry.status.is_waiting() {
            return Ok(entry);
        }

        let live_offer = if entry.status == EntryStatus::Notified {
            self.offers.find_pending_for_entry(entry_id).await?
        } else {
            None
        };

        let mut cancelled = None;
        if let Some(offer) = live_offer {
            if self
                .offers
                .compare_and_set_status(
                    offer.id,
                    OfferStatus::Pending,
                    OfferStatus::Cancelled,
                    self.clock.now(),
                )
                .await?
            {
                self.cancel_expiry(&offer).await;
                metrics::record_offer_resolved("cancelled");
                info!(offer_id = %offer.id, entry_id = %entry_id, "顾客离开队列，取消其 Offer");
                self.audit
                    .offer_transition(
                        &offer,
                        Some(OfferStatus::Pending),
                        OfferStatus::Cancelled,
                        "entry_withdrawn",
                    )
                    .await;
                cancelled = Some(offer);
            }
        }

        let removed = self.queue.remove(&entry, reason).await?;

        if let Some(offer) = cancelled {
            self.offer_next_locked(&offer, effects).await;
        }
        Ok(removed)
    }

    /// 把 `previous` 的时段发给下一位没有收到过该时段 Offer 的顾客
    ///
    /// 队列耗尽时返回 None，等待下一次时段事件。失败只记录日志，
    /// 不影响已完成的拒绝/到期。
    async fn offer_next_locked(&self, previous: &Offer, effects: &mut Effects) -> Option<Uuid> {
        match self.try_offer_next_locked(previous, effects).await {
            Ok(next) => next,
            Err(e) => {
                error!(
                    offer_id = %previous.id,
                    slot_key = %previous.slot_key(),
                    error = %e,
                    "为下一位顾客创建 Offer 失败"
                );
                self.audit
                    .append(
                        AuditSubject::Offer,
                        previous.id.to_string(),
                        "reoffer_failed",
                        json!({ "slot_key": previous.slot_key(), "error": e.to_string() }),
                    )
                    .await;
                None
            }
        }
    }

    async fn try_offer_next_locked(
        &self,
        previous: &Offer,
        effects: &mut Effects,
    ) -> Result<Option<Uuid>> {
        let slot = previous.slot();
        let history = self
            .offers
            .list_for_slot(&previous.business_id, &previous.service_id, &slot)
            .await?;
        if history
            .iter()
            .any(|o| matches!(o.status, OfferStatus::Pending | OfferStatus::Accepted))
        {
            return Ok(None);
        }

        let excluded = answered_entries(&history);
        let Some(entry) = self
            .queue
            .next_eligible_excluding(&previous.business_id, &previous.service_id, &excluded)
            .await?
        else {
            info!(slot_key = %previous.slot_key(), "候补队列已无可选顾客");
            return Ok(None);
        };

        let offer = self
            .create_offer_locked(&entry, &slot, "reoffer", effects)
            .await?;
        Ok(Some(offer.id))
    }

    /// Pending -> `to`，失败时返回当前状态
    async fn transition(&self, offer: &Offer, to: OfferStatus) -> Result<()> {
        if self
            .offers
            .compare_and_set_status(offer.id, OfferStatus::Pending, to, self.clock.now())
            .await?
        {
            return Ok(());
        }

        let status = self
            .offers
            .get(offer.id)
            .await?
            .map(|o| o.status.to_string())
            .unwrap_or_else(|| "UNKNOWN".to_string());
        Err(WaitlistError::OfferNoLongerAvailable {
            offer_id: offer.id,
            status,
        })
    }

    /// 创建中途失败：撤回刚写入的 Offer，记录保持原状态
    ///
    /// 撤回本身失败时到期任务仍在，保留期结束后按正常到期处理。
    async fn roll_back_offer(&self, offer: &Offer, cause: &WaitlistError) {
        warn!(offer_id = %offer.id, entry_id = %offer.entry_id, error = %cause, "创建 Offer 失败，撤回");
        match self
            .offers
            .compare_and_set_status(
                offer.id,
                OfferStatus::Pending,
                OfferStatus::Cancelled,
                self.clock.now(),
            )
            .await
        {
            Ok(true) => self.cancel_expiry(offer).await,
            Ok(false) => {}
            Err(e) => {
                error!(offer_id = %offer.id, error = %e, "撤回 Offer 失败，等待到期任务处理");
            }
        }
        self.audit
            .append(
                AuditSubject::Offer,
                offer.id.to_string(),
                "offer_create_rolled_back",
                json!({
                    "slot_key": offer.slot_key(),
                    "entry_id": offer.entry_id,
                    "error": cause.to_string(),
                }),
            )
            .await;
    }

    async fn cancel_expiry(&self, offer: &Offer) {
        let Some(work_id) = offer.expiry_work_id else {
            return;
        };
        if let Err(e) = self.scheduler.cancel(work_id).await {
            // 任务残留也无妨：到期处理会发现 Offer 已结束
            warn!(offer_id = %offer.id, work_id = %work_id, error = %e, "取消到期任务失败");
        }
    }

    async fn requeue_entry(&self, entry_id: Uuid) -> Result<()> {
        let entry = self.queue.get(entry_id).await?;
        if entry.status == EntryStatus::Notified {
            self.queue.mark_active(&entry).await?;
        } else {
            debug!(entry_id = %entry_id, status = ?entry.status, "记录不处于 Notified，不重新入队");
        }
        Ok(())
    }

    fn offer_event(&self, event_type: EventType, offer: &Offer) -> NotificationEvent {
        NotificationEvent::new(
            event_type,
            offer.business_id.clone(),
            offer.customer_id.clone(),
            offer.id.to_string(),
        )
        .with_data(json!({
            "offer_id": offer.id,
            "business_id": offer.business_id,
            "service_id": offer.service_id,
            "slot_start": offer.slot_start,
            "slot_end": offer.slot_end,
        }))
    }

    /// 释放锁之后派发通知
    async fn flush(&self, effects: Effects) {
        for notice in effects.notices {
            let key = notice.job.idempotency_key.clone();
            match self.dispatcher.dispatch(notice.job).await {
                Ok(result) => {
                    if let Some(offer_id) = notice.offer_id {
                        if let Err(e) = self
                            .offers
                            .set_notification_attempts(offer_id, result.attempts)
                            .await
                        {
                            warn!(offer_id = %offer_id, error = %e, "回写通知轮次失败");
                        }
                    }
                }
                Err(e) => {
                    error!(idempotency_key = %key, error = %e, "通知派发异常");
                    self.audit
                        .append(
                            AuditSubject::Notification,
                            key,
                            "dispatch_error",
                            json!({ "offer_id": notice.offer_id, "error": e.to_string() }),
                        )
                        .await;
                }
            }
        }
    }
}

/// 已经拒绝或错过该时段的记录，不再收到同一时段的 Offer
fn answered_entries(offers: &[Offer]) -> HashSet<Uuid> {
    offers
        .iter()
        .filter(|o| matches!(o.status, OfferStatus::Declined | OfferStatus::Expired))
        .map(|o| o.entry_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::booking::{InMemoryBookingSink, MockBookingSink};
    use crate::clock::ManualClock;
    use crate::directory::InMemoryDirectory;
    use crate::dispatch::{QuietHours, SuppressionRegistry};
    use crate::lock::LockConfig;
    use crate::models::{CustomerContact, PriorityWeights, ScheduledWork, WorkStatus};
    use crate::repository::{
        InMemoryAuditRepository, InMemoryNotificationJobRepository, InMemoryOfferRepository,
        InMemoryScheduledWorkRepository, InMemorySuppressionRepository,
        InMemoryWaitingListRepository, MockOfferRepository, MockScheduledWorkRepository,
        ScheduledWorkRepository, WaitingListRepository,
    };
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use waitlist_shared::retry::RetryPolicy;

    struct Fixture {
        manager: OfferLifecycleManager,
        queue: Arc<WaitingListQueue>,
        offers: Arc<InMemoryOfferRepository>,
        clock: Arc<ManualClock>,
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap()
    }

    fn slot() -> Slot {
        let s = Utc.with_ymd_and_hms(2026, 3, 12, 15, 0, 0).unwrap();
        Slot::new(s, s + Duration::minutes(60))
    }

    fn build(
        offers: Arc<dyn OfferRepository>,
        bookings: Arc<dyn BookingSink>,
    ) -> (OfferLifecycleManager, Arc<WaitingListQueue>, Arc<ManualClock>) {
        build_with(
            offers,
            bookings,
            Arc::new(InMemoryWaitingListRepository::new()),
            Arc::new(InMemoryScheduledWorkRepository::new()),
        )
    }

    fn build_with(
        offers: Arc<dyn OfferRepository>,
        bookings: Arc<dyn BookingSink>,
        entries: Arc<dyn WaitingListRepository>,
        work: Arc<dyn ScheduledWorkRepository>,
    ) -> (OfferLifecycleManager, Arc<WaitingListQueue>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let audit = Arc::new(AuditLog::new(
            Arc::new(InMemoryAuditRepository::new()),
            dyn_clock.clone(),
        ));
        let directory = Arc::new(InMemoryDirectory::new());
        for c in ["a", "b", "c"] {
            directory.upsert_contact(CustomerContact::new(c).with_email(format!("{c}@example.com")));
        }
        let queue = Arc::new(WaitingListQueue::new(
            entries,
            directory.clone(),
            PriorityWeights {
                visit_weight: 10.0,
                spend_weight: 0.01,
            },
            audit.clone(),
            dyn_clock.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(work, dyn_clock.clone()));
        let suppression = Arc::new(SuppressionRegistry::new(
            Arc::new(InMemorySuppressionRepository::new()),
            audit.clone(),
            dyn_clock.clone(),
            3,
        ));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            Arc::new(InMemoryNotificationJobRepository::new()),
            directory.clone(),
            suppression,
            scheduler.clone(),
            audit.clone(),
            dyn_clock.clone(),
            QuietHours::new(NaiveTime::MIN, NaiveTime::MIN),
            RetryPolicy::default(),
        ));
        let manager = OfferLifecycleManager::new(
            offers,
            queue.clone(),
            dispatcher,
            scheduler,
            Arc::new(LockManager::local(LockConfig::default())),
            directory,
            bookings,
            audit,
            dyn_clock,
            Duration::minutes(120),
        );
        (manager, queue, clock)
    }

    fn fixture() -> Fixture {
        let offers = Arc::new(InMemoryOfferRepository::new());
        let (manager, queue, clock) =
            build(offers.clone(), Arc::new(InMemoryBookingSink::new()));
        Fixture {
            manager,
            queue,
            offers,
            clock,
        }
    }

    async fn join_ab(fx: &Fixture) -> (WaitingListEntry, WaitingListEntry) {
        let a = fx.queue.join("a", "biz1", "svc1").await.unwrap();
        fx.clock.advance(Duration::seconds(1));
        let b = fx.queue.join("b", "biz1", "svc1").await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_slot_offer_goes_to_earliest_joined_on_tie() {
        let fx = fixture();
        let (a, _) = join_ab(&fx).await;

        let offer = fx
            .manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();
        assert_eq!(offer.entry_id, a.id);
        assert_eq!(offer.hold_expires_at, offer.created_at + Duration::minutes(120));
        assert!(offer.expiry_work_id.is_some());
        assert_eq!(fx.queue.get(a.id).await.unwrap().status, EntryStatus::Notified);

        // 邀约通知已发送，轮次回写到 Offer
        let stored = fx.offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(stored.notification_attempts, 1);

        // 同一时段不会再有第二个 Pending
        let err = fx
            .manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "SLOT_ALREADY_COMMITTED");
    }

    #[tokio::test]
    async fn test_empty_queue_has_no_eligible_customers() {
        let fx = fixture();
        let err = fx
            .manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NO_ELIGIBLE_CUSTOMERS");
    }

    #[tokio::test]
    async fn test_decline_offers_slot_to_next_entry() {
        let fx = fixture();
        let (a, b) = join_ab(&fx).await;
        let first = fx
            .manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();

        let resolution = fx
            .manager
            .resolve_offer(&first.token, Decision::Decline)
            .await
            .unwrap();
        let OfferResolution::Declined {
            next_offer: Some(next_id),
        } = resolution
        else {
            panic!("expected a follow-up offer, got {resolution:?}");
        };

        let next = fx.offers.get(next_id).await.unwrap().unwrap();
        assert_eq!(next.entry_id, b.id);
        assert_eq!(fx.queue.get(a.id).await.unwrap().status, EntryStatus::Active);

        // 已拒绝的凭证不能再使用
        let err = fx
            .manager
            .resolve_offer(&first.token, Decision::Accept)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "OFFER_NO_LONGER_AVAILABLE");
    }

    #[tokio::test]
    async fn test_accept_after_hold_window_expires_offer() {
        let fx = fixture();
        let (a, b) = join_ab(&fx).await;
        let offer = fx
            .manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();

        fx.clock.advance(Duration::minutes(120));
        let err = fx
            .manager
            .resolve_offer(&offer.token, Decision::Accept)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitlistError::OfferExpired(id) if id == offer.id));

        let stored = fx.offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OfferStatus::Expired);
        assert_eq!(fx.queue.get(a.id).await.unwrap().status, EntryStatus::Active);
        assert_eq!(fx.queue.get(b.id).await.unwrap().status, EntryStatus::Notified);
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let fx = fixture();
        let err = fx
            .manager
            .resolve_offer("does-not-exist", Decision::Accept)
            .await
            .unwrap_err();
        assert!(matches!(err, WaitlistError::OfferNotFound));
    }

    #[tokio::test]
    async fn test_withdraw_notified_entry_reoffers_slot() {
        let fx = fixture();
        let (a, b) = join_ab(&fx).await;
        let offer = fx
            .manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();

        let removed = fx
            .manager
            .withdraw_entry(a.id, RemovalReason::CustomerLeft)
            .await
            .unwrap();
        assert_eq!(removed.status, EntryStatus::Removed);

        let cancelled = fx.offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(cancelled.status, OfferStatus::Cancelled);
        let pending = fx.offers.find_pending_for_entry(b.id).await.unwrap();
        assert!(pending.is_some());

        // 重复离开不报错
        let again = fx
            .manager
            .withdraw_entry(a.id, RemovalReason::CustomerLeft)
            .await
            .unwrap();
        assert_eq!(again.status, EntryStatus::Removed);
    }

    #[tokio::test]
    async fn test_booking_sink_failure_still_returns_draft() {
        let mut sink = MockBookingSink::new();
        sink.expect_submit()
            .times(1)
            .returning(|_| Err(WaitlistError::Internal("booking service down".to_string())));
        let offers = Arc::new(InMemoryOfferRepository::new());
        let (manager, queue, _) = build(offers.clone(), Arc::new(sink));

        let a = queue.join("a", "biz1", "svc1").await.unwrap();
        let offer = manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();

        let resolution = manager
            .resolve_offer(&offer.token, Decision::Accept)
            .await
            .unwrap();
        let OfferResolution::Booked(draft) = resolution else {
            panic!("expected booking draft");
        };
        assert_eq!(draft.entry_id, a.id);
        assert_eq!(queue.get(a.id).await.unwrap().status, EntryStatus::Booked);
    }

    #[tokio::test]
    async fn test_accept_cancels_pending_siblings() {
        let inner = Arc::new(InMemoryOfferRepository::new());
        let (seed_manager, queue, clock) =
            build(inner.clone(), Arc::new(InMemoryBookingSink::new()));
        let a = queue.join("a", "biz1", "svc1").await.unwrap();
        clock.advance(Duration::seconds(1));
        let b = queue.join("b", "biz1", "svc1").await.unwrap();
        let accepted = seed_manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();
        let b = queue.mark_notified(&b).await.unwrap();

        // 构造一个同时段的遗留 Pending Offer
        let mut sibling = accepted.clone();
        sibling.id = Uuid::now_v7();
        sibling.token = "legacy".to_string();
        sibling.entry_id = b.id;
        sibling.customer_id = b.customer_id.clone();
        sibling.expiry_work_id = None;

        let mut repo = MockOfferRepository::new();
        let found = accepted.clone();
        repo.expect_find_by_token()
            .returning(move |_| Ok(Some(found.clone())));
        let current = accepted.clone();
        repo.expect_get()
            .returning(move |_| Ok(Some(current.clone())));
        let (first, second) = (accepted.clone(), sibling.clone());
        repo.expect_list_for_slot().returning(move |_, _, _| {
            let mut accepted = first.clone();
            accepted.status = OfferStatus::Accepted;
            Ok(vec![accepted, second.clone()])
        });
        let accepted_id = accepted.id;
        repo.expect_compare_and_set_status()
            .withf(move |id, from, to, _| {
                *id == accepted_id && *from == OfferStatus::Pending && *to == OfferStatus::Accepted
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        let sibling_id = sibling.id;
        repo.expect_compare_and_set_status()
            .withf(move |id, from, to, _| {
                *id == sibling_id && *from == OfferStatus::Pending && *to == OfferStatus::Cancelled
            })
            .times(1)
            .returning(|_, _, _, _| Ok(true));
        repo.expect_set_notification_attempts()
            .returning(|_, _| Ok(()));

        let (manager, _, _) = build(Arc::new(repo), Arc::new(InMemoryBookingSink::new()));
        // 两个管理器共用同一队列数据
        let manager = OfferLifecycleManager {
            queue: queue.clone(),
            ..manager
        };

        let resolution = manager
            .resolve_offer(&accepted.token, Decision::Accept)
            .await
            .unwrap();
        assert!(matches!(resolution, OfferResolution::Booked(_)));
        assert_eq!(queue.get(a.id).await.unwrap().status, EntryStatus::Booked);
        assert_eq!(queue.get(b.id).await.unwrap().status, EntryStatus::Active);
    }

    /// 第一次登记任务失败，之后正常
    #[derive(Default)]
    struct FailFirstInsert {
        inner: InMemoryScheduledWorkRepository,
        failed: AtomicBool,
    }

    #[async_trait]
    impl ScheduledWorkRepository for FailFirstInsert {
        async fn insert(&self, work: &ScheduledWork) -> Result<()> {
            if !self.failed.swap(true, Ordering::SeqCst) {
                return Err(WaitlistError::Internal("db timeout".to_string()));
            }
            self.inner.insert(work).await
        }
        async fn get(&self, id: Uuid) -> Result<Option<ScheduledWork>> {
            self.inner.get(id).await
        }
        async fn cancel(&self, id: Uuid) -> Result<bool> {
            self.inner.cancel(id).await
        }
        async fn claim_due(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<ScheduledWork>> {
            self.inner.claim_due(now, limit).await
        }
        async fn complete(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
            self.inner.complete(id, at).await
        }
        async fn reschedule(&self, id: Uuid, run_at: DateTime<Utc>, attempts: i32) -> Result<()> {
            self.inner.reschedule(id, run_at, attempts).await
        }
        async fn mark_failed(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
            self.inner.mark_failed(id, at).await
        }
    }

    /// 第一次把记录标记为 Notified 时失败
    #[derive(Default)]
    struct FailFirstNotify {
        inner: InMemoryWaitingListRepository,
        failed: AtomicBool,
    }

    #[async_trait]
    impl WaitingListRepository for FailFirstNotify {
        async fn insert(&self, entry: &WaitingListEntry) -> Result<()> {
            self.inner.insert(entry).await
        }
        async fn get(&self, id: Uuid) -> Result<Option<WaitingListEntry>> {
            self.inner.get(id).await
        }
        async fn find_waiting(
            &self,
            business_id: &str,
            service_id: &str,
            customer_id: &str,
        ) -> Result<Option<WaitingListEntry>> {
            self.inner
                .find_waiting(business_id, service_id, customer_id)
                .await
        }
        async fn list_active(
            &self,
            business_id: &str,
            service_id: &str,
        ) -> Result<Vec<WaitingListEntry>> {
            self.inner.list_active(business_id, service_id).await
        }
        async fn update_status(
            &self,
            id: Uuid,
            status: EntryStatus,
            removal_reason: Option<RemovalReason>,
            at: DateTime<Utc>,
        ) -> Result<()> {
            if status == EntryStatus::Notified && !self.failed.swap(true, Ordering::SeqCst) {
                return Err(WaitlistError::Internal("db timeout".to_string()));
            }
            self.inner.update_status(id, status, removal_reason, at).await
        }
    }

    #[tokio::test]
    async fn test_expiry_scheduling_failure_commits_nothing() {
        let mut work = MockScheduledWorkRepository::new();
        work.expect_insert()
            .times(1)
            .returning(|_| Err(WaitlistError::Internal("db timeout".to_string())));
        let offers = Arc::new(InMemoryOfferRepository::new());
        let (manager, queue, _) = build_with(
            offers.clone(),
            Arc::new(InMemoryBookingSink::new()),
            Arc::new(InMemoryWaitingListRepository::new()),
            Arc::new(work),
        );
        let a = queue.join("a", "biz1", "svc1").await.unwrap();

        let err = manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert!(
            offers
                .list_for_slot("biz1", "svc1", &slot())
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(queue.get(a.id).await.unwrap().status, EntryStatus::Active);
    }

    #[tokio::test]
    async fn test_slot_can_be_offered_again_after_scheduling_failure() {
        let offers = Arc::new(InMemoryOfferRepository::new());
        let (manager, queue, clock) = build_with(
            offers.clone(),
            Arc::new(InMemoryBookingSink::new()),
            Arc::new(InMemoryWaitingListRepository::new()),
            Arc::new(FailFirstInsert::default()),
        );
        let a = queue.join("a", "biz1", "svc1").await.unwrap();
        clock.advance(Duration::seconds(1));
        queue.join("b", "biz1", "svc1").await.unwrap();

        assert!(
            manager
                .notify_slot_available("biz1", "svc1", slot())
                .await
                .is_err()
        );

        let offer = manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();
        assert_eq!(offer.entry_id, a.id);
        assert!(offer.expiry_work_id.is_some());
        let stored = offers.get(offer.id).await.unwrap().unwrap();
        assert_eq!(stored.expiry_work_id, offer.expiry_work_id);
    }

    #[tokio::test]
    async fn test_entry_update_failure_rolls_back_offer() {
        let offers = Arc::new(InMemoryOfferRepository::new());
        let work = Arc::new(InMemoryScheduledWorkRepository::new());
        let (manager, queue, _) = build_with(
            offers.clone(),
            Arc::new(InMemoryBookingSink::new()),
            Arc::new(FailFirstNotify::default()),
            work.clone(),
        );
        let a = queue.join("a", "biz1", "svc1").await.unwrap();

        assert!(
            manager
                .notify_slot_available("biz1", "svc1", slot())
                .await
                .is_err()
        );

        let rolled_back = offers
            .list_for_slot("biz1", "svc1", &slot())
            .await
            .unwrap();
        assert_eq!(rolled_back.len(), 1);
        assert_eq!(rolled_back[0].status, OfferStatus::Cancelled);
        let work_id = rolled_back[0].expiry_work_id.unwrap();
        assert_eq!(
            work.get(work_id).await.unwrap().unwrap().status,
            WorkStatus::Cancelled
        );
        assert_eq!(queue.get(a.id).await.unwrap().status, EntryStatus::Active);

        // 撤回的 Offer 不占用时段，同一顾客仍可收到
        let offer = manager
            .notify_slot_available("biz1", "svc1", slot())
            .await
            .unwrap();
        assert_eq!(offer.entry_id, a.id);
        assert_eq!(queue.get(a.id).await.unwrap().status, EntryStatus::Notified);
    }
}
