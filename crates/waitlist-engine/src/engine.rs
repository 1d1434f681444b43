//! 候补引擎门面
//!
//! 组装队列、Offer 管理器、派发器与调度器，对外提供统一入口：
//!
//! - `join_waiting_list` / `leave_waiting_list` / `remove_from_waiting_list`
//! - `notify_slot_available` / `resolve_offer`
//! - `record_bounce` / `record_opt_out`
//! - `send_notification`：预约子系统的其他事件（取消、支付失败等）
//! - `handle_work`：持久化调度任务的执行入口

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use waitlist_shared::config::WaitlistConfig;

use crate::audit::AuditLog;
use crate::booking::BookingSink;
use crate::clock::Clock;
use crate::directory::CustomerDirectory;
use crate::dispatch::{
    DispatchResult, NotificationDispatcher, QuietHours, SuppressionRegistry, Transport,
};
use crate::error::Result;
use crate::lock::LockManager;
use crate::models::{
    AuditRecord, BounceSeverity, Channel, Decision, EventType, NotificationEvent,
    NotificationJob, Offer, OfferResolution, PriorityWeights, QueuePosition, RemovalReason, Slot,
    WaitingListEntry, WorkKind,
};
use crate::offer::OfferLifecycleManager;
use crate::queue::WaitingListQueue;
use crate::repository::{OfferRepository, Repositories};
use crate::scheduler::{Scheduler, WorkHandler};

pub struct WaitlistEngine {
    queue: Arc<WaitingListQueue>,
    offers: Arc<OfferLifecycleManager>,
    dispatcher: Arc<NotificationDispatcher>,
    suppression: Arc<SuppressionRegistry>,
    scheduler: Arc<Scheduler>,
    audit: Arc<AuditLog>,
    offer_repo: Arc<dyn OfferRepository>,
    clock: Arc<dyn Clock>,
}

impl WaitlistEngine {
    /// 按配置组装引擎；配置无效时返回错误
    pub fn new(
        config: &WaitlistConfig,
        repos: Repositories,
        directory: Arc<dyn CustomerDirectory>,
        bookings: Arc<dyn BookingSink>,
        transports: Vec<Arc<dyn Transport>>,
        locks: Arc<LockManager>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let (quiet_start, quiet_end) = config.quiet_hours()?;

        let audit = Arc::new(AuditLog::new(repos.audit.clone(), clock.clone()));
        let scheduler = Arc::new(Scheduler::new(repos.work.clone(), clock.clone()));
        let suppression = Arc::new(SuppressionRegistry::new(
            repos.suppressions.clone(),
            audit.clone(),
            clock.clone(),
            config.soft_bounce_threshold,
        ));

        let mut dispatcher = NotificationDispatcher::new(
            repos.jobs.clone(),
            directory.clone(),
            suppression.clone(),
            scheduler.clone(),
            audit.clone(),
            clock.clone(),
            QuietHours::new(quiet_start, quiet_end),
            config.retry_policy(),
        );
        for transport in transports {
            dispatcher.register_transport(transport);
        }
        let dispatcher = Arc::new(dispatcher);

        let queue = Arc::new(WaitingListQueue::new(
            repos.entries.clone(),
            directory.clone(),
            PriorityWeights {
                visit_weight: config.visit_weight,
                spend_weight: config.spend_weight,
            },
            audit.clone(),
            clock.clone(),
        ));

        let offers = Arc::new(OfferLifecycleManager::new(
            repos.offers.clone(),
            queue.clone(),
            dispatcher.clone(),
            scheduler.clone(),
            locks,
            directory,
            bookings,
            audit.clone(),
            clock.clone(),
            config.hold_duration(),
        ));

        info!(
            hold_minutes = config.hold_duration().num_minutes(),
            quiet_hours = %format!("{}-{}", config.quiet_hours_start, config.quiet_hours_end),
            max_send_attempts = config.max_send_attempts,
            "候补引擎初始化完成"
        );

        Ok(Self {
            queue,
            offers,
            dispatcher,
            suppression,
            scheduler,
            audit,
            offer_repo: repos.offers,
            clock,
        })
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        self.scheduler.clone()
    }

    #[instrument(skip(self))]
    pub async fn join_waiting_list(
        &self,
        customer_id: &str,
        business_id: &str,
        service_id: &str,
    ) -> Result<WaitingListEntry> {
        self.queue.join(customer_id, business_id, service_id).await
    }

    /// 顾客离开队列，重复调用无副作用
    #[instrument(skip(self))]
    pub async fn leave_waiting_list(&self, entry_id: Uuid) -> Result<WaitingListEntry> {
        self.offers
            .withdraw_entry(entry_id, RemovalReason::CustomerLeft)
            .await
    }

    /// 商家移除候补记录
    #[instrument(skip(self))]
    pub async fn remove_from_waiting_list(&self, entry_id: Uuid) -> Result<WaitingListEntry> {
        self.offers
            .withdraw_entry(entry_id, RemovalReason::BusinessRemoved)
            .await
    }

    #[instrument(skip(self))]
    pub async fn notify_slot_available(
        &self,
        business_id: &str,
        service_id: &str,
        slot: Slot,
    ) -> Result<Offer> {
        self.offers
            .notify_slot_available(business_id, service_id, slot)
            .await
    }

    #[instrument(skip(self, token))]
    pub async fn resolve_offer(&self, token: &str, decision: Decision) -> Result<OfferResolution> {
        self.offers.resolve_offer(token, decision).await
    }

    /// 投递通道回报的退信
    #[instrument(skip(self, address))]
    pub async fn record_bounce(
        &self,
        channel: Channel,
        address: &str,
        severity: BounceSeverity,
        reason: &str,
    ) -> Result<bool> {
        self.suppression
            .record_bounce(channel, address, severity, reason)
            .await
    }

    #[instrument(skip(self, address))]
    pub async fn record_opt_out(&self, channel: Channel, address: &str) -> Result<bool> {
        self.suppression.record_opt_out(channel, address).await
    }

    /// 派发任意业务事件，同一事件重复提交只会投递一次
    #[instrument(skip(self, event), fields(event_type = event.event_type.as_str()))]
    pub async fn send_notification(&self, event: NotificationEvent) -> Result<DispatchResult> {
        let job = NotificationJob::new(event, self.clock.now());
        self.dispatcher.dispatch(job).await
    }

    pub async fn queue_snapshot(
        &self,
        business_id: &str,
        service_id: &str,
    ) -> Result<Vec<QueuePosition>> {
        self.queue.snapshot(business_id, service_id).await
    }

    pub async fn get_entry(&self, entry_id: Uuid) -> Result<WaitingListEntry> {
        self.queue.get(entry_id).await
    }

    pub async fn get_offer(&self, offer_id: Uuid) -> Result<Option<Offer>> {
        self.offers.get_offer(offer_id).await
    }

    pub async fn offers_for_slot(
        &self,
        business_id: &str,
        service_id: &str,
        slot: &Slot,
    ) -> Result<Vec<Offer>> {
        self.offers
            .offers_for_slot(business_id, service_id, slot)
            .await
    }

    pub async fn get_notification(&self, idempotency_key: &str) -> Result<Option<NotificationJob>> {
        self.dispatcher.get_job(idempotency_key).await
    }

    pub async fn history(&self, subject_id: &str) -> Result<Vec<AuditRecord>> {
        self.audit.history(subject_id).await
    }

    /// 执行一个到期的调度任务
    #[instrument(skip(self), fields(kind = kind.label()))]
    pub async fn handle_work(&self, kind: &WorkKind) -> Result<()> {
        match kind {
            WorkKind::ExpireOffer { offer_id } => {
                self.offers.expire_offer(*offer_id).await?;
            }
            WorkKind::ResumeNotification { idempotency_key }
            | WorkKind::RetryNotification { idempotency_key } => {
                let result = self.dispatcher.continue_job(idempotency_key).await?;
                self.sync_offer_attempts(&result).await;
            }
        }
        Ok(())
    }

    /// 邀约通知的发送轮次回写到 Offer
    async fn sync_offer_attempts(&self, result: &DispatchResult) {
        if result.event_type != EventType::OfferCreated {
            return;
        }
        let Ok(offer_id) = Uuid::parse_str(&result.reference) else {
            return;
        };
        if let Err(e) = self
            .offer_repo
            .set_notification_attempts(offer_id, result.attempts)
            .await
        {
            warn!(offer_id = %offer_id, error = %e, "回写通知轮次失败");
        }
    }
}

#[async_trait]
impl WorkHandler for WaitlistEngine {
    async fn handle(&self, kind: &WorkKind) -> Result<()> {
        self.handle_work(kind).await
    }
}
