//! 审计日志
//!
//! 记录每一次状态流转与派发尝试。写入失败只记录错误日志，
//! 不影响触发它的业务操作。

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::error;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::Result;
use crate::models::{
    AuditRecord, AuditSubject, ChannelResult, EntryStatus, NotificationJob, Offer, OfferStatus,
    WaitingListEntry,
};
use crate::repository::AuditRepository;

pub struct AuditLog {
    repo: Arc<dyn AuditRepository>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(repo: Arc<dyn AuditRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    pub async fn append(
        &self,
        subject_type: AuditSubject,
        subject_id: impl Into<String>,
        action: &str,
        detail: Value,
    ) {
        let record = AuditRecord {
            id: Uuid::now_v7(),
            subject_type,
            subject_id: subject_id.into(),
            action: action.to_string(),
            detail,
            recorded_at: self.clock.now(),
        };

        if let Err(e) = self.repo.append(&record).await {
            error!(
                subject_id = %record.subject_id,
                action = %record.action,
                error = %e,
                "写入审计日志失败"
            );
        }
    }

    pub async fn entry_transition(
        &self,
        entry: &WaitingListEntry,
        from: Option<EntryStatus>,
        to: EntryStatus,
    ) {
        self.append(
            AuditSubject::Entry,
            entry.id.to_string(),
            "entry_status_changed",
            json!({
                "business_id": entry.business_id,
                "service_id": entry.service_id,
                "customer_id": entry.customer_id,
                "from": from,
                "to": to,
                "removal_reason": entry.removal_reason,
            }),
        )
        .await;
    }

    pub async fn offer_transition(
        &self,
        offer: &Offer,
        from: Option<OfferStatus>,
        to: OfferStatus,
        cause: &str,
    ) {
        self.append(
            AuditSubject::Offer,
            offer.id.to_string(),
            "offer_status_changed",
            json!({
                "entry_id": offer.entry_id,
                "business_id": offer.business_id,
                "service_id": offer.service_id,
                "slot_start": offer.slot_start,
                "slot_end": offer.slot_end,
                "from": from,
                "to": to,
                "cause": cause,
            }),
        )
        .await;
    }

    pub async fn channel_attempt(&self, job: &NotificationJob, result: &ChannelResult) {
        self.append(
            AuditSubject::Notification,
            job.idempotency_key.clone(),
            "channel_attempt",
            json!({
                "event_type": job.event.event_type,
                "reference": job.event.reference,
                "attempt": job.attempts,
                "channel": result.channel,
                "status": result.status,
                "message_id": result.message_id,
                "detail": result.detail,
            }),
        )
        .await;
    }

    pub async fn dispatch_outcome(&self, job: &NotificationJob, outcome: &str) {
        self.append(
            AuditSubject::Notification,
            job.idempotency_key.clone(),
            "dispatch_outcome",
            json!({
                "event_type": job.event.event_type,
                "reference": job.event.reference,
                "customer_id": job.event.customer_id,
                "status": job.status,
                "attempts": job.attempts,
                "outcome": outcome,
                "last_error": job.last_error,
                "resume_at": job.resume_at,
            }),
        )
        .await;
    }

    /// 某个对象（候补记录、Offer、通知任务或地址哈希）的审计历史
    pub async fn history(&self, subject_id: &str) -> Result<Vec<AuditRecord>> {
        self.repo.list_by_subject(subject_id).await
    }
}
