//! 通知派发器
//!
//! 处理顺序：
//! 1. 按幂等键去重，同一事件只会投递一次
//! 2. 逐渠道做资格检查，不合格的渠道跳过且不再重试
//! 3. 非紧急事件遇到收件人免打扰时段时，整单延后到时段结束
//! 4. 并行投递；硬失败进入屏蔽名单，软失败按退避表持久化重试
//!
//! 派发失败不会回滚触发它的 Offer 状态。任务入库后的处理出错时登记重试，
//! 无法登记则把任务标记为 Failed，任务不会停留在无人处理的状态。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, instrument, warn};
use waitlist_shared::observability::metrics;
use waitlist_shared::retry::RetryPolicy;

use super::eligibility::{Eligibility, EligibilityGate};
use super::quiet_hours::QuietHours;
use super::suppression::SuppressionRegistry;
use super::transport::{OutboundMessage, SendOutcome, Transport};
use crate::audit::AuditLog;
use crate::clock::Clock;
use crate::directory::CustomerDirectory;
use crate::error::{Result, WaitlistError};
use crate::models::{
    BounceSeverity, Channel, ChannelResult, ChannelValidity, CustomerContact, EventType, JobStatus,
    NotificationJob, SendStatus, WorkKind,
};
use crate::repository::NotificationJobRepository;
use crate::scheduler::Scheduler;

/// 没有任何渠道通过资格检查
pub const NO_ELIGIBLE_CHANNEL: &str = "NoEligibleChannel";
/// 软失败达到投递次数上限
pub const RETRIES_EXHAUSTED: &str = "RetriesExhausted";
/// 所有尝试的渠道都是永久失败
pub const HARD_FAILURE: &str = "HardFailure";

/// 未结束的任务超过这个时间没有进展且没有待执行的恢复，重复投递时接手处理
const STALLED_AFTER_MINUTES: i64 = 15;

/// 单次派发的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// 同一幂等键的任务已存在，本次未重复投递
    Duplicate,
    Deferred { resume_at: DateTime<Utc> },
    RetryScheduled { retry_at: DateTime<Utc> },
    Failed { reason: String },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Duplicate => "duplicate",
            Self::Deferred { .. } => "deferred",
            Self::RetryScheduled { .. } => "retrying",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchResult {
    pub idempotency_key: String,
    pub event_type: EventType,
    pub reference: String,
    pub outcome: DispatchOutcome,
    /// 任务累计的发送轮次
    pub attempts: i32,
    pub channels: Vec<ChannelResult>,
}

impl DispatchResult {
    fn from_job(job: &NotificationJob, outcome: DispatchOutcome) -> Self {
        Self {
            idempotency_key: job.idempotency_key.clone(),
            event_type: job.event.event_type,
            reference: job.event.reference.clone(),
            outcome,
            attempts: job.attempts,
            channels: job.results.clone(),
        }
    }

    pub fn delivered_channels(&self) -> Vec<Channel> {
        self.channels
            .iter()
            .filter(|r| r.status == SendStatus::Sent)
            .map(|r| r.channel)
            .collect()
    }
}

pub struct NotificationDispatcher {
    jobs: Arc<dyn NotificationJobRepository>,
    directory: Arc<dyn CustomerDirectory>,
    gate: EligibilityGate,
    suppression: Arc<SuppressionRegistry>,
    scheduler: Arc<Scheduler>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    transports: HashMap<Channel, Arc<dyn Transport>>,
    quiet_hours: QuietHours,
    retry_policy: RetryPolicy,
}

impl NotificationDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        jobs: Arc<dyn NotificationJobRepository>,
        directory: Arc<dyn CustomerDirectory>,
        suppression: Arc<SuppressionRegistry>,
        scheduler: Arc<Scheduler>,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
        quiet_hours: QuietHours,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            directory,
            gate: EligibilityGate::new(suppression.clone()),
            suppression,
            scheduler,
            audit,
            clock,
            transports: HashMap::new(),
            quiet_hours,
            retry_policy,
        }
    }

    /// 注册投递通道，同一渠道后注册的覆盖先注册的
    pub fn register_transport(&mut self, transport: Arc<dyn Transport>) {
        info!(
            channel = transport.channel().as_str(),
            transport = transport.name(),
            "注册投递通道"
        );
        self.transports.insert(transport.channel(), transport);
    }

    pub fn has_transport(&self, channel: Channel) -> bool {
        self.transports.contains_key(&channel)
    }

    /// 派发一个新任务
    #[instrument(
        skip(self, job),
        fields(
            idempotency_key = %job.idempotency_key,
            event_type = job.event.event_type.as_str(),
            customer_id = %job.event.customer_id
        )
    )]
    pub async fn dispatch(&self, job: NotificationJob) -> Result<DispatchResult> {
        if !self.jobs.insert_if_absent(&job).await? {
            let existing = self
                .jobs
                .get(&job.idempotency_key)
                .await?
                .ok_or_else(|| WaitlistError::JobNotFound(job.idempotency_key.clone()))?;

            if existing.is_stalled(
                self.clock.now(),
                chrono::Duration::minutes(STALLED_AFTER_MINUTES),
            ) {
                warn!(
                    status = existing.status.as_str(),
                    updated_at = %existing.updated_at,
                    "通知任务停滞，接手继续处理"
                );
                return self.process_or_recover(existing).await;
            }

            info!(status = existing.status.as_str(), "通知任务已存在，跳过重复派发");
            metrics::record_dispatch(DispatchOutcome::Duplicate.as_str());
            return Ok(DispatchResult::from_job(
                &existing,
                DispatchOutcome::Duplicate,
            ));
        }

        self.process_or_recover(job).await
    }

    /// 继续处理已持久化的任务（免打扰结束或重试到期）
    #[instrument(skip(self))]
    pub async fn continue_job(&self, idempotency_key: &str) -> Result<DispatchResult> {
        let job = self
            .jobs
            .get(idempotency_key)
            .await?
            .ok_or_else(|| WaitlistError::JobNotFound(idempotency_key.to_string()))?;

        if job.status.is_final() {
            debug!(status = job.status.as_str(), "任务已结束，忽略重复触发");
            return Ok(DispatchResult::from_job(&job, DispatchOutcome::Duplicate));
        }

        self.process_or_recover(job).await
    }

    pub async fn get_job(&self, idempotency_key: &str) -> Result<Option<NotificationJob>> {
        self.jobs.get(idempotency_key).await
    }

    async fn process_or_recover(&self, job: NotificationJob) -> Result<DispatchResult> {
        let snapshot = job.clone();
        match self.process(job).await {
            Ok(result) => Ok(result),
            Err(e) => self.recover(snapshot, e).await,
        }
    }

    /// 处理中途出错：按退避表登记重试，出错本身计为一轮失败；
    /// 轮次用尽或无法登记时标记 Failed
    async fn recover(
        &self,
        snapshot: NotificationJob,
        cause: WaitlistError,
    ) -> Result<DispatchResult> {
        error!(
            error = %cause,
            error_code = cause.error_code(),
            "通知任务处理出错"
        );

        let mut job = match self.jobs.get(&snapshot.idempotency_key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => snapshot.clone(),
            Err(e) => {
                warn!(error = %e, "重新读取通知任务失败，使用内存中的副本");
                snapshot.clone()
            }
        };
        // 出错前已经记过本轮的不再重复计数
        if job.attempts <= snapshot.attempts {
            job.attempts = snapshot.attempts + 1;
        }
        job.last_error = Some(cause.to_string());

        if let Some(retry_at) = self.next_retry_at(job.attempts) {
            let scheduled = self
                .scheduler
                .schedule_at(
                    retry_at,
                    WorkKind::RetryNotification {
                        idempotency_key: job.idempotency_key.clone(),
                    },
                )
                .await;
            match scheduled {
                Ok(_) => {
                    job.status = JobStatus::Queued;
                    job.resume_at = Some(retry_at);
                    if let Err(e) = self.persist(&mut job).await {
                        // 重试任务已登记，届时按仓储中的状态继续
                        warn!(error = %e, "回写通知任务失败");
                    }
                    return self
                        .report(job, DispatchOutcome::RetryScheduled { retry_at })
                        .await;
                }
                Err(e) => {
                    error!(error = %e, "登记通知重试失败");
                }
            }
        }

        job.status = JobStatus::Failed;
        job.resume_at = None;
        let persisted = self.persist(&mut job).await;
        let outcome = DispatchOutcome::Failed {
            reason: cause.to_string(),
        };
        metrics::record_dispatch(outcome.as_str());
        self.audit.dispatch_outcome(&job, outcome.as_str()).await;
        match persisted {
            Ok(()) => Ok(DispatchResult::from_job(&job, outcome)),
            // 任务仍停在未结束状态，等待重复投递接手
            Err(_) => Err(cause),
        }
    }

    /// 第 `failed_rounds` 轮失败后的重试时间；轮次用尽返回 None
    fn next_retry_at(&self, failed_rounds: i32) -> Option<DateTime<Utc>> {
        let failed_rounds = failed_rounds.max(1) as u32;
        if !self.retry_policy.should_retry(failed_rounds - 1) {
            return None;
        }
        let delay = self.retry_policy.delay_for_attempt(failed_rounds - 1);
        let delay =
            chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::minutes(20));
        Some(self.clock.now() + delay)
    }

    async fn process(&self, mut job: NotificationJob) -> Result<DispatchResult> {
        let contact = self.directory.contact(&job.event.customer_id).await?;

        let targets = match &contact {
            Some(contact) => self.eligible_targets(&mut job, contact).await?,
            None => {
                warn!("顾客目录中没有联系方式");
                for channel in job.outstanding_channels() {
                    self.skip_channel(&mut job, channel, "no_contact").await;
                }
                Vec::new()
            }
        };

        if targets.is_empty() {
            let outcome = if job.delivered_channels().is_empty() {
                DispatchOutcome::Failed {
                    reason: NO_ELIGIBLE_CHANNEL.to_string(),
                }
            } else {
                DispatchOutcome::Sent
            };
            return self.finish(job, outcome).await;
        }

        if !job.is_urgent() {
            if let Some(resume_at) = self.quiet_resume_at(contact.as_ref()) {
                return self.defer(job, resume_at).await;
            }
        }

        self.send_round(&mut job, targets).await;
        let outcome = self.settle(&job);

        if let DispatchOutcome::RetryScheduled { retry_at } = &outcome {
            job.status = JobStatus::Queued;
            job.resume_at = Some(*retry_at);
            self.persist(&mut job).await?;
            self.scheduler
                .schedule_at(
                    *retry_at,
                    WorkKind::RetryNotification {
                        idempotency_key: job.idempotency_key.clone(),
                    },
                )
                .await?;
            return self.report(job, outcome).await;
        }

        self.finish(job, outcome).await
    }

    /// 对仍需投递的渠道做资格检查，返回 (渠道, 地址)
    async fn eligible_targets(
        &self,
        job: &mut NotificationJob,
        contact: &CustomerContact,
    ) -> Result<Vec<(Channel, String)>> {
        let mut targets = Vec::new();
        for channel in job.outstanding_channels() {
            if !self.has_transport(channel) {
                self.skip_channel(job, channel, "no_transport").await;
                continue;
            }
            match self
                .gate
                .check(contact, channel, job.event.event_type)
                .await?
            {
                Eligibility::Eligible { address } => targets.push((channel, address)),
                Eligibility::Ineligible(reason) => {
                    self.skip_channel(job, channel, reason.as_str()).await;
                }
            }
        }
        Ok(targets)
    }

    async fn skip_channel(&self, job: &mut NotificationJob, channel: Channel, reason: &str) {
        info!(channel = channel.as_str(), reason, "渠道未通过资格检查，跳过");
        if let Some(result) = job.result_mut(channel) {
            result.status = SendStatus::Skipped;
            result.detail = Some(reason.to_string());
        }
        metrics::record_channel_attempt(channel.as_str(), "skipped");
        if let Some(result) = job.results.iter().find(|r| r.channel == channel) {
            self.audit.channel_attempt(job, result).await;
        }
    }

    fn quiet_resume_at(&self, contact: Option<&CustomerContact>) -> Option<DateTime<Utc>> {
        let offset = match contact.map(|c| (c.utc_offset_minutes, c.utc_offset())) {
            Some((_, Some(offset))) => offset,
            Some((minutes, None)) => {
                warn!(utc_offset_minutes = minutes, "时区偏移无效，按 UTC 判断免打扰");
                FixedOffset::east_opt(0)?
            }
            None => FixedOffset::east_opt(0)?,
        };
        self.quiet_hours.resume_at(self.clock.now(), offset)
    }

    async fn defer(
        &self,
        mut job: NotificationJob,
        resume_at: DateTime<Utc>,
    ) -> Result<DispatchResult> {
        info!(resume_at = %resume_at, "收件人处于免打扰时段，延后发送");
        job.status = JobStatus::Deferred;
        job.resume_at = Some(resume_at);
        self.persist(&mut job).await?;
        self.scheduler
            .schedule_at(
                resume_at,
                WorkKind::ResumeNotification {
                    idempotency_key: job.idempotency_key.clone(),
                },
            )
            .await?;
        self.report(job, DispatchOutcome::Deferred { resume_at })
            .await
    }

    /// 并行投递一轮
    async fn send_round(&self, job: &mut NotificationJob, targets: Vec<(Channel, String)>) {
        job.status = JobStatus::Sending;
        job.attempts += 1;
        job.resume_at = None;
        if let Err(e) = self.persist(job).await {
            warn!(error = %e, "更新任务发送状态失败，继续投递");
        }

        let sends = targets.into_iter().filter_map(|(channel, address)| {
            let transport = self.transports.get(&channel)?.clone();
            let message = OutboundMessage {
                idempotency_key: job.idempotency_key.clone(),
                channel,
                template_id: job.event.template_id.clone(),
                data: job.event.data.clone(),
            };
            Some(async move {
                let outcome = match transport.send(&address, &message).await {
                    Ok(outcome) => outcome,
                    Err(e) => SendOutcome::SoftFail(e.to_string()),
                };
                (channel, address, outcome)
            })
        });
        let outcomes = join_all(sends).await;

        for (channel, address, outcome) in outcomes {
            let (status, message_id, detail) = match outcome {
                SendOutcome::Sent { message_id } => (SendStatus::Sent, Some(message_id), None),
                SendOutcome::HardFail(reason) => {
                    self.handle_hard_failure(&job.event.customer_id, channel, &address, &reason)
                        .await;
                    (SendStatus::HardFailed, None, Some(reason))
                }
                SendOutcome::SoftFail(reason) => {
                    warn!(channel = channel.as_str(), reason = %reason, "渠道临时失败");
                    (SendStatus::SoftFailed, None, Some(reason))
                }
            };

            let outcome_label = match status {
                SendStatus::Sent => "sent",
                SendStatus::HardFailed => "hard_fail",
                _ => "soft_fail",
            };
            metrics::record_channel_attempt(channel.as_str(), outcome_label);

            if let Some(result) = job.result_mut(channel) {
                result.status = status;
                result.message_id = message_id;
                result.detail = detail;
            }
            if let Some(result) = job.results.iter().find(|r| r.channel == channel) {
                self.audit.channel_attempt(job, result).await;
            }
        }
    }

    /// 硬失败：地址加入屏蔽名单，并把顾客该渠道标记为无效
    async fn handle_hard_failure(
        &self,
        customer_id: &str,
        channel: Channel,
        address: &str,
        reason: &str,
    ) {
        warn!(channel = channel.as_str(), reason = %reason, "渠道永久失败");
        if let Err(e) = self
            .suppression
            .record_bounce(channel, address, BounceSeverity::Hard, reason)
            .await
        {
            error!(channel = channel.as_str(), error = %e, "写入屏蔽名单失败");
        }
        if let Err(e) = self
            .directory
            .set_channel_validity(customer_id, channel, ChannelValidity::Invalid)
            .await
        {
            error!(channel = channel.as_str(), error = %e, "更新渠道有效性失败");
        }
    }

    /// 根据本轮结果决定下一步
    fn settle(&self, job: &NotificationJob) -> DispatchOutcome {
        let delivered = !job.delivered_channels().is_empty();

        if job.has_soft_failures() {
            if let Some(retry_at) = self.next_retry_at(job.attempts) {
                return DispatchOutcome::RetryScheduled { retry_at };
            }
            if delivered {
                return DispatchOutcome::Sent;
            }
            return DispatchOutcome::Failed {
                reason: RETRIES_EXHAUSTED.to_string(),
            };
        }

        if delivered {
            DispatchOutcome::Sent
        } else {
            DispatchOutcome::Failed {
                reason: HARD_FAILURE.to_string(),
            }
        }
    }

    async fn finish(
        &self,
        mut job: NotificationJob,
        outcome: DispatchOutcome,
    ) -> Result<DispatchResult> {
        match &outcome {
            DispatchOutcome::Failed { reason } => {
                job.status = JobStatus::Failed;
                job.last_error = Some(reason.clone());
                error!(
                    reason = %reason,
                    attempts = job.attempts,
                    "通知派发失败"
                );
            }
            _ => {
                job.status = JobStatus::Sent;
                info!(
                    attempts = job.attempts,
                    channels = ?job.delivered_channels(),
                    "通知派发完成"
                );
            }
        }
        job.resume_at = None;
        self.persist(&mut job).await?;
        self.report(job, outcome).await
    }

    async fn report(
        &self,
        job: NotificationJob,
        outcome: DispatchOutcome,
    ) -> Result<DispatchResult> {
        metrics::record_dispatch(outcome.as_str());
        self.audit.dispatch_outcome(&job, outcome.as_str()).await;
        Ok(DispatchResult::from_job(&job, outcome))
    }

    async fn persist(&self, job: &mut NotificationJob) -> Result<()> {
        job.updated_at = self.clock.now();
        self.jobs.update(job).await
    }
}
